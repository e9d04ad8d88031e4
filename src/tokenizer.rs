use crate::data_type::DataType;
use crate::error::{Error, Result};

/// Represents the smallest meaningful units (atoms) of the SQL language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // --- SQL Keywords ---
    Select,
    From,
    Where,
    And,
    Or,
    Not,
    As,
    Distinct,
    Having,
    Asc,
    Desc,
    Insert,
    Into,
    Values,
    Update,
    Set,
    Delete,
    Returning,
    Do,
    Create,
    Drop,
    Alter,
    Truncate,
    Use,
    Call,
    Refresh,
    Table,
    Database,
    View,
    Materialized,
    Replace,
    With,
    Unique,
    Check,
    Default,
    Is,
    In,
    Like,
    Between,
    Case,
    When,
    Then,
    Else,
    End,
    Cast,
    Extract,
    Null,

    // --- Collapsed multi-word keywords ---
    /// `GROUP BY`
    GroupBy,
    /// `ORDER BY`
    OrderBy,
    /// `PRIMARY KEY`
    PrimaryKey,
    /// `NOT NULL` outside of an `IS` test.
    NotNull,
    /// `IS NULL`
    IsNull,
    /// `IS NOT NULL`
    IsNotNull,
    /// `ON CONFLICT`
    OnConflict,
    /// `LIMIT n`, carrying its count.
    Limit(usize),
    /// `OFFSET n`, carrying its count.
    Offset(usize),

    // --- Data Types ---
    Type(DataType),

    // --- Identifiers & Literals ---
    /// A name representing a table or a column (e.g., `users`, `id`).
    Ident(String),
    /// A `table.column` reference.
    QualifiedIdent { table: String, column: String },
    /// A `table.*` projection.
    QualifiedStar(String),
    /// A 64-bit integer literal (e.g., `42`).
    Number(i64),
    /// A string literal, between single or double quotes (e.g., `'Alice'`).
    String(String),
    /// A 64-bit floating-point literal (e.g., `3.14`).
    FloatNumber(f64),
    /// The boolean literal `TRUE`.
    True,
    /// The boolean literal `FALSE`.
    False,

    // --- Symbols ---
    /// Left parenthesis `(`
    LeftParen,
    /// Right parenthesis `)`
    RightParen,
    /// Comma `,`
    Comma,
    /// Semicolon `;`
    Semicolon,
    /// Multiplication or wildcard symbol `*`
    Star,
    Plus,
    Minus,
    Slash,
    /// Greater than
    Greater,
    GreaterEqual,
    /// Lower than
    Lower,
    LowerEqual,
    /// Equal to
    Equal,
    /// `!=` or `<>`
    NotEqual,

    // --- Special ---
    /// Represents the End Of File/Input.
    Eof,
}

impl Token {
    /// Tokens after which a `-` is a binary operator rather than a sign.
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            Self::Ident(_)
                | Self::QualifiedIdent { .. }
                | Self::Number(_)
                | Self::FloatNumber(_)
                | Self::String(_)
                | Self::True
                | Self::False
                | Self::Null
                | Self::RightParen
        )
    }
}

/// A token and the character offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

const KEYWORDS: &[(&str, Token)] = &[
    ("SELECT", Token::Select),
    ("FROM", Token::From),
    ("WHERE", Token::Where),
    ("AND", Token::And),
    ("OR", Token::Or),
    ("AS", Token::As),
    ("DISTINCT", Token::Distinct),
    ("HAVING", Token::Having),
    ("ASC", Token::Asc),
    ("DESC", Token::Desc),
    ("INSERT", Token::Insert),
    ("INTO", Token::Into),
    ("VALUES", Token::Values),
    ("UPDATE", Token::Update),
    ("SET", Token::Set),
    ("DELETE", Token::Delete),
    ("RETURNING", Token::Returning),
    ("DO", Token::Do),
    ("CREATE", Token::Create),
    ("DROP", Token::Drop),
    ("ALTER", Token::Alter),
    ("TRUNCATE", Token::Truncate),
    ("USE", Token::Use),
    ("CALL", Token::Call),
    ("REFRESH", Token::Refresh),
    ("TABLE", Token::Table),
    ("DATABASE", Token::Database),
    ("VIEW", Token::View),
    ("MATERIALIZED", Token::Materialized),
    ("REPLACE", Token::Replace),
    ("WITH", Token::With),
    ("UNIQUE", Token::Unique),
    ("CHECK", Token::Check),
    ("DEFAULT", Token::Default),
    ("IS", Token::Is),
    ("IN", Token::In),
    ("LIKE", Token::Like),
    ("BETWEEN", Token::Between),
    ("CASE", Token::Case),
    ("WHEN", Token::When),
    ("THEN", Token::Then),
    ("ELSE", Token::Else),
    ("END", Token::End),
    ("CAST", Token::Cast),
    ("EXTRACT", Token::Extract),
    ("TRUE", Token::True),
    ("FALSE", Token::False),
];

/// A lexical scanner (lexer) that converts a raw SQL string into a sequence of [Token]s.
pub struct Tokenizer {
    /// The input string stored as a vector of characters for easy iteration.
    input: Vec<char>,
    /// The current position in the character vector.
    position: usize,
    /// Tokens produced so far; some keywords rewrite the previous one.
    tokens: Vec<Spanned>,
}

impl Tokenizer {
    /// Creates a new Tokenizer for the given input string.
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            tokens: Vec::new(),
        }
    }

    /// Processes the entire input and returns the tokens with their positions,
    /// terminated by [Token::Eof].
    ///
    /// # Errors
    /// Returns [Error::Lex] if an invalid character is encountered, if a literal
    /// is malformed, or if a multi-word keyword is incomplete.
    ///
    /// # Example
    /// ```
    /// # use quartz::tokenizer::{Tokenizer, Token};
    /// let tokens = Tokenizer::new("SELECT * LIMIT 5").tokenize().unwrap();
    /// assert_eq!(tokens[0].token, Token::Select);
    /// assert_eq!(tokens[2].token, Token::Limit(5));
    /// ```
    pub fn tokenize(mut self) -> Result<Vec<Spanned>> {
        loop {
            self.skip_whitespace();
            if self.is_at_end() {
                break;
            }
            let start = self.position;
            if let Some(token) = self.next_token()? {
                self.tokens.push(Spanned {
                    token,
                    position: start,
                });
            }
        }
        self.tokens.push(Spanned {
            token: Token::Eof,
            position: self.position,
        });
        Ok(self.tokens)
    }

    /// Shorthand returning only the tokens.
    pub fn tokens(input: &str) -> Result<Vec<Token>> {
        Ok(Self::new(input)
            .tokenize()?
            .into_iter()
            .map(|s| s.token)
            .collect())
    }

    /// Identifies the next token based on the character at the current position.
    ///
    /// Returns `None` when the word merged into the previous token.
    fn next_token(&mut self) -> Result<Option<Token>> {
        let ch = self.current_char();
        let single = |token| Ok(Some(token));

        match ch {
            '(' => {
                self.advance();
                single(Token::LeftParen)
            }
            ')' => {
                self.advance();
                single(Token::RightParen)
            }
            ',' => {
                self.advance();
                single(Token::Comma)
            }
            ';' => {
                self.advance();
                single(Token::Semicolon)
            }
            '*' => {
                self.advance();
                single(Token::Star)
            }
            '+' => {
                self.advance();
                single(Token::Plus)
            }
            '/' => {
                self.advance();
                single(Token::Slash)
            }
            '=' => {
                self.advance();
                single(Token::Equal)
            }
            '!' => {
                self.advance();
                if self.eat_char('=') {
                    single(Token::NotEqual)
                } else {
                    Err(self.error("expected '=' after '!'"))
                }
            }
            '<' => {
                self.advance();
                if self.eat_char('=') {
                    single(Token::LowerEqual)
                } else if self.eat_char('>') {
                    single(Token::NotEqual)
                } else {
                    single(Token::Lower)
                }
            }
            '>' => {
                self.advance();
                if self.eat_char('=') {
                    single(Token::GreaterEqual)
                } else {
                    single(Token::Greater)
                }
            }
            '-' => {
                let signed = self.peek_char(1).is_some_and(|c| c.is_ascii_digit())
                    && !self.previous().is_some_and(Token::ends_operand);
                if signed {
                    self.read_number().map(Some)
                } else {
                    self.advance();
                    single(Token::Minus)
                }
            }
            '\'' | '"' => self.read_string(ch).map(Some),
            c if c.is_ascii_digit() => self.read_number().map(Some),
            c if c.is_alphabetic() || c == '_' => self.read_identifier(),
            _ => Err(self.error(&format!("unexpected character '{ch}'"))),
        }
    }

    // --- Navigation Helpers ---

    /// Returns the character at the current position.
    fn current_char(&self) -> char {
        self.input[self.position]
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    /// Moves the cursor forward by one character.
    fn advance(&mut self) {
        self.position += 1;
    }

    fn eat_char(&mut self, expected: char) -> bool {
        if !self.is_at_end() && self.current_char() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Checks if the cursor has reached the end of the input.
    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    /// Consumes any whitespace characters (spaces, tabs, newlines).
    fn skip_whitespace(&mut self) {
        while !self.is_at_end() && self.current_char().is_whitespace() {
            self.advance();
        }
    }

    fn previous(&self) -> Option<&Token> {
        self.tokens.last().map(|s| &s.token)
    }

    fn error(&self, message: &str) -> Error {
        Error::Lex {
            message: message.to_string(),
            position: self.position,
        }
    }

    // --- Extraction Logic ---

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while !self.is_at_end()
            && (self.current_char().is_alphanumeric() || self.current_char() == '_')
        {
            word.push(self.current_char());
            self.advance();
        }
        word
    }

    /// Consumes the next word if it equals `expected`, ignoring case.
    fn eat_word(&mut self, expected: &str) -> bool {
        let saved = self.position;
        self.skip_whitespace();
        if !self.is_at_end() && self.read_word().eq_ignore_ascii_case(expected) {
            return true;
        }
        self.position = saved;
        false
    }

    fn expect_word(&mut self, first: &str, expected: &str) -> Result<()> {
        if self.eat_word(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("{first} must be followed by {expected}")))
        }
    }

    /// Reads the digits following `LIMIT` or `OFFSET`.
    fn read_count(&mut self, keyword: &str) -> Result<usize> {
        self.skip_whitespace();
        let mut digits = String::new();
        while !self.is_at_end() && self.current_char().is_ascii_digit() {
            digits.push(self.current_char());
            self.advance();
        }
        digits
            .parse()
            .map_err(|_| self.error(&format!("{keyword} expects a non-negative integer")))
    }

    /// Reads a sequence of alphanumeric characters and determines if it's
    /// a reserved SQL keyword or a user-defined identifier.
    ///
    /// Keywords are matched case-insensitively.
    fn read_identifier(&mut self) -> Result<Option<Token>> {
        let word = self.read_word();
        let upper = word.to_ascii_uppercase();

        let token = match upper.as_str() {
            "NOT" => {
                if self.eat_word("NULL") {
                    if self.previous() == Some(&Token::Is) {
                        self.replace_previous(Token::IsNotNull);
                        return Ok(None);
                    }
                    Token::NotNull
                } else {
                    Token::Not
                }
            }
            "NULL" => {
                if self.previous() == Some(&Token::Is) {
                    self.replace_previous(Token::IsNull);
                    return Ok(None);
                }
                Token::Null
            }
            "PRIMARY" => {
                self.expect_word("PRIMARY", "KEY")?;
                Token::PrimaryKey
            }
            "ORDER" => {
                self.expect_word("ORDER", "BY")?;
                Token::OrderBy
            }
            "GROUP" => {
                self.expect_word("GROUP", "BY")?;
                Token::GroupBy
            }
            "ON" => {
                self.expect_word("ON", "CONFLICT")?;
                Token::OnConflict
            }
            "KEY" => return Err(self.error("KEY must follow PRIMARY")),
            "BY" => return Err(self.error("BY must follow ORDER or GROUP")),
            "LIMIT" => Token::Limit(self.read_count("LIMIT")?),
            "OFFSET" => Token::Offset(self.read_count("OFFSET")?),
            _ => {
                if let Some(data_type) = DataType::from_keyword(&upper) {
                    Token::Type(data_type)
                } else if let Some((_, keyword)) = KEYWORDS.iter().find(|(k, _)| *k == upper) {
                    keyword.clone()
                } else {
                    self.read_qualified(word)
                }
            }
        };
        Ok(Some(token))
    }

    /// `name.column` and `name.*` directly after an identifier.
    fn read_qualified(&mut self, table: String) -> Token {
        if self.peek_char(0) != Some('.') {
            return Token::Ident(table);
        }
        match self.peek_char(1) {
            Some('*') => {
                self.position += 2;
                Token::QualifiedStar(table)
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                self.advance();
                let column = self.read_word();
                Token::QualifiedIdent { table, column }
            }
            _ => Token::Ident(table),
        }
    }

    fn replace_previous(&mut self, token: Token) {
        if let Some(last) = self.tokens.last_mut() {
            last.token = token;
        }
    }

    /// Reads a numeric literal, with an optional leading `-`. If a dot `.` is
    /// encountered, it returns a [Token::FloatNumber], otherwise a [Token::Number].
    fn read_number(&mut self) -> Result<Token> {
        let start = self.position;
        let mut number = String::new();
        if self.eat_char('-') {
            number.push('-');
        }
        let mut has_dot = false;

        while !self.is_at_end()
            && (self.current_char().is_ascii_digit() || (self.current_char() == '.' && !has_dot))
        {
            if self.current_char() == '.' {
                has_dot = true;
            }
            number.push(self.current_char());
            self.advance();
        }

        if !self.is_at_end() && self.current_char() == '.' {
            return Err(self.error("multiple dots are not allowed for a float"));
        }

        let invalid = || Error::Lex {
            message: format!("invalid number literal '{number}'"),
            position: start,
        };
        if has_dot {
            return number
                .parse::<f64>()
                .map(Token::FloatNumber)
                .map_err(|_| invalid());
        }
        number.parse::<i64>().map(Token::Number).map_err(|_| invalid())
    }

    /// Reads a string literal enclosed in `quote`. A doubled quote inside the
    /// literal stands for one quote character.
    fn read_string(&mut self, quote: char) -> Result<Token> {
        let start = self.position;
        self.advance(); // Skip the opening quote

        let mut string = String::new();
        loop {
            if self.is_at_end() {
                return Err(Error::Lex {
                    message: "unterminated string".into(),
                    position: start,
                });
            }
            let c = self.current_char();
            self.advance();
            if c == quote {
                if self.eat_char(quote) {
                    string.push(quote);
                    continue;
                }
                break;
            }
            string.push(c);
        }

        Ok(Token::String(string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_simple() {
        let tokens = Tokenizer::tokens("CREATE TABLE users").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Create,
                Token::Table,
                Token::Ident("users".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_create_table() {
        let tokens = Tokenizer::tokens("CREATE TABLE users (id SERIAL PRIMARY KEY, name TEXT NOT NULL)")
            .unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Create,
                Token::Table,
                Token::Ident("users".into()),
                Token::LeftParen,
                Token::Ident("id".into()),
                Token::Type(DataType::Serial),
                Token::PrimaryKey,
                Token::Comma,
                Token::Ident("name".into()),
                Token::Type(DataType::Text),
                Token::NotNull,
                Token::RightParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let spans = Tokenizer::new("SELECT  a").tokenize().unwrap();
        assert_eq!(spans[0].position, 0);
        assert_eq!(spans[1].position, 8);
        assert_eq!(spans[2].position, 9);
    }

    #[test]
    fn test_tokenize_numbers() {
        let tokens = Tokenizer::tokens("42, 1.14, -7").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Number(42),
                Token::Comma,
                Token::FloatNumber(1.14),
                Token::Comma,
                Token::Number(-7),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_minus_after_operand_is_an_operator() {
        let tokens = Tokenizer::tokens("a -1").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".into()),
                Token::Minus,
                Token::Number(1),
                Token::Eof
            ]
        );
        let tokens = Tokenizer::tokens("= -1").unwrap();
        assert_eq!(tokens[1], Token::Number(-1));
    }

    #[test]
    fn test_tokenize_strings() {
        let tokens = Tokenizer::tokens("'Alice', \"Bob\", 'it''s', ''").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::String("Alice".into()),
                Token::Comma,
                Token::String("Bob".into()),
                Token::Comma,
                Token::String("it's".into()),
                Token::Comma,
                Token::String(String::new()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let result = Tokenizer::tokens("'hello");
        assert!(matches!(result, Err(Error::Lex { position: 0, .. })));
    }

    #[test]
    fn test_null_tests_collapse() {
        let tokens = Tokenizer::tokens("a IS NULL OR b IS NOT NULL").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".into()),
                Token::IsNull,
                Token::Or,
                Token::Ident("b".into()),
                Token::IsNotNull,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_multi_word_keywords() {
        let tokens = Tokenizer::tokens("group by x order  by y limit 10 offset 2").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::GroupBy,
                Token::Ident("x".into()),
                Token::OrderBy,
                Token::Ident("y".into()),
                Token::Limit(10),
                Token::Offset(2),
                Token::Eof,
            ]
        );
        assert_eq!(Tokenizer::tokens("ON CONFLICT").unwrap()[0], Token::OnConflict);
    }

    #[test]
    fn test_keyword_errors() {
        assert!(Tokenizer::tokens("SELECT a BY b").is_err());
        assert!(Tokenizer::tokens("KEY").is_err());
        assert!(Tokenizer::tokens("PRIMARY id").is_err());
        assert!(Tokenizer::tokens("LIMIT x").is_err());
    }

    #[test]
    fn test_qualified_names() {
        let tokens = Tokenizer::tokens("u.name, u.*, excluded.qty").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::QualifiedIdent {
                    table: "u".into(),
                    column: "name".into()
                },
                Token::Comma,
                Token::QualifiedStar("u".into()),
                Token::Comma,
                Token::QualifiedIdent {
                    table: "excluded".into(),
                    column: "qty".into()
                },
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        let tokens = Tokenizer::tokens("<= >= <> != < > + / =").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::LowerEqual,
                Token::GreaterEqual,
                Token::NotEqual,
                Token::NotEqual,
                Token::Lower,
                Token::Greater,
                Token::Plus,
                Token::Slash,
                Token::Equal,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_unknown_character_reports_position() {
        let err = Tokenizer::tokens("SELECT @").unwrap_err();
        assert_eq!(
            err,
            Error::Lex {
                message: "unexpected character '@'".into(),
                position: 7
            }
        );
    }
}
