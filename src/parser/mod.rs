//! Recursive-descent parser turning tokens into [Statement]s.

mod expr;

use crate::ast::*;
use crate::data_type::DataType;
use crate::error::{Error, Result};
use crate::table::{ColumnDef, Constraint};
use crate::tokenizer::{Spanned, Token, Tokenizer};

/// Parses exactly one statement, with an optional trailing `;`.
pub fn parse_statement(sql: &str) -> Result<Statement> {
    Parser::new(Tokenizer::new(sql).tokenize()?).parse()
}

/// Parses a `;`-separated script.
pub fn parse_script(sql: &str) -> Result<Vec<Statement>> {
    Parser::new(Tokenizer::new(sql).tokenize()?).parse_all()
}

pub struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parses a single statement and requires the input to end after it.
    pub fn parse(mut self) -> Result<Statement> {
        let statement = self.parse_statement()?;

        // semicolon is optional in SQL so skip it
        if matches!(self.current_token(), Token::Semicolon) {
            self.advance();
        }

        if !self.is_at_end() {
            return Err(self.unexpected("after statement"));
        }
        Ok(statement)
    }

    /// Parses every statement in the input. Empty statements are skipped.
    pub fn parse_all(mut self) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            while matches!(self.current_token(), Token::Semicolon) {
                self.advance();
            }
            if self.is_at_end() {
                break;
            }
            statements.push(self.parse_statement()?);
            match self.current_token() {
                Token::Semicolon => self.advance(),
                Token::Eof => break,
                _ => return Err(self.unexpected("expected ';' between statements")),
            }
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.current_token() {
            Token::Select | Token::With => Ok(Statement::Select(Box::new(self.parse_query()?))),
            Token::Insert => self.parse_insert(),
            Token::Update => self.parse_update(),
            Token::Delete => self.parse_delete(),
            Token::Create => self.parse_create(),
            Token::Drop => self.parse_drop(),
            Token::Alter => self.parse_alter(),
            Token::Truncate => {
                self.advance();
                self.eat_if(&Token::Table);
                Ok(Statement::Truncate(self.consume_ident()?))
            }
            Token::Use => {
                self.advance();
                self.eat_if(&Token::Database);
                Ok(Statement::Use(self.consume_ident()?))
            }
            Token::Refresh => {
                self.advance();
                self.consume(Token::Materialized)?;
                self.consume(Token::View)?;
                Ok(Statement::RefreshMaterializedView(self.consume_ident()?))
            }
            Token::Call => self.parse_call(),
            _ => Err(self.unexpected("at start of statement")),
        }
    }

    // --- helpers ---

    fn current_token(&self) -> &Token {
        &self.tokens[self.position].token
    }

    fn peek_token(&self, offset: usize) -> &Token {
        let idx = (self.position + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn current_position(&self) -> usize {
        self.tokens[self.position].position
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_token(), Token::Eof)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        let position = (!self.is_at_end()).then(|| self.current_position());
        Error::syntax(message, position)
    }

    fn unexpected(&self, context: &str) -> Error {
        if self.is_at_end() {
            return self.error(format!("unexpected end of input {context}"));
        }
        self.error(format!("unexpected token {:?} {context}", self.current_token()))
    }

    fn check(&self, expected: &Token) -> bool {
        self.current_token() == expected
    }

    fn eat_if(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, expected: Token) -> Result<()> {
        if self.eat_if(&expected) {
            Ok(())
        } else if self.is_at_end() {
            Err(self.error(format!("expected {expected:?}, found end of input")))
        } else {
            Err(self.error(format!(
                "expected {expected:?}, found {:?}",
                self.current_token()
            )))
        }
    }

    fn consume_ident(&mut self) -> Result<String> {
        match self.current_token() {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("where an identifier was expected")),
        }
    }

    /// Words such as `TO` or `NOTHING` are only keywords in one position and
    /// stay usable as column names elsewhere.
    fn check_keyword(&self, word: &str) -> bool {
        matches!(self.current_token(), Token::Ident(name) if name.eq_ignore_ascii_case(word))
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.check_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume_keyword(&mut self, word: &str) -> Result<()> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("where {word} was expected")))
        }
    }

    fn parse_ident_list(&mut self) -> Result<Vec<String>> {
        self.consume(Token::LeftParen)?;
        let mut names = vec![self.consume_ident()?];
        while self.eat_if(&Token::Comma) {
            names.push(self.consume_ident()?);
        }
        self.consume(Token::RightParen)?;
        Ok(names)
    }

    fn parse_if_exists(&mut self) -> Result<bool> {
        if self.check_keyword("IF") {
            self.advance();
            self.consume_keyword("EXISTS")?;
            return Ok(true);
        }
        Ok(false)
    }

    // --- queries ---

    /// `[WITH cte AS (...), ...] SELECT ...`
    fn parse_query(&mut self) -> Result<Select> {
        let mut ctes = Vec::new();
        if self.eat_if(&Token::With) {
            loop {
                let name = self.consume_ident()?;
                self.consume(Token::As)?;
                self.consume(Token::LeftParen)?;
                let query = self.parse_query()?;
                self.consume(Token::RightParen)?;
                ctes.push(Cte {
                    name,
                    query: Box::new(query),
                });
                if !self.eat_if(&Token::Comma) {
                    break;
                }
            }
        }
        let mut select = self.parse_select()?;
        select.ctes = ctes;
        Ok(select)
    }

    fn parse_select(&mut self) -> Result<Select> {
        self.consume(Token::Select)?;
        let distinct = self.eat_if(&Token::Distinct);
        let columns = self.parse_projection()?;

        let from = if self.eat_if(&Token::From) {
            self.parse_sources()?
        } else {
            Vec::new()
        };

        let where_clause = if self.eat_if(&Token::Where) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.eat_if(&Token::GroupBy) {
            group_by.push(self.parse_expression()?);
            while self.eat_if(&Token::Comma) {
                group_by.push(self.parse_expression()?);
            }
        }

        let having = if self.eat_if(&Token::Having) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.eat_if(&Token::OrderBy) {
            loop {
                let expr = self.parse_expression()?;
                let direction = if self.eat_if(&Token::Desc) {
                    SortDirection::Desc
                } else {
                    self.eat_if(&Token::Asc);
                    SortDirection::Asc
                };
                order_by.push(OrderByClause { expr, direction });
                if !self.eat_if(&Token::Comma) {
                    break;
                }
            }
        }

        // LIMIT and OFFSET are accepted in either order
        let mut limit = None;
        let mut offset = None;
        loop {
            match self.current_token() {
                Token::Limit(n) if limit.is_none() => {
                    limit = Some(*n);
                    self.advance();
                }
                Token::Offset(n) if offset.is_none() => {
                    offset = Some(*n);
                    self.advance();
                }
                _ => break,
            }
        }

        Ok(Select {
            ctes: Vec::new(),
            distinct,
            columns,
            from,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_projection(&mut self) -> Result<Vec<SelectItem>> {
        let mut items = vec![self.parse_select_item()?];
        while self.eat_if(&Token::Comma) {
            items.push(self.parse_select_item()?);
        }
        Ok(items)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        match self.current_token() {
            Token::Star => {
                self.advance();
                Ok(SelectItem::Wildcard)
            }
            Token::QualifiedStar(table) => {
                let table = table.clone();
                self.advance();
                Ok(SelectItem::QualifiedWildcard(table))
            }
            _ => {
                let expr = self.parse_expression()?;
                let alias = self.parse_alias()?;
                Ok(SelectItem::Expr { expr, alias })
            }
        }
    }

    /// `AS name` or a bare trailing identifier.
    fn parse_alias(&mut self) -> Result<Option<String>> {
        if self.eat_if(&Token::As) {
            return self.consume_ident().map(Some);
        }
        if matches!(self.current_token(), Token::Ident(_)) {
            return self.consume_ident().map(Some);
        }
        Ok(None)
    }

    fn parse_sources(&mut self) -> Result<Vec<TableRef>> {
        let mut sources = Vec::new();
        loop {
            if self.eat_if(&Token::LeftParen) {
                let query = self.parse_query()?;
                self.consume(Token::RightParen)?;
                let alias = self.parse_alias()?;
                sources.push(TableRef::Subquery {
                    query: Box::new(query),
                    alias,
                });
            } else {
                let name = self.consume_ident()?;
                let alias = self.parse_alias()?;
                sources.push(TableRef::Named { name, alias });
            }
            if !self.eat_if(&Token::Comma) {
                break;
            }
        }
        Ok(sources)
    }

    // --- data manipulation ---

    fn parse_insert(&mut self) -> Result<Statement> {
        self.consume(Token::Insert)?;
        self.consume(Token::Into)?;
        let table = self.consume_ident()?;

        let mut groups = Vec::new();
        while self.check(&Token::LeftParen) || self.check(&Token::Values) {
            let columns = if self.check(&Token::LeftParen) {
                Some(self.parse_ident_list()?)
            } else {
                None
            };
            self.consume(Token::Values)?;
            let mut rows = Vec::new();
            loop {
                self.consume(Token::LeftParen)?;
                let mut row = vec![self.parse_expression()?];
                while self.eat_if(&Token::Comma) {
                    row.push(self.parse_expression()?);
                }
                self.consume(Token::RightParen)?;
                rows.push(row);
                if !self.eat_if(&Token::Comma) {
                    break;
                }
            }
            groups.push(ValuesGroup { columns, rows });
        }
        if groups.is_empty() {
            return Err(self.unexpected("where VALUES was expected"));
        }

        let on_conflict = if self.eat_if(&Token::OnConflict) {
            Some(self.parse_on_conflict()?)
        } else {
            None
        };
        let returning = self.parse_returning()?;

        Ok(Statement::Insert(Insert {
            table,
            groups,
            on_conflict,
            returning,
        }))
    }

    fn parse_on_conflict(&mut self) -> Result<OnConflict> {
        let target = if self.check(&Token::LeftParen) {
            self.parse_ident_list()?
        } else {
            Vec::new()
        };
        self.consume(Token::Do)?;
        if self.eat_keyword("NOTHING") {
            return Ok(OnConflict {
                target,
                action: ConflictAction::DoNothing,
            });
        }
        if self.eat_if(&Token::Update) {
            if !self.eat_if(&Token::Set) {
                return Err(Error::ConflictResolution(
                    "ON CONFLICT DO UPDATE requires a SET clause".into(),
                ));
            }
            let assignments = self.parse_assignments()?;
            return Ok(OnConflict {
                target,
                action: ConflictAction::DoUpdate(assignments),
            });
        }
        Err(self.unexpected("after ON CONFLICT DO"))
    }

    fn parse_assignments(&mut self) -> Result<Vec<Assignment>> {
        let mut assignments = Vec::new();
        loop {
            let column = self.consume_ident()?;
            self.consume(Token::Equal)?;
            let value = self.parse_expression()?;
            assignments.push(Assignment { column, value });
            if !self.eat_if(&Token::Comma) {
                break;
            }
        }
        Ok(assignments)
    }

    fn parse_returning(&mut self) -> Result<Vec<SelectItem>> {
        if self.eat_if(&Token::Returning) {
            self.parse_projection()
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_optional_where(&mut self) -> Result<Option<Expr>> {
        if self.eat_if(&Token::Where) {
            Ok(Some(self.parse_expression()?))
        } else {
            Ok(None)
        }
    }

    fn parse_update(&mut self) -> Result<Statement> {
        self.consume(Token::Update)?;
        let table = self.consume_ident()?;
        self.consume(Token::Set)?;
        let assignments = self.parse_assignments()?;
        let where_clause = self.parse_optional_where()?;
        let returning = self.parse_returning()?;
        Ok(Statement::Update(Update {
            table,
            assignments,
            where_clause,
            returning,
        }))
    }

    fn parse_delete(&mut self) -> Result<Statement> {
        self.consume(Token::Delete)?;
        self.consume(Token::From)?;
        let table = self.consume_ident()?;
        let where_clause = self.parse_optional_where()?;
        let returning = self.parse_returning()?;
        Ok(Statement::Delete(Delete {
            table,
            where_clause,
            returning,
        }))
    }

    // --- definitions ---

    fn parse_create(&mut self) -> Result<Statement> {
        self.consume(Token::Create)?;
        let or_replace = if self.eat_if(&Token::Or) {
            self.consume(Token::Replace)?;
            true
        } else {
            false
        };

        match self.current_token() {
            Token::Database if !or_replace => {
                self.advance();
                Ok(Statement::CreateDatabase(self.consume_ident()?))
            }
            Token::Table if !or_replace => {
                self.advance();
                self.parse_create_table()
            }
            Token::View => {
                self.advance();
                let name = self.consume_ident()?;
                self.consume(Token::As)?;
                let query = self.parse_query()?;
                Ok(Statement::CreateView(CreateView {
                    name,
                    query: Box::new(query),
                    or_replace,
                    materialized: false,
                    with_data: true,
                }))
            }
            Token::Materialized => {
                self.advance();
                self.consume(Token::View)?;
                let name = self.consume_ident()?;
                self.consume(Token::As)?;
                let query = self.parse_query()?;
                let with_data = if self.eat_if(&Token::With) {
                    let no = self.eat_keyword("NO");
                    self.consume_keyword("DATA")?;
                    !no
                } else {
                    true
                };
                Ok(Statement::CreateView(CreateView {
                    name,
                    query: Box::new(query),
                    or_replace,
                    materialized: true,
                    with_data,
                }))
            }
            _ => Err(self.unexpected("after CREATE")),
        }
    }

    fn parse_create_table(&mut self) -> Result<Statement> {
        let if_not_exists = if self.check_keyword("IF") {
            self.advance();
            self.consume(Token::Not)?;
            self.consume_keyword("EXISTS")?;
            true
        } else {
            false
        };
        let name = self.consume_ident()?;

        if self.eat_if(&Token::As) {
            let query = self.parse_query()?;
            return Ok(Statement::CreateTableAs(CreateTableAs {
                name,
                query: Box::new(query),
            }));
        }

        self.consume(Token::LeftParen)?;
        let mut columns: Vec<ColumnDef> = vec![];
        let mut table_constraints = Vec::new();
        loop {
            match self.current_token() {
                Token::PrimaryKey | Token::Unique
                    if matches!(self.peek_token(1), Token::LeftParen) =>
                {
                    let constraint = if self.eat_if(&Token::PrimaryKey) {
                        Constraint::PrimaryKey
                    } else {
                        self.advance();
                        Constraint::Unique
                    };
                    let position = self.current_position();
                    table_constraints.push((constraint, self.parse_ident_list()?, position));
                }
                _ => columns.push(self.parse_column_def()?),
            }
            match self.current_token() {
                Token::RightParen => {
                    self.advance();
                    break;
                }
                Token::Comma => {
                    self.advance();
                    continue;
                }
                _ => return Err(self.unexpected("where ',' or ')' was expected")),
            }
        }

        for (constraint, names, position) in table_constraints {
            for name in names {
                let column = columns
                    .iter_mut()
                    .find(|c| c.name == name)
                    .ok_or_else(|| {
                        Error::syntax(
                            format!("{constraint} references unknown column {name}"),
                            Some(position),
                        )
                    })?;
                if !column.constraints.contains(&constraint) {
                    column.constraints.push(constraint);
                }
            }
        }

        Ok(Statement::CreateTable(CreateTable {
            name,
            columns,
            if_not_exists,
        }))
    }

    fn consume_data_type(&mut self) -> Result<DataType> {
        match self.current_token() {
            Token::Type(data_type) => {
                let data_type = *data_type;
                self.advance();
                // length modifiers such as VARCHAR(255) are accepted and not enforced
                if matches!(data_type, DataType::Varchar | DataType::Char)
                    && self.check(&Token::LeftParen)
                {
                    self.advance();
                    match self.current_token() {
                        Token::Number(n) if *n > 0 => self.advance(),
                        _ => return Err(self.unexpected("where a length was expected")),
                    }
                    self.consume(Token::RightParen)?;
                }
                Ok(data_type)
            }
            _ => Err(self.unexpected("where a column type was expected")),
        }
    }

    fn parse_column_def(&mut self) -> Result<ColumnDef> {
        let name = self.consume_ident()?;
        let data_type = self.consume_data_type()?;
        let mut column = ColumnDef::new(name, data_type);

        loop {
            match self.current_token() {
                Token::PrimaryKey => {
                    self.advance();
                    column = column.with_constraint(Constraint::PrimaryKey);
                }
                Token::Unique => {
                    self.advance();
                    column = column.with_constraint(Constraint::Unique);
                }
                Token::NotNull => {
                    self.advance();
                    column = column.with_constraint(Constraint::NotNull);
                }
                // explicit nullability
                Token::Null => self.advance(),
                Token::Default => {
                    self.advance();
                    column.default = Some(self.parse_additive()?);
                }
                Token::Check => {
                    self.advance();
                    self.consume(Token::LeftParen)?;
                    column.check = Some(self.parse_expression()?);
                    self.consume(Token::RightParen)?;
                }
                _ => break,
            }
        }
        Ok(column)
    }

    fn parse_drop(&mut self) -> Result<Statement> {
        self.consume(Token::Drop)?;
        let kind = match self.current_token() {
            Token::Database => DropKind::Database,
            Token::Table => DropKind::Table,
            Token::View => DropKind::View,
            Token::Materialized => {
                self.advance();
                if !self.check(&Token::View) {
                    return Err(self.unexpected("where VIEW was expected"));
                }
                DropKind::MaterializedView
            }
            _ => return Err(self.unexpected("after DROP")),
        };
        self.advance();
        let if_exists = self.parse_if_exists()?;
        let name = self.consume_ident()?;
        Ok(Statement::Drop(Drop {
            kind,
            name,
            if_exists,
        }))
    }

    fn parse_alter(&mut self) -> Result<Statement> {
        self.consume(Token::Alter)?;
        self.consume(Token::Table)?;
        let table = self.consume_ident()?;

        let action = if self.eat_keyword("ADD") {
            self.eat_keyword("COLUMN");
            AlterAction::AddColumn(self.parse_column_def()?)
        } else if self.eat_if(&Token::Drop) {
            self.eat_keyword("COLUMN");
            AlterAction::DropColumn(self.consume_ident()?)
        } else if self.eat_keyword("RENAME") {
            if self.eat_keyword("TO") {
                AlterAction::RenameTable(self.consume_ident()?)
            } else {
                self.eat_keyword("COLUMN");
                let from = self.consume_ident()?;
                self.consume_keyword("TO")?;
                let to = self.consume_ident()?;
                AlterAction::RenameColumn { from, to }
            }
        } else {
            return Err(self.unexpected("after ALTER TABLE"));
        };
        Ok(Statement::AlterTable(AlterTable { table, action }))
    }

    fn parse_call(&mut self) -> Result<Statement> {
        self.consume(Token::Call)?;
        let procedure = self.consume_ident()?;
        self.consume(Token::LeftParen)?;
        let mut args = Vec::new();
        if !self.check(&Token::RightParen) {
            args.push(self.parse_expression()?);
            while self.eat_if(&Token::Comma) {
                args.push(self.parse_expression()?);
            }
        }
        self.consume(Token::RightParen)?;
        Ok(Statement::Call(Call { procedure, args }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn select(sql: &str) -> Select {
        match parse_statement(sql).unwrap() {
            Statement::Select(select) => *select,
            other => panic!("expected SELECT, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_create_table() {
        let statement = parse_statement(
            "CREATE TABLE users (id SERIAL PRIMARY KEY, name VARCHAR(40) NOT NULL, \
             age INT DEFAULT 18 CHECK (age >= 0), email TEXT, UNIQUE (email))",
        )
        .unwrap();

        let Statement::CreateTable(ct) = statement else {
            panic!("Expected CreateTable");
        };
        assert_eq!(ct.name, "users");
        assert!(!ct.if_not_exists);
        assert_eq!(ct.columns.len(), 4);
        assert_eq!(ct.columns[0].data_type, DataType::Serial);
        assert!(ct.columns[0].has(Constraint::PrimaryKey));
        assert_eq!(ct.columns[1].data_type, DataType::Varchar);
        assert!(ct.columns[1].has(Constraint::NotNull));
        assert_eq!(
            ct.columns[2].default,
            Some(Expr::Literal(Value::Int(18)))
        );
        assert!(ct.columns[2].check.is_some());
        assert!(ct.columns[3].has(Constraint::Unique));
    }

    #[test]
    fn test_table_constraint_on_unknown_column() {
        let err = parse_statement("CREATE TABLE t (a INT, PRIMARY KEY (b))").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn test_parse_create_if_not_exists_and_as() {
        let Statement::CreateTable(ct) =
            parse_statement("CREATE TABLE IF NOT EXISTS t (a INT)").unwrap()
        else {
            panic!("Expected CreateTable");
        };
        assert!(ct.if_not_exists);

        assert!(matches!(
            parse_statement("CREATE TABLE copy AS SELECT * FROM t").unwrap(),
            Statement::CreateTableAs(_)
        ));
    }

    #[test]
    fn test_parse_select_clauses() {
        let s = select(
            "SELECT DISTINCT dept, COUNT(*) AS n FROM emp e WHERE salary > 10 \
             GROUP BY dept HAVING COUNT(*) > 1 ORDER BY n DESC, dept OFFSET 1 LIMIT 5",
        );
        assert!(s.distinct);
        assert_eq!(s.columns.len(), 2);
        assert_eq!(
            s.from,
            vec![TableRef::Named {
                name: "emp".into(),
                alias: Some("e".into())
            }]
        );
        assert!(s.where_clause.is_some());
        assert_eq!(s.group_by, vec![Expr::column("dept")]);
        assert!(s.having.is_some());
        assert_eq!(s.order_by.len(), 2);
        assert_eq!(s.order_by[0].direction, SortDirection::Desc);
        assert_eq!(s.order_by[1].direction, SortDirection::Asc);
        assert_eq!(s.limit, Some(5));
        assert_eq!(s.offset, Some(1));
    }

    #[test]
    fn test_parse_ctes_and_subqueries() {
        let s = select(
            "WITH big AS (SELECT * FROM orders WHERE total > 100) \
             SELECT b.id, x.n FROM big b, (SELECT COUNT(*) AS n FROM users) x",
        );
        assert_eq!(s.ctes.len(), 1);
        assert_eq!(s.ctes[0].name, "big");
        assert_eq!(s.from.len(), 2);
        assert!(matches!(s.from[1], TableRef::Subquery { ref alias, .. } if alias.as_deref() == Some("x")));
    }

    #[test]
    fn test_parse_insert_groups_and_conflict() {
        let Statement::Insert(insert) = parse_statement(
            "INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y') (a) VALUES (3) \
             ON CONFLICT (a) DO UPDATE SET b = excluded.b RETURNING *",
        )
        .unwrap() else {
            panic!("Expected Insert");
        };
        assert_eq!(insert.groups.len(), 2);
        assert_eq!(insert.groups[0].rows.len(), 2);
        assert_eq!(insert.groups[1].columns, Some(vec!["a".to_string()]));
        let conflict = insert.on_conflict.unwrap();
        assert_eq!(conflict.target, vec!["a"]);
        assert!(matches!(conflict.action, ConflictAction::DoUpdate(ref a) if a.len() == 1));
        assert_eq!(insert.returning, vec![SelectItem::Wildcard]);
    }

    #[test]
    fn test_do_update_without_set() {
        let err = parse_statement("INSERT INTO t VALUES (1) ON CONFLICT DO UPDATE b = 2").unwrap_err();
        assert!(matches!(err, Error::ConflictResolution(_)));

        let ok = parse_statement("INSERT INTO t VALUES (1) ON CONFLICT DO NOTHING");
        assert!(ok.is_ok());
    }

    #[test]
    fn test_parse_views() {
        let Statement::CreateView(view) = parse_statement(
            "CREATE OR REPLACE MATERIALIZED VIEW totals AS SELECT SUM(x) FROM t WITH NO DATA",
        )
        .unwrap() else {
            panic!("Expected CreateView");
        };
        assert!(view.or_replace);
        assert!(view.materialized);
        assert!(!view.with_data);

        assert_eq!(
            parse_statement("REFRESH MATERIALIZED VIEW totals").unwrap(),
            Statement::RefreshMaterializedView("totals".into())
        );
    }

    #[test]
    fn test_parse_drop_alter_truncate_use_call() {
        assert_eq!(
            parse_statement("DROP MATERIALIZED VIEW IF EXISTS mv").unwrap(),
            Statement::Drop(Drop {
                kind: DropKind::MaterializedView,
                name: "mv".into(),
                if_exists: true
            })
        );
        assert_eq!(
            parse_statement("ALTER TABLE t RENAME COLUMN a TO b").unwrap(),
            Statement::AlterTable(AlterTable {
                table: "t".into(),
                action: AlterAction::RenameColumn {
                    from: "a".into(),
                    to: "b".into()
                }
            })
        );
        assert!(matches!(
            parse_statement("ALTER TABLE t ADD COLUMN c INT DEFAULT 0").unwrap(),
            Statement::AlterTable(AlterTable {
                action: AlterAction::AddColumn(_),
                ..
            })
        ));
        assert_eq!(
            parse_statement("TRUNCATE TABLE t;").unwrap(),
            Statement::Truncate("t".into())
        );
        assert_eq!(parse_statement("USE shop").unwrap(), Statement::Use("shop".into()));
        assert!(matches!(
            parse_statement("CALL describe('t')").unwrap(),
            Statement::Call(Call { ref procedure, ref args }) if procedure == "describe" && args.len() == 1
        ));
    }

    #[test]
    fn test_parse_script() {
        let statements = parse_script("CREATE TABLE t (a INT);; INSERT INTO t VALUES (1); SELECT * FROM t").unwrap();
        assert_eq!(statements.len(), 3);
        assert!(parse_script("SELECT 1 SELECT 2").is_err());
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let err = parse_statement("SELECT a FROM t t2 t3").unwrap_err();
        assert!(matches!(err, Error::Syntax { position: Some(_), .. }));
    }

    #[test]
    fn test_update_and_delete() {
        let Statement::Update(update) =
            parse_statement("UPDATE t SET a = a + 1, b = 'x' WHERE id = 3").unwrap()
        else {
            panic!("Expected Update");
        };
        assert_eq!(update.assignments.len(), 2);
        assert!(update.where_clause.is_some());

        let Statement::Delete(delete) = parse_statement("DELETE FROM t").unwrap() else {
            panic!("Expected Delete");
        };
        assert!(delete.where_clause.is_none());
    }
}
