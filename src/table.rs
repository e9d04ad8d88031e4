use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::ast::Expr;
use crate::column::Column;
use crate::data_type::DataType;
use crate::error::{Error, Result};
use crate::sequence::Sequence;
use crate::value::Value;

/// Column-level constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constraint {
    PrimaryKey,
    Unique,
    NotNull,
}

impl Constraint {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PrimaryKey => "PRIMARY KEY",
            Self::Unique => "UNIQUE",
            Self::NotNull => "NOT NULL",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PRIMARY KEY" => Some(Self::PrimaryKey),
            "UNIQUE" => Some(Self::Unique),
            "NOT NULL" => Some(Self::NotNull),
            _ => None,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Constraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| Error::InvalidOperation(format!("unknown constraint {s}")))
    }
}

/// Column definition in the schema
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    /// Expression evaluated when an INSERT omits the column.
    pub default: Option<Expr>,
    pub constraints: Vec<Constraint>,
    /// `CHECK` restriction evaluated against the candidate row.
    pub check: Option<Expr>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            default: None,
            constraints: Vec::new(),
            check: None,
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        if !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }
        self
    }

    pub fn has(&self, constraint: Constraint) -> bool {
        self.constraints.contains(&constraint)
    }

    /// PRIMARY KEY and UNIQUE columns reject duplicate values.
    pub fn is_unique(&self) -> bool {
        self.has(Constraint::PrimaryKey) || self.has(Constraint::Unique)
    }

    /// PRIMARY KEY columns are implicitly NOT NULL.
    pub fn is_required(&self) -> bool {
        self.has(Constraint::PrimaryKey) || self.has(Constraint::NotNull)
    }

    pub fn is_serial(&self) -> bool {
        self.data_type == DataType::Serial
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A named, typed, columnar table.
///
/// Values reaching [Table::insert] are expected to be already parsed into the
/// column types; constraint enforcement happens in the executor, which needs
/// the whole statement context to report conflicts.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub schema: Schema,
    pub columns: Vec<Column>,
    pub row_count: usize,
    sequences: HashMap<String, Sequence>,
}

impl Table {
    pub fn new(name: String, schema: Schema) -> Self {
        let columns = schema
            .columns
            .iter()
            .map(|column| Column::new(column.name.clone(), column.data_type))
            .collect();
        let sequences = schema
            .columns
            .iter()
            .filter(|c| c.is_serial())
            .map(|c| (c.name.clone(), Sequence::new()))
            .collect();
        Self {
            name,
            schema,
            columns,
            row_count: 0,
            sequences,
        }
    }

    /// insert a new row
    ///
    /// A NULL in a SERIAL column, or the value the counter was about to hand
    /// out, takes the next value of the sequence. Other explicit values move
    /// the counter past themselves.
    pub fn insert(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.schema.columns.len() {
            return Err(Error::InvalidOperation(format!(
                "table {} has {} columns but {} values were supplied",
                self.name,
                self.schema.columns.len(),
                values.len()
            )));
        }
        let values = values
            .into_iter()
            .zip(&self.schema.columns)
            .map(|(value, def)| def.data_type.admit(value))
            .collect::<Result<Vec<_>>>()?;

        for (i, value) in values.into_iter().enumerate() {
            let value = match (self.sequences.get_mut(&self.schema.columns[i].name), value) {
                (Some(seq), Value::Null) => Value::Int(seq.next_value()),
                (Some(seq), Value::Int(v)) if v == seq.peek() => Value::Int(seq.next_value()),
                (Some(seq), Value::Int(v)) => {
                    seq.observe(v);
                    Value::Int(v)
                }
                (_, value) => value,
            };
            self.columns[i].push(value)?;
        }
        self.row_count += 1;
        Ok(())
    }

    pub fn get_row(&self, row_idx: usize) -> Option<Vec<Value>> {
        if self.row_count <= row_idx {
            return None;
        }
        self.columns.iter().map(|col| col.get(row_idx)).collect()
    }

    /// Pivots the columnar storage into rows.
    pub fn rows(&self) -> Vec<Vec<Value>> {
        (0..self.row_count).filter_map(|i| self.get_row(i)).collect()
    }

    pub fn get_col(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|col| col.name == name)
    }

    /// Removes one row from every column.
    pub fn delete_row(&mut self, row_idx: usize) -> Result<()> {
        for column in &mut self.columns {
            column.remove(row_idx)?;
        }
        self.row_count -= 1;
        Ok(())
    }

    /// Overwrites a full row in place.
    pub fn replace_row(&mut self, row_idx: usize, values: Vec<Value>) -> Result<()> {
        if row_idx >= self.row_count || values.len() != self.schema.len() {
            return Err(Error::InvalidOperation(format!(
                "cannot replace row {row_idx} of table {} with {} values",
                self.name,
                values.len()
            )));
        }
        let values = values
            .into_iter()
            .zip(&self.schema.columns)
            .map(|(value, def)| def.data_type.admit(value))
            .collect::<Result<Vec<_>>>()?;
        for (i, value) in values.into_iter().enumerate() {
            let def = &self.schema.columns[i];
            if let (Some(seq), Value::Int(v)) = (self.sequences.get_mut(&def.name), &value) {
                seq.observe(*v);
            }
            self.columns[i].set(row_idx, &value)?;
        }
        Ok(())
    }

    /// Removes every row. Sequence counters keep their position.
    pub fn truncate(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
        self.row_count = 0;
    }

    pub fn sequence(&self, column: &str) -> Option<&Sequence> {
        self.sequences.get(column)
    }

    pub fn sequences(&self) -> impl Iterator<Item = (&String, &Sequence)> {
        self.sequences.iter()
    }

    /// Recomputes every SERIAL counter from the stored rows, never going
    /// below the given persisted positions.
    pub fn restore_sequences(&mut self, persisted: &HashMap<String, i64>) {
        for def in self.schema.columns.iter().filter(|c| c.is_serial()) {
            let stored = self
                .get_col(&def.name)
                .map(|col| col.iter().filter_map(|v| v.as_int()).collect::<Vec<_>>())
                .unwrap_or_default();
            let floor = persisted.get(&def.name).copied().unwrap_or(1);
            self.sequences
                .insert(def.name.clone(), Sequence::recover(stored, floor));
        }
    }

    /// Finds a row holding `value` in the given column, skipping `skip`.
    /// `NULL` never conflicts.
    pub fn find_value(&self, col_idx: usize, value: &Value, skip: Option<usize>) -> Option<usize> {
        if value.is_null() {
            return None;
        }
        let column = self.columns.get(col_idx)?;
        (0..self.row_count)
            .filter(|i| Some(*i) != skip)
            .find(|i| column.get(*i).as_ref() == Some(value))
    }

    /// First PRIMARY KEY or UNIQUE column where `row` collides with a stored
    /// row, as `(column index, conflicting row index)`.
    pub fn unique_conflict(&self, row: &[Value], skip: Option<usize>) -> Option<(usize, usize)> {
        self.schema
            .columns
            .iter()
            .enumerate()
            .filter(|(_, def)| def.is_unique())
            .find_map(|(i, _)| self.find_value(i, &row[i], skip).map(|found| (i, found)))
    }

    /// Appends a column, filling existing rows from `fill`.
    pub fn add_column(&mut self, def: ColumnDef, fill: Vec<Value>) -> Result<()> {
        if fill.len() != self.row_count {
            return Err(Error::InvalidOperation(format!(
                "new column {} needs {} values, got {}",
                def.name,
                self.row_count,
                fill.len()
            )));
        }
        let mut column = Column::new(def.name.clone(), def.data_type);
        let mut sequence = def.is_serial().then(Sequence::new);
        for value in fill {
            let value = def.data_type.admit(value)?;
            if let (Some(seq), Value::Int(v)) = (sequence.as_mut(), &value) {
                seq.observe(*v);
            }
            column.push(value)?;
        }
        if let Some(seq) = sequence {
            self.sequences.insert(def.name.clone(), seq);
        }
        self.columns.push(column);
        self.schema.columns.push(def);
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<()> {
        let idx = self
            .schema
            .index_of(name)
            .ok_or_else(|| Error::ColumnNotFound(format!("{}.{name}", self.name)))?;
        self.schema.columns.remove(idx);
        self.columns.remove(idx);
        self.sequences.remove(name);
        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        let idx = self
            .schema
            .index_of(from)
            .ok_or_else(|| Error::ColumnNotFound(format!("{}.{from}", self.name)))?;
        self.schema.columns[idx].name = to.to_string();
        self.columns[idx].name = to.to_string();
        if let Some(seq) = self.sequences.remove(from) {
            self.sequences.insert(to.to_string(), seq);
        }
        Ok(())
    }
}
