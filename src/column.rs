use std::sync::Arc;

use bitvec::prelude::*;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::data_type::DataType;
use crate::error::{Error, Result};
use crate::value::Value;

/// Physical storage for column data.
/// Each variant wraps a collection of a specific type to ensure contiguous memory
/// allocation (columnar storage).
#[derive(Debug, Clone)]
pub enum ColumnData {
    /// Vector of 64-bit integers, for `INT` and `SERIAL`.
    Int(Vec<i64>),
    /// Vector of 64-bit floats.
    Float(Vec<f64>),
    /// Compact bit-vector for boolean values.
    Bool(BitVec),
    Char(Vec<char>),
    /// Shared strings, for `VARCHAR` and `TEXT`.
    Text(Vec<Arc<str>>),
    Date(Vec<NaiveDate>),
    Time(Vec<NaiveTime>),
    Timestamp(Vec<NaiveDateTime>),
}

/// Runs the same expression against whichever vector the column holds.
macro_rules! with_vec {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ColumnData::Int($v) => $body,
            ColumnData::Float($v) => $body,
            ColumnData::Bool($v) => $body,
            ColumnData::Char($v) => $body,
            ColumnData::Text($v) => $body,
            ColumnData::Date($v) => $body,
            ColumnData::Time($v) => $body,
            ColumnData::Timestamp($v) => $body,
        }
    };
}

/// Represents a column within a table.
/// It combines metadata (name, type) with actual data and a nullability tracker.
#[derive(Debug, Clone)]
pub struct Column {
    /// The name of the column.
    pub name: String,
    /// The logical data type of the column.
    pub data_type: DataType,
    /// The actual values stored in the column.
    pub data: ColumnData,
    /// A bitmap where a `true` bit indicates that the value at that index is `NULL`.
    pub null_bitmap: BitVec,
}

impl Column {
    /// Creates a new, empty column with the specified name and data type.
    /// The underlying data storage is initialized according to the data type.
    pub fn new(name: String, data_type: DataType) -> Self {
        let data = match data_type {
            DataType::Int | DataType::Serial => ColumnData::Int(vec![]),
            DataType::Float => ColumnData::Float(vec![]),
            DataType::Bool => ColumnData::Bool(bitvec!()),
            DataType::Char => ColumnData::Char(vec![]),
            DataType::Varchar | DataType::Text => ColumnData::Text(vec![]),
            DataType::Date => ColumnData::Date(vec![]),
            DataType::Time => ColumnData::Time(vec![]),
            DataType::Timestamp => ColumnData::Timestamp(vec![]),
        };
        Self {
            name,
            data_type,
            data,
            null_bitmap: bitvec!(),
        }
    }

    /// Appends a new value to the end of the column.
    ///
    /// # Errors
    /// Returns an error if the value's variant does not match the column's storage.
    ///
    /// # Behavior
    /// - If the value is `Null`, a default "dummy" value is pushed to the data vector
    ///   to maintain index alignment with the `null_bitmap`.
    /// - If the value is not `Null`, it is added to the data vector and the bitmap is updated.
    ///
    /// # Example
    /// ```
    /// # use quartz::column::Column;
    /// # use quartz::data_type::DataType;
    /// # use quartz::value::Value;
    /// let mut col = Column::new("age".into(), DataType::Int);
    /// col.push(Value::Int(30)).unwrap();
    /// col.push(Value::Null).unwrap();
    ///
    /// assert_eq!(col.len(), 2);
    /// assert!(col.get(1).unwrap().is_null());
    /// ```
    pub fn push(&mut self, value: Value) -> Result<()> {
        if value.is_null() {
            self.null_bitmap.push(true);
            // Add default value to keep alignment between the data vector and the bitmap
            with_vec!(&mut self.data, v => v.push(Default::default()));
            return Ok(());
        }

        match (&mut self.data, value) {
            (ColumnData::Int(col), Value::Int(v)) => col.push(v),
            (ColumnData::Float(col), Value::Float(v)) => col.push(v),
            (ColumnData::Bool(col), Value::Bool(v)) => col.push(v),
            (ColumnData::Char(col), Value::Char(v)) => col.push(v),
            (ColumnData::Text(col), Value::Text(v)) => col.push(v),
            (ColumnData::Date(col), Value::Date(v)) => col.push(v),
            (ColumnData::Time(col), Value::Time(v)) => col.push(v),
            (ColumnData::Timestamp(col), Value::Timestamp(v)) => col.push(v),
            (_, value) => return Err(self.mismatch(&value)),
        }
        self.null_bitmap.push(false);
        Ok(())
    }

    /// Returns the number of rows currently stored in the column.
    pub fn len(&self) -> usize {
        self.null_bitmap.len()
    }

    /// Returns true if there is no row in the column, else false.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retrieves the value at the specified row index.
    ///
    /// Returns `Some(Value)` if the index is valid, or `None` if it is out of bounds.
    /// If the `null_bitmap` indicates a null at the index, `Some(Value::Null)` is returned.
    pub fn get(&self, row_idx: usize) -> Option<Value> {
        if row_idx >= self.len() {
            return None;
        }
        if self.null_bitmap[row_idx] {
            return Some(Value::Null);
        }
        let value = match &self.data {
            ColumnData::Int(col) => Value::Int(col[row_idx]),
            ColumnData::Float(col) => Value::Float(col[row_idx]),
            ColumnData::Bool(col) => Value::Bool(col[row_idx]),
            ColumnData::Char(col) => Value::Char(col[row_idx]),
            ColumnData::Text(col) => Value::Text(Arc::clone(&col[row_idx])),
            ColumnData::Date(col) => Value::Date(col[row_idx]),
            ColumnData::Time(col) => Value::Time(col[row_idx]),
            ColumnData::Timestamp(col) => Value::Timestamp(col[row_idx]),
        };
        Some(value)
    }

    /// Iterates over every stored value in row order.
    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.len()).filter_map(|idx| self.get(idx))
    }

    /// Remove the value at the specified row index.
    ///
    /// # Errors
    /// Returns an error if the index is out of bounds.
    pub fn remove(&mut self, row_idx: usize) -> Result<()> {
        if self.len() <= row_idx {
            return Err(self.out_of_bounds(row_idx));
        }
        with_vec!(&mut self.data, col => {
            col.remove(row_idx);
        });
        self.null_bitmap.remove(row_idx);
        Ok(())
    }

    /// Replace a value in the column by a new value.
    ///
    /// # Errors
    /// Returns an error if the row_idx is too high or if the value's type does not match the
    /// column's storage.
    ///
    /// # Behavior
    /// - If the new value is `Null`, the previous value is not changed but only the null_bitmap to
    ///   be faster.
    pub fn set(&mut self, row_idx: usize, value: &Value) -> Result<()> {
        if self.len() <= row_idx {
            return Err(self.out_of_bounds(row_idx));
        }

        if value.is_null() {
            self.null_bitmap.set(row_idx, true);
            return Ok(());
        }

        match (&mut self.data, value) {
            (ColumnData::Int(col), Value::Int(v)) => col[row_idx] = *v,
            (ColumnData::Float(col), Value::Float(v)) => col[row_idx] = *v,
            (ColumnData::Bool(col), Value::Bool(v)) => {
                col.replace(row_idx, *v);
            }
            (ColumnData::Char(col), Value::Char(v)) => col[row_idx] = *v,
            (ColumnData::Text(col), Value::Text(v)) => col[row_idx] = Arc::clone(v),
            (ColumnData::Date(col), Value::Date(v)) => col[row_idx] = *v,
            (ColumnData::Time(col), Value::Time(v)) => col[row_idx] = *v,
            (ColumnData::Timestamp(col), Value::Timestamp(v)) => col[row_idx] = *v,
            _ => return Err(self.mismatch(value)),
        }
        self.null_bitmap.set(row_idx, false);
        Ok(())
    }

    /// Drops every stored value, keeping name and type.
    pub fn clear(&mut self) {
        with_vec!(&mut self.data, col => col.clear());
        self.null_bitmap.clear();
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::DataType(format!(
            "{} value {value} cannot be stored in column {} of type {}",
            value.type_name(),
            self.name,
            self.data_type
        ))
    }

    fn out_of_bounds(&self, row_idx: usize) -> Error {
        Error::InvalidOperation(format!(
            "row {row_idx} is out of bounds for column {} ({} rows)",
            self.name,
            self.len()
        ))
    }
}
