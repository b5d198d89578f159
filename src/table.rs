// 📋 Typed Table - columns with declared types + rows of values
// The minimal frame the flatteners emit and the aggregator transforms.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};

/// Partition directory value used for null partition columns
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// CSV cell used for null, so an empty string survives a round trip
pub const NULL_CELL: &str = "\\N";

// ============================================================================
// VALUES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Int,
    Double,
}

#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Null,
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Optional string, None → Null
    pub fn opt_str(s: Option<&str>) -> Self {
        s.map(Value::str).unwrap_or(Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Parse a raw cell (CSV field or partition segment) into the column type.
    /// The null markers are Null for every type; an empty cell is an empty
    /// string for string columns and Null for numeric ones.
    pub fn parse(raw: &str, kind: ColumnType) -> Result<Value> {
        if raw == NULL_CELL || raw == NULL_PARTITION {
            return Ok(Value::Null);
        }

        match kind {
            ColumnType::String => Ok(Value::Str(raw.to_string())),
            _ if raw.is_empty() => Ok(Value::Null),
            ColumnType::Int => raw
                .parse::<i64>()
                .map(Value::Int)
                .with_context(|| format!("Invalid int cell: '{}'", raw)),
            ColumnType::Double => raw
                .parse::<f64>()
                .map(Value::Float)
                .with_context(|| format!("Invalid double cell: '{}'", raw)),
        }
    }

    /// Text form used for CSV cells
    pub fn to_cell(&self) -> String {
        match self {
            Value::Null => NULL_CELL.to_string(),
            other => other.to_string(),
        }
    }

    /// Text form used for `key=value` partition directories
    pub fn to_partition_value(&self) -> String {
        match self {
            Value::Null => NULL_PARTITION.to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Null => write!(f, "null"),
        }
    }
}

// Floats compare by bit pattern so rows can be hashed for exact-row dedup
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Str(s) => s.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Null => {}
        }
    }
}

// ============================================================================
// COLUMNS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
}

impl Column {
    pub fn new(name: &str, kind: ColumnType) -> Self {
        Column {
            name: name.to_string(),
            kind,
        }
    }
}

/// Borrowed view of one row, addressable by column name
pub struct RowRef<'a> {
    table: &'a Table,
    values: &'a [Value],
}

impl<'a> RowRef<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.table.column_index(column).map(|i| &self.values[i])
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}

// ============================================================================
// TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn row(&self, index: usize) -> Option<RowRef<'_>> {
        self.rows.get(index).map(|values| RowRef {
            table: self,
            values,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(move |values| RowRef {
            table: self,
            values,
        })
    }

    /// Value at (row, column name)
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[col])
    }

    /// All values of one column, in row order
    pub fn column_values(&self, column: &str) -> Vec<&Value> {
        match self.column_index(column) {
            Some(col) => self.rows.iter().map(|r| &r[col]).collect(),
            None => Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            bail!(
                "Row has {} values but table has {} columns",
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append all rows of a table with the same schema
    pub fn append(&mut self, other: Table) -> Result<()> {
        if other.columns != self.columns {
            bail!(
                "Schema mismatch: [{}] vs [{}]",
                self.column_names().join(", "),
                other.column_names().join(", ")
            );
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Drop exact duplicate rows, keeping the first occurrence in order
    pub fn dedup(&self) -> Table {
        let mut seen: HashSet<&[Value]> = HashSet::new();
        let rows = self
            .rows
            .iter()
            .filter(|row| seen.insert(row.as_slice()))
            .cloned()
            .collect();

        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    pub fn filter<F>(&self, mut predicate: F) -> Table
    where
        F: FnMut(&RowRef<'_>) -> bool,
    {
        let rows = self
            .iter()
            .filter(|row| predicate(row))
            .map(|row| row.values.to_vec())
            .collect();

        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Remove columns by name; names not in the table are ignored
    pub fn drop_columns(&self, names: &[&str]) -> Table {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !names.contains(&self.columns[i].name.as_str()))
            .collect();
        self.project(&keep)
    }

    /// Keep only the named columns, in the given order
    pub fn select(&self, names: &[&str]) -> Result<Table> {
        let indices = names
            .iter()
            .map(|name| {
                self.column_index(name)
                    .ok_or_else(|| anyhow!("Unknown column: {}", name))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.project(&indices))
    }

    fn project(&self, indices: &[usize]) -> Table {
        Table {
            columns: indices.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        }
    }

    /// Inner join on `key`. Output = left columns + right columns without the
    /// right-hand key. One row per matching (left, right) pair, left-major order.
    /// Null keys never match.
    pub fn inner_join(&self, right: &Table, key: &str) -> Result<Table> {
        let left_key = self
            .column_index(key)
            .ok_or_else(|| anyhow!("Left table has no join key '{}'", key))?;
        let right_key = right
            .column_index(key)
            .ok_or_else(|| anyhow!("Right table has no join key '{}'", key))?;

        let mut columns = self.columns.clone();
        for (i, col) in right.columns.iter().enumerate() {
            if i == right_key {
                continue;
            }
            if self.column_index(&col.name).is_some() {
                bail!("Join would duplicate column '{}'", col.name);
            }
            columns.push(col.clone());
        }

        let mut index: HashMap<&Value, Vec<usize>> = HashMap::new();
        for (i, row) in right.rows.iter().enumerate() {
            if !row[right_key].is_null() {
                index.entry(&row[right_key]).or_default().push(i);
            }
        }

        let mut rows = Vec::new();
        for left_row in &self.rows {
            let Some(matches) = index.get(&left_row[left_key]) else {
                continue;
            };
            for &r in matches {
                let mut joined = left_row.clone();
                joined.extend(
                    right.rows[r]
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != right_key)
                        .map(|(_, v)| v.clone()),
                );
                rows.push(joined);
            }
        }

        Ok(Table { columns, rows })
    }

    /// Split by partition columns. Keys are (column, value) pairs in the given
    /// column order; each sub-table has the partition columns removed.
    pub fn partition_by(&self, keys: &[&str]) -> Result<BTreeMap<Vec<(String, String)>, Table>> {
        let indices = keys
            .iter()
            .map(|k| {
                self.column_index(k)
                    .ok_or_else(|| anyhow!("Unknown partition column: {}", k))
            })
            .collect::<Result<Vec<_>>>()?;

        let remaining: Vec<usize> = (0..self.columns.len())
            .filter(|i| !indices.contains(i))
            .collect();
        let data_columns: Vec<Column> =
            remaining.iter().map(|&i| self.columns[i].clone()).collect();

        let mut partitions: BTreeMap<Vec<(String, String)>, Table> = BTreeMap::new();
        for row in &self.rows {
            let spec: Vec<(String, String)> = indices
                .iter()
                .map(|&i| (self.columns[i].name.clone(), row[i].to_partition_value()))
                .collect();

            partitions
                .entry(spec)
                .or_insert_with(|| Table::new(data_columns.clone()))
                .rows
                .push(remaining.iter().map(|&i| row[i].clone()).collect());
        }

        Ok(partitions)
    }

    /// Write header + rows as CSV
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.columns.iter().map(|c| c.name.as_str()))?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(Value::to_cell))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        String::from_utf8(buf).context("CSV output is not UTF-8")
    }

    /// Read CSV with a header row, typing cells by `columns` (matched by name).
    /// Schema columns absent from the header (files written before the schema
    /// grew) read as Null.
    pub fn read_csv<R: Read>(reader: R, columns: &[Column]) -> Result<Table> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers().context("Failed to read CSV header")?.clone();

        let positions: Vec<Option<usize>> = columns
            .iter()
            .map(|col| headers.iter().position(|h| h == col.name))
            .collect();

        for (col, pos) in columns.iter().zip(&positions) {
            if pos.is_none() {
                log::debug!("CSV has no column '{}', reading it as null", col.name);
            }
        }

        let mut table = Table::new(columns.to_vec());
        for (line, record) in rdr.records().enumerate() {
            let record =
                record.with_context(|| format!("Failed to parse CSV line {}", line + 2))?;
            let row = columns
                .iter()
                .zip(&positions)
                .map(|(col, pos)| match pos.and_then(|p| record.get(p)) {
                    Some(raw) => Value::parse(raw, col.kind),
                    None => Ok(Value::Null),
                })
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Invalid value on CSV line {}", line + 2))?;
            table.rows.push(row);
        }

        Ok(table)
    }
}

// ============================================================================
// TESTS
// ============================================================================
