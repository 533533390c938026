//! In-memory tabular dataset.
//!
//! A [`Dataset`] is immutable once built. Uploads replace it wholesale through
//! [`crate::state::AppState::replace_dataset`]; nothing mutates it in place.

use serde_json::Value;

use crate::error::{AnalystError, Result};

/// One typed column. Missing cells are `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_numeric(&self) -> Option<&[Option<f64>]> {
        match self {
            Column::Numeric(v) => Some(v),
            Column::Text(_) => None,
        }
    }

    fn cell_string(&self, row: usize) -> String {
        match self {
            Column::Numeric(v) => match v.get(row).copied().flatten() {
                Some(x) if x.fract() == 0.0 && x.abs() < 1e15 => format!("{}", x as i64),
                Some(x) => format!("{x}"),
                None => "NaN".to_string(),
            },
            Column::Text(v) => v
                .get(row)
                .and_then(|c| c.clone())
                .unwrap_or_else(|| "NaN".to_string()),
        }
    }

    fn cell_json(&self, row: usize) -> Value {
        match self {
            Column::Numeric(v) => v
                .get(row)
                .copied()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Column::Text(v) => v
                .get(row)
                .and_then(|c| c.clone())
                .map(Value::String)
                .unwrap_or(Value::Null),
        }
    }
}

/// Rows × named, typed columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    names: Vec<String>,
    columns: Vec<Column>,
    rows: usize,
}

impl Dataset {
    /// Build a dataset from named columns. Names are trimmed; all columns must
    /// have the same length and names must be unique.
    pub fn new(columns: Vec<(String, Column)>) -> Result<Self> {
        let rows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        let mut names = Vec::with_capacity(columns.len());
        let mut cols = Vec::with_capacity(columns.len());
        for (name, col) in columns {
            let name = name.trim().to_string();
            if col.len() != rows {
                return Err(AnalystError::InvalidInput(format!(
                    "column '{name}' has {} rows, expected {rows}",
                    col.len()
                )));
            }
            if names.contains(&name) {
                return Err(AnalystError::InvalidInput(format!("duplicate column '{name}'")));
            }
            names.push(name);
            cols.push(col);
        }
        Ok(Self { names, columns: cols, rows })
    }

    pub fn builder() -> DatasetBuilder {
        DatasetBuilder::default()
    }

    /// Parse either a columnar document `{"columns": [..], "rows": [[..], ..]}`
    /// or an array of flat records `[{"col": value, ..}, ..]`.
    ///
    /// Columns whose non-null values are all numbers (or booleans) become
    /// numeric; anything else is text.
    pub fn from_json(input: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(input)?;
        let (names, rows): (Vec<String>, Vec<Vec<Value>>) = match doc {
            Value::Object(mut obj) => {
                let names = match obj.remove("columns") {
                    Some(Value::Array(a)) => a
                        .into_iter()
                        .map(|v| match v {
                            Value::String(s) => Ok(s),
                            other => Err(AnalystError::InvalidInput(format!(
                                "column name must be a string, got {other}"
                            ))),
                        })
                        .collect::<Result<Vec<_>>>()?,
                    _ => return Err(AnalystError::InvalidInput("missing 'columns' array".into())),
                };
                let rows = match obj.remove("rows") {
                    Some(Value::Array(a)) => a
                        .into_iter()
                        .map(|r| match r {
                            Value::Array(cells) if cells.len() == names.len() => Ok(cells),
                            _ => Err(AnalystError::InvalidInput(
                                "every row must be an array matching 'columns'".into(),
                            )),
                        })
                        .collect::<Result<Vec<_>>>()?,
                    _ => return Err(AnalystError::InvalidInput("missing 'rows' array".into())),
                };
                (names, rows)
            }
            Value::Array(records) => {
                let mut names: Vec<String> = Vec::new();
                for rec in &records {
                    let Value::Object(map) = rec else {
                        return Err(AnalystError::InvalidInput("records must be objects".into()));
                    };
                    for key in map.keys() {
                        if !names.contains(key) {
                            names.push(key.clone());
                        }
                    }
                }
                let rows = records
                    .into_iter()
                    .map(|rec| {
                        names
                            .iter()
                            .map(|n| rec.get(n).cloned().unwrap_or(Value::Null))
                            .collect()
                    })
                    .collect();
                (names, rows)
            }
            _ => return Err(AnalystError::InvalidInput("expected a JSON object or array".into())),
        };

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let cells: Vec<&Value> = rows.iter().map(|r| &r[i]).collect();
                (name, infer_column(&cells))
            })
            .collect();
        Self::new(columns)
    }

    pub fn n_rows(&self) -> usize {
        self.rows
    }

    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
    }

    pub fn numeric(&self, name: &str) -> Option<&[Option<f64>]> {
        self.column(name).and_then(Column::as_numeric)
    }

    /// Numeric columns in declaration order.
    pub fn numeric_columns(&self) -> impl Iterator<Item = (&str, &[Option<f64>])> {
        self.names
            .iter()
            .zip(&self.columns)
            .filter_map(|(n, c)| c.as_numeric().map(|v| (n.as_str(), v)))
    }

    /// Render the first `n` rows as an aligned text table, header included.
    pub fn head_string(&self, n: usize) -> String {
        let shown = n.min(self.rows);
        let mut widths: Vec<usize> = self.names.iter().map(|n| n.len()).collect();
        let cells: Vec<Vec<String>> = (0..shown)
            .map(|r| self.columns.iter().map(|c| c.cell_string(r)).collect())
            .collect();
        for row in &cells {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.len());
            }
        }
        let idx_width = shown.saturating_sub(1).to_string().len();
        let mut out = String::new();
        out.push_str(&" ".repeat(idx_width));
        for (name, w) in self.names.iter().zip(&widths) {
            out.push_str(&format!("  {name:>w$}"));
        }
        for (r, row) in cells.iter().enumerate() {
            out.push('\n');
            out.push_str(&format!("{r:<idx_width$}"));
            for (cell, w) in row.iter().zip(&widths) {
                out.push_str(&format!("  {cell:>w$}"));
            }
        }
        out
    }

    /// Columnar JSON payload handed to an external execution sandbox.
    pub fn to_json_payload(&self) -> Value {
        let rows: Vec<Value> = (0..self.rows)
            .map(|r| Value::Array(self.columns.iter().map(|c| c.cell_json(r)).collect()))
            .collect();
        serde_json::json!({
            "columns": self.names,
            "rows": rows,
        })
    }
}

fn infer_column(cells: &[&Value]) -> Column {
    let numeric = cells
        .iter()
        .all(|v| matches!(v, Value::Null | Value::Number(_) | Value::Bool(_)));
    if numeric {
        Column::Numeric(
            cells
                .iter()
                .map(|v| match v {
                    Value::Number(n) => n.as_f64(),
                    Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                    _ => None,
                })
                .collect(),
        )
    } else {
        Column::Text(
            cells
                .iter()
                .map(|v| match v {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect(),
        )
    }
}

/// Incremental construction, mostly for tests and embedding callers.
#[derive(Debug, Default)]
pub struct DatasetBuilder {
    columns: Vec<(String, Column)>,
}

impl DatasetBuilder {
    pub fn numeric(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.columns
            .push((name.into(), Column::Numeric(values.into_iter().map(Some).collect())));
        self
    }

    pub fn text(mut self, name: impl Into<String>, values: Vec<&str>) -> Self {
        self.columns.push((
            name.into(),
            Column::Text(values.into_iter().map(|s| Some(s.to_string())).collect()),
        ));
        self
    }

    pub fn column(mut self, name: impl Into<String>, column: Column) -> Self {
        self.columns.push((name.into(), column));
        self
    }

    pub fn build(self) -> Result<Dataset> {
        Dataset::new(self.columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_counts() {
        let ds = Dataset::builder()
            .numeric("a", vec![1.0, 2.0])
            .text("b", vec!["x", "y"])
            .build()
            .unwrap();
        assert_eq!(ds.n_rows(), 2);
        assert_eq!(ds.n_cols(), 2);
        assert!(ds.has_column("b"));
        assert!(ds.numeric("b").is_none());
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let err = Dataset::builder()
            .numeric("a", vec![1.0, 2.0])
            .numeric("b", vec![1.0])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("column 'b'"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Dataset::builder()
            .numeric("a", vec![1.0])
            .numeric(" a ", vec![1.0])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_names_are_trimmed() {
        let ds = Dataset::builder().numeric("  Torque ", vec![1.0]).build().unwrap();
        assert_eq!(ds.column_names(), &["Torque".to_string()]);
    }

    #[test]
    fn test_from_json_columnar_preserves_order() {
        let ds = Dataset::from_json(
            r#"{"columns":["Type","Machine failure"],"rows":[["L",0],["M",1]]}"#,
        )
        .unwrap();
        assert_eq!(ds.column_names(), &["Type".to_string(), "Machine failure".to_string()]);
        assert_eq!(ds.numeric("Machine failure").unwrap(), &[Some(0.0), Some(1.0)]);
    }

    #[test]
    fn test_from_json_records_with_nulls_and_bools() {
        let ds = Dataset::from_json(r#"[{"x":1,"ok":true},{"x":null,"ok":false}]"#).unwrap();
        assert_eq!(ds.numeric("x").unwrap(), &[Some(1.0), None]);
        assert_eq!(ds.numeric("ok").unwrap(), &[Some(1.0), Some(0.0)]);
    }

    #[test]
    fn test_from_json_mixed_column_becomes_text() {
        let ds = Dataset::from_json(r#"[{"x":1},{"x":"two"}]"#).unwrap();
        assert!(matches!(ds.column("x"), Some(Column::Text(_))));
    }

    #[test]
    fn test_from_json_rejects_scalar() {
        assert!(Dataset::from_json("42").is_err());
    }

    #[test]
    fn test_from_json_rejects_ragged_rows() {
        let err = Dataset::from_json(r#"{"columns":["a","b"],"rows":[[1]]}"#).unwrap_err();
        assert!(matches!(err, AnalystError::InvalidInput(_)));
    }

    #[test]
    fn test_head_string_contains_header_and_first_row() {
        let ds = Dataset::builder()
            .numeric("Torque", vec![42.5, 40.0])
            .text("Type", vec!["L", "M"])
            .build()
            .unwrap();
        let head = ds.head_string(1);
        assert!(head.contains("Torque"));
        assert!(head.contains("42.5"));
        assert!(!head.contains("40"));
    }

    #[test]
    fn test_json_payload_shape() {
        let ds = Dataset::builder().numeric("a", vec![1.0]).build().unwrap();
        let p = ds.to_json_payload();
        assert_eq!(p["columns"][0], "a");
        assert_eq!(p["rows"][0][0], 1.0);
    }
}
