use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Markers read as missing values, matching what dataframe readers treat as NA.
const NULL_MARKERS: [&str; 9] = ["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None", "#N/A"];

/// A single scalar stored in a dataset cell
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    /// Infers the type of a raw text field
    ///
    /// Missing markers become `Null`, `true`/`false` become `Bool`, whole numbers
    /// become `Int` and decimals become `Float`. Anything else is kept as `Text`.
    ///
    /// # Examples
    /// ```
    /// use sheetplot::dataset::CellValue;
    ///
    /// assert_eq!(CellValue::infer("42"), CellValue::Int(42));
    /// assert_eq!(CellValue::infer("4.5"), CellValue::Float(4.5));
    /// assert_eq!(CellValue::infer(""), CellValue::Null);
    /// assert_eq!(CellValue::infer("abc"), CellValue::Text("abc".to_string()));
    /// ```
    pub fn infer(field: &str) -> Self {
        if NULL_MARKERS.contains(&field) {
            return CellValue::Null;
        }

        match field {
            "true" | "True" | "TRUE" => return CellValue::Bool(true),
            "false" | "False" | "FALSE" => return CellValue::Bool(false),
            _ => {}
        }

        let trimmed = field.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            CellValue::Int(i)
        } else if let Ok(f) = trimmed.parse::<f64>() {
            CellValue::Float(f)
        } else {
            CellValue::Text(field.to_string())
        }
    }

    /// Numeric view of the cell, used when plotting
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) if f.is_finite() => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

/// Errors raised while assembling a dataset
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetError {
    /// A row does not have one value per column
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetError::RaggedRow {
                row,
                expected,
                found,
            } => write!(
                f,
                "row {} has {} values but the header has {} columns",
                row, found, expected
            ),
        }
    }
}

impl std::error::Error for DatasetError {}

/// An in-memory table with named columns and ordered rows
///
/// Column names are unique and keep the order of the source header. Every
/// row holds exactly one value per column. Deserializing goes through
/// [`TabularDataset::new`], so a stored copy is held to the same rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataset")]
pub struct TabularDataset {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

#[derive(Deserialize)]
struct RawDataset {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl TryFrom<RawDataset> for TabularDataset {
    type Error = DatasetError;

    fn try_from(raw: RawDataset) -> Result<Self, Self::Error> {
        TabularDataset::new(raw.columns, raw.rows)
    }
}

impl TabularDataset {
    /// Builds a dataset from a header and its rows
    ///
    /// Blank header cells are named `Unnamed: <index>` and repeated names get
    /// a `.1`, `.2`, ... suffix so that every column can be addressed by name.
    /// Columns mixing integers and decimals are widened to decimals.
    ///
    /// # Errors
    /// * Returns `DatasetError::RaggedRow` if a row's width differs from the header
    pub fn new(header: Vec<String>, rows: Vec<Vec<CellValue>>) -> Result<Self, DatasetError> {
        let columns = unique_column_names(header);

        for (index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DatasetError::RaggedRow {
                    row: index + 1,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
        }

        let mut dataset = TabularDataset { columns, rows };
        dataset.widen_mixed_numeric_columns();
        Ok(dataset)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Value at `row` in the named column
    pub fn value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let index = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[index])
    }

    /// Rows on the zero-based page `index` when split into pages of `size` rows
    ///
    /// Pages past the end are empty.
    pub fn page(&self, index: usize, size: usize) -> &[Vec<CellValue>] {
        if size == 0 {
            return &[];
        }
        let start = index.saturating_mul(size).min(self.rows.len());
        let end = start.saturating_add(size).min(self.rows.len());
        &self.rows[start..end]
    }

    /// Number of pages of `size` rows, never less than one
    pub fn page_count(&self, size: usize) -> usize {
        if size == 0 {
            return 1;
        }
        self.rows.len().div_ceil(size).max(1)
    }

    fn widen_mixed_numeric_columns(&mut self) {
        for col in 0..self.columns.len() {
            let has_float = self
                .rows
                .iter()
                .any(|row| matches!(row[col], CellValue::Float(_)));
            let all_numeric = self.rows.iter().all(|row| {
                matches!(
                    row[col],
                    CellValue::Int(_) | CellValue::Float(_) | CellValue::Null
                )
            });

            if has_float && all_numeric {
                for row in self.rows.iter_mut() {
                    if let CellValue::Int(i) = row[col] {
                        row[col] = CellValue::Float(i as f64);
                    }
                }
            }
        }
    }
}

fn unique_column_names(header: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut columns = Vec::with_capacity(header.len());

    for (index, raw) in header.into_iter().enumerate() {
        let base = if raw.trim().is_empty() {
            format!("Unnamed: {}", index)
        } else {
            raw
        };

        let mut name = base.clone();
        let mut suffix = 1;
        while seen.contains(&name) {
            name = format!("{}.{}", base, suffix);
            suffix += 1;
        }

        seen.insert(name.clone());
        columns.push(name);
    }

    columns
}
