//! CSV-backed tabular dataset.
//!
//! Rows are addressed by their 0-based position, which stays stable for the
//! whole run. Columns are only ever appended, never reordered.

use std::io::{Read, Write};
use std::path::Path;

use crate::error::{BacktransError, Result};

/// Column that is translated when the caller does not choose one
pub const DEFAULT_SOURCE_COLUMN: &str = "English";

pub const TRANSLATED_COLUMN: &str = "Translated";
pub const FORWARD_ERROR_COLUMN: &str = "DeepL_Translation_Error";
pub const BACK_TRANSLATED_COLUMN: &str = "Back_Translated";
pub const BACK_ERROR_COLUMN: &str = "Google_Translation_Error";
pub const SEMANTIC_SIMILARITY_COLUMN: &str = "Semantic_Similarity";
pub const TEXT_SIMILARITY_COLUMN: &str = "Text_Similarity";

/// True for cells that carry nothing to translate: blank, "nan" or "none" in any case.
pub fn is_sentinel(text: &str) -> bool {
    text.trim().is_empty() || text.eq_ignore_ascii_case("nan") || text.eq_ignore_ascii_case("none")
}

/// Render a flag the way the exported files have always spelled it
pub fn format_flag(flag: bool) -> &'static str {
    if flag { "True" } else { "False" }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    name: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != headers.len()) {
            return Err(BacktransError::Dataset(format!(
                "Row {} has {} fields, expected {}", idx, row.len(), headers.len()
            )));
        }
        Ok(Self {
            name: name.into(),
            headers,
            rows,
        })
    }

    /// Load a CSV file; the dataset is named after the file stem
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| BacktransError::Dataset(format!("Invalid dataset path: {}", path.display())))?;
        let file = std::fs::File::open(path)?;
        Self::from_reader(name, file)
    }

    pub fn from_reader<R: Read>(name: impl Into<String>, reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);

        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Self::new(name, headers, rows)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[String]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }

    /// `English` if the dataset has it
    pub fn default_translation_column(&self) -> Option<&str> {
        self.column_index(DEFAULT_SOURCE_COLUMN).map(|_| DEFAULT_SOURCE_COLUMN)
    }

    /// Values of one column as owned text
    pub fn text_column(&self, column: &str) -> Result<Vec<String>> {
        let idx = self.require_column(column)?;
        Ok(self.rows.iter().map(|row| row[idx].clone()).collect())
    }

    /// Characters that would be billed by the forward provider
    pub fn count_translatable_characters(&self, column: &str) -> Result<usize> {
        let idx = self.require_column(column)?;
        Ok(self
            .rows
            .iter()
            .map(|row| row[idx].as_str())
            .filter(|text| !is_sentinel(text))
            .map(|text| text.chars().count())
            .sum())
    }

    /// Append a column; replaces the values if the column already exists
    pub fn push_column(&mut self, column: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(BacktransError::Dataset(format!(
                "Column {} has {} values for {} rows", column, values.len(), self.rows.len()
            )));
        }

        match self.column_index(column) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.headers.push(column.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(buf)
    }

    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(file)
    }

    fn require_column(&self, column: &str) -> Result<usize> {
        self.column_index(column).ok_or_else(|| {
            BacktransError::Dataset(format!(
                "Column '{}' not found; available columns: {}",
                column,
                self.headers.join(", ")
            ))
        })
    }
}
