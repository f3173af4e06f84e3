use crate::dataset::{CellValue, DatasetError, TabularDataset};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use calamine::{Data, Reader, open_workbook_auto_from_rs};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{debug, error};
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::io::Cursor;

/// Message shown in place of a preview when a file cannot be decoded
pub const GENERIC_ERROR_MESSAGE: &str = "There was an error processing this file.";

lazy_static! {
    static ref DATA_URL_HEADER: Regex = Regex::new(r"^data:(?P<mime>[^;,]*)(?P<params>(;[^;,]*)*)$").unwrap();
}

/// A file as delivered by the browser upload control
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    /// Original file name, used to pick the format
    pub filename: String,

    /// Data URL of the file content (`data:<mime>;base64,<content>`)
    pub contents: String,

    /// Last-modified time in seconds since the epoch
    #[serde(default)]
    pub last_modified: Option<f64>,
}

impl UploadedFile {
    /// Last-modified time as a UTC timestamp, if the browser sent one
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.last_modified.and_then(timestamp_from_seconds)
    }
}

/// Formats a decoder can route a file to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Spreadsheet,
}

impl FileFormat {
    /// Picks the format from a filename by substring, `csv` first, then `xls`
    ///
    /// # Examples
    /// ```
    /// use sheetplot::decoder::FileFormat;
    ///
    /// assert_eq!(FileFormat::from_filename("data.csv"), Some(FileFormat::Csv));
    /// assert_eq!(FileFormat::from_filename("book.xlsx"), Some(FileFormat::Spreadsheet));
    /// assert_eq!(FileFormat::from_filename("notes.txt"), None);
    /// ```
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains("csv") {
            Some(FileFormat::Csv)
        } else if filename.contains("xls") {
            Some(FileFormat::Spreadsheet)
        } else {
            None
        }
    }
}

/// Reasons a file could not be turned into a dataset
#[derive(Debug)]
pub enum DecodeError {
    /// The payload is not a base64 data URL
    MalformedPayload(String),
    Base64(base64::DecodeError),
    /// CSV content is not valid UTF-8
    Encoding(std::str::Utf8Error),
    UnsupportedFormat(String),
    Csv(csv::Error),
    Spreadsheet(String),
    /// The file has no header row
    Empty,
    Dataset(DatasetError),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::MalformedPayload(reason) => write!(f, "malformed upload payload: {}", reason),
            DecodeError::Base64(e) => write!(f, "invalid base64 content: {}", e),
            DecodeError::Encoding(e) => write!(f, "file is not valid UTF-8: {}", e),
            DecodeError::UnsupportedFormat(name) => write!(f, "unsupported file type: {}", name),
            DecodeError::Csv(e) => write!(f, "CSV parse error: {}", e),
            DecodeError::Spreadsheet(e) => write!(f, "spreadsheet parse error: {}", e),
            DecodeError::Empty => f.write_str("file contains no columns"),
            DecodeError::Dataset(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Base64(e) => Some(e),
            DecodeError::Encoding(e) => Some(e),
            DecodeError::Csv(e) => Some(e),
            DecodeError::Dataset(e) => Some(e),
            _ => None,
        }
    }
}

impl From<base64::DecodeError> for DecodeError {
    fn from(e: base64::DecodeError) -> Self {
        DecodeError::Base64(e)
    }
}

impl From<std::str::Utf8Error> for DecodeError {
    fn from(e: std::str::Utf8Error) -> Self {
        DecodeError::Encoding(e)
    }
}

impl From<csv::Error> for DecodeError {
    fn from(e: csv::Error) -> Self {
        DecodeError::Csv(e)
    }
}

impl From<calamine::Error> for DecodeError {
    fn from(e: calamine::Error) -> Self {
        DecodeError::Spreadsheet(e.to_string())
    }
}

impl From<DatasetError> for DecodeError {
    fn from(e: DatasetError) -> Self {
        DecodeError::Dataset(e)
    }
}

/// Result of decoding one file of an upload batch
#[derive(Debug)]
pub struct FileOutcome {
    pub filename: String,
    pub modified_at: Option<DateTime<Utc>>,
    pub result: Result<TabularDataset, DecodeError>,
}

impl FileOutcome {
    /// Message to show the user: `None` on success, the generic error otherwise
    pub fn user_message(&self) -> Option<&'static str> {
        self.result.as_ref().err().map(|_| GENERIC_ERROR_MESSAGE)
    }
}

/// Decode an uploaded data URL into a dataset
///
/// The payload is split at its first comma, the content part is base64
/// decoded, and the bytes are parsed according to the filename.
///
/// # Arguments
/// * `payload` - Data URL as produced by a browser file input
/// * `filename` - Name of the uploaded file
///
/// # Returns
/// * `Result<TabularDataset, DecodeError>` - The parsed table or the reason it failed
///
/// # Examples
/// ```
/// use sheetplot::decoder::decode;
///
/// // "a,b\n1,2\n"
/// let dataset = decode("data:text/csv;base64,YSxiCjEsMgo=", "numbers.csv").unwrap();
/// assert_eq!(dataset.columns(), &["a", "b"]);
/// assert_eq!(dataset.row_count(), 1);
/// ```
pub fn decode(payload: &str, filename: &str) -> Result<TabularDataset, DecodeError> {
    let (header, content) = payload
        .split_once(',')
        .ok_or_else(|| DecodeError::MalformedPayload("missing ',' separator".to_string()))?;

    let captures = DATA_URL_HEADER
        .captures(header)
        .ok_or_else(|| DecodeError::MalformedPayload("missing data URL header".to_string()))?;
    if !captures["params"].split(';').any(|p| p == "base64") {
        return Err(DecodeError::MalformedPayload(
            "content is not base64 encoded".to_string(),
        ));
    }
    debug!("Decoding {} ({})", filename, &captures["mime"]);

    let bytes = STANDARD.decode(content.trim())?;
    decode_bytes(&bytes, filename)
}

/// Decode raw file bytes into a dataset, picking the format from `filename`
pub fn decode_bytes(bytes: &[u8], filename: &str) -> Result<TabularDataset, DecodeError> {
    match FileFormat::from_filename(filename) {
        Some(FileFormat::Csv) => from_csv(bytes),
        Some(FileFormat::Spreadsheet) => from_excel(bytes),
        None => Err(DecodeError::UnsupportedFormat(filename.to_string())),
    }
}

/// Decode every file of one upload on its own
///
/// Failures are logged with their detail and kept in the outcome; they never
/// stop the remaining files from being decoded.
pub fn decode_batch(files: &[UploadedFile]) -> Vec<FileOutcome> {
    files
        .iter()
        .map(|file| {
            let result = decode(&file.contents, &file.filename);
            log_failure(&file.filename, &result);
            FileOutcome {
                filename: file.filename.clone(),
                modified_at: file.modified_at(),
                result,
            }
        })
        .collect()
}

/// Decode one file received as raw bytes, e.g. from a multipart form
pub fn decode_file_bytes(filename: &str, bytes: &[u8], last_modified: Option<f64>) -> FileOutcome {
    let result = decode_bytes(bytes, filename);
    log_failure(filename, &result);
    FileOutcome {
        filename: filename.to_string(),
        modified_at: last_modified.and_then(timestamp_from_seconds),
        result,
    }
}

fn log_failure(filename: &str, result: &Result<TabularDataset, DecodeError>) {
    if let Err(e) = result {
        error!("Failed to decode {}: {}", filename, e);
    }
}

fn timestamp_from_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis((seconds * 1000.0).round() as i64)
}

/// Parse UTF-8 comma-separated text whose first record is the header
fn from_csv(bytes: &[u8]) -> Result<TabularDataset, DecodeError> {
    let text = std::str::from_utf8(bytes)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());

    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if header.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(CellValue::infer).collect());
    }

    Ok(TabularDataset::new(header, rows)?)
}

/// Parse the first worksheet of a spreadsheet workbook, first row as header
fn from_excel(bytes: &[u8]) -> Result<TabularDataset, DecodeError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;

    let range = workbook.worksheet_range_at(0).ok_or(DecodeError::Empty)??;

    let mut rows = range.rows();
    let header: Vec<String> = match rows.next() {
        Some(first) => first.iter().map(header_name).collect(),
        None => return Err(DecodeError::Empty),
    };

    let body = rows
        .map(|row| row.iter().map(cell_from_data).collect())
        .collect();

    Ok(TabularDataset::new(header, body)?)
}

fn header_name(cell: &Data) -> String {
    match cell_from_data(cell) {
        CellValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn cell_from_data(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Null,
        Data::Bool(b) => CellValue::Bool(*b),
        Data::Int(i) => CellValue::Int(*i),
        // whole-number floats read back as integers
        Data::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            CellValue::Int(*f as i64)
        }
        Data::Float(f) => CellValue::Float(*f),
        Data::String(s) if s.is_empty() => CellValue::Null,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Error(_) => CellValue::Null,
        other => CellValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_url(mime: &str, content: &[u8]) -> String {
        format!("data:{};base64,{}", mime, STANDARD.encode(content))
    }

    #[test]
    fn decodes_csv_with_header_order() {
        let payload = data_url("text/csv", b"year,city,sales\n2020,Oslo,1.5\n2021,Bergen,2\n");
        let dataset = decode(&payload, "sales.csv").unwrap();

        assert_eq!(dataset.columns(), &["year", "city", "sales"]);
        assert_eq!(dataset.row_count(), 2);
        assert_eq!(dataset.value(0, "year"), Some(&CellValue::Int(2020)));
        assert_eq!(
            dataset.value(1, "city"),
            Some(&CellValue::Text("Bergen".to_string()))
        );
        assert_eq!(dataset.value(1, "sales"), Some(&CellValue::Float(2.0)));
    }

    #[test]
    fn handles_quoted_fields_and_bom() {
        let payload = data_url(
            "text/csv",
            "\u{feff}name,note\n\"Smith, J\",\"said \"\"hi\"\"\"\n".as_bytes(),
        );
        let dataset = decode(&payload, "people.csv").unwrap();
        assert_eq!(dataset.columns(), &["name", "note"]);
        assert_eq!(
            dataset.value(0, "note"),
            Some(&CellValue::Text("said \"hi\"".to_string()))
        );
    }

    #[test]
    fn header_only_csv_has_no_rows() {
        let dataset = decode_bytes(b"a,b\n", "empty.csv").unwrap();
        assert_eq!(dataset.column_count(), 2);
        assert_eq!(dataset.row_count(), 0);
    }

    #[test]
    fn rejects_unsupported_extension() {
        let payload = data_url("text/plain", b"a,b\n1,2\n");
        let err = decode(&payload, "notes.txt").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(_)));
    }

    #[test]
    fn rejects_payload_without_separator() {
        let err = decode("data:text/csv;base64", "a.csv").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPayload(_)));
    }

    #[test]
    fn rejects_bad_base64() {
        let err = decode("data:text/csv;base64,@@@@", "a.csv").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn rejects_non_utf8_csv() {
        let payload = data_url("text/csv", &[0x61, 0x0a, 0xff, 0xfe, 0x0a]);
        let err = decode(&payload, "latin.csv").unwrap_err();
        assert!(matches!(err, DecodeError::Encoding(_)));
    }

    #[test]
    fn rejects_ragged_csv() {
        let err = decode_bytes(b"a,b\n1,2,3\n", "bad.csv").unwrap_err();
        assert!(matches!(err, DecodeError::Csv(_)));
    }

    #[test]
    fn rejects_empty_csv() {
        let err = decode_bytes(b"", "nothing.csv").unwrap_err();
        assert!(matches!(err, DecodeError::Empty));
    }

    #[test]
    fn rejects_garbage_spreadsheet() {
        let err = decode_bytes(b"definitely not a workbook", "book.xlsx").unwrap_err();
        assert!(matches!(err, DecodeError::Spreadsheet(_)));
    }

    #[test]
    fn batch_isolates_failures() {
        let files = vec![
            UploadedFile {
                filename: "good.csv".to_string(),
                contents: data_url("text/csv", b"x\n1\n"),
                last_modified: Some(1_600_000_000.0),
            },
            UploadedFile {
                filename: "bad.txt".to_string(),
                contents: data_url("text/plain", b"x\n1\n"),
                last_modified: None,
            },
            UploadedFile {
                filename: "also_good.csv".to_string(),
                contents: data_url("text/csv", b"y\n2\n3\n"),
                last_modified: None,
            },
        ];

        let outcomes = decode_batch(&files);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(outcomes[0].user_message(), None);
        assert_eq!(
            outcomes[0].modified_at.map(|t| t.timestamp()),
            Some(1_600_000_000)
        );
        assert_eq!(outcomes[1].user_message(), Some(GENERIC_ERROR_MESSAGE));
        assert_eq!(outcomes[2].result.as_ref().unwrap().row_count(), 2);
    }

    #[test]
    fn format_detection_prefers_csv() {
        assert_eq!(FileFormat::from_filename("export.xls.csv"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::from_filename("legacy.xls"), Some(FileFormat::Spreadsheet));
        assert_eq!(FileFormat::from_filename("DATA.CSV"), None);
    }
}
