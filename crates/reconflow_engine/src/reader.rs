//! File decoding: delimited text and spreadsheets into raw row tables.
//!
//! # Encoding contract
//!
//! Delimited files are decoded by probing, in order: UTF-8, UTF-8 with BOM,
//! GB18030, GBK, GB2312, Latin-1. The first decoding that succeeds without
//! replacement characters wins. The Latin-1 step rejects bytes that can only
//! occur in binary content (NUL and C0 controls other than tab/CR/LF), so a
//! file none of the probes can represent fails with `ReadFailed` instead of
//! decoding to garbage.
//!
//! Cell values stay strings through this layer; numeric and date coercion
//! happen in cleaning so the original formatting is available to issue
//! detail templates.

use crate::error::EngineError;
use crate::value::CellValue;
use calamine::{open_workbook_auto, Data, Reader};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// A decoded file: ordered header columns plus one map per data row.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, CellValue>>,
}

/// Per-side read options.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Worksheet name for spreadsheet files; first sheet when None.
    pub sheet: Option<String>,
}

/// Read a single input file into a table.
pub fn read(path: &Path, options: &ReadOptions) -> Result<Table, EngineError> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let table = match extension.as_str() {
        "csv" | "tsv" | "txt" => read_delimited(path)?,
        "xlsx" | "xls" => read_spreadsheet(path, options)?,
        other => {
            return Err(EngineError::ReadFailed {
                path: path.to_path_buf(),
                message: format!("unsupported file format '.{other}'"),
            })
        }
    };

    if table.rows.is_empty() {
        return Err(EngineError::EmptyFile(path.to_path_buf()));
    }
    debug!(
        file = %path.display(),
        columns = table.columns.len(),
        rows = table.rows.len(),
        "read input file"
    );
    Ok(table)
}

fn read_delimited(path: &Path) -> Result<Table, EngineError> {
    let bytes = std::fs::read(path).map_err(|e| EngineError::ReadFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let text = decode_text(&bytes).ok_or_else(|| EngineError::ReadFailed {
        path: path.to_path_buf(),
        message: "encoding not recognized (probed utf-8, utf-8-bom, gb18030, gbk, gb2312, latin-1)"
            .to_string(),
    })?;

    let delimiter = infer_delimiter(&text);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut columns: Vec<String> = Vec::new();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| EngineError::ReadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        if columns.is_empty() {
            // First non-empty record is the header.
            columns = record.iter().map(|h| h.trim().to_string()).collect();
            continue;
        }
        rows.push(record_to_row(&columns, record.iter()));
    }

    Ok(Table { columns, rows })
}

/// Probe the documented encoding list; None when nothing fits.
fn decode_text(bytes: &[u8]) -> Option<String> {
    // UTF-8 with or without BOM (a BOM is itself valid UTF-8, so one probe
    // covers both list entries; the marker is stripped here).
    if let Ok(s) = std::str::from_utf8(bytes) {
        return Some(s.trim_start_matches('\u{feff}').to_string());
    }
    for label in ["gb18030", "gbk", "gb2312"] {
        let encoding = encoding_rs::Encoding::for_label(label.as_bytes())?;
        let (decoded, _, had_errors) = encoding.decode(bytes);
        if !had_errors {
            return Some(decoded.into_owned());
        }
    }
    // Latin-1 decodes any byte; reject content that is clearly binary.
    if bytes
        .iter()
        .any(|&b| b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
    {
        return None;
    }
    Some(encoding_rs::mem::decode_latin1(bytes).into_owned())
}

/// Pick the delimiter with the most occurrences on the first data line.
fn infer_delimiter(text: &str) -> u8 {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let candidates = [(b',', ','), (b';', ';'), (b'\t', '\t')];
    candidates
        .iter()
        .map(|&(byte, ch)| (byte, first_line.matches(ch).count()))
        .max_by_key(|&(_, count)| count)
        .filter(|&(_, count)| count > 0)
        .map(|(byte, _)| byte)
        .unwrap_or(b',')
}

fn read_spreadsheet(path: &Path, options: &ReadOptions) -> Result<Table, EngineError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| EngineError::ReadFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let sheet_name = match &options.sheet {
        Some(name) => name.clone(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| EngineError::ReadFailed {
                path: path.to_path_buf(),
                message: "workbook has no worksheets".to_string(),
            })?,
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| EngineError::ReadFailed {
            path: path.to_path_buf(),
            message: format!("worksheet '{sheet_name}': {e}"),
        })?;

    let mut columns: Vec<String> = Vec::new();
    let mut rows = Vec::new();
    for row in range.rows() {
        if row.iter().all(is_empty_cell) {
            continue;
        }
        if columns.is_empty() {
            columns = row.iter().map(|c| cell_text(c).trim().to_string()).collect();
            continue;
        }
        let values = row.iter().map(cell_text);
        rows.push(record_to_row(&columns, values));
    }

    Ok(Table { columns, rows })
}

fn is_empty_cell(cell: &Data) -> bool {
    matches!(cell, Data::Empty) || cell_text(cell).trim().is_empty()
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => crate::value::format_num(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn record_to_row<I, S>(columns: &[String], cells: I) -> HashMap<String, CellValue>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut row = HashMap::with_capacity(columns.len());
    let mut cells = cells.into_iter();
    for column in columns {
        let value = match cells.next() {
            Some(cell) if !cell.as_ref().is_empty() => CellValue::Str(cell.as_ref().to_string()),
            _ => CellValue::Null,
        };
        row.insert(column.clone(), value);
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn reads_utf8_csv_with_inferred_comma() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.csv", "订单号,金额\nA001,100.00\n".as_bytes());
        let table = read(&path, &ReadOptions::default()).unwrap();
        assert_eq!(table.columns, vec!["订单号", "金额"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(
            table.rows[0]["金额"],
            CellValue::Str("100.00".to_string())
        );
    }

    #[test]
    fn reads_semicolon_and_tab_delimited() {
        let dir = TempDir::new().unwrap();
        let semi = write_file(&dir, "a.csv", b"id;v\n1;2\n");
        let tab = write_file(&dir, "b.tsv", b"id\tv\n1\t2\n");
        assert_eq!(read(&semi, &ReadOptions::default()).unwrap().columns, vec!["id", "v"]);
        assert_eq!(read(&tab, &ReadOptions::default()).unwrap().columns, vec!["id", "v"]);
    }

    #[test]
    fn decodes_gbk_bytes() {
        // "订单号,金额" encoded as GBK.
        let (encoded, _, _) = encoding_rs::GBK.encode("订单号,金额\nA001,5\n");
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "gbk.csv", &encoded);
        let table = read(&path, &ReadOptions::default()).unwrap();
        assert_eq!(table.columns[0], "订单号");
    }

    #[test]
    fn strips_utf8_bom() {
        let dir = TempDir::new().unwrap();
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"id,v\n1,2\n");
        let path = write_file(&dir, "bom.csv", &bytes);
        let table = read(&path, &ReadOptions::default()).unwrap();
        assert_eq!(table.columns, vec!["id", "v"]);
    }

    #[test]
    fn binary_content_fails_read() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "bin.csv", &[0x00, 0x01, 0xFF, 0xFE, 0x00]);
        let err = read(&path, &ReadOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::ReadFailed { .. }));
    }

    #[test]
    fn header_only_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "h.csv", b"id,v\n");
        assert!(matches!(
            read(&path, &ReadOptions::default()),
            Err(EngineError::EmptyFile(_))
        ));
    }

    #[test]
    fn unsupported_extension_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.parquet", b"x");
        assert!(matches!(
            read(&path, &ReadOptions::default()),
            Err(EngineError::ReadFailed { .. })
        ));
    }

    #[test]
    fn missing_trailing_cells_become_null() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "short.csv", b"id,v,w\n1,2\n");
        let table = read(&path, &ReadOptions::default()).unwrap();
        assert_eq!(table.rows[0]["w"], CellValue::Null);
    }

    #[test]
    fn skips_leading_blank_lines_before_header() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "blank.csv", b"\n\nid,v\n1,2\n");
        let table = read(&path, &ReadOptions::default()).unwrap();
        assert_eq!(table.columns, vec!["id", "v"]);
        assert_eq!(table.rows.len(), 1);
    }
}
