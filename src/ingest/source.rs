//! Helpers shared by the source-file parsers.

use flate2::read::GzDecoder;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

use crate::db::{Row, SqlValue};
use crate::error::IngestError;

/// Every parser turns one source file (or pair of files) into table rows.
pub trait SourceFile {
    /// Rows in file order, without `release` or synthetic keys; the
    /// pipeline stamps those.
    fn entries(&self) -> Result<Vec<Row>, IngestError>;
}

/// Open a source file for reading, decompressing `.gz` transparently.
pub fn open_source(path: &Path) -> Result<Box<dyn BufRead>, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Whether a file name ends in `.{ext}` or `.{ext}.gz`.
pub fn has_extension(path: &Path, ext: &str) -> bool {
    let name = match path.file_name() {
        Some(n) => n.to_string_lossy(),
        None => return false,
    };
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    name.len() > ext.len() + 1 && name.ends_with(ext) && name[..name.len() - ext.len()].ends_with('.')
}

static ACCESSION: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// Pull the GTDB genome accession (`GCA_000010565.1`, `GCF_...`) out of a
/// file name.
pub fn genome_id_from_path(path: &Path) -> Result<String, IngestError> {
    let re = ACCESSION
        .get_or_init(|| Regex::new(r"GC[AF]_\d{9}\.\d+"))
        .as_ref()
        .map_err(|e| IngestError::parse(path, e.to_string()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    re.find(&name)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| IngestError::parse(path, "file name does not contain a genome accession"))
}

/// Integer cell. Empty and `-` are NULL.
pub fn integer_cell(text: &str) -> Result<SqlValue, String> {
    match text.trim() {
        "" | "-" => Ok(SqlValue::Null),
        t => t
            .parse::<i64>()
            .map(SqlValue::Integer)
            .map_err(|_| format!("expected an integer, found '{}'", t)),
    }
}

/// Floating-point cell. Empty and `-` are NULL.
pub fn real_cell(text: &str) -> Result<SqlValue, String> {
    match text.trim() {
        "" | "-" => Ok(SqlValue::Null),
        t => t
            .parse::<f64>()
            .map(SqlValue::Real)
            .map_err(|_| format!("expected a number, found '{}'", t)),
    }
}

/// Text cell. Empty is NULL.
pub fn text_cell(text: &str) -> SqlValue {
    if text.is_empty() {
        SqlValue::Null
    } else {
        SqlValue::Text(text.to_string())
    }
}
