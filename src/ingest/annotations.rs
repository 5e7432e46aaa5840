//! Per-genome annotation hits: Kofamscan KEGG CSVs and InterProScan Pfam
//! TSVs. Neither carries a per-hit key; the pipeline assigns one.

use std::path::{Path, PathBuf};

use crate::db::Row;
use crate::error::IngestError;

use super::source::{genome_id_from_path, integer_cell, open_source, real_cell, text_cell, SourceFile};

/// Column names given to the Kofamscan CSV, whose own header is discarded.
pub const KEGG_COLUMNS: [&str; 5] = ["gene_id", "ko", "threshold", "score", "e_value"];

/// InterProScan TSV layout (no header row).
const PFAM_GENE_ID: usize = 0;
const PFAM_LENGTH: usize = 2;
const PFAM_ACCESSION: usize = 4;
const PFAM_START: usize = 6;
const PFAM_STOP: usize = 7;
const PFAM_E_VALUE: usize = 8;
const PFAM_INTERPRO_ACCESSION: usize = 11;
const PFAM_INTERPRO_DESCRIPTION: usize = 12;
const PFAM_MIN_FIELDS: usize = 9;

#[derive(Debug, Clone)]
pub struct KeggAnnotationsFile {
    path: PathBuf,
    genome_id: String,
}

impl KeggAnnotationsFile {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        Ok(Self {
            path: path.to_path_buf(),
            genome_id: genome_id_from_path(path)?,
        })
    }
}

impl SourceFile for KeggAnnotationsFile {
    fn entries(&self) -> Result<Vec<Row>, IngestError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(open_source(&self.path)?);

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.map_err(|source| IngestError::Csv {
                path: self.path.clone(),
                source,
            })?;
            let line = idx + 2;
            if record.len() < KEGG_COLUMNS.len() {
                return Err(IngestError::parse(
                    &self.path,
                    format!("line {}: expected {} columns, found {}", line, KEGG_COLUMNS.len(), record.len()),
                ));
            }
            let bad = |msg: String| IngestError::parse(&self.path, format!("line {}: {}", line, msg));

            let mut row = Row::new();
            row.insert("gene_id".into(), text_cell(&record[0]));
            row.insert("genome_id".into(), self.genome_id.clone().into());
            row.insert("ko".into(), text_cell(&record[1]));
            row.insert("threshold".into(), real_cell(&record[2]).map_err(bad)?);
            row.insert("score".into(), real_cell(&record[3]).map_err(bad)?);
            row.insert("e_value".into(), real_cell(&record[4]).map_err(bad)?);
            rows.push(row);
        }
        Ok(rows)
    }
}

#[derive(Debug, Clone)]
pub struct PfamAnnotationsFile {
    path: PathBuf,
    genome_id: String,
}

impl PfamAnnotationsFile {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        Ok(Self {
            path: path.to_path_buf(),
            genome_id: genome_id_from_path(path)?,
        })
    }
}

impl SourceFile for PfamAnnotationsFile {
    fn entries(&self) -> Result<Vec<Row>, IngestError> {
        // Descriptions contain stray quotes; InterProScan never quotes fields.
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .quoting(false)
            .flexible(true)
            .from_reader(open_source(&self.path)?);

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.map_err(|source| IngestError::Csv {
                path: self.path.clone(),
                source,
            })?;
            let line = idx + 1;
            if record.len() < PFAM_MIN_FIELDS {
                return Err(IngestError::parse(
                    &self.path,
                    format!("line {}: expected at least {} columns, found {}", line, PFAM_MIN_FIELDS, record.len()),
                ));
            }
            let bad = |msg: String| IngestError::parse(&self.path, format!("line {}: {}", line, msg));
            let optional = |idx: usize| record.get(idx).map(text_cell).unwrap_or(crate::db::SqlValue::Null);

            let mut row = Row::new();
            row.insert("gene_id".into(), text_cell(&record[PFAM_GENE_ID]));
            row.insert("genome_id".into(), self.genome_id.clone().into());
            row.insert("pfam".into(), text_cell(&record[PFAM_ACCESSION]));
            row.insert("start".into(), integer_cell(&record[PFAM_START]).map_err(bad)?);
            row.insert("stop".into(), integer_cell(&record[PFAM_STOP]).map_err(bad)?);
            row.insert("length".into(), integer_cell(&record[PFAM_LENGTH]).map_err(bad)?);
            row.insert("e_value".into(), real_cell(&record[PFAM_E_VALUE]).map_err(bad)?);
            row.insert("interpro_accession".into(), optional(PFAM_INTERPRO_ACCESSION));
            row.insert("interpro_description".into(), optional(PFAM_INTERPRO_DESCRIPTION));
            rows.push(row);
        }
        Ok(rows)
    }
}
