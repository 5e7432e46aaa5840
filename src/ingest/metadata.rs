//! GTDB genome metadata TSVs (`bac120_metadata_r207.tsv` and friends).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::db::{Row, SqlValue};
use crate::error::IngestError;
use crate::schema::ColumnType;

use super::source::{open_source, SourceFile};

/// Value stored for a rank the taxonomy string leaves out.
pub const MISSING_RANK: &str = "none";

/// Source column → (table column, type). Taxonomy, accession and the
/// representative flag are handled separately.
const COLUMNS: &[(&str, &str, ColumnType)] = &[
    ("checkm_completeness", "checkm_completeness", ColumnType::Real),
    ("checkm_contamination", "checkm_contamination", ColumnType::Real),
    ("coding_bases", "coding_bases", ColumnType::Integer),
    ("coding_density", "coding_density", ColumnType::Real),
    ("contig_count", "contig_count", ColumnType::Integer),
    ("gc_percentage", "gc_content", ColumnType::Real),
    ("genome_size", "genome_size", ColumnType::Integer),
    ("protein_count", "protein_count", ColumnType::Integer),
    ("l50_contigs", "l50_contigs", ColumnType::Real),
    ("l50_scaffolds", "l50_scaffolds", ColumnType::Real),
    ("longest_contig", "longest_contig", ColumnType::Integer),
    ("longest_scaffold", "longest_scaffold", ColumnType::Integer),
    ("mean_contig_length", "mean_contig_length", ColumnType::Real),
    ("mean_scaffold_length", "mean_scaffold_length", ColumnType::Real),
    ("n50_contigs", "n50_contigs", ColumnType::Real),
    ("n50_scaffolds", "n50_scaffolds", ColumnType::Real),
    ("ncbi_genome_representation", "ncbi_genome_representation", ColumnType::Text),
    ("ncbi_contig_count", "ncbi_contig_count", ColumnType::Integer),
    ("ncbi_contig_n50", "ncbi_contig_n50", ColumnType::Real),
    ("trna_selenocysteine_count", "sec_trna_count", ColumnType::Integer),
];

const ACCESSION: &str = "accession";
const TAXONOMY: &str = "gtdb_taxonomy";
const REPRESENTATIVE: &str = "gtdb_representative";

const RANKS: [(char, &str); 7] = [
    ('d', "gtdb_domain"),
    ('p', "gtdb_phylum"),
    ('c', "gtdb_class"),
    ('o', "gtdb_order"),
    ('f', "gtdb_family"),
    ('g', "gtdb_genus"),
    ('s', "gtdb_species"),
];

#[derive(Debug, Clone)]
pub struct MetadataFile {
    path: PathBuf,
    representatives_only: bool,
}

impl MetadataFile {
    pub fn new(path: &Path, representatives_only: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            representatives_only,
        }
    }
}

impl SourceFile for MetadataFile {
    fn entries(&self) -> Result<Vec<Row>, IngestError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .from_reader(open_source(&self.path)?);

        let headers = reader
            .headers()
            .map_err(|source| IngestError::Csv {
                path: self.path.clone(),
                source,
            })?
            .clone();
        let index: HashMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h, i)).collect();
        let position = |name: &str| {
            index
                .get(name)
                .copied()
                .ok_or_else(|| IngestError::parse(&self.path, format!("missing required column '{}'", name)))
        };

        let accession = position(ACCESSION)?;
        let taxonomy = position(TAXONOMY)?;
        let representative = position(REPRESENTATIVE)?;
        let columns = COLUMNS
            .iter()
            .map(|(source, target, ty)| Ok((position(source)?, *target, *ty)))
            .collect::<Result<Vec<_>, IngestError>>()?;

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.map_err(|source| IngestError::Csv {
                path: self.path.clone(),
                source,
            })?;
            let line = idx + 2;
            let cell = |i: usize| record.get(i).unwrap_or("");

            if self.representatives_only && cell(representative) != "t" {
                continue;
            }

            let mut row = Row::new();
            row.insert("genome_id".into(), strip_accession_prefix(cell(accession)).into());
            for (rank, value) in parse_taxonomy(cell(taxonomy)) {
                row.insert(rank.into(), value.into());
            }
            for (i, target, ty) in &columns {
                let value = convert(cell(*i), *ty).map_err(|msg| {
                    IngestError::parse(&self.path, format!("line {}, column '{}': {}", line, target, msg))
                })?;
                row.insert((*target).into(), value);
            }
            rows.push(row);
        }

        tracing::debug!("Parsed {} metadata rows from {:?}", rows.len(), self.path);
        Ok(rows)
    }
}

/// GTDB prefixes accessions with their source database.
pub fn strip_accession_prefix(accession: &str) -> &str {
    accession
        .strip_prefix("GB_")
        .or_else(|| accession.strip_prefix("RS_"))
        .unwrap_or(accession)
}

/// Split `d__Bacteria;p__Proteobacteria;...` into its rank columns. Ranks that
/// are absent, empty or unrecognised keep [`MISSING_RANK`].
pub fn parse_taxonomy(taxonomy: &str) -> Vec<(&'static str, String)> {
    let mut parsed: Vec<(&'static str, String)> = RANKS
        .iter()
        .map(|(_, column)| (*column, MISSING_RANK.to_string()))
        .collect();
    let taxonomy = taxonomy.trim();
    if taxonomy == MISSING_RANK {
        return parsed;
    }

    for part in taxonomy.split(';') {
        let part = part.trim();
        let Some(flag) = part.chars().next() else { continue };
        // Species names can contain "__", so the value is everything after
        // the three-character prefix.
        let value = part.get(3..).unwrap_or("");
        if value.is_empty() {
            continue;
        }
        if let Some(slot) = RANKS
            .iter()
            .position(|(f, _)| *f == flag)
            .map(|i| &mut parsed[i].1)
        {
            *slot = value.to_string();
        }
    }
    parsed
}

/// Numeric `none` is stored as -1.
fn convert(text: &str, ty: ColumnType) -> Result<SqlValue, String> {
    let text = text.trim();
    match ty {
        ColumnType::Text => Ok(SqlValue::Text(text.to_string())),
        _ if text.is_empty() => Ok(SqlValue::Null),
        ColumnType::Integer if text == "none" => Ok(SqlValue::Integer(-1)),
        ColumnType::Real if text == "none" => Ok(SqlValue::Real(-1.0)),
        ColumnType::Integer => text
            .parse::<i64>()
            .map(SqlValue::Integer)
            .map_err(|_| format!("expected an integer, found '{}'", text)),
        ColumnType::Real => text
            .parse::<f64>()
            .map(SqlValue::Real)
            .map_err(|_| format!("expected a number, found '{}'", text)),
    }
}
