//! Prodigal gene predictions: paired amino-acid (`.faa`) and nucleotide
//! (`.fna`) FASTA files, one pair per genome.
//!
//! Headers look like
//! `>{gene_id} # {start} # {stop} # {1|-1} # ID=1_1;partial=00;start_type=ATG;rbs_motif=...;rbs_spacer=...;gc_cont=0.562`.

use bio::io::fasta;
use std::path::{Path, PathBuf};

use crate::db::{Row, SqlValue};
use crate::error::IngestError;

use super::source::{genome_id_from_path, has_extension, open_source, SourceFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    Amino,
    Nucleotide,
}

impl SequenceKind {
    pub fn extension(&self) -> &'static str {
        match self {
            SequenceKind::Amino => "faa",
            SequenceKind::Nucleotide => "fna",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        if has_extension(path, "faa") {
            Some(SequenceKind::Amino)
        } else if has_extension(path, "fna") {
            Some(SequenceKind::Nucleotide)
        } else {
            None
        }
    }
}

/// One FASTA record with its header already split into columns.
#[derive(Debug, Clone)]
pub struct FastaRecord {
    pub gene_id: String,
    pub header: Row,
    pub sequence: String,
}

#[derive(Debug, Clone)]
pub struct ProteinsFile {
    path: PathBuf,
    kind: SequenceKind,
    genome_id: String,
}

impl ProteinsFile {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let kind = SequenceKind::from_path(path)
            .ok_or_else(|| IngestError::parse(path, "expected a .faa or .fna file"))?;
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            genome_id: genome_id_from_path(path)?,
        })
    }

    pub fn kind(&self) -> SequenceKind {
        self.kind
    }

    pub fn genome_id(&self) -> &str {
        &self.genome_id
    }

    /// Every record in file order.
    pub fn records(&self) -> Result<Vec<FastaRecord>, IngestError> {
        let reader = fasta::Reader::new(open_source(&self.path)?);
        let mut records = Vec::new();

        for (idx, record) in reader.records().enumerate() {
            let record = record.map_err(|source| IngestError::Io {
                path: self.path.clone(),
                source,
            })?;
            let header = match record.desc() {
                Some(desc) => format!("{} {}", record.id(), desc),
                None => record.id().to_string(),
            };
            let (gene_id, fields) = parse_header(&header)
                .map_err(|msg| IngestError::parse(&self.path, format!("record {}: {}", idx + 1, msg)))?;
            records.push(FastaRecord {
                gene_id,
                header: fields,
                sequence: String::from_utf8_lossy(record.seq()).into_owned(),
            });
        }

        Ok(records)
    }
}

impl SourceFile for ProteinsFile {
    /// A lone file contributes the header columns plus either `seq` (amino
    /// acids) or the start and stop codons (nucleotides).
    fn entries(&self) -> Result<Vec<Row>, IngestError> {
        let kind = self.kind;
        Ok(self
            .records()?
            .into_iter()
            .map(|record| {
                let mut row = record.header;
                row.insert("genome_id".into(), self.genome_id.clone().into());
                add_sequence(&mut row, kind, &record.sequence);
                row
            })
            .collect())
    }
}

fn add_sequence(row: &mut Row, kind: SequenceKind, sequence: &str) {
    match kind {
        SequenceKind::Amino => {
            row.insert("seq".into(), sequence.into());
        }
        SequenceKind::Nucleotide => {
            let chars: Vec<char> = sequence.chars().collect();
            let start: String = chars.iter().take(3).collect();
            let stop: String = chars.iter().skip(chars.len().saturating_sub(3)).collect();
            row.insert("start_codon".into(), start.into());
            row.insert("stop_codon".into(), stop.into());
        }
    }
}

/// The amino-acid and nucleotide predictions for one genome, merged gene by
/// gene.
#[derive(Debug, Clone)]
pub struct ProteinPair {
    pub amino: ProteinsFile,
    pub nucleotide: ProteinsFile,
}

impl ProteinPair {
    pub fn new(amino: ProteinsFile, nucleotide: ProteinsFile) -> Result<Self, IngestError> {
        if amino.genome_id != nucleotide.genome_id {
            return Err(IngestError::PairedFileMismatch {
                genome_id: amino.genome_id.clone(),
                message: format!("paired with a file for {}", nucleotide.genome_id),
            });
        }
        Ok(Self { amino, nucleotide })
    }
}

impl SourceFile for ProteinPair {
    /// Fails unless both files list the same genes in the same order.
    fn entries(&self) -> Result<Vec<Row>, IngestError> {
        let amino = self.amino.records()?;
        let nucleotide = self.nucleotide.records()?;
        let genome_id = &self.amino.genome_id;

        if amino.len() != nucleotide.len() {
            return Err(IngestError::PairedFileMismatch {
                genome_id: genome_id.clone(),
                message: format!(
                    "{} amino-acid records but {} nucleotide records",
                    amino.len(),
                    nucleotide.len()
                ),
            });
        }

        let mut rows = Vec::with_capacity(amino.len());
        for (aa, nt) in amino.into_iter().zip(nucleotide) {
            if aa.gene_id != nt.gene_id {
                return Err(IngestError::PairedFileMismatch {
                    genome_id: genome_id.clone(),
                    message: format!("gene '{}' paired with '{}'", aa.gene_id, nt.gene_id),
                });
            }
            let mut row = aa.header;
            row.insert("genome_id".into(), genome_id.clone().into());
            add_sequence(&mut row, SequenceKind::Amino, &aa.sequence);
            add_sequence(&mut row, SequenceKind::Nucleotide, &nt.sequence);
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Split a Prodigal header (without the leading `>`) into the gene id and
/// its columns.
pub fn parse_header(header: &str) -> Result<(String, Row), String> {
    let parts: Vec<&str> = header.split(" # ").collect();
    if parts.len() != 5 {
        return Err(format!("malformed Prodigal header '{}'", header));
    }

    let gene_id = parts[0].trim().to_string();
    if gene_id.is_empty() {
        return Err("header has an empty gene id".to_string());
    }

    let coordinate = |text: &str, name: &str| {
        text.trim()
            .parse::<i64>()
            .map_err(|_| format!("invalid {} coordinate '{}'", name, text))
    };
    let strand = match parts[3].trim() {
        "1" => "+",
        "-1" => "-",
        other => return Err(format!("invalid strand '{}'", other)),
    };

    let mut row = Row::new();
    row.insert("gene_id".into(), gene_id.clone().into());
    row.insert("start".into(), coordinate(parts[1], "start")?.into());
    row.insert("stop".into(), coordinate(parts[2], "stop")?.into());
    row.insert("strand".into(), strand.into());

    for item in parts[4].trim().split(';').filter(|i| !i.is_empty()) {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| format!("malformed attribute '{}'", item))?;
        match key {
            "ID" => {
                let scaffold = value
                    .split('_')
                    .next()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| format!("invalid ID '{}'", value))?;
                row.insert("scaffold_id".into(), scaffold.into());
            }
            "gc_cont" => {
                let gc = value
                    .parse::<f64>()
                    .map_err(|_| format!("invalid gc_cont '{}'", value))?;
                row.insert("gc_content".into(), gc.into());
            }
            "partial" | "start_type" | "rbs_motif" | "rbs_spacer" => {
                row.insert(key.into(), SqlValue::Text(value.to_string()));
            }
            _ => {}
        }
    }

    Ok((gene_id, row))
}
