use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::schema::Entity;

use super::proteins::SequenceKind;
use super::source::{genome_id_from_path, has_extension};

/// Sub-directory of `{data_dir}/r{release}` holding each category's files.
pub fn source_dirs(entity: Entity) -> &'static [&'static str] {
    match entity {
        Entity::Metadata => &["metadata"],
        Entity::Proteins => &["proteins_aa", "proteins_nt"],
        Entity::AnnotationsKegg => &["annotations_kegg"],
        Entity::AnnotationsPfam => &["annotations_pfam"],
    }
}

pub fn release_dir(data_dir: &Path, release: i64) -> PathBuf {
    data_dir.join(format!("r{}", release))
}

/// One independent piece of loading work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkUnit {
    File(PathBuf),
    /// The two Prodigal files of one genome. Either side may be missing;
    /// that surfaces as an error when the unit is processed.
    ProteinPair {
        genome_id: String,
        amino: Option<PathBuf>,
        nucleotide: Option<PathBuf>,
    },
}

impl WorkUnit {
    pub fn label(&self) -> String {
        match self {
            WorkUnit::File(path) => path.display().to_string(),
            WorkUnit::ProteinPair { genome_id, .. } => genome_id.clone(),
        }
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Every work unit for `entity` under `release_dir`, in a stable order.
/// Missing category directories yield no units.
pub fn discover(entity: Entity, release_dir: &Path) -> Result<Vec<WorkUnit>> {
    let ext = match entity {
        Entity::Proteins => return discover_pairs(release_dir),
        Entity::Metadata | Entity::AnnotationsPfam => "tsv",
        Entity::AnnotationsKegg => "csv",
    };
    let mut units: Vec<WorkUnit> = source_dirs(entity)
        .iter()
        .flat_map(|dir| files_under(&release_dir.join(dir)))
        .filter(|path| has_extension(path, ext))
        .map(WorkUnit::File)
        .collect();
    units.sort_by(|a, b| a.label().cmp(&b.label()));

    tracing::info!("Found {} {} files in {:?}", units.len(), entity.base_name(), release_dir);
    Ok(units)
}

fn discover_pairs(release_dir: &Path) -> Result<Vec<WorkUnit>> {
    let mut pairs: BTreeMap<String, (Option<PathBuf>, Option<PathBuf>)> = BTreeMap::new();

    for dir in source_dirs(Entity::Proteins) {
        for path in files_under(&release_dir.join(dir)) {
            let Some(kind) = SequenceKind::from_path(&path) else { continue };
            let genome_id = match genome_id_from_path(&path) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Skipping {:?}: {}", path, e);
                    continue;
                }
            };
            let slot = pairs.entry(genome_id).or_default();
            let side = match kind {
                SequenceKind::Amino => &mut slot.0,
                SequenceKind::Nucleotide => &mut slot.1,
            };
            if let Some(previous) = side.replace(path.clone()) {
                tracing::warn!("Two {} files for one genome: {:?} and {:?}", kind.extension(), previous, path);
            }
        }
    }

    let units: Vec<WorkUnit> = pairs
        .into_iter()
        .map(|(genome_id, (amino, nucleotide))| WorkUnit::ProteinPair {
            genome_id,
            amino,
            nucleotide,
        })
        .collect();
    tracing::info!("Found {} protein file pairs in {:?}", units.len(), release_dir);
    Ok(units)
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    #[test]
    fn test_discover_annotation_files() {
        let dir = tempdir().unwrap();
        let kegg = dir.path().join("annotations_kegg");
        fs::create_dir_all(kegg.join("batch2")).unwrap();
        File::create(kegg.join("GCA_000000002.1.csv")).unwrap();
        File::create(kegg.join("batch2/GCA_000000001.1.csv.gz")).unwrap();
        File::create(kegg.join("notes.txt")).unwrap();

        let units = discover(Entity::AnnotationsKegg, dir.path()).unwrap();
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| matches!(u, WorkUnit::File(_))));

        assert!(discover(Entity::AnnotationsPfam, dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_discover_protein_pairs() {
        let dir = tempdir().unwrap();
        let aa = dir.path().join("proteins_aa");
        let nt = dir.path().join("proteins_nt");
        fs::create_dir_all(&aa).unwrap();
        fs::create_dir_all(&nt).unwrap();
        File::create(aa.join("GCA_000000001.1_protein.faa")).unwrap();
        File::create(nt.join("GCA_000000001.1_protein.fna.gz")).unwrap();
        File::create(aa.join("GCF_000000002.1_protein.faa")).unwrap();

        let units = discover(Entity::Proteins, dir.path()).unwrap();
        assert_eq!(units.len(), 2);
        match &units[0] {
            WorkUnit::ProteinPair { genome_id, amino, nucleotide } => {
                assert_eq!(genome_id, "GCA_000000001.1");
                assert!(amino.is_some());
                assert!(nucleotide.is_some());
            }
            other => panic!("unexpected unit {:?}", other),
        }
        match &units[1] {
            WorkUnit::ProteinPair { nucleotide, .. } => assert!(nucleotide.is_none()),
            other => panic!("unexpected unit {:?}", other),
        }
        assert_eq!(units[1].label(), "GCF_000000002.1");
    }

    #[test]
    fn test_release_dir() {
        assert_eq!(release_dir(Path::new("/data"), 207), PathBuf::from("/data/r207"));
    }
}
