//! GTDB table declarations: genome metadata, predicted proteins and their
//! KEGG / Pfam annotations, as live per-release tables and shared history
//! tables.

use super::{ColumnDef, Relationship, Schema, SchemaKind, TableDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Metadata,
    Proteins,
    AnnotationsKegg,
    AnnotationsPfam,
}

impl Entity {
    /// Parents before children; tables are created in this order and
    /// dropped in reverse.
    pub const ALL: [Entity; 4] = [
        Entity::Metadata,
        Entity::Proteins,
        Entity::AnnotationsKegg,
        Entity::AnnotationsPfam,
    ];

    pub fn base_name(&self) -> &'static str {
        match self {
            Entity::Metadata => "metadata",
            Entity::Proteins => "proteins",
            Entity::AnnotationsKegg => "annotations_kegg",
            Entity::AnnotationsPfam => "annotations_pfam",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Entity::ALL.into_iter().find(|e| e.base_name() == name)
    }

    pub fn live_table_name(&self, release: i64) -> String {
        format!("{}_r{}", self.base_name(), release)
    }

    pub fn history_table_name(&self) -> String {
        format!("{}_history", self.base_name())
    }

    pub fn key_column(&self) -> &'static str {
        match self {
            Entity::Metadata => "genome_id",
            Entity::Proteins => "gene_id",
            Entity::AnnotationsKegg | Entity::AnnotationsPfam => "annotation_id",
        }
    }

    /// Annotation rows have no natural key; the loader assigns one.
    pub fn has_synthetic_key(&self) -> bool {
        matches!(self, Entity::AnnotationsKegg | Entity::AnnotationsPfam)
    }

    pub fn columns(&self) -> Vec<ColumnDef> {
        match self {
            Entity::Metadata => metadata_columns(),
            Entity::Proteins => proteins_columns(),
            Entity::AnnotationsKegg => kegg_columns(),
            Entity::AnnotationsPfam => pfam_columns(),
        }
    }
}

fn metadata_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::text("genome_id"),
        ColumnDef::integer("release"),
        ColumnDef::text("gtdb_domain"),
        ColumnDef::text("gtdb_phylum"),
        ColumnDef::text("gtdb_class"),
        ColumnDef::text("gtdb_order"),
        ColumnDef::text("gtdb_family"),
        ColumnDef::text("gtdb_genus"),
        ColumnDef::text("gtdb_species"),
        ColumnDef::real("checkm_completeness"),
        ColumnDef::real("checkm_contamination"),
        ColumnDef::integer("coding_bases"),
        ColumnDef::real("coding_density"),
        ColumnDef::integer("contig_count"),
        ColumnDef::real("gc_content"),
        ColumnDef::integer("genome_size"),
        ColumnDef::integer("protein_count"),
        ColumnDef::real("l50_contigs"),
        ColumnDef::real("l50_scaffolds"),
        ColumnDef::real("n50_contigs"),
        ColumnDef::real("n50_scaffolds"),
        ColumnDef::integer("longest_contig"),
        ColumnDef::integer("longest_scaffold"),
        ColumnDef::real("mean_contig_length"),
        ColumnDef::real("mean_scaffold_length"),
        ColumnDef::text("ncbi_genome_representation"),
        ColumnDef::integer("ncbi_contig_count"),
        ColumnDef::real("ncbi_contig_n50"),
        ColumnDef::integer("sec_trna_count"),
    ]
}

fn proteins_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::text("gene_id"),
        ColumnDef::integer("release"),
        ColumnDef::text("genome_id"),
        ColumnDef::integer("scaffold_id"),
        ColumnDef::integer("start"),
        ColumnDef::integer("stop"),
        ColumnDef::text("strand"),
        ColumnDef::real("gc_content"),
        ColumnDef::text("partial"),
        ColumnDef::text("start_type"),
        ColumnDef::text("rbs_motif"),
        ColumnDef::text("rbs_spacer"),
        ColumnDef::text("start_codon"),
        ColumnDef::text("stop_codon"),
        ColumnDef::text("seq"),
    ]
}

fn kegg_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::integer("annotation_id"),
        ColumnDef::integer("release"),
        ColumnDef::text("gene_id"),
        ColumnDef::text("genome_id"),
        ColumnDef::text("ko"),
        ColumnDef::real("threshold"),
        ColumnDef::real("score"),
        ColumnDef::real("e_value"),
    ]
}

fn pfam_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::integer("annotation_id"),
        ColumnDef::integer("release"),
        ColumnDef::text("gene_id"),
        ColumnDef::text("genome_id"),
        ColumnDef::text("pfam"),
        ColumnDef::integer("start"),
        ColumnDef::integer("stop"),
        ColumnDef::integer("length"),
        ColumnDef::real("e_value"),
        ColumnDef::text("interpro_accession"),
        ColumnDef::text("interpro_description"),
    ]
}

impl Schema {
    /// Live tables for one release, named `{entity}_r{release}`.
    pub fn live(release: i64) -> Self {
        let name = |e: Entity| e.live_table_name(release);
        let metadata = name(Entity::Metadata);
        let proteins = name(Entity::Proteins);

        let tables = vec![
            TableDef::new(&metadata, Entity::Metadata.columns(), &["genome_id"]),
            TableDef::new(&proteins, Entity::Proteins.columns(), &["gene_id"])
                .with_foreign_key(&["genome_id"], &metadata, &["genome_id"]),
            TableDef::new(name(Entity::AnnotationsKegg), Entity::AnnotationsKegg.columns(), &["annotation_id"])
                .with_foreign_key(&["gene_id"], &proteins, &["gene_id"])
                .with_foreign_key(&["genome_id"], &metadata, &["genome_id"]),
            TableDef::new(name(Entity::AnnotationsPfam), Entity::AnnotationsPfam.columns(), &["annotation_id"])
                .with_foreign_key(&["gene_id"], &proteins, &["gene_id"])
                .with_foreign_key(&["genome_id"], &metadata, &["genome_id"]),
        ];

        Self {
            kind: SchemaKind::Live { release },
            tables,
            relationships: relationships(name, &[]),
        }
    }

    /// History tables shared by every superseded release. Rows are keyed by
    /// their natural key plus the release they came from.
    pub fn history() -> Self {
        let tables = Entity::ALL
            .iter()
            .map(|e| TableDef::new(e.history_table_name(), e.columns(), &[e.key_column(), "release"]))
            .collect();

        Self {
            kind: SchemaKind::History,
            tables,
            relationships: relationships(|e| e.history_table_name(), &[("release", "release")]),
        }
    }
}

fn relationships(name: impl Fn(Entity) -> String, extra: &[(&str, &str)]) -> Vec<Relationship> {
    let edge = |left: Entity, right: Entity, key: &str| {
        let mut on = vec![(key, key)];
        on.extend_from_slice(extra);
        Relationship::new(&name(left), &name(right), &on)
    };

    vec![
        edge(Entity::Metadata, Entity::Proteins, "genome_id"),
        edge(Entity::Metadata, Entity::AnnotationsKegg, "genome_id"),
        edge(Entity::Metadata, Entity::AnnotationsPfam, "genome_id"),
        edge(Entity::Proteins, Entity::AnnotationsKegg, "gene_id"),
        edge(Entity::Proteins, Entity::AnnotationsPfam, "gene_id"),
    ]
}
