//! Maps requested field names onto the tables that will supply them.

use indexmap::IndexMap;

use crate::error::QueryError;
use crate::schema::{Schema, TableDef};

/// Outcome of resolving a field set against a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Field → owning table name, in the order fields were given.
    pub fields: IndexMap<String, String>,
    /// Tables other than the primary one that supply at least one field, in
    /// schema declaration order.
    pub joins: Vec<String>,
}

impl Resolution {
    pub fn table_of(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Assign every field to a table. Fields the primary table has stay there;
/// the rest go greedily to whichever table covers the most of what is left,
/// ties broken by declaration order.
pub fn resolve(schema: &Schema, primary: &TableDef, fields: &[String]) -> Result<Resolution, QueryError> {
    let mut mapping: IndexMap<String, String> = IndexMap::new();
    let mut unassigned: Vec<&String> = Vec::new();

    for field in fields {
        if mapping.contains_key(field) || unassigned.contains(&field) {
            continue;
        }
        if primary.has_column(field) {
            mapping.insert(field.clone(), primary.name.clone());
        } else {
            unassigned.push(field);
        }
    }

    let mut joins = Vec::new();
    while !unassigned.is_empty() {
        let best = schema
            .tables()
            .iter()
            .filter(|t| t.name != primary.name && !joins.contains(&t.name))
            .map(|t| (t, unassigned.iter().filter(|f| t.has_column(f)).count()))
            .filter(|(_, covered)| *covered > 0)
            // max_by_key keeps the last maximum; reverse so the first declared wins
            .rev()
            .max_by_key(|(_, covered)| *covered);

        let Some((table, _)) = best else { break };
        unassigned.retain(|f| {
            if table.has_column(f) {
                mapping.insert((*f).clone(), table.name.clone());
                false
            } else {
                true
            }
        });
        joins.push(table.name.clone());
    }

    if !unassigned.is_empty() {
        return Err(QueryError::UnresolvedField {
            fields: unassigned.into_iter().cloned().collect(),
        });
    }

    // Restore request order and declaration order.
    let fields = fields
        .iter()
        .filter_map(|f| mapping.get(f).map(|t| (f.clone(), t.clone())))
        .collect();
    joins.sort_by_key(|name| schema.position(name).unwrap_or(usize::MAX));

    Ok(Resolution { fields, joins })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, Entity, Relationship};

    fn names(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    fn small_schema() -> Schema {
        Schema::new(
            vec![
                TableDef::new("metadata", vec![ColumnDef::text("genome_id")], &["genome_id"]),
                TableDef::new(
                    "annotations",
                    vec![
                        ColumnDef::integer("annotation_id"),
                        ColumnDef::text("ko"),
                        ColumnDef::text("gene_id"),
                        ColumnDef::text("genome"),
                    ],
                    &["annotation_id"],
                ),
            ],
            vec![Relationship::new("metadata", "annotations", &[("genome_id", "genome")])],
        )
    }

    #[test]
    fn test_prefers_primary_table() {
        let schema = small_schema();
        let primary = schema.table("annotations").unwrap();
        let res = resolve(&schema, primary, &names(&["genome_id", "ko", "gene_id"])).unwrap();
        assert_eq!(res.table_of("ko"), Some("annotations"));
        assert_eq!(res.table_of("gene_id"), Some("annotations"));
        assert_eq!(res.table_of("genome_id"), Some("metadata"));
        assert_eq!(res.joins, vec!["metadata"]);
        assert_eq!(
            res.fields.keys().collect::<Vec<_>>(),
            vec!["genome_id", "ko", "gene_id"]
        );
    }

    #[test]
    fn test_greedy_cover_on_gtdb_schema() {
        let schema = Schema::live(207);
        let primary = schema.table_for(Entity::AnnotationsKegg).unwrap();

        // Shared columns stay on the primary table.
        let res = resolve(&schema, primary, &names(&["genome_id", "e_value", "ko"])).unwrap();
        assert!(res.joins.is_empty());

        // seq lives only on proteins, gtdb_phylum only on metadata.
        let res = resolve(&schema, primary, &names(&["gtdb_phylum", "seq", "ko"])).unwrap();
        assert_eq!(res.table_of("seq"), Some("proteins_r207"));
        assert_eq!(res.table_of("gtdb_phylum"), Some("metadata_r207"));
        assert_eq!(res.joins, vec!["metadata_r207", "proteins_r207"]);
    }

    #[test]
    fn test_largest_intersection_wins() {
        let schema = Schema::live(207);
        let primary = schema.table_for(Entity::Metadata).unwrap();
        // pfam has both, proteins only one of them.
        let res = resolve(&schema, primary, &names(&["start", "pfam"])).unwrap();
        assert_eq!(res.table_of("start"), Some("annotations_pfam_r207"));
        assert_eq!(res.joins, vec!["annotations_pfam_r207"]);

        // A tie goes to the table declared first.
        let res = resolve(&schema, primary, &names(&["start"])).unwrap();
        assert_eq!(res.table_of("start"), Some("proteins_r207"));
    }

    #[test]
    fn test_deterministic() {
        let schema = Schema::live(214);
        let primary = schema.table_for(Entity::Proteins).unwrap();
        let fields = names(&["ko", "interpro_accession", "gtdb_genus", "score", "seq"]);
        let first = resolve(&schema, primary, &fields).unwrap();
        for _ in 0..10 {
            assert_eq!(resolve(&schema, primary, &fields).unwrap(), first);
        }
        for (field, table) in &first.fields {
            assert!(schema.table(table).unwrap().has_column(field));
        }
    }

    #[test]
    fn test_unresolved_fields_are_all_reported() {
        let schema = Schema::live(207);
        let primary = schema.table_for(Entity::Metadata).unwrap();
        let err = resolve(&schema, primary, &names(&["foo", "ko", "bar"])).unwrap_err();
        match err {
            QueryError::UnresolvedField { fields } => assert_eq!(fields, vec!["foo", "bar"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn universe(schema: &Schema) -> Vec<String> {
            let mut names: Vec<String> = Vec::new();
            for table in schema.tables() {
                for name in table.column_names() {
                    if !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                }
            }
            names.extend(["foo", "bar", "gtdb_kingdom"].map(String::from));
            names
        }

        /// A release, a primary entity and a shuffled subset of known and
        /// unknown field names.
        fn request() -> impl Strategy<Value = (Schema, Entity, Vec<String>)> {
            (200i64..230, 0usize..Entity::ALL.len()).prop_flat_map(|(release, entity)| {
                let schema = Schema::live(release);
                let all = universe(&schema);
                let len = all.len();
                (
                    Just(schema),
                    Just(Entity::ALL[entity]),
                    prop::sample::subsequence(all, 0..=len).prop_shuffle(),
                )
            })
        }

        proptest! {
            #[test]
            fn test_resolution_is_total_and_sound((schema, entity, fields) in request()) {
                let primary = schema.table_for(entity).unwrap();
                let unknown: Vec<String> = fields
                    .iter()
                    .filter(|f| !schema.tables().iter().any(|t| t.has_column(f)))
                    .cloned()
                    .collect();

                match resolve(&schema, primary, &fields) {
                    Ok(res) => {
                        prop_assert!(unknown.is_empty());
                        prop_assert_eq!(res.fields.keys().cloned().collect::<Vec<_>>(), fields.clone());
                        for (field, table) in &res.fields {
                            prop_assert!(schema.table(table).unwrap().has_column(field));
                            if primary.has_column(field) {
                                prop_assert_eq!(table, &primary.name);
                            }
                        }
                        let mut used: Vec<&String> = res
                            .fields
                            .values()
                            .filter(|t| **t != primary.name)
                            .collect();
                        used.sort_by_key(|t| schema.position(t));
                        used.dedup();
                        prop_assert_eq!(res.joins.iter().collect::<Vec<_>>(), used);
                    }
                    Err(QueryError::UnresolvedField { fields: missing }) => {
                        prop_assert_eq!(missing, unknown);
                    }
                    Err(other) => prop_assert!(false, "unexpected {:?}", other),
                }
            }

            #[test]
            fn test_resolution_is_deterministic((schema, entity, fields) in request()) {
                let primary = schema.table_for(entity).unwrap();
                let first = format!("{:?}", resolve(&schema, primary, &fields));
                for _ in 0..3 {
                    prop_assert_eq!(format!("{:?}", resolve(&schema, primary, &fields)), first.clone());
                }
            }
        }
    }
}
