use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::schema::{Column, ForeignKey, Index, Schema, Table};
use crate::error::DiffError;

/// Result of comparing two schemas
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    pub differences: SchemaDifferences,
    pub summary: DiffSummary,
}

/// Structural delta that turns the target schema into the source schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDifferences {
    pub added_tables: Vec<Table>,
    pub removed_tables: Vec<RemovedTable>,
    pub added_columns: Vec<AddedColumn>,
    pub removed_columns: Vec<RemovedColumn>,
    pub modified_columns: Vec<ModifiedColumn>,
    pub added_indexes: Vec<AddedIndex>,
    pub removed_indexes: Vec<RemovedIndex>,
    pub added_foreign_keys: Vec<ForeignKey>,
    pub removed_foreign_keys: Vec<ForeignKey>,
}

/// A table present only in the target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedTable {
    pub name: String,
    /// Full definition as found in the target, needed to recreate it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Table>,
}

/// A column present only in the source version of a shared table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedColumn {
    pub table: String,
    pub column: Column,
}

/// Name and type of a dropped column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// A column present only in the target version of a shared table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedColumn {
    pub table: String,
    pub column: ColumnRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Column>,
}

/// The attributes of a column that the diff engine compares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

impl From<&Column> for ColumnSnapshot {
    fn from(col: &Column) -> Self {
        Self {
            data_type: col.data_type.clone(),
            nullable: col.nullable,
            default: col.default.clone(),
        }
    }
}

/// What changed on a modified column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTag {
    TypeChanged,
    NullableChanged,
    DefaultChanged,
}

/// A column present in both schemas with differing attributes.
/// `from` is the target (current) state, `to` the source (desired) state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifiedColumn {
    pub table: String,
    pub column_name: String,
    pub from: ColumnSnapshot,
    pub to: ColumnSnapshot,
    pub changes: Vec<ChangeTag>,
}

impl ModifiedColumn {
    pub fn has(&self, tag: ChangeTag) -> bool {
        self.changes.contains(&tag)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedIndex {
    pub table: String,
    pub index: Index,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedIndex {
    pub table: String,
    pub index_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Index>,
}

/// Summary counts for a diff operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub has_changes: bool,
    pub tables_added: usize,
    pub tables_removed: usize,
    pub columns_added: usize,
    pub columns_removed: usize,
    pub columns_modified: usize,
    pub indexes_added: usize,
    pub indexes_removed: usize,
    pub foreign_keys_added: usize,
    pub foreign_keys_removed: usize,
    pub has_destructive_changes: bool,
    pub changes_summary: String,
}

impl SchemaDifferences {
    pub fn has_changes(&self) -> bool {
        !self.added_tables.is_empty()
            || !self.added_columns.is_empty()
            || !self.modified_columns.is_empty()
            || !self.added_indexes.is_empty()
            || !self.added_foreign_keys.is_empty()
            || self.has_destructive_changes()
    }

    /// True iff anything is removed: table, column, index or foreign key.
    pub fn has_destructive_changes(&self) -> bool {
        !self.removed_tables.is_empty()
            || !self.removed_columns.is_empty()
            || !self.removed_indexes.is_empty()
            || !self.removed_foreign_keys.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            has_changes: self.has_changes(),
            tables_added: self.added_tables.len(),
            tables_removed: self.removed_tables.len(),
            columns_added: self.added_columns.len(),
            columns_removed: self.removed_columns.len(),
            columns_modified: self.modified_columns.len(),
            indexes_added: self.added_indexes.len(),
            indexes_removed: self.removed_indexes.len(),
            foreign_keys_added: self.added_foreign_keys.len(),
            foreign_keys_removed: self.removed_foreign_keys.len(),
            has_destructive_changes: self.has_destructive_changes(),
            changes_summary: self.describe(),
        }
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = [
            (self.added_tables.len(), "table", "added"),
            (self.removed_tables.len(), "table", "removed"),
            (self.added_columns.len(), "column", "added"),
            (self.removed_columns.len(), "column", "removed"),
            (self.modified_columns.len(), "column", "modified"),
            (self.added_indexes.len(), "index", "added"),
            (self.removed_indexes.len(), "index", "removed"),
            (self.added_foreign_keys.len(), "foreign key", "added"),
            (self.removed_foreign_keys.len(), "foreign key", "removed"),
        ]
        .iter()
        .filter(|(n, _, _)| *n > 0)
        .map(|(n, noun, verb)| format!("{} {} {}", n, plural(noun, *n), verb))
        .collect();

        if parts.is_empty() {
            "No changes detected".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn plural(noun: &str, n: usize) -> String {
    match (noun, n) {
        (_, 1) => noun.to_string(),
        ("index", _) => "indexes".to_string(),
        _ => format!("{}s", noun),
    }
}

/// Compare a source (desired) schema against a target (current) schema.
///
/// Identity is by name at every level; foreign keys are identified by
/// (column, referenced table, referenced column). Output order follows the
/// input order of the schema that owns each entity.
pub fn diff(source: &Schema, target: &Schema) -> Result<DiffResult, DiffError> {
    source.validate()?;
    target.validate()?;

    let differences = compare_schemas(source, target);
    let summary = differences.summary();
    log::debug!(
        "Compared '{}' against '{}': {}",
        source.database,
        target.database,
        summary.changes_summary
    );

    Ok(DiffResult {
        differences,
        summary,
    })
}

/// Name-keyed comparison without input validation.
pub fn compare_schemas(source: &Schema, target: &Schema) -> SchemaDifferences {
    let mut diff = SchemaDifferences::default();

    // Build lookup maps by table name
    let source_map: HashMap<&str, &Table> =
        source.tables.iter().map(|t| (t.name.as_str(), t)).collect();
    let target_map: HashMap<&str, &Table> =
        target.tables.iter().map(|t| (t.name.as_str(), t)).collect();

    for table in &source.tables {
        match target_map.get(table.name.as_str()) {
            None => diff.added_tables.push(table.clone()),
            Some(target_table) => compare_tables(table, target_table, &mut diff),
        }
    }

    for table in &target.tables {
        if !source_map.contains_key(table.name.as_str()) {
            diff.removed_tables.push(RemovedTable {
                name: table.name.clone(),
                definition: Some(table.clone()),
            });
        }
    }

    diff
}

/// Compare two matched tables: columns, then indexes, then foreign keys
fn compare_tables(source: &Table, target: &Table, diff: &mut SchemaDifferences) {
    compare_columns(source, target, diff);
    compare_indexes(source, target, diff);
    compare_foreign_keys(source, target, diff);
}

fn compare_columns(source: &Table, target: &Table, diff: &mut SchemaDifferences) {
    let target_map: HashMap<&str, &Column> =
        target.columns.iter().map(|c| (c.name.as_str(), c)).collect();
    let source_map: HashMap<&str, &Column> =
        source.columns.iter().map(|c| (c.name.as_str(), c)).collect();

    for col in &source.columns {
        match target_map.get(col.name.as_str()) {
            None => diff.added_columns.push(AddedColumn {
                table: source.name.clone(),
                column: col.clone(),
            }),
            Some(tgt_col) => {
                if let Some(modified) = diff_column_properties(&source.name, col, tgt_col) {
                    diff.modified_columns.push(modified);
                }
            }
        }
    }

    for col in &target.columns {
        if !source_map.contains_key(col.name.as_str()) {
            diff.removed_columns.push(RemovedColumn {
                table: target.name.clone(),
                column: ColumnRef {
                    name: col.name.clone(),
                    data_type: col.data_type.clone(),
                },
                definition: Some(col.clone()),
            });
        }
    }
}

/// Compare type, nullability and default. Types are compared as exact strings.
fn diff_column_properties(table: &str, source: &Column, target: &Column) -> Option<ModifiedColumn> {
    let mut changes = Vec::new();

    if source.data_type != target.data_type {
        changes.push(ChangeTag::TypeChanged);
    }
    if source.nullable != target.nullable {
        changes.push(ChangeTag::NullableChanged);
    }
    if source.default != target.default {
        changes.push(ChangeTag::DefaultChanged);
    }

    if changes.is_empty() {
        return None;
    }

    Some(ModifiedColumn {
        table: table.to_string(),
        column_name: source.name.clone(),
        from: ColumnSnapshot::from(target),
        to: ColumnSnapshot::from(source),
        changes,
    })
}

/// A same-named index whose definition changed is reported as a removal plus
/// an addition.
fn compare_indexes(source: &Table, target: &Table, diff: &mut SchemaDifferences) {
    let target_map: HashMap<&str, &Index> =
        target.indexes.iter().map(|i| (i.name.as_str(), i)).collect();
    let source_map: HashMap<&str, &Index> =
        source.indexes.iter().map(|i| (i.name.as_str(), i)).collect();

    for idx in &target.indexes {
        let changed = match source_map.get(idx.name.as_str()) {
            None => true,
            Some(src_idx) => index_changed(src_idx, idx),
        };
        if changed {
            diff.removed_indexes.push(RemovedIndex {
                table: target.name.clone(),
                index_name: idx.name.clone(),
                definition: Some(idx.clone()),
            });
        }
    }

    for idx in &source.indexes {
        let changed = match target_map.get(idx.name.as_str()) {
            None => true,
            Some(tgt_idx) => index_changed(idx, tgt_idx),
        };
        if changed {
            diff.added_indexes.push(AddedIndex {
                table: source.name.clone(),
                index: idx.clone(),
            });
        }
    }
}

fn index_changed(a: &Index, b: &Index) -> bool {
    a.columns != b.columns
        || a.is_unique != b.is_unique
        || !a.index_type.eq_ignore_ascii_case(&b.index_type)
}

fn compare_foreign_keys(source: &Table, target: &Table, diff: &mut SchemaDifferences) {
    let source_fks = source.foreign_keys();
    let target_fks = target.foreign_keys();
    let source_keys: HashSet<_> = source_fks.iter().map(ForeignKey::key).collect();
    let target_keys: HashSet<_> = target_fks.iter().map(ForeignKey::key).collect();

    for fk in &source_fks {
        if !target_keys.contains(&fk.key()) {
            diff.added_foreign_keys.push(fk.clone());
        }
    }

    for fk in &target_fks {
        if !source_keys.contains(&fk.key()) {
            diff.removed_foreign_keys.push(fk.clone());
        }
    }
}
