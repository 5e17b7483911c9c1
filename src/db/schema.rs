use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::DiffError;
use crate::security::validate_identifier;

/// Represents the complete schema of a database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub database: String,
    pub tables: Vec<Table>,
}

/// Represents a single database table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

/// Represents a column in a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    /// Dialect-native type name, compared verbatim.
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub is_foreign_key: bool,
    #[serde(default)]
    pub foreign_key_reference: Option<ForeignKeyReference>,
}

/// Target of a column-level foreign key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyReference {
    pub table: String,
    pub column: String,
}

/// Represents an index on a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    #[serde(default = "default_index_type")]
    pub index_type: String,
}

fn default_index_type() -> String {
    "btree".to_string()
}

/// Represents a constraint on a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_columns: Option<Vec<String>>,
    /// Boolean expression of a CHECK constraint, without the `CHECK` keyword.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

/// Type of database constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    #[serde(rename = "PRIMARY KEY")]
    PrimaryKey,
    #[serde(rename = "UNIQUE")]
    Unique,
    #[serde(rename = "FOREIGN KEY")]
    ForeignKey,
    #[serde(rename = "CHECK")]
    Check,
}

/// A single-column foreign key, the unit the diff engine tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_name: Option<String>,
}

impl ForeignKey {
    /// Identity used when diffing: (column, referenced table, referenced column).
    pub fn key(&self) -> (&str, &str, &str) {
        (
            self.column.as_str(),
            self.referenced_table.as_str(),
            self.referenced_column.as_str(),
        )
    }

    /// Constraint name to use in DDL; falls back to `fk_<table>_<column>`.
    pub fn effective_name(&self) -> String {
        self.constraint_name
            .clone()
            .unwrap_or_else(|| format!("fk_{}_{}", self.table, self.column))
    }
}

impl Schema {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Reject schemas that cannot be diffed by name: duplicate or empty
    /// identifiers at any level.
    pub fn validate(&self) -> Result<(), DiffError> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            validate_identifier(&table.name).map_err(|e| DiffError::InvalidIdentifier {
                database: self.database.clone(),
                reason: format!("table '{}': {}", table.name, e),
            })?;
            if !seen.insert(table.name.as_str()) {
                return Err(DiffError::DuplicateTable {
                    database: self.database.clone(),
                    table: table.name.clone(),
                });
            }
            table.validate(&self.database)?;
        }
        Ok(())
    }
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn validate(&self, database: &str) -> Result<(), DiffError> {
        let mut columns = HashSet::new();
        for col in &self.columns {
            validate_identifier(&col.name).map_err(|e| DiffError::InvalidIdentifier {
                database: database.to_string(),
                reason: format!("column '{}.{}': {}", self.name, col.name, e),
            })?;
            if !columns.insert(col.name.as_str()) {
                return Err(DiffError::DuplicateColumn {
                    table: self.name.clone(),
                    column: col.name.clone(),
                });
            }
        }

        let mut indexes = HashSet::new();
        for idx in &self.indexes {
            if !indexes.insert(idx.name.as_str()) {
                return Err(DiffError::DuplicateIndex {
                    table: self.name.clone(),
                    index: idx.name.clone(),
                });
            }
        }

        let mut constraints = HashSet::new();
        for con in &self.constraints {
            if !constraints.insert(con.name.as_str()) {
                return Err(DiffError::DuplicateConstraint {
                    table: self.name.clone(),
                    constraint: con.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Primary key columns, from a PRIMARY KEY constraint if present, else
    /// from the column flags.
    pub fn primary_key(&self) -> Vec<String> {
        if let Some(pk) = self
            .constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::PrimaryKey)
        {
            return pk.columns.clone();
        }
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect()
    }

    /// All single-column foreign keys declared on this table. Composite FOREIGN
    /// KEY constraints are split pairwise; column-level references not already
    /// covered by a constraint are appended.
    pub fn foreign_keys(&self) -> Vec<ForeignKey> {
        let mut fks: Vec<ForeignKey> = Vec::new();

        for con in &self.constraints {
            if con.kind != ConstraintKind::ForeignKey {
                continue;
            }
            let Some(ref_table) = con.referenced_table.as_ref() else {
                continue;
            };
            let ref_columns = con.referenced_columns.clone().unwrap_or_default();
            for (i, col) in con.columns.iter().enumerate() {
                let Some(ref_col) = ref_columns.get(i) else {
                    continue;
                };
                fks.push(ForeignKey {
                    table: self.name.clone(),
                    column: col.clone(),
                    referenced_table: ref_table.clone(),
                    referenced_column: ref_col.clone(),
                    constraint_name: Some(con.name.clone()),
                });
            }
        }

        for col in &self.columns {
            let Some(reference) = col.foreign_key_reference.as_ref() else {
                continue;
            };
            let fk = ForeignKey {
                table: self.name.clone(),
                column: col.name.clone(),
                referenced_table: reference.table.clone(),
                referenced_column: reference.column.clone(),
                constraint_name: None,
            };
            if !fks.iter().any(|existing| existing.key() == fk.key()) {
                fks.push(fk);
            }
        }

        fks
    }

    /// Names of the tables this table references, excluding itself.
    pub fn referenced_tables(&self) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        for fk in self.foreign_keys() {
            if fk.referenced_table != self.name && !deps.contains(&fk.referenced_table) {
                deps.push(fk.referenced_table);
            }
        }
        deps
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn col(name: &str, data_type: &str, nullable: bool) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
            default: None,
            is_primary_key: false,
            is_unique: false,
            is_foreign_key: false,
            foreign_key_reference: None,
        }
    }

    pub fn pk(name: &str, data_type: &str) -> Column {
        Column {
            is_primary_key: true,
            ..col(name, data_type, false)
        }
    }

    pub fn fk_col(name: &str, data_type: &str, ref_table: &str, ref_col: &str) -> Column {
        Column {
            is_foreign_key: true,
            foreign_key_reference: Some(ForeignKeyReference {
                table: ref_table.to_string(),
                column: ref_col.to_string(),
            }),
            ..col(name, data_type, true)
        }
    }

    pub fn idx(name: &str, columns: &[&str], unique: bool) -> Index {
        Index {
            name: name.to_string(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            is_unique: unique,
            index_type: "btree".to_string(),
        }
    }

    pub fn table(name: &str, columns: Vec<Column>) -> Table {
        Table {
            name: name.to_string(),
            columns,
            indexes: vec![],
            constraints: vec![],
        }
    }

    pub fn schema(database: &str, tables: Vec<Table>) -> Schema {
        Schema {
            database: database.to_string(),
            tables,
        }
    }
}
