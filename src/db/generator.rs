use serde::{Deserialize, Serialize};

use super::comparator::{
    AddedColumn, AddedIndex, ChangeTag, ColumnRef, ModifiedColumn, RemovedColumn, RemovedIndex,
    RemovedTable, SchemaDifferences,
};
use super::ordering::{drop_groups, DropNode};
use super::schema::{Column, ForeignKey, Table};
use super::sql_generator::SqlGenerator;
use super::type_mapper::is_narrowing;
use crate::error::GenerationError;

// ── Output types ─────────────────────────────────────────────────────────

/// Qualitative destructiveness of a generated script
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// An ordered, reviewable migration script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedMigration {
    pub full_sql: String,
    /// Statements in execution order, without terminators.
    pub statements: Vec<String>,
    pub statement_count: usize,
    pub has_destructive_changes: bool,
    pub warnings: Vec<String>,
    pub risk_level: RiskLevel,
}

impl GeneratedMigration {
    fn from_steps(steps: Vec<Step>, warnings: Vec<String>) -> Self {
        let has_destructive_changes = steps.iter().any(|s| s.kind.is_destructive());

        let risk_level = if steps
            .iter()
            .any(|s| matches!(s.kind, StepKind::DropTable | StepKind::DropColumn))
        {
            RiskLevel::High
        } else if steps.iter().any(|s| {
            matches!(
                s.kind,
                StepKind::SetNotNull | StepKind::AlterType { narrowing: true }
            )
        }) {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let statements: Vec<String> = steps.into_iter().map(|s| s.sql).collect();
        Self {
            full_sql: join_statements(&statements),
            statement_count: statements.len(),
            statements,
            has_destructive_changes,
            warnings,
            risk_level,
        }
    }
}

/// Each statement terminated with `;`, one per line.
pub fn join_statements(statements: &[String]) -> String {
    statements
        .iter()
        .map(|s| format!("{};", s))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Steps ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    CreateTable,
    AddColumn,
    AlterType { narrowing: bool },
    SetDefault,
    DropDefault,
    SetNotNull,
    DropNotNull,
    DropForeignKey,
    DropIndex,
    DropColumn,
    DropTable,
    AddForeignKey,
    CreateIndex,
}

impl StepKind {
    fn is_destructive(self) -> bool {
        matches!(
            self,
            StepKind::DropForeignKey | StepKind::DropIndex | StepKind::DropColumn | StepKind::DropTable
        )
    }
}

#[derive(Debug)]
struct Step {
    kind: StepKind,
    sql: String,
}

impl Step {
    fn new(kind: StepKind, sql: String) -> Self {
        Self { kind, sql }
    }
}

/// Single- or multi-column foreign key as it will be rendered.
struct ForeignKeyGroup {
    table: String,
    name: String,
    columns: Vec<String>,
    referenced_table: String,
    referenced_columns: Vec<String>,
}

/// Merge single-column entries that share a table and constraint name back
/// into one constraint, keeping first-appearance order.
fn group_foreign_keys<'a>(fks: impl IntoIterator<Item = &'a ForeignKey>) -> Vec<ForeignKeyGroup> {
    let mut groups: Vec<ForeignKeyGroup> = Vec::new();
    for fk in fks {
        let name = fk.effective_name();
        match groups
            .iter_mut()
            .find(|g| g.table == fk.table && g.name == name)
        {
            Some(group) => {
                if !group.columns.contains(&fk.column) {
                    group.columns.push(fk.column.clone());
                    group.referenced_columns.push(fk.referenced_column.clone());
                }
            }
            None => groups.push(ForeignKeyGroup {
                table: fk.table.clone(),
                name,
                columns: vec![fk.column.clone()],
                referenced_table: fk.referenced_table.clone(),
                referenced_columns: vec![fk.referenced_column.clone()],
            }),
        }
    }
    groups
}

// ── Inversion ────────────────────────────────────────────────────────────

impl SchemaDifferences {
    /// The delta that undoes this one. Re-adding a removed table or index
    /// needs its original definition.
    pub fn inverted(&self) -> Result<SchemaDifferences, GenerationError> {
        let added_tables = self
            .removed_tables
            .iter()
            .map(|t| {
                t.definition
                    .clone()
                    .ok_or_else(|| GenerationError::MissingDefinition {
                        kind: "table",
                        name: t.name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let added_indexes = self
            .removed_indexes
            .iter()
            .map(|i| {
                i.definition
                    .clone()
                    .map(|index| AddedIndex {
                        table: i.table.clone(),
                        index,
                    })
                    .ok_or_else(|| GenerationError::MissingDefinition {
                        kind: "index",
                        name: format!("{}.{}", i.table, i.index_name),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SchemaDifferences {
            added_tables,
            removed_tables: self
                .added_tables
                .iter()
                .map(|t| RemovedTable {
                    name: t.name.clone(),
                    definition: Some(t.clone()),
                })
                .collect(),
            added_columns: self
                .removed_columns
                .iter()
                .map(|c| AddedColumn {
                    table: c.table.clone(),
                    column: c
                        .definition
                        .clone()
                        .unwrap_or_else(|| nullable_column(&c.column)),
                })
                .collect(),
            removed_columns: self
                .added_columns
                .iter()
                .map(|c| RemovedColumn {
                    table: c.table.clone(),
                    column: ColumnRef {
                        name: c.column.name.clone(),
                        data_type: c.column.data_type.clone(),
                    },
                    definition: Some(c.column.clone()),
                })
                .collect(),
            modified_columns: self
                .modified_columns
                .iter()
                .map(|m| ModifiedColumn {
                    table: m.table.clone(),
                    column_name: m.column_name.clone(),
                    from: m.to.clone(),
                    to: m.from.clone(),
                    changes: m.changes.clone(),
                })
                .collect(),
            added_indexes,
            removed_indexes: self
                .added_indexes
                .iter()
                .map(|i| RemovedIndex {
                    table: i.table.clone(),
                    index_name: i.index.name.clone(),
                    definition: Some(i.index.clone()),
                })
                .collect(),
            added_foreign_keys: self.removed_foreign_keys.clone(),
            removed_foreign_keys: self.added_foreign_keys.clone(),
        })
    }
}

fn nullable_column(r: &ColumnRef) -> Column {
    Column {
        name: r.name.clone(),
        data_type: r.data_type.clone(),
        nullable: true,
        default: None,
        is_primary_key: false,
        is_unique: false,
        is_foreign_key: false,
        foreign_key_reference: None,
    }
}

// ── Generator ────────────────────────────────────────────────────────────

/// Turns `SchemaDifferences` into dependency-ordered DDL.
#[derive(Debug, Clone, Default)]
pub struct MigrationGenerator {
    sql: SqlGenerator,
}

impl MigrationGenerator {
    pub fn new(sql: SqlGenerator) -> Self {
        Self { sql }
    }

    /// Forward script: transforms the target into the source structure.
    pub fn generate_up(&self, diff: &SchemaDifferences) -> Result<GeneratedMigration, GenerationError> {
        let mut warnings = Vec::new();
        let steps = self.build_steps(diff, &mut warnings)?;
        log_warnings("up", &warnings);
        Ok(GeneratedMigration::from_steps(steps, warnings))
    }

    /// Reverse script: the same ordering applied to the inverted delta.
    pub fn generate_down(&self, diff: &SchemaDifferences) -> Result<GeneratedMigration, GenerationError> {
        let inverse = diff.inverted()?;
        let mut warnings = Vec::new();
        let steps = self.build_steps(&inverse, &mut warnings)?;

        for table in &inverse.added_tables {
            warnings.push(format!(
                "Recreating table {} restores its structure only; its data cannot be restored",
                table.name
            ));
        }
        for added in &inverse.added_columns {
            warnings.push(format!(
                "Re-adding column {}.{} restores its structure only; its data cannot be restored",
                added.table, added.column.name
            ));
        }
        for removed in diff.removed_columns.iter().filter(|c| c.definition.is_none()) {
            warnings.push(format!(
                "Original nullability and default of column {}.{} are unknown; it is re-added \
                 as a nullable column without a default",
                removed.table, removed.column.name
            ));
        }

        log_warnings("down", &warnings);
        Ok(GeneratedMigration::from_steps(steps, warnings))
    }

    fn build_steps(
        &self,
        diff: &SchemaDifferences,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<Step>, GenerationError> {
        let mut steps: Vec<Step> = Vec::new();

        // 1. new tables, without cross-table references
        for table in &diff.added_tables {
            steps.push(Step::new(StepKind::CreateTable, self.sql.create_table(table)?));
            for col in &table.columns {
                warn_sequence_default(&table.name, col, warnings);
            }
        }

        // 2. new columns on existing tables
        for added in &diff.added_columns {
            let col = &added.column;
            steps.push(Step::new(
                StepKind::AddColumn,
                self.sql.add_column(&added.table, col)?,
            ));
            if !col.nullable && col.default.is_none() {
                warnings.push(format!(
                    "Adding NOT NULL column {}.{} without a default will fail if the table contains rows",
                    added.table, col.name
                ));
            }
            warn_sequence_default(&added.table, col, warnings);
        }

        // 3. attribute changes
        for m in &diff.modified_columns {
            self.modify_column(m, &mut steps, warnings);
        }

        // 4. foreign keys going away
        for group in group_foreign_keys(&diff.removed_foreign_keys) {
            steps.push(Step::new(
                StepKind::DropForeignKey,
                self.sql.drop_constraint(&group.table, &group.name),
            ));
        }

        // 5.
        for removed in &diff.removed_indexes {
            steps.push(Step::new(
                StepKind::DropIndex,
                self.sql.drop_index(&removed.index_name),
            ));
        }

        // 6.
        for removed in &diff.removed_columns {
            steps.push(Step::new(
                StepKind::DropColumn,
                self.sql.drop_column(&removed.table, &removed.column.name),
            ));
            warnings.push(format!(
                "Dropping column {}.{} will permanently delete data",
                removed.table, removed.column.name
            ));
        }

        // 7. referencing tables before referenced ones
        let nodes: Vec<DropNode> = diff
            .removed_tables
            .iter()
            .map(|t| DropNode {
                name: t.name.clone(),
                references: t
                    .definition
                    .as_ref()
                    .map(Table::referenced_tables)
                    .unwrap_or_default(),
            })
            .collect();
        for group in drop_groups(&nodes) {
            for name in &group {
                warnings.push(format!(
                    "Dropping table {} will permanently delete data",
                    name
                ));
            }
            steps.push(Step::new(StepKind::DropTable, self.sql.drop_tables(&group)));
        }

        // 8. references and indexes, once everything they point at exists
        let new_table_fks: Vec<ForeignKey> = diff
            .added_tables
            .iter()
            .flat_map(|t| t.foreign_keys())
            .collect();
        for group in group_foreign_keys(new_table_fks.iter().chain(&diff.added_foreign_keys)) {
            steps.push(Step::new(
                StepKind::AddForeignKey,
                self.sql.add_foreign_key(
                    &group.table,
                    &group.name,
                    &group.columns,
                    &group.referenced_table,
                    &group.referenced_columns,
                ),
            ));
        }

        for table in &diff.added_tables {
            for index in &table.indexes {
                // constraint-backed indexes come with CREATE TABLE
                if table.constraints.iter().any(|c| c.name == index.name) {
                    continue;
                }
                steps.push(Step::new(
                    StepKind::CreateIndex,
                    self.sql.create_index(&table.name, index)?,
                ));
            }
        }
        for added in &diff.added_indexes {
            steps.push(Step::new(
                StepKind::CreateIndex,
                self.sql.create_index(&added.table, &added.index)?,
            ));
        }

        Ok(steps)
    }

    /// Type first, then default, then nullability, so a new default is in
    /// place before NOT NULL is enforced.
    fn modify_column(&self, m: &ModifiedColumn, steps: &mut Vec<Step>, warnings: &mut Vec<String>) {
        let (table, column) = (m.table.as_str(), m.column_name.as_str());

        if m.has(ChangeTag::TypeChanged) {
            let narrowing = is_narrowing(&m.from.data_type, &m.to.data_type);
            if narrowing {
                warnings.push(format!(
                    "Changing {}.{} from {} to {} may fail or lose data for existing rows",
                    table, column, m.from.data_type, m.to.data_type
                ));
            }
            steps.push(Step::new(
                StepKind::AlterType { narrowing },
                self.sql.alter_column_type(table, column, &m.to.data_type),
            ));
        }

        if m.has(ChangeTag::DefaultChanged) {
            let step = match &m.to.default {
                Some(default) => Step::new(
                    StepKind::SetDefault,
                    self.sql.set_default(table, column, default),
                ),
                None => Step::new(StepKind::DropDefault, self.sql.drop_default(table, column)),
            };
            steps.push(step);
        }

        if m.has(ChangeTag::NullableChanged) {
            if m.to.nullable {
                steps.push(Step::new(
                    StepKind::DropNotNull,
                    self.sql.drop_not_null(table, column),
                ));
            } else {
                warnings.push(format!(
                    "Setting {}.{} to NOT NULL will fail if existing rows contain NULL",
                    table, column
                ));
                steps.push(Step::new(
                    StepKind::SetNotNull,
                    self.sql.set_not_null(table, column),
                ));
            }
        }
    }
}

fn warn_sequence_default(table: &str, col: &Column, warnings: &mut Vec<String>) {
    if let Some(default) = &col.default {
        if default.contains("nextval(") {
            warnings.push(format!(
                "Default of {}.{} uses a sequence ({}) that must already exist",
                table, col.name, default
            ));
        }
    }
}

fn log_warnings(direction: &str, warnings: &[String]) {
    for w in warnings {
        log::debug!("[{}] {}", direction, w);
    }
}

/// Forward script with unqualified names.
pub fn generate_up(diff: &SchemaDifferences) -> Result<GeneratedMigration, GenerationError> {
    MigrationGenerator::default().generate_up(diff)
}

/// Reverse script with unqualified names.
pub fn generate_down(diff: &SchemaDifferences) -> Result<GeneratedMigration, GenerationError> {
    MigrationGenerator::default().generate_down(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::comparator::{compare_schemas, ColumnSnapshot};
    use crate::db::schema::fixtures::*;
    use crate::db::schema::{Constraint, ConstraintKind, Schema};

    fn position(m: &GeneratedMigration, needle: &str) -> usize {
        m.statements
            .iter()
            .position(|s| s.contains(needle))
            .unwrap_or_else(|| panic!("no statement containing {:?} in {:#?}", needle, m.statements))
    }

    fn users() -> Table {
        table("users", vec![pk("id", "integer"), col("name", "text", false)])
    }

    fn diff_of(source: Schema, target: Schema) -> SchemaDifferences {
        compare_schemas(&source, &target)
    }

    #[test]
    fn test_empty_diff_generates_nothing() {
        let up = generate_up(&SchemaDifferences::default()).unwrap();
        assert_eq!(up.statement_count, 0);
        assert_eq!(up.full_sql, "");
        assert_eq!(up.risk_level, RiskLevel::Low);
        assert!(!up.has_destructive_changes);
    }

    #[test]
    fn test_full_sql_matches_statements() {
        let mut source_users = users();
        source_users.columns.push(col("email", "varchar(255)", true));
        let d = diff_of(
            schema("app", vec![source_users, table("audit", vec![pk("id", "bigint")])]),
            schema("app", vec![users()]),
        );
        let up = generate_up(&d).unwrap();
        assert_eq!(up.statement_count, up.statements.len());
        assert_eq!(up.full_sql, join_statements(&up.statements));
        assert!(up.full_sql.ends_with(';'));
    }

    #[test]
    fn test_up_ordering_all_steps() {
        let mut target_users = users();
        target_users.columns.push(col("legacy", "text", true));
        target_users.columns.push(col("age", "integer", true));
        target_users.indexes.push(idx("ix_users_legacy", &["legacy"], false));
        let target_orders = table(
            "orders",
            vec![pk("id", "integer"), fk_col("user_id", "integer", "users", "id")],
        );

        let mut source_users = users();
        source_users.columns.push(col("age", "bigint", true));
        source_users.columns.push(col("email", "text", true));
        source_users.indexes.push(idx("ix_users_email", &["email"], true));
        let source_orders = table(
            "orders",
            vec![pk("id", "integer"), col("user_id", "integer", true)],
        );
        let invoices = table(
            "invoices",
            vec![pk("id", "integer"), fk_col("order_id", "integer", "orders", "id")],
        );

        let d = diff_of(
            schema("app", vec![source_users, source_orders, invoices]),
            schema(
                "app",
                vec![target_users, target_orders, table("legacy_logs", vec![pk("id", "integer")])],
            ),
        );
        let up = generate_up(&d).unwrap();

        let create = position(&up, "CREATE TABLE invoices");
        let add_col = position(&up, "ADD COLUMN email");
        let alter = position(&up, "ALTER COLUMN age TYPE bigint");
        let drop_fk = position(&up, "DROP CONSTRAINT fk_orders_user_id");
        let drop_idx = position(&up, "DROP INDEX ix_users_legacy");
        let drop_col = position(&up, "DROP COLUMN legacy");
        let drop_table = position(&up, "DROP TABLE legacy_logs");
        let add_fk = position(&up, "ADD CONSTRAINT fk_invoices_order_id FOREIGN KEY");
        let create_idx = position(&up, "CREATE UNIQUE INDEX ix_users_email");

        let order = [create, add_col, alter, drop_fk, drop_idx, drop_col, drop_table, add_fk, create_idx];
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{:#?}", up.statements);
        assert_eq!(up.risk_level, RiskLevel::High);
        assert!(up.has_destructive_changes);
    }

    #[test]
    fn test_drop_tables_referencing_first() {
        let d = diff_of(
            schema("app", vec![]),
            schema(
                "app",
                vec![
                    table("users", vec![pk("id", "integer")]),
                    table("orders", vec![pk("id", "integer"), fk_col("user_id", "integer", "users", "id")]),
                ],
            ),
        );
        let up = generate_up(&d).unwrap();
        assert_eq!(up.statements, vec!["DROP TABLE orders", "DROP TABLE users"]);
        assert_eq!(up.warnings.len(), 2);
    }

    #[test]
    fn test_fk_cycle_dropped_in_one_statement() {
        let d = diff_of(
            schema("app", vec![]),
            schema(
                "app",
                vec![
                    table("a", vec![pk("id", "integer"), fk_col("b_id", "integer", "b", "id")]),
                    table("b", vec![pk("id", "integer"), fk_col("a_id", "integer", "a", "id")]),
                ],
            ),
        );
        let up = generate_up(&d).unwrap();
        assert_eq!(up.statements, vec!["DROP TABLE a, b"]);
    }

    #[test]
    fn test_set_not_null_is_medium_risk() {
        let d = diff_of(
            schema("app", vec![table("users", vec![col("name", "text", false)])]),
            schema("app", vec![table("users", vec![col("name", "text", true)])]),
        );
        let up = generate_up(&d).unwrap();
        assert_eq!(up.statements, vec!["ALTER TABLE users ALTER COLUMN name SET NOT NULL"]);
        assert_eq!(up.risk_level, RiskLevel::Medium);
        assert!(!up.has_destructive_changes);

        let down = generate_down(&d).unwrap();
        assert_eq!(down.statements, vec!["ALTER TABLE users ALTER COLUMN name DROP NOT NULL"]);
        assert_eq!(down.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_narrowing_vs_widening_risk() {
        let widen = diff_of(
            schema("app", vec![table("t", vec![col("c", "varchar(255)", true)])]),
            schema("app", vec![table("t", vec![col("c", "varchar(100)", true)])]),
        );
        assert_eq!(generate_up(&widen).unwrap().risk_level, RiskLevel::Low);
        let down = generate_down(&widen).unwrap();
        assert_eq!(down.risk_level, RiskLevel::Medium);
        assert!(down.warnings.iter().any(|w| w.contains("may fail or lose data")));
    }

    #[test]
    fn test_default_change_statements() {
        let mut with_default = col("status", "text", true);
        with_default.default = Some("'active'::text".to_string());
        let d = diff_of(
            schema("app", vec![table("t", vec![with_default])]),
            schema("app", vec![table("t", vec![col("status", "text", true)])]),
        );
        assert_eq!(
            generate_up(&d).unwrap().statements,
            vec!["ALTER TABLE t ALTER COLUMN status SET DEFAULT 'active'::text"]
        );
        assert_eq!(
            generate_down(&d).unwrap().statements,
            vec!["ALTER TABLE t ALTER COLUMN status DROP DEFAULT"]
        );
    }

    #[test]
    fn test_not_null_without_default_warns() {
        let mut source_users = users();
        source_users.columns.push(col("email", "text", false));
        let d = diff_of(schema("app", vec![source_users]), schema("app", vec![users()]));
        let up = generate_up(&d).unwrap();
        assert!(up.warnings.iter().any(|w| w.contains("NOT NULL column users.email")));
        assert_eq!(up.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_added_table_fks_and_indexes_after_create() {
        let mut orders = table(
            "orders",
            vec![pk("id", "integer"), fk_col("user_id", "integer", "users", "id")],
        );
        orders.indexes.push(idx("ix_orders_user", &["user_id"], false));
        orders.indexes.push(idx("orders_pkey", &["id"], true));
        orders.constraints.push(Constraint {
            name: "orders_pkey".to_string(),
            kind: ConstraintKind::PrimaryKey,
            columns: vec!["id".to_string()],
            referenced_table: None,
            referenced_columns: None,
            expression: None,
        });

        let d = diff_of(
            schema("app", vec![users(), orders]),
            schema("app", vec![users()]),
        );
        let up = generate_up(&d).unwrap();
        assert_eq!(up.statement_count, 3);
        assert!(up.statements[0].starts_with("CREATE TABLE orders"));
        assert!(!up.statements[0].contains("REFERENCES"));
        assert_eq!(
            up.statements[1],
            "ALTER TABLE orders ADD CONSTRAINT fk_orders_user_id FOREIGN KEY (user_id) REFERENCES users (id)"
        );
        assert_eq!(up.statements[2], "CREATE INDEX ix_orders_user ON orders (user_id)");
    }

    #[test]
    fn test_composite_fk_rendered_once() {
        let mut lines = table(
            "lines",
            vec![col("order_id", "integer", false), col("order_rev", "integer", false)],
        );
        lines.constraints.push(Constraint {
            name: "lines_order_fkey".to_string(),
            kind: ConstraintKind::ForeignKey,
            columns: vec!["order_id".to_string(), "order_rev".to_string()],
            referenced_table: Some("orders".to_string()),
            referenced_columns: Some(vec!["id".to_string(), "rev".to_string()]),
            expression: None,
        });
        let d = diff_of(schema("app", vec![lines]), schema("app", vec![]));
        let up = generate_up(&d).unwrap();
        assert_eq!(
            up.statements[1],
            "ALTER TABLE lines ADD CONSTRAINT lines_order_fkey FOREIGN KEY (order_id, order_rev) REFERENCES orders (id, rev)"
        );
        assert_eq!(up.statement_count, 2);
    }

    #[test]
    fn test_down_recreates_dropped_table_before_its_fks() {
        let d = diff_of(
            schema("app", vec![users()]),
            schema(
                "app",
                vec![
                    users(),
                    table("orders", vec![pk("id", "integer"), fk_col("user_id", "integer", "users", "id")]),
                ],
            ),
        );
        let down = generate_down(&d).unwrap();
        let create = position(&down, "CREATE TABLE orders");
        let fk = position(&down, "FOREIGN KEY (user_id)");
        assert!(create < fk);
        assert!(!down.has_destructive_changes);
        assert!(down
            .warnings
            .iter()
            .any(|w| w.contains("orders") && w.contains("cannot be restored")));
    }

    #[test]
    fn test_down_without_definition_fails() {
        let d = SchemaDifferences {
            removed_tables: vec![RemovedTable {
                name: "legacy_logs".to_string(),
                definition: None,
            }],
            ..Default::default()
        };
        assert!(generate_up(&d).is_ok());
        assert_eq!(
            generate_down(&d),
            Err(GenerationError::MissingDefinition {
                kind: "table",
                name: "legacy_logs".to_string()
            })
        );
    }

    #[test]
    fn test_down_column_without_definition_is_nullable() {
        let d = SchemaDifferences {
            removed_columns: vec![RemovedColumn {
                table: "users".to_string(),
                column: ColumnRef {
                    name: "nickname".to_string(),
                    data_type: "text".to_string(),
                },
                definition: None,
            }],
            ..Default::default()
        };
        let down = generate_down(&d).unwrap();
        assert_eq!(down.statements, vec!["ALTER TABLE users ADD COLUMN nickname text"]);
        assert!(down.warnings.iter().any(|w| w.contains("users.nickname")
            && w.contains("nullability and default")
            && w.contains("unknown")));
    }

    #[test]
    fn test_down_column_with_definition_has_no_unknown_warning() {
        let d = SchemaDifferences {
            removed_columns: vec![RemovedColumn {
                table: "users".to_string(),
                column: ColumnRef {
                    name: "nickname".to_string(),
                    data_type: "text".to_string(),
                },
                definition: Some(Column {
                    name: "nickname".to_string(),
                    data_type: "text".to_string(),
                    nullable: false,
                    default: Some("'anon'::text".to_string()),
                    is_primary_key: false,
                    is_unique: false,
                    is_foreign_key: false,
                    foreign_key_reference: None,
                }),
            }],
            ..Default::default()
        };
        let down = generate_down(&d).unwrap();
        assert!(!down.warnings.iter().any(|w| w.contains("unknown")));
    }

    #[test]
    fn test_inverted_swaps_modified_snapshots() {
        let d = SchemaDifferences {
            modified_columns: vec![ModifiedColumn {
                table: "t".to_string(),
                column_name: "c".to_string(),
                from: ColumnSnapshot {
                    data_type: "integer".to_string(),
                    nullable: true,
                    default: None,
                },
                to: ColumnSnapshot {
                    data_type: "bigint".to_string(),
                    nullable: true,
                    default: None,
                },
                changes: vec![ChangeTag::TypeChanged],
            }],
            ..Default::default()
        };
        let inv = d.inverted().unwrap();
        assert_eq!(inv.modified_columns[0].to.data_type, "integer");
        assert_eq!(inv.inverted().unwrap(), d);
    }

    #[test]
    fn test_risk_level_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RiskLevel::High).unwrap(), "\"high\"");
    }
}
