use super::schema::{Column, ConstraintKind, Index, Table};
use crate::error::GenerationError;

/// PostgreSQL keywords that cannot be used as bare column or table names.
const RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "binary", "both", "case", "cast", "check", "collate", "collation",
    "column", "concurrently", "constraint", "create", "cross", "current_catalog",
    "current_date", "current_role", "current_schema", "current_time", "current_timestamp",
    "current_user", "default", "deferrable", "desc", "distinct", "do", "else", "end",
    "except", "false", "fetch", "for", "foreign", "freeze", "from", "full", "grant",
    "group", "having", "ilike", "in", "initially", "inner", "intersect", "into", "is",
    "isnull", "join", "lateral", "leading", "left", "like", "limit", "localtime",
    "localtimestamp", "natural", "not", "notnull", "null", "offset", "on", "only", "or",
    "order", "outer", "overlaps", "placing", "primary", "references", "returning",
    "right", "select", "session_user", "similar", "some", "symmetric", "table",
    "tablesample", "then", "to", "trailing", "true", "union", "unique", "user", "using",
    "variadic", "verbose", "when", "where", "window", "with",
];

/// Quote an identifier only when PostgreSQL would otherwise fold or reject it.
pub fn quote_ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(first) => {
            (first.is_ascii_lowercase() || first == '_')
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
        }
        None => false,
    };

    if plain && !RESERVED_WORDS.contains(&name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn ident_list(names: &[String]) -> String {
    names.iter().map(|n| quote_ident(n)).collect::<Vec<_>>().join(", ")
}

/// Renders single PostgreSQL DDL statements, without trailing terminators.
#[derive(Debug, Clone, Default)]
pub struct SqlGenerator {
    /// Schema used to qualify table and index names; `None` or `public`
    /// leaves names unqualified.
    schema: Option<String>,
}

impl SqlGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_schema(schema: &str) -> Self {
        if schema.is_empty() || schema == "public" {
            Self::default()
        } else {
            Self {
                schema: Some(schema.to_string()),
            }
        }
    }

    /// Quote and qualify a table or index name.
    fn qualified(&self, name: &str) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(name)),
            None => quote_ident(name),
        }
    }

    /// `name type [NOT NULL] [DEFAULT expr]`
    pub fn column_definition(&self, table: &str, col: &Column) -> Result<String, GenerationError> {
        if col.data_type.trim().is_empty() {
            return Err(GenerationError::Unsupported {
                object: format!("{}.{}", table, col.name),
                reason: "column has no type".to_string(),
            });
        }

        let mut def = format!("{} {}", quote_ident(&col.name), col.data_type);
        if !col.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &col.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        Ok(def)
    }

    /// CREATE TABLE with columns and the table's own PRIMARY KEY, UNIQUE and
    /// CHECK constraints. Foreign keys and standalone indexes are left out.
    pub fn create_table(&self, table: &Table) -> Result<String, GenerationError> {
        let mut parts: Vec<String> = Vec::new();
        for col in &table.columns {
            let mut def = self.column_definition(&table.name, col)?;
            if col.is_unique && !col.is_primary_key && !has_unique_on(table, &col.name) {
                def.push_str(" UNIQUE");
            }
            parts.push(def);
        }

        let has_pk_constraint = table
            .constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::PrimaryKey);
        if !has_pk_constraint {
            let pk = table.primary_key();
            if !pk.is_empty() {
                parts.push(format!("PRIMARY KEY ({})", ident_list(&pk)));
            }
        }

        for con in &table.constraints {
            match con.kind {
                ConstraintKind::PrimaryKey => parts.push(format!(
                    "CONSTRAINT {} PRIMARY KEY ({})",
                    quote_ident(&con.name),
                    ident_list(&con.columns)
                )),
                ConstraintKind::Unique => parts.push(format!(
                    "CONSTRAINT {} UNIQUE ({})",
                    quote_ident(&con.name),
                    ident_list(&con.columns)
                )),
                ConstraintKind::Check => {
                    let expr = con.expression.as_deref().ok_or_else(|| {
                        GenerationError::Unsupported {
                            object: format!("{}.{}", table.name, con.name),
                            reason: "CHECK constraint without an expression".to_string(),
                        }
                    })?;
                    parts.push(format!(
                        "CONSTRAINT {} CHECK ({})",
                        quote_ident(&con.name),
                        strip_outer_parens(expr)
                    ));
                }
                ConstraintKind::ForeignKey => {}
            }
        }

        if parts.is_empty() {
            return Ok(format!("CREATE TABLE {} ()", self.qualified(&table.name)));
        }

        Ok(format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.qualified(&table.name),
            parts.join(",\n  ")
        ))
    }

    pub fn add_column(&self, table: &str, col: &Column) -> Result<String, GenerationError> {
        let mut def = self.column_definition(table, col)?;
        if col.is_unique && !col.is_primary_key {
            def.push_str(" UNIQUE");
        }
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.qualified(table),
            def
        ))
    }

    pub fn alter_column_type(&self, table: &str, column: &str, data_type: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
            self.qualified(table),
            quote_ident(column),
            data_type,
            quote_ident(column),
            data_type
        )
    }

    pub fn set_default(&self, table: &str, column: &str, default: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
            self.qualified(table),
            quote_ident(column),
            default
        )
    }

    pub fn drop_default(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
            self.qualified(table),
            quote_ident(column)
        )
    }

    pub fn set_not_null(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
            self.qualified(table),
            quote_ident(column)
        )
    }

    pub fn drop_not_null(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
            self.qualified(table),
            quote_ident(column)
        )
    }

    pub fn drop_constraint(&self, table: &str, constraint: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.qualified(table),
            quote_ident(constraint)
        )
    }

    pub fn drop_index(&self, index: &str) -> String {
        format!("DROP INDEX {}", self.qualified(index))
    }

    pub fn drop_column(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.qualified(table),
            quote_ident(column)
        )
    }

    /// One DROP TABLE for a group of tables that must go together.
    pub fn drop_tables(&self, tables: &[String]) -> String {
        let names: Vec<String> = tables.iter().map(|t| self.qualified(t)).collect();
        format!("DROP TABLE {}", names.join(", "))
    }

    pub fn add_foreign_key(
        &self,
        table: &str,
        constraint: &str,
        columns: &[String],
        referenced_table: &str,
        referenced_columns: &[String],
    ) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.qualified(table),
            quote_ident(constraint),
            ident_list(columns),
            self.qualified(referenced_table),
            ident_list(referenced_columns)
        )
    }

    pub fn create_index(&self, table: &str, index: &Index) -> Result<String, GenerationError> {
        if index.columns.is_empty() {
            return Err(GenerationError::Unsupported {
                object: format!("{}.{}", table, index.name),
                reason: "index has no columns".to_string(),
            });
        }

        let unique = if index.is_unique { "UNIQUE " } else { "" };
        let using = if index.index_type.is_empty() || index.index_type.eq_ignore_ascii_case("btree")
        {
            String::new()
        } else {
            format!(" USING {}", index.index_type.to_lowercase())
        };

        Ok(format!(
            "CREATE {}INDEX {} ON {}{} ({})",
            unique,
            quote_ident(&index.name),
            self.qualified(table),
            using,
            ident_list(&index.columns)
        ))
    }
}

/// True when a UNIQUE or PRIMARY KEY constraint covers exactly this column.
fn has_unique_on(table: &Table, column: &str) -> bool {
    table.constraints.iter().any(|c| {
        matches!(c.kind, ConstraintKind::Unique | ConstraintKind::PrimaryKey)
            && c.columns.len() == 1
            && c.columns[0] == column
    })
}

/// `(a > 0)` becomes `a > 0`, only when the outer pair encloses the whole
/// expression.
fn strip_outer_parens(expr: &str) -> &str {
    let trimmed = expr.trim();
    if !(trimmed.starts_with('(') && trimmed.ends_with(')')) {
        return trimmed;
    }
    let mut depth = 0i32;
    for (i, c) in trimmed.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != trimmed.len() - 1 {
                    return trimmed;
                }
            }
            _ => {}
        }
    }
    &trimmed[1..trimmed.len() - 1]
}
