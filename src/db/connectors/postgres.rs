use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio_postgres::config::Host;
use tokio_postgres::{CancelToken, Client, Config, NoTls};

use super::{
    ConnectionInfo, ConnectorConfig, DatabaseConnector, MigrationConnection, StatementFailure,
};
use crate::db::schema::{
    Column, Constraint, ConstraintKind, ForeignKeyReference, Index, Schema, Table,
};
use crate::error::{ExecutionErrorKind, ExtractionError};
use crate::security::{
    redact_connection_string, sanitize_for_display, validate_connection_string,
};

// ── Catalog queries ─────────────────────────────────────────────────────────

const TABLES_QUERY: &str = "\
SELECT c.relname::text
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relkind IN ('r', 'p') AND NOT c.relispartition
ORDER BY c.relname";

const COLUMNS_QUERY: &str = "\
SELECT c.relname::text,
       a.attname::text,
       pg_catalog.format_type(a.atttypid, a.atttypmod),
       NOT a.attnotnull,
       pg_catalog.pg_get_expr(d.adbin, d.adrelid)
FROM pg_catalog.pg_attribute a
JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE n.nspname = $1 AND c.relkind IN ('r', 'p') AND a.attnum > 0 AND NOT a.attisdropped
ORDER BY c.relname, a.attnum";

const CONSTRAINTS_QUERY: &str = "\
SELECT cl.relname::text,
       con.conname::text,
       con.contype::text,
       ARRAY(SELECT a.attname::text
             FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
             JOIN pg_catalog.pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
             ORDER BY k.ord),
       ref.relname::text,
       ARRAY(SELECT a.attname::text
             FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
             JOIN pg_catalog.pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
             ORDER BY k.ord),
       CASE WHEN con.contype = 'c' THEN pg_catalog.pg_get_constraintdef(con.oid) END
FROM pg_catalog.pg_constraint con
JOIN pg_catalog.pg_class cl ON cl.oid = con.conrelid
JOIN pg_catalog.pg_namespace n ON n.oid = cl.relnamespace
LEFT JOIN pg_catalog.pg_class ref ON ref.oid = con.confrelid
WHERE n.nspname = $1 AND con.contype IN ('p', 'u', 'f', 'c')
ORDER BY cl.relname, con.conname";

// Constraint-backed indexes are reported through their constraint instead
const INDEXES_QUERY: &str = "\
SELECT t.relname::text,
       i.relname::text,
       ix.indisunique,
       am.amname::text,
       ARRAY(SELECT pg_catalog.pg_get_indexdef(ix.indexrelid, k.ord, true)
             FROM generate_series(1, ix.indnkeyatts::int) AS k(ord)
             ORDER BY k.ord)
FROM pg_catalog.pg_index ix
JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
JOIN pg_catalog.pg_am am ON am.oid = i.relam
WHERE n.nspname = $1
  AND NOT ix.indisprimary
  AND NOT EXISTS (SELECT 1 FROM pg_catalog.pg_constraint c WHERE c.conindid = ix.indexrelid)
ORDER BY t.relname, i.relname";

// ── Raw catalog rows ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RawColumn {
    table: String,
    name: String,
    data_type: String,
    nullable: bool,
    default: Option<String>,
}

#[derive(Debug, Clone)]
struct RawConstraint {
    table: String,
    name: String,
    contype: String,
    columns: Vec<String>,
    referenced_table: Option<String>,
    referenced_columns: Vec<String>,
    definition: Option<String>,
}

#[derive(Debug, Clone)]
struct RawIndex {
    table: String,
    name: String,
    is_unique: bool,
    method: String,
    columns: Vec<String>,
}

/// PostgreSQL connector using tokio-postgres
pub struct PostgresConnector {
    config: ConnectorConfig,
}

impl PostgresConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self { config }
    }

    fn parse_config(&self, connection_string: &str) -> Result<Config, ExtractionError> {
        validate_connection_string(connection_string)
            .map_err(|e| ExtractionError::InvalidConnectionString(e.to_string()))?;
        let mut pg_config: Config = connection_string
            .parse()
            .map_err(|e: tokio_postgres::Error| {
                ExtractionError::InvalidConnectionString(e.to_string())
            })?;
        pg_config.connect_timeout(Duration::from_secs(self.config.connection_timeout_secs));
        Ok(pg_config)
    }

    /// Connect and spawn the connection driver task.
    pub(crate) async fn connect(&self, connection_string: &str) -> Result<Client, ExtractionError> {
        let pg_config = self.parse_config(connection_string)?;
        let timeout_secs = self.config.connection_timeout_secs;
        let redacted = redact_connection_string(connection_string);

        log::info!("Connecting to PostgreSQL: {}", redacted);
        let (client, connection) =
            tokio::time::timeout(Duration::from_secs(timeout_secs), pg_config.connect(NoTls))
                .await
                .map_err(|_| ExtractionError::Timeout(timeout_secs))?
                .map_err(|e| ExtractionError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::error!("PostgreSQL connection error ({}): {}", redacted, e);
            }
        });

        Ok(client)
    }

    async fn query_catalog(&self, client: &Client) -> Result<Schema, ExtractionError> {
        let schema_name = self.config.schema_name.as_str();
        let query_err = |what: &str, e: tokio_postgres::Error| {
            ExtractionError::Query(format!("Failed to read {}: {}", what, e))
        };

        let database: String = client
            .query_one("SELECT current_database()::text", &[])
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|e| query_err("database name", e))?;

        let tables: Vec<String> = client
            .query(TABLES_QUERY, &[&schema_name])
            .await
            .map_err(|e| query_err("tables", e))?
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<Result<_, _>>()
            .map_err(|e| query_err("tables", e))?;

        let columns = client
            .query(COLUMNS_QUERY, &[&schema_name])
            .await
            .map_err(|e| query_err("columns", e))?
            .iter()
            .map(|row| -> Result<RawColumn, tokio_postgres::Error> {
                Ok(RawColumn {
                    table: row.try_get(0)?,
                    name: row.try_get(1)?,
                    data_type: row.try_get(2)?,
                    nullable: row.try_get(3)?,
                    default: row.try_get(4)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| query_err("columns", e))?;

        let constraints = client
            .query(CONSTRAINTS_QUERY, &[&schema_name])
            .await
            .map_err(|e| query_err("constraints", e))?
            .iter()
            .map(|row| -> Result<RawConstraint, tokio_postgres::Error> {
                Ok(RawConstraint {
                    table: row.try_get(0)?,
                    name: row.try_get(1)?,
                    contype: row.try_get(2)?,
                    columns: row.try_get(3)?,
                    referenced_table: row.try_get(4)?,
                    referenced_columns: row.try_get(5)?,
                    definition: row.try_get(6)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| query_err("constraints", e))?;

        let indexes = client
            .query(INDEXES_QUERY, &[&schema_name])
            .await
            .map_err(|e| query_err("indexes", e))?
            .iter()
            .map(|row| -> Result<RawIndex, tokio_postgres::Error> {
                Ok(RawIndex {
                    table: row.try_get(0)?,
                    name: row.try_get(1)?,
                    is_unique: row.try_get(2)?,
                    method: row.try_get(3)?,
                    columns: row.try_get(4)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| query_err("indexes", e))?;

        Ok(assemble_schema(database, tables, columns, constraints, indexes))
    }
}

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    async fn extract_schema(&self, connection_string: &str) -> Result<Schema, ExtractionError> {
        let client = self.connect(connection_string).await?;
        let schema = self.query_catalog(&client).await?;
        log::info!(
            "Extracted {} tables from {}.{}",
            schema.tables.len(),
            schema.database,
            self.config.schema_name
        );
        Ok(schema)
    }

    async fn open(
        &self,
        connection_string: &str,
    ) -> Result<Box<dyn MigrationConnection>, ExtractionError> {
        let client = self.connect(connection_string).await?;
        let cancel_token = client.cancel_token();
        Ok(Box::new(PostgresMigrationConnection {
            client,
            cancel_token,
        }))
    }

    async fn test_connection(
        &self,
        connection_string: &str,
    ) -> Result<ConnectionInfo, ExtractionError> {
        let pg_config = self.parse_config(connection_string)?;
        let client = self.connect(connection_string).await?;
        let database: String = client
            .query_one("SELECT current_database()::text", &[])
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|e| ExtractionError::Query(format!("Failed to read database name: {}", e)))?;

        let (host, port) = endpoint(&pg_config);
        Ok(ConnectionInfo {
            connected: true,
            database: Some(database),
            host,
            port,
            error: None,
        })
    }
}

/// First host and port the driver would try.
fn endpoint(config: &Config) -> (Option<String>, Option<u16>) {
    let host = config.get_hosts().first().map(|h| match h {
        Host::Tcp(name) => name.clone(),
        #[cfg(unix)]
        Host::Unix(path) => path.display().to_string(),
    });
    let port = config.get_ports().first().copied().or(Some(5432));
    (host, port)
}

/// Build the normalized snapshot from catalog rows. Tables keep catalog
/// order; columns keep attribute order.
fn assemble_schema(
    database: String,
    table_names: Vec<String>,
    columns: Vec<RawColumn>,
    constraints: Vec<RawConstraint>,
    indexes: Vec<RawIndex>,
) -> Schema {
    let mut tables: Vec<Table> = table_names
        .into_iter()
        .map(|name| Table {
            name,
            columns: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
        })
        .collect();
    let positions: HashMap<String, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.clone(), i))
        .collect();

    for raw in columns {
        let Some(&pos) = positions.get(&raw.table) else {
            continue;
        };
        tables[pos].columns.push(Column {
            name: raw.name,
            data_type: raw.data_type,
            nullable: raw.nullable,
            default: raw.default,
            is_primary_key: false,
            is_unique: false,
            is_foreign_key: false,
            foreign_key_reference: None,
        });
    }

    for raw in constraints {
        let Some(&pos) = positions.get(&raw.table) else {
            continue;
        };
        let kind = match raw.contype.as_str() {
            "p" => ConstraintKind::PrimaryKey,
            "u" => ConstraintKind::Unique,
            "f" => ConstraintKind::ForeignKey,
            "c" => ConstraintKind::Check,
            other => {
                log::debug!("Skipping constraint {} of type '{}'", raw.name, other);
                continue;
            }
        };

        let table = &mut tables[pos];
        for col in table.columns.iter_mut() {
            match kind {
                ConstraintKind::PrimaryKey if raw.columns.contains(&col.name) => {
                    col.is_primary_key = true;
                }
                ConstraintKind::Unique if raw.columns == [col.name.clone()] => {
                    col.is_unique = true;
                }
                ConstraintKind::ForeignKey if raw.columns.contains(&col.name) => {
                    col.is_foreign_key = true;
                    if raw.columns.len() == 1 {
                        if let (Some(ref_table), Some(ref_col)) =
                            (raw.referenced_table.as_ref(), raw.referenced_columns.first())
                        {
                            col.foreign_key_reference = Some(ForeignKeyReference {
                                table: ref_table.clone(),
                                column: ref_col.clone(),
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        let is_fk = kind == ConstraintKind::ForeignKey;
        table.constraints.push(Constraint {
            name: raw.name,
            kind,
            columns: raw.columns,
            referenced_table: if is_fk { raw.referenced_table } else { None },
            referenced_columns: if is_fk { Some(raw.referenced_columns) } else { None },
            expression: raw.definition.as_deref().map(check_expression),
        });
    }

    for raw in indexes {
        let Some(&pos) = positions.get(&raw.table) else {
            continue;
        };
        tables[pos].indexes.push(Index {
            name: raw.name,
            columns: raw.columns,
            is_unique: raw.is_unique,
            index_type: raw.method,
        });
    }

    Schema { database, tables }
}

/// `CHECK ((a > 0)) NOT VALID` -> `((a > 0))`
fn check_expression(definition: &str) -> String {
    let trimmed = definition.trim();
    let body = trimmed
        .strip_prefix("CHECK ")
        .unwrap_or(trimmed);
    let body = body.strip_suffix(" NOT VALID").unwrap_or(body);
    body.trim().to_string()
}

// ── Migration session ───────────────────────────────────────────────────────

/// A single client connection running simple-query transaction control.
pub struct PostgresMigrationConnection {
    client: Client,
    cancel_token: CancelToken,
}

impl PostgresMigrationConnection {
    async fn run(&self, sql: &str) -> Result<(), StatementFailure> {
        self.client.batch_execute(sql).await.map_err(|e| classify(&e))
    }
}

#[async_trait]
impl MigrationConnection for PostgresMigrationConnection {
    async fn begin(&mut self) -> Result<(), StatementFailure> {
        self.run("BEGIN").await
    }

    async fn execute(&mut self, statement: &str) -> Result<(), StatementFailure> {
        self.run(statement).await
    }

    async fn commit(&mut self) -> Result<(), StatementFailure> {
        self.run("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), StatementFailure> {
        self.run("ROLLBACK").await
    }

    async fn cancel(&mut self) -> Result<(), StatementFailure> {
        log::debug!("Sending cancel request to PostgreSQL server");
        self.cancel_token
            .cancel_query(NoTls)
            .await
            .map_err(|e| classify(&e))
    }
}

/// Map a driver error to a statement failure with its SQLSTATE.
fn classify(e: &tokio_postgres::Error) -> StatementFailure {
    if let Some(db) = e.as_db_error() {
        let code = db.code().code().to_string();
        return StatementFailure::new(
            ExecutionErrorKind::from_sqlstate(Some(&code)),
            Some(code),
            sanitize_for_display(db.message()),
        );
    }
    // No server response: the socket closed or the driver failed
    StatementFailure::new(ExecutionErrorKind::ConnectionLost, None, e.to_string())
}
