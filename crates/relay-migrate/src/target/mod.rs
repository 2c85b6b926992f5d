//! PostgreSQL target database operations.

use crate::catalog::{TargetCatalog, TargetColumn};
use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};
use crate::transfer::Interchange;
use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::SinkExt;
use tokio::io::AsyncReadExt;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info};

/// Bytes read from the interchange file per COPY message.
const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// PostgreSQL target with a deadpool connection pool.
pub struct PgTarget {
    pool: Pool,
}

impl PgTarget {
    /// Create the pool and test one connection.
    pub async fn new(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.connect_timeout(config.connect_timeout());

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(config.max_connections as usize)
            .build()
            .map_err(|e| MigrateError::pool(e.to_string(), "creating PostgreSQL pool"))?;

        let target = Self { pool };
        target.get_client().await?.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, config.max_connections
        );

        Ok(target)
    }

    async fn get_client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "getting PostgreSQL connection"))
    }
}

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Fully qualify an object name.
fn qualify(namespace: &str, object: &str) -> String {
    format!("{}.{}", quote_ident(namespace), quote_ident(object))
}

/// Generate DDL for table creation.
fn generate_ddl(namespace: &str, object: &str, columns: &[TargetColumn]) -> String {
    let body: Vec<String> = columns
        .iter()
        .map(|c| format!("    {} {}", quote_ident(&c.name), c.target_type))
        .collect();
    format!(
        "CREATE TABLE {} (\n{}\n)",
        qualify(namespace, object),
        body.join(",\n")
    )
}

fn view_ddl(namespace: &str, object: &str, definition: &str) -> String {
    format!(
        "CREATE OR REPLACE VIEW {} AS\n{}",
        qualify(namespace, object),
        definition
    )
}

fn copy_statement(namespace: &str, object: &str, header: &[String]) -> String {
    let cols: Vec<String> = header.iter().map(|c| quote_ident(c)).collect();
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, HEADER true)",
        qualify(namespace, object),
        cols.join(", ")
    )
}

/// A concurrent `CREATE SCHEMA IF NOT EXISTS` can still lose the race on the
/// catalog's unique index.
fn is_duplicate_schema(e: &tokio_postgres::Error) -> bool {
    matches!(
        e.code(),
        Some(code) if *code == SqlState::DUPLICATE_SCHEMA || *code == SqlState::UNIQUE_VIOLATION
    )
}

/// The relation or its schema does not exist yet.
fn is_missing_relation(e: &tokio_postgres::Error) -> bool {
    e.code().is_some_and(missing_relation_state)
}

fn missing_relation_state(code: &SqlState) -> bool {
    *code == SqlState::UNDEFINED_TABLE || *code == SqlState::INVALID_SCHEMA_NAME
}

#[async_trait]
impl TargetCatalog for PgTarget {
    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let client = self.get_client().await?;
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(name));
        match client.execute(sql.as_str(), &[]).await {
            Ok(_) => {}
            Err(e) if is_duplicate_schema(&e) => {
                debug!("Schema '{}' created concurrently", name);
            }
            Err(e) => return Err(e.into()),
        }

        debug!("Ensured schema '{}'", name);
        Ok(())
    }

    async fn drop_if_exists(&self, namespace: &str, object: &str) -> Result<()> {
        let client = self.get_client().await?;
        let sql = format!("DROP TABLE IF EXISTS {} CASCADE", qualify(namespace, object));
        client.execute(sql.as_str(), &[]).await?;

        debug!("Dropped table {}.{}", namespace, object);
        Ok(())
    }

    async fn create_table(
        &self,
        namespace: &str,
        object: &str,
        columns: &[TargetColumn],
    ) -> Result<()> {
        let client = self.get_client().await?;
        let ddl = generate_ddl(namespace, object, columns);
        client.execute(ddl.as_str(), &[]).await?;

        debug!("Created table {}.{}", namespace, object);
        Ok(())
    }

    async fn create_or_replace_view(
        &self,
        namespace: &str,
        object: &str,
        definition: &str,
    ) -> Result<()> {
        let client = self.get_client().await?;
        let ddl = view_ddl(namespace, object, definition);
        client.batch_execute(ddl.as_str()).await?;

        debug!("Created view {}.{}", namespace, object);
        Ok(())
    }

    async fn bulk_load(&self, namespace: &str, object: &str, data: &Interchange) -> Result<u64> {
        let qualified = qualify(namespace, object);
        let client = self.get_client().await?;
        let mut file = tokio::fs::File::open(data.path()).await?;

        let sink = client
            .copy_in(copy_statement(namespace, object, data.header()).as_str())
            .await
            .map_err(|e| MigrateError::transfer(&qualified, format!("COPY init: {}", e)))?;
        tokio::pin!(sink);

        let mut buf = BytesMut::with_capacity(COPY_CHUNK_BYTES);
        loop {
            buf.reserve(COPY_CHUNK_BYTES);
            if file.read_buf(&mut buf).await? == 0 {
                break;
            }
            sink.send(buf.split().freeze())
                .await
                .map_err(|e| MigrateError::transfer(&qualified, format!("COPY send: {}", e)))?;
        }

        let rows = sink
            .finish()
            .await
            .map_err(|e| MigrateError::transfer(&qualified, format!("COPY finish: {}", e)))?;

        debug!("Copied {} rows into {}", rows, qualified);
        Ok(rows)
    }

    async fn row_count(&self, namespace: &str, object: &str) -> Result<Option<u64>> {
        let client = self.get_client().await?;
        let sql = format!("SELECT COUNT(*) FROM {}", qualify(namespace, object));
        match client.query_one(sql.as_str(), &[]).await {
            Ok(row) => {
                let count: i64 = row.get(0);
                Ok(Some(count as u64))
            }
            Err(e) if is_missing_relation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.get_client().await?.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualify("sales", "orders"), "\"sales\".\"orders\"");
    }

    #[test]
    fn test_generate_ddl() {
        let columns = vec![
            TargetColumn {
                name: "order_id".into(),
                target_type: "NUMERIC".into(),
            },
            TargetColumn {
                name: "note".into(),
                target_type: "TEXT".into(),
            },
        ];
        assert_eq!(
            generate_ddl("sales", "orders", &columns),
            "CREATE TABLE \"sales\".\"orders\" (\n    \"order_id\" NUMERIC,\n    \"note\" TEXT\n)"
        );
    }

    #[test]
    fn test_view_ddl_keeps_definition() {
        let ddl = view_ddl("sales", "v_open", "SELECT id\n  FROM orders\n WHERE open");
        assert_eq!(
            ddl,
            "CREATE OR REPLACE VIEW \"sales\".\"v_open\" AS\nSELECT id\n  FROM orders\n WHERE open"
        );
    }

    #[test]
    fn test_copy_statement() {
        let header = vec!["order_id".to_string(), "note".to_string()];
        assert_eq!(
            copy_statement("sales", "orders", &header),
            "COPY \"sales\".\"orders\" (\"order_id\", \"note\") FROM STDIN WITH (FORMAT csv, HEADER true)"
        );
    }

    #[test]
    fn test_missing_schema_counts_as_missing_relation() {
        assert!(missing_relation_state(&SqlState::UNDEFINED_TABLE));
        assert!(missing_relation_state(&SqlState::INVALID_SCHEMA_NAME));
        assert!(!missing_relation_state(&SqlState::INSUFFICIENT_PRIVILEGE));
    }
}
