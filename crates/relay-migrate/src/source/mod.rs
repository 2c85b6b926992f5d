//! MSSQL source database operations.

use crate::catalog::{ColumnDescriptor, RecordSink, SourceCatalog};
use crate::config::SourceConfig;
use crate::error::{MigrateError, Result};
use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: SourceConfig,
}

impl TiberiusConnectionManager {
    fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));

        if self.config.encrypt_enabled() {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// MSSQL source with connection pooling.
pub struct MssqlSource {
    pool: Pool<TiberiusConnectionManager>,
}

impl MssqlSource {
    /// Create the pool and test one connection.
    pub async fn new(config: &SourceConfig) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(1))
            .connection_timeout(config.connect_timeout())
            .build(manager)
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "creating MSSQL pool"))?;

        let source = Self { pool };
        source.ping().await?;

        info!(
            "Connected to MSSQL: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, config.max_connections
        );

        Ok(source)
    }

    /// Get a pooled connection.
    async fn get_client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "getting MSSQL connection"))
    }

    /// Fail with `ObjectNotFound` unless the object exists.
    async fn require_object(
        &self,
        client: &mut Client<Compat<TcpStream>>,
        namespace: &str,
        object: &str,
    ) -> Result<()> {
        let mut query = Query::new("SELECT OBJECT_ID(@P1)");
        query.bind(qualify(namespace, object));

        let row = query.query(client).await?.into_row().await?;
        match row.and_then(|r| r.get::<i32, _>(0)) {
            Some(_) => Ok(()),
            None => Err(MigrateError::not_found(namespace, object)),
        }
    }
}

/// Quote an MSSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Fully qualify an object name.
fn qualify(namespace: &str, object: &str) -> String {
    format!("{}.{}", quote_ident(namespace), quote_ident(object))
}

/// Strip the `CREATE VIEW <name> [(<columns>)] [WITH ...] AS` header from a
/// stored definition, leaving the query text.
///
/// Definitions without a recognizable header are returned unchanged.
pub fn strip_view_header(definition: &str) -> &str {
    let lower = definition.to_ascii_lowercase();
    let Some(start) = lower.find("create view") else {
        return definition;
    };
    let bytes = lower.as_bytes();
    let is_boundary = |b: u8| b.is_ascii_whitespace() || b == b')' || b == b'(';

    let mut pos = start + "create view".len();
    while let Some(offset) = lower[pos..].find("as") {
        let at = pos + offset;
        let end = at + 2;
        let before = is_boundary(bytes[at - 1]);
        let after = end == bytes.len() || is_boundary(bytes[end]);
        if before && after {
            return definition[end..].trim_start();
        }
        pos = end;
    }

    definition
}

/// Render one value as text for the interchange file. `None` is NULL.
fn column_text(data: ColumnData<'static>) -> Result<Option<String>> {
    let text = match &data {
        ColumnData::U8(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::I16(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::I32(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::I64(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::F32(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::F64(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::Bit(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::String(v) => v.as_ref().map(|s| s.to_string()),
        ColumnData::Guid(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::Numeric(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::Binary(v) => v.as_ref().map(|b| format!("\\x{}", hex::encode(b))),
        ColumnData::Xml(v) => v.as_ref().map(|x| (**x).clone().into_string()),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)?.map(|v| v.to_string())
        }
        ColumnData::Date(_) => NaiveDate::from_sql(&data)?.map(|v| v.to_string()),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)?.map(|v| v.to_string()),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(&data)?.map(|v| v.to_rfc3339())
        }
    };
    Ok(text)
}

#[async_trait]
impl SourceCatalog for MssqlSource {
    async fn row_count(&self, namespace: &str, object: &str) -> Result<u64> {
        let mut client = self.get_client().await?;
        self.require_object(&mut client, namespace, object).await?;

        let query = format!("SELECT COUNT_BIG(*) FROM {}", qualify(namespace, object));
        let row = client.simple_query(query).await?.into_row().await?;

        let count = row.and_then(|r| r.get::<i64, _>(0)).unwrap_or(0);
        debug!("Row count for {}.{}: {}", namespace, object, count);
        Ok(count as u64)
    }

    async fn columns(&self, namespace: &str, object: &str) -> Result<Vec<ColumnDescriptor>> {
        let mut client = self.get_client().await?;

        let mut query = Query::new(
            r#"
            SELECT COLUMN_NAME, UPPER(DATA_TYPE)
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#,
        );
        query.bind(namespace);
        query.bind(object);

        let rows = query.query(&mut client).await?.into_first_result().await?;
        let columns: Vec<ColumnDescriptor> = rows
            .iter()
            .map(|row| {
                ColumnDescriptor::new(
                    row.get::<&str, _>(0).unwrap_or_default(),
                    row.get::<&str, _>(1).unwrap_or_default(),
                )
            })
            .collect();

        debug!("Loaded {} columns for {}.{}", columns.len(), namespace, object);
        Ok(columns)
    }

    async fn stream_rows(
        &self,
        namespace: &str,
        object: &str,
        sink: &mut dyn RecordSink,
    ) -> Result<u64> {
        let mut client = self.get_client().await?;

        let query = format!("SELECT * FROM {}", qualify(namespace, object));
        let mut rows = client.simple_query(query).await?.into_row_stream();

        let mut written = 0u64;
        while let Some(row) = rows.try_next().await? {
            let record = row
                .into_iter()
                .map(column_text)
                .collect::<Result<Vec<_>>>()?;
            sink.write_record(&record)?;
            written += 1;
        }

        Ok(written)
    }

    async fn view_definition(&self, namespace: &str, object: &str) -> Result<String> {
        let mut client = self.get_client().await?;

        let mut query = Query::new("SELECT OBJECT_DEFINITION(OBJECT_ID(@P1))");
        query.bind(qualify(namespace, object));

        let row = query.query(&mut client).await?.into_row().await?;
        let definition = row
            .and_then(|r| r.get::<&str, _>(0).map(strip_view_header).map(String::from))
            .ok_or_else(|| MigrateError::not_found(namespace, object))?;

        Ok(definition)
    }

    async fn ping(&self) -> Result<()> {
        let mut client = self.get_client().await?;
        client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mssql"
    }
}
