//! Thin per-call connection helper over `tokio-postgres`.
//!
//! No pooling: every probe and every task opens its own connection and
//! closes it on completion, matching the design's "independent connections,
//! no pooling required" contract. The connection's driving future is spawned
//! onto the runtime and dropped once the caller is done with the client,
//! which aborts it along with any in-flight statement — the cancellation
//! mechanism cancellation relies on.

use tokio_postgres::{Client, NoTls};

pub struct Connection {
    pub client: Client,
    driver: tokio::task::JoinHandle<()>,
}

impl Connection {
    pub async fn open(dsn: &str) -> Result<Self, tokio_postgres::Error> {
        let (client, connection) = tokio_postgres::connect(dsn, NoTls).await?;
        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(%err, "postgres connection driver error");
            }
        });
        Ok(Self { client, driver })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Runs a probe query that returns rows iff the asserted property is
/// violated. Success = zero rows. Any query error is surfaced to the caller
/// so it can be classified as a failed assertion rather than propagated as a
/// fatal error.
pub async fn probe_empty(dsn: &str, sql: &str) -> Result<bool, tokio_postgres::Error> {
    let conn = Connection::open(dsn).await?;
    let rows = conn.client.query(sql, &[]).await?;
    Ok(rows.is_empty())
}

/// Runs a probe that returns a single count.
pub async fn probe_count(dsn: &str, sql: &str) -> Result<i64, tokio_postgres::Error> {
    let conn = Connection::open(dsn).await?;
    let row = conn.client.query_one(sql, &[]).await?;
    Ok(row.get::<_, i64>(0))
}
