//! Query execution and incremental JSON encoding of the result set.

use crate::{
    compose::ComposedQuery,
    db::{PgConnectionManager, PgPool},
    error::{Result, ServiceError},
    rows::RowEncoder,
    time::OutputDateFormat,
};
use bb8::PooledConnection;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::{io, sync::Arc, time::Duration};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::{timeout_at, Instant},
};
use tokio_postgres::{types::ToSql, Row};
use tracing::{debug, error, warn};

pub type BodyStream = std::pin::Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// A query slot plus the pooled connection serving it.
///
/// Both go back when the lease is dropped, which happens when the response
/// stream finishes or the client goes away.
pub struct Lease {
    client: PooledConnection<'static, PgConnectionManager>,
    _permit: OwnedSemaphorePermit,
    deadline: Instant,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct QueryExecutor {
    pool: PgPool,
    permits: Arc<Semaphore>,
    request_timeout: Duration,
    max_rows: Option<u64>,
    dates: OutputDateFormat,
}

impl QueryExecutor {
    pub fn new(
        pool: PgPool,
        max_concurrent_queries: usize,
        request_timeout: Duration,
        max_rows: Option<u64>,
        dates: OutputDateFormat,
    ) -> Self {
        Self {
            pool,
            permits: Arc::new(Semaphore::new(max_concurrent_queries.max(1))),
            request_timeout,
            max_rows,
            dates,
        }
    }

    /// Free query slots; mostly useful for health reporting and tests.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits for a query slot, then checks a connection out of the pool.
    pub async fn acquire(&self) -> Result<Lease> {
        let deadline = Instant::now() + self.request_timeout;

        let permit = match timeout_at(deadline, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(ServiceError::Internal(anyhow::anyhow!(
                    "query semaphore closed"
                )))
            }
            Err(_) => return Err(ServiceError::Busy),
        };

        let client = self
            .pool
            .get_owned()
            .await
            .map_err(|err| ServiceError::DatabaseUnavailable(err.to_string()))?;

        Ok(Lease {
            client,
            _permit: permit,
            deadline,
        })
    }

    /// Starts the query and returns the response body.
    ///
    /// Errors raised before the first row are returned directly; anything
    /// later aborts the body stream.
    pub async fn execute(
        &self,
        view: &str,
        lease: Lease,
        query: ComposedQuery,
    ) -> Result<BodyStream> {
        let sql = query.limited(self.max_rows);
        debug!(view, sql = %sql, "executing view query");

        let rows = match timeout_at(
            lease.deadline,
            lease
                .client
                .query_raw(sql.as_str(), std::iter::empty::<&(dyn ToSql + Sync)>()),
        )
        .await
        {
            Ok(Ok(rows)) => rows,
            Ok(Err(err)) => return Err(ServiceError::QueryFailed(err)),
            Err(_) => return Err(ServiceError::Timeout),
        };

        let guard = StreamGuard::new(view);
        let mut encoder = JsonArrayEncoder::new(RowEncoder::new(self.dates.clone()));

        let body = async_stream::stream! {
            let mut guard = guard;
            let lease = lease;
            let mut rows = Box::pin(rows);

            loop {
                let next = match timeout_at(lease.deadline, rows.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(view = %guard.view, rows = encoder.count(), "view query exceeded its deadline mid-stream");
                        yield Err(io::Error::new(io::ErrorKind::TimedOut, "query timed out"));
                        return;
                    }
                };

                match next {
                    Some(Ok(row)) => match encoder.push(&row) {
                        Ok(chunk) => {
                            guard.rows = encoder.count();
                            yield Ok(chunk);
                        }
                        Err(err) => {
                            error!(view = %guard.view, error = %err, "failed to encode row");
                            yield Err(io::Error::new(io::ErrorKind::InvalidData, err));
                            return;
                        }
                    },
                    Some(Err(err)) => {
                        error!(view = %guard.view, error = %err, "view query failed mid-stream");
                        yield Err(io::Error::new(io::ErrorKind::Other, err));
                        return;
                    }
                    None => break,
                }
            }

            yield Ok(encoder.finish());
            guard.complete();
        };

        Ok(Box::pin(body))
    }
}

/// Writes a JSON array one element at a time.
#[derive(Debug)]
pub struct JsonArrayEncoder {
    rows: RowEncoder,
    count: u64,
}

impl JsonArrayEncoder {
    pub fn new(rows: RowEncoder) -> Self {
        Self { rows, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// `[` before the first element, `,` before every later one.
    pub fn push(&mut self, row: &Row) -> std::result::Result<Bytes, tokio_postgres::Error> {
        let object = self.rows.encode(row)?;
        Ok(self.push_value(&serde_json::Value::Object(object)))
    }

    fn push_value(&mut self, value: &serde_json::Value) -> Bytes {
        let mut chunk = Vec::with_capacity(128);
        chunk.push(if self.count == 0 { b'[' } else { b',' });
        // serializing a Value into a Vec cannot fail
        let _ = serde_json::to_writer(&mut chunk, value);
        self.count += 1;
        Bytes::from(chunk)
    }

    /// Closes the array; an empty result set yields `[]`.
    pub fn finish(&self) -> Bytes {
        if self.count == 0 {
            Bytes::from_static(b"[]")
        } else {
            Bytes::from_static(b"]")
        }
    }
}

/// Logs how a response stream ended.
struct StreamGuard {
    view: String,
    rows: u64,
    completed: bool,
}

impl StreamGuard {
    fn new(view: &str) -> Self {
        Self {
            view: view.to_string(),
            rows: 0,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
        debug!(view = %self.view, rows = self.rows, "view stream completed");
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.completed {
            debug!(view = %self.view, rows = self.rows, "view stream released before completion");
        }
    }
}
