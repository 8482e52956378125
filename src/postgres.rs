use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Executor, PgPool, Postgres, Row, Transaction};
use std::sync::Arc;

use crate::{
    ExecuteOutcome, InsertError, InsertResult, InsertStatement, ResourceProvider, Savepoint,
    TransactionalResource, Value,
};

/// Resource provider backed by a PostgreSQL connection pool.
///
/// Each acquisition begins one transaction on a pooled connection; releasing
/// the resource returns the connection.
pub struct PgResourceProvider {
    pool: Arc<PgPool>,
}

impl PgResourceProvider {
    /// Create a new PgResourceProvider with the given connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceProvider for PgResourceProvider {
    async fn acquire(&self) -> InsertResult<Box<dyn TransactionalResource>> {
        let tx = self.pool.begin().await.map_err(InsertError::Resource)?;
        Ok(Box::new(PgResource::new(self.pool.clone(), tx)))
    }
}

/// A PostgreSQL transaction checked out of the pool.
///
/// Commit and rollback consume the current `Transaction`; the next statement
/// begins a fresh one, mirroring how a driver-level connection behaves with
/// autocommit disabled. With autocommit enabled every statement commits as
/// soon as it has run. Dropping the resource rolls back whatever is pending.
pub struct PgResource {
    pool: Arc<PgPool>,
    tx: Option<Transaction<'static, Postgres>>,
    auto_commit: bool,
    released: bool,
    savepoints: u32,
}

impl PgResource {
    /// Creates a new PgResource around an already begun transaction.
    pub fn new(pool: Arc<PgPool>, tx: Transaction<'static, Postgres>) -> Self {
        Self {
            pool,
            tx: Some(tx),
            auto_commit: true,
            released: false,
            savepoints: 0,
        }
    }

    /// The open transaction, beginning one if the last was committed or rolled back.
    async fn transaction(&mut self) -> InsertResult<&mut Transaction<'static, Postgres>> {
        if self.released {
            return Err(InsertError::Resource(sqlx::Error::PoolClosed));
        }
        if self.tx.is_none() {
            let tx = self.pool.begin().await.map_err(InsertError::Resource)?;
            self.tx = Some(tx);
            self.savepoints = 0;
        }
        self.tx
            .as_mut()
            .ok_or(InsertError::Resource(sqlx::Error::PoolClosed))
    }

    /// Runs a savepoint command; named savepoints have no `Transaction` API.
    async fn savepoint_command(&mut self, sql: &str) -> InsertResult<()> {
        let tx = self.transaction().await?;
        (&mut **tx)
            .execute(sqlx::raw_sql(sql))
            .await
            .map_err(InsertError::Execution)?;
        Ok(())
    }
}

#[async_trait]
impl TransactionalResource for PgResource {
    fn is_open(&self) -> bool {
        !self.released
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> InsertResult<()> {
        if auto_commit && !self.auto_commit {
            self.commit().await?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    async fn execute(&mut self, statement: &InsertStatement) -> InsertResult<ExecuteOutcome> {
        let tx = self.transaction().await?;

        let outcome = match statement.key_column() {
            Some(column) => {
                let sql = format!("{} RETURNING {}", statement.sql(), column);
                let rows = bind_params(sqlx::query(&sql), statement.params())
                    .fetch_all(&mut **tx)
                    .await
                    .map_err(InsertError::Execution)?;
                let generated_keys = rows
                    .iter()
                    .map(read_key)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|err| InsertError::KeyRetrieval(err.to_string()))?;
                ExecuteOutcome {
                    rows_affected: rows.len() as u64,
                    generated_keys,
                }
            }
            None => {
                let result = bind_params(sqlx::query(statement.sql()), statement.params())
                    .execute(&mut **tx)
                    .await
                    .map_err(InsertError::Execution)?;
                ExecuteOutcome {
                    rows_affected: result.rows_affected(),
                    generated_keys: Vec::new(),
                }
            }
        };

        if self.auto_commit {
            self.commit().await?;
        }
        Ok(outcome)
    }

    async fn commit(&mut self) -> InsertResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await.map_err(InsertError::Execution)?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> InsertResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.map_err(InsertError::Execution)?;
        }
        Ok(())
    }

    async fn rollback_to(&mut self, savepoint: &Savepoint) -> InsertResult<()> {
        self.savepoint_command(&format!("ROLLBACK TO SAVEPOINT {}", savepoint.name()))
            .await
    }

    async fn create_savepoint(&mut self) -> InsertResult<Savepoint> {
        self.transaction().await?;
        self.savepoints += 1;
        let savepoint = Savepoint::new(format!("insert_sp_{}", self.savepoints));
        self.savepoint_command(&format!("SAVEPOINT {}", savepoint.name()))
            .await?;
        Ok(savepoint)
    }

    async fn release_savepoint(&mut self, savepoint: &Savepoint) -> InsertResult<()> {
        self.savepoint_command(&format!("RELEASE SAVEPOINT {}", savepoint.name()))
            .await
    }

    async fn release(&mut self) -> InsertResult<()> {
        if self.released {
            return Err(InsertError::Resource(sqlx::Error::PoolClosed));
        }
        self.released = true;
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.map_err(InsertError::Resource)?;
        }
        Ok(())
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<i64>),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Bool(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Uuid(v) => query.bind(*v),
        };
    }
    query
}

/// Generated keys come back as `int8` for `BIGSERIAL` and `int4` for `SERIAL`.
fn read_key(row: &PgRow) -> Result<i64, sqlx::Error> {
    row.try_get::<i64, _>(0)
        .or_else(|_| row.try_get::<i32, _>(0).map(i64::from))
}
