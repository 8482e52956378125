use uuid::Uuid;

use crate::{InsertResult, NO_PARENT};

/// A value bound to an insert statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL `NULL`, typed as a 64-bit integer (foreign key columns).
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Uuid(Uuid),
}

impl Value {
    /// Binds a parent id, mapping [`NO_PARENT`] to `NULL`.
    pub fn foreign_key(parent_id: i64) -> Self {
        if parent_id == NO_PARENT {
            Value::Null
        } else {
            Value::Int(parent_id)
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

/// A bound insert statement for one row.
///
/// Placeholders in `sql` are positional (`$1`, `$2`, ...) and are filled from
/// `params` in order. When a key column is set the backend is asked to report
/// the generated value of that column.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    sql: String,
    params: Vec<Value>,
    key_column: Option<String>,
}

impl InsertStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            key_column: None,
        }
    }

    /// Appends the next positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Requests generated-key reporting for `column`.
    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.key_column = Some(column.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn key_column(&self) -> Option<&str> {
        self.key_column.as_deref()
    }
}

/// Builds the insert statement for an entity type.
///
/// Implementations map the entity's fields to columns and bind `parent_id` as
/// the foreign key. An entity without a mapping should fail with
/// [`InsertError::Statement`](crate::InsertError::Statement).
pub trait StatementBuilder<E>: Send + Sync {
    fn build(&self, entity: &E, parent_id: i64) -> InsertResult<InsertStatement>;
}

impl<E, F> StatementBuilder<E> for F
where
    F: Fn(&E, i64) -> InsertResult<InsertStatement> + Send + Sync,
{
    fn build(&self, entity: &E, parent_id: i64) -> InsertResult<InsertStatement> {
        self(entity, parent_id)
    }
}
