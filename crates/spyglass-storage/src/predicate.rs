// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query predicates.
//!
//! A [`Predicate`] is compiled to a SQL `WHERE` clause for stored records
//! and evaluated directly against records carried by change events. Both
//! paths give the same answer: every leaf compiles to an expression that is
//! never NULL (`IS`, or `COALESCE(.., 0)`), so `NOT` behaves the same way
//! in SQL as it does in memory.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, Row};
use spyglass_core::types::{MessageRecord, TaskRecord};
use spyglass_core::{Level, SessionId, SpyglassError, TaskState, TaskType};

use crate::codec::format_date;
use crate::queries::{messages, tasks};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Registers `regexp(pattern, text)` so `text REGEXP pattern` works.
/// Non-text operands never match.
pub(crate) fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let regex: Arc<Regex> = ctx.get_or_create_aux(0, |vr| -> Result<_, BoxError> {
                Ok(Regex::new(vr.as_str()?)?)
            })?;
            let is_match = match ctx.get_raw(1) {
                ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                    .map(|text| regex.is_match(text))
                    .unwrap_or(false),
                _ => false,
            };
            Ok(is_match)
        },
    )
}

/// The storage class a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Real,
    Text,
    Bool,
    Date,
}

/// A value a predicate compares a field against.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    Date(DateTime<Utc>),
}

impl Value {
    fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Int(_) => Some(ValueKind::Int),
            Value::Real(_) => Some(ValueKind::Real),
            Value::Text(_) => Some(ValueKind::Text),
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Date(_) => Some(ValueKind::Date),
        }
    }

    /// The value as the database stores it.
    fn to_sql_value(&self) -> SqlValue {
        match self {
            Value::Null => SqlValue::Null,
            Value::Int(v) => SqlValue::Integer(*v),
            Value::Real(v) => SqlValue::Real(*v),
            Value::Text(v) => SqlValue::Text(v.clone()),
            Value::Bool(v) => SqlValue::Integer(i64::from(*v)),
            Value::Date(v) => SqlValue::Text(format_date(v)),
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
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
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

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl From<Level> for Value {
    fn from(v: Level) -> Self {
        Value::Int(v.rank())
    }
}

impl From<TaskState> for Value {
    fn from(v: TaskState) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<TaskType> for Value {
    fn from(v: TaskType) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<SessionId> for Value {
    fn from(v: SessionId) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// SQLite's cross-type order: NULL, then numbers, then text, then blobs.
fn compare(a: &SqlValue, b: &SqlValue) -> Ordering {
    fn class(v: &SqlValue) -> u8 {
        match v {
            SqlValue::Null => 0,
            SqlValue::Integer(_) | SqlValue::Real(_) => 1,
            SqlValue::Text(_) => 2,
            SqlValue::Blob(_) => 3,
        }
    }
    match (a, b) {
        (SqlValue::Integer(x), SqlValue::Integer(y)) => x.cmp(y),
        (SqlValue::Integer(x), SqlValue::Real(y)) => (*x as f64).total_cmp(y),
        (SqlValue::Real(x), SqlValue::Integer(y)) => x.total_cmp(&(*y as f64)),
        (SqlValue::Real(x), SqlValue::Real(y)) => x.total_cmp(y),
        (SqlValue::Text(x), SqlValue::Text(y)) => x.as_bytes().cmp(y.as_bytes()),
        (SqlValue::Blob(x), SqlValue::Blob(y)) => x.cmp(y),
        _ => class(a).cmp(&class(b)),
    }
}

/// `a IS b`: equality where NULL equals NULL.
fn is_same(a: &SqlValue, b: &SqlValue) -> bool {
    match (a, b) {
        (SqlValue::Null, SqlValue::Null) => true,
        (SqlValue::Null, _) | (_, SqlValue::Null) => false,
        _ => compare(a, b) == Ordering::Equal,
    }
}

/// A queryable column of an entity.
pub trait Field: Copy + fmt::Debug + PartialEq + Send + Sync + 'static {
    fn column(self) -> &'static str;
    fn kind(self) -> ValueKind;
}

/// A stored record type that queries and subscriptions can filter.
pub trait Entity: Clone + Send + Sync + 'static {
    type Field: Field;

    const TABLE: &'static str;
    const COLUMNS: &'static str;
    /// Column appended to every ordering so pages are stable.
    const TIEBREAK: &'static str;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// The field's value in the same representation the database holds.
    fn value(&self, field: Self::Field) -> Value;
}

/// A compiled regular expression that compares by its source.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, SpyglassError> {
        Regex::new(pattern)
            .map(Pattern)
            .map_err(|e| SpyglassError::InvalidPredicate(format!("pattern `{pattern}`: {e}")))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// A boolean filter over the fields of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate<F> {
    True,
    Eq(F, Value),
    Ne(F, Value),
    Range {
        field: F,
        lower: Bound<Value>,
        upper: Bound<Value>,
    },
    In(F, Vec<Value>),
    /// Case-insensitive (ASCII) substring match.
    Contains(F, String),
    Matches(F, Pattern),
    And(Vec<Predicate<F>>),
    Or(Vec<Predicate<F>>),
    Not(Box<Predicate<F>>),
}

impl<F> Default for Predicate<F> {
    fn default() -> Self {
        Predicate::True
    }
}

impl<F: Field> Predicate<F> {
    pub fn eq(field: F, value: impl Into<Value>) -> Self {
        Predicate::Eq(field, value.into())
    }

    pub fn ne(field: F, value: impl Into<Value>) -> Self {
        Predicate::Ne(field, value.into())
    }

    pub fn gt(field: F, value: impl Into<Value>) -> Self {
        Self::range(field, Bound::Excluded(value.into()), Bound::Unbounded)
    }

    pub fn ge(field: F, value: impl Into<Value>) -> Self {
        Self::range(field, Bound::Included(value.into()), Bound::Unbounded)
    }

    pub fn lt(field: F, value: impl Into<Value>) -> Self {
        Self::range(field, Bound::Unbounded, Bound::Excluded(value.into()))
    }

    pub fn le(field: F, value: impl Into<Value>) -> Self {
        Self::range(field, Bound::Unbounded, Bound::Included(value.into()))
    }

    /// Inclusive on both ends.
    pub fn between(field: F, lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        Self::range(
            field,
            Bound::Included(lower.into()),
            Bound::Included(upper.into()),
        )
    }

    pub fn range(field: F, lower: Bound<Value>, upper: Bound<Value>) -> Self {
        Predicate::Range {
            field,
            lower,
            upper,
        }
    }

    pub fn is_in<V: Into<Value>>(field: F, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::In(field, values.into_iter().map(Into::into).collect())
    }

    pub fn contains(field: F, needle: impl Into<String>) -> Self {
        Predicate::Contains(field, needle.into())
    }

    pub fn matches(field: F, pattern: &str) -> Result<Self, SpyglassError> {
        Ok(Predicate::Matches(field, Pattern::new(pattern)?))
    }

    pub fn and(self, other: Predicate<F>) -> Self {
        match self {
            Predicate::True => other,
            Predicate::And(mut all) => {
                all.push(other);
                Predicate::And(all)
            }
            this => Predicate::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Predicate<F>) -> Self {
        match self {
            Predicate::Or(mut any) => {
                any.push(other);
                Predicate::Or(any)
            }
            this => Predicate::Or(vec![this, other]),
        }
    }

    /// Rejects values whose type does not fit the field.
    pub fn validate(&self) -> Result<(), SpyglassError> {
        match self {
            Predicate::True => Ok(()),
            Predicate::Eq(field, value) | Predicate::Ne(field, value) => check(*field, value, true),
            Predicate::Range {
                field,
                lower,
                upper,
            } => {
                for bound in [lower, upper] {
                    if let Bound::Included(v) | Bound::Excluded(v) = bound {
                        check(*field, v, false)?;
                    }
                }
                Ok(())
            }
            Predicate::In(field, values) => values.iter().try_for_each(|v| check(*field, v, true)),
            Predicate::Contains(field, _) | Predicate::Matches(field, _) => {
                if field.kind() == ValueKind::Text {
                    Ok(())
                } else {
                    Err(SpyglassError::InvalidPredicate(format!(
                        "{field:?} is not a text field"
                    )))
                }
            }
            Predicate::And(all) | Predicate::Or(all) => all.iter().try_for_each(Self::validate),
            Predicate::Not(inner) => inner.validate(),
        }
    }

    /// Appends the SQL form of the predicate to `sql`, pushing bound values
    /// onto `params`.
    pub(crate) fn write_sql(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        match self {
            Predicate::True => sql.push('1'),
            Predicate::Eq(field, value) => {
                sql.push_str(&format!("{} IS ?", field.column()));
                params.push(value.to_sql_value());
            }
            Predicate::Ne(field, value) => {
                sql.push_str(&format!("{} IS NOT ?", field.column()));
                params.push(value.to_sql_value());
            }
            Predicate::Range {
                field,
                lower,
                upper,
            } => {
                let column = field.column();
                let mut terms = Vec::new();
                for (bound, inclusive, exclusive) in [(lower, ">=", ">"), (upper, "<=", "<")] {
                    match bound {
                        Bound::Included(v) => {
                            terms.push(format!("{column} {inclusive} ?"));
                            params.push(v.to_sql_value());
                        }
                        Bound::Excluded(v) => {
                            terms.push(format!("{column} {exclusive} ?"));
                            params.push(v.to_sql_value());
                        }
                        Bound::Unbounded => {}
                    }
                }
                if terms.is_empty() {
                    sql.push_str(&format!("{column} IS NOT NULL"));
                } else {
                    sql.push_str(&format!("COALESCE({}, 0)", terms.join(" AND ")));
                }
            }
            Predicate::In(field, values) => {
                if values.is_empty() {
                    sql.push('0');
                    return;
                }
                let marks = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!("COALESCE({} IN ({marks}), 0)", field.column()));
                params.extend(values.iter().map(Value::to_sql_value));
            }
            Predicate::Contains(field, needle) => {
                sql.push_str(&format!(
                    "COALESCE({} LIKE ? ESCAPE '\\', 0)",
                    field.column()
                ));
                params.push(SqlValue::Text(format!("%{}%", escape_like(needle))));
            }
            Predicate::Matches(field, pattern) => {
                sql.push_str(&format!("COALESCE({} REGEXP ?, 0)", field.column()));
                params.push(SqlValue::Text(pattern.as_str().to_string()));
            }
            Predicate::And(all) | Predicate::Or(all) => {
                let (joiner, empty) = if matches!(self, Predicate::And(_)) {
                    (" AND ", '1')
                } else {
                    (" OR ", '0')
                };
                if all.is_empty() {
                    sql.push(empty);
                    return;
                }
                sql.push('(');
                for (i, p) in all.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(joiner);
                    }
                    p.write_sql(sql, params);
                }
                sql.push(')');
            }
            Predicate::Not(inner) => {
                sql.push_str("NOT (");
                inner.write_sql(sql, params);
                sql.push(')');
            }
        }
    }

    /// Evaluates the predicate against an in-memory record.
    pub fn evaluate<E: Entity<Field = F>>(&self, entity: &E) -> bool {
        let get = |field: F| entity.value(field).to_sql_value();
        match self {
            Predicate::True => true,
            Predicate::Eq(field, value) => is_same(&get(*field), &value.to_sql_value()),
            Predicate::Ne(field, value) => !is_same(&get(*field), &value.to_sql_value()),
            Predicate::Range {
                field,
                lower,
                upper,
            } => {
                let actual = get(*field);
                if actual == SqlValue::Null {
                    return false;
                }
                let above = match lower {
                    Bound::Included(v) => compare(&actual, &v.to_sql_value()) != Ordering::Less,
                    Bound::Excluded(v) => compare(&actual, &v.to_sql_value()) == Ordering::Greater,
                    Bound::Unbounded => true,
                };
                let below = match upper {
                    Bound::Included(v) => compare(&actual, &v.to_sql_value()) != Ordering::Greater,
                    Bound::Excluded(v) => compare(&actual, &v.to_sql_value()) == Ordering::Less,
                    Bound::Unbounded => true,
                };
                above && below
            }
            Predicate::In(field, values) => {
                let actual = get(*field);
                actual != SqlValue::Null
                    && values.iter().any(|v| {
                        let v = v.to_sql_value();
                        v != SqlValue::Null && is_same(&actual, &v)
                    })
            }
            Predicate::Contains(field, needle) => match get(*field) {
                SqlValue::Text(text) => text
                    .to_ascii_lowercase()
                    .contains(&needle.to_ascii_lowercase()),
                _ => false,
            },
            Predicate::Matches(field, pattern) => match get(*field) {
                SqlValue::Text(text) => pattern.0.is_match(&text),
                _ => false,
            },
            Predicate::And(all) => all.iter().all(|p| p.evaluate(entity)),
            Predicate::Or(any) => any.iter().any(|p| p.evaluate(entity)),
            Predicate::Not(inner) => !inner.evaluate(entity),
        }
    }
}

impl<F> std::ops::Not for Predicate<F> {
    type Output = Predicate<F>;

    fn not(self) -> Self::Output {
        match self {
            Predicate::Not(inner) => *inner,
            this => Predicate::Not(Box::new(this)),
        }
    }
}

fn check<F: Field>(field: F, value: &Value, allow_null: bool) -> Result<(), SpyglassError> {
    let ok = match (field.kind(), value.kind()) {
        (_, None) => allow_null,
        (ValueKind::Real, Some(ValueKind::Int)) => true,
        (ValueKind::Bool, Some(ValueKind::Int)) => true,
        (expected, Some(actual)) => expected == actual,
    };
    if ok {
        Ok(())
    } else {
        Err(SpyglassError::InvalidPredicate(format!(
            "{value:?} cannot be compared with {field:?} ({:?})",
            field.kind()
        )))
    }
}

/// Escapes `%`, `_` and the escape character itself for `LIKE .. ESCAPE '\'`.
fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Queryable message fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageField {
    Id,
    Level,
    Label,
    Text,
    Session,
    CreatedAt,
    Pinned,
    File,
    Function,
}

impl Field for MessageField {
    fn column(self) -> &'static str {
        match self {
            MessageField::Id => "id",
            MessageField::Level => "level",
            MessageField::Label => "label",
            MessageField::Text => "text",
            MessageField::Session => "session_id",
            MessageField::CreatedAt => "created_at",
            MessageField::Pinned => "pinned",
            MessageField::File => "file",
            MessageField::Function => "function",
        }
    }

    fn kind(self) -> ValueKind {
        match self {
            MessageField::Id | MessageField::Level => ValueKind::Int,
            MessageField::CreatedAt => ValueKind::Date,
            MessageField::Pinned => ValueKind::Bool,
            _ => ValueKind::Text,
        }
    }
}

impl Entity for MessageRecord {
    type Field = MessageField;

    const TABLE: &'static str = "messages";
    const COLUMNS: &'static str = messages::MESSAGE_COLUMNS;
    const TIEBREAK: &'static str = "id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        messages::message_from_row(row)
    }

    fn value(&self, field: MessageField) -> Value {
        match field {
            MessageField::Id => Value::Int(self.id.0),
            MessageField::Level => self.level.into(),
            MessageField::Label => self.label.clone().into(),
            MessageField::Text => self.text.clone().into(),
            MessageField::Session => self.session_id.into(),
            MessageField::CreatedAt => self.created_at.into(),
            MessageField::Pinned => self.pinned.into(),
            MessageField::File => self.provenance.file.clone().into(),
            MessageField::Function => self.provenance.function.clone().into(),
        }
    }
}

/// Queryable task fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskField {
    State,
    StatusCode,
    Host,
    Url,
    Method,
    TaskType,
    CreatedAt,
    Session,
    Pinned,
    Duration,
    ErrorCode,
    IsFromCache,
    Label,
}

impl Field for TaskField {
    fn column(self) -> &'static str {
        match self {
            TaskField::State => "state",
            TaskField::StatusCode => "status_code",
            TaskField::Host => "host",
            TaskField::Url => "url",
            TaskField::Method => "method",
            TaskField::TaskType => "task_type",
            TaskField::CreatedAt => "created_at",
            TaskField::Session => "session_id",
            TaskField::Pinned => "pinned",
            TaskField::Duration => "duration",
            TaskField::ErrorCode => "error_code",
            TaskField::IsFromCache => "is_from_cache",
            TaskField::Label => "label",
        }
    }

    fn kind(self) -> ValueKind {
        match self {
            TaskField::StatusCode | TaskField::ErrorCode => ValueKind::Int,
            TaskField::Duration => ValueKind::Real,
            TaskField::CreatedAt => ValueKind::Date,
            TaskField::Pinned | TaskField::IsFromCache => ValueKind::Bool,
            _ => ValueKind::Text,
        }
    }
}

impl Entity for TaskRecord {
    type Field = TaskField;

    const TABLE: &'static str = "tasks";
    const COLUMNS: &'static str = tasks::TASK_COLUMNS;
    const TIEBREAK: &'static str = "id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        tasks::task_from_row(row)
    }

    fn value(&self, field: TaskField) -> Value {
        match field {
            TaskField::State => self.state.into(),
            TaskField::StatusCode => self.status_code.into(),
            TaskField::Host => self.host.clone().into(),
            TaskField::Url => self.url.clone().into(),
            TaskField::Method => self.method.clone().into(),
            TaskField::TaskType => self.task_type.into(),
            TaskField::CreatedAt => self.created_at.into(),
            TaskField::Session => self.session_id.into(),
            TaskField::Pinned => self.pinned.into(),
            TaskField::Duration => self.duration.into(),
            TaskField::ErrorCode => self.error.as_ref().map(|e| e.code).into(),
            TaskField::IsFromCache => self.is_from_cache.into(),
            TaskField::Label => self.label.clone().into(),
        }
    }
}
