//! Client-side query builder
//!
//! `DataQuery` renders the query sublanguage that `QueryCompiler` parses.
//! Field names must be non-empty and must not contain `^`; a call with an
//! invalid argument is dropped and remembered, and `to_query_string` then
//! reports it.
//!
//! # Example
//!
//! ```
//! use replikv_query::DataQuery;
//!
//! let mut q = DataQuery::new();
//! q.equal_to("name", "bob").and().greater_than("age", 18).limit(10, 0);
//! assert_eq!(
//!     q.to_query_string().unwrap(),
//!     " ^EQUAL STRING name bob ^AND ^GREATER INTEGER age 18 ^LIMIT 10 0"
//! );
//! ```

use replikv_core::limits::MAX_QUERY_BYTES;
use replikv_core::{Result, Status};
use tracing::warn;

use crate::keyword::{self, FieldType};
use crate::query::FieldValue;
use crate::tokenizer::escape;

/// Rust types usable as typed query literals
pub trait QueryLiteral {
    /// Type tag written before the field name
    const FIELD_TYPE: FieldType;

    /// Convert into a typed literal
    fn into_field_value(self) -> FieldValue;
}

macro_rules! impl_query_literal {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl QueryLiteral for $ty {
                const FIELD_TYPE: FieldType = FieldType::$tag;

                fn into_field_value(self) -> FieldValue {
                    FieldValue::from(self)
                }
            }
        )*
    };
}

impl_query_literal! {
    i32 => Integer,
    i64 => Long,
    f64 => Double,
    bool => Bool,
    String => String,
    &str => String,
}

/// Builder for query strings
#[derive(Debug, Clone, Default)]
pub struct DataQuery {
    text: String,
    device_id: Option<String>,
    has_keys: bool,
    error: Option<String>,
}

impl DataQuery {
    /// Empty query, selecting every entry
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every clause added so far
    pub fn reset(&mut self) -> &mut Self {
        *self = Self::default();
        self
    }

    /// `field == value`
    pub fn equal_to<T: QueryLiteral>(&mut self, field: &str, value: T) -> &mut Self {
        self.typed(keyword::EQUAL_TO, field, value, true)
    }

    /// `field != value`
    pub fn not_equal_to<T: QueryLiteral>(&mut self, field: &str, value: T) -> &mut Self {
        self.typed(keyword::NOT_EQUAL_TO, field, value, true)
    }

    /// `field > value`; booleans are rejected
    pub fn greater_than<T: QueryLiteral>(&mut self, field: &str, value: T) -> &mut Self {
        self.typed(keyword::GREATER_THAN, field, value, false)
    }

    /// `field < value`; booleans are rejected
    pub fn less_than<T: QueryLiteral>(&mut self, field: &str, value: T) -> &mut Self {
        self.typed(keyword::LESS_THAN, field, value, false)
    }

    /// `field >= value`; booleans are rejected
    pub fn greater_than_or_equal_to<T: QueryLiteral>(
        &mut self,
        field: &str,
        value: T,
    ) -> &mut Self {
        self.typed(keyword::GREATER_THAN_OR_EQUAL_TO, field, value, false)
    }

    /// `field <= value`; booleans are rejected
    pub fn less_than_or_equal_to<T: QueryLiteral>(&mut self, field: &str, value: T) -> &mut Self {
        self.typed(keyword::LESS_THAN_OR_EQUAL_TO, field, value, false)
    }

    /// Field is missing or null
    pub fn is_null(&mut self, field: &str) -> &mut Self {
        if self.check_field(keyword::IS_NULL, field) {
            self.append(&[keyword::IS_NULL, &escape(field)]);
        }
        self
    }

    /// Field is present and not null
    pub fn is_not_null(&mut self, field: &str) -> &mut Self {
        if self.check_field(keyword::IS_NOT_NULL, field) {
            self.append(&[keyword::IS_NOT_NULL, &escape(field)]);
        }
        self
    }

    /// Field equals one of `values`
    pub fn in_values<T, I>(&mut self, field: &str, values: I) -> &mut Self
    where
        T: QueryLiteral,
        I: IntoIterator<Item = T>,
    {
        self.list(keyword::IN, field, values)
    }

    /// Field equals none of `values`
    pub fn not_in_values<T, I>(&mut self, field: &str, values: I) -> &mut Self
    where
        T: QueryLiteral,
        I: IntoIterator<Item = T>,
    {
        self.list(keyword::NOT_IN, field, values)
    }

    /// Field matches an SQL-style pattern
    pub fn like(&mut self, field: &str, pattern: &str) -> &mut Self {
        if self.check_field(keyword::LIKE, field) {
            self.append(&[keyword::LIKE, &escape(field), &escape(pattern)]);
        }
        self
    }

    /// Field does not match an SQL-style pattern
    pub fn not_like(&mut self, field: &str, pattern: &str) -> &mut Self {
        if self.check_field(keyword::NOT_LIKE, field) {
            self.append(&[keyword::NOT_LIKE, &escape(field), &escape(pattern)]);
        }
        self
    }

    /// Conjunction
    pub fn and(&mut self) -> &mut Self {
        self.append(&[keyword::AND]);
        self
    }

    /// Disjunction
    pub fn or(&mut self) -> &mut Self {
        self.append(&[keyword::OR]);
        self
    }

    /// Open a group
    pub fn begin_group(&mut self) -> &mut Self {
        self.append(&[keyword::BEGIN_GROUP]);
        self
    }

    /// Close a group
    pub fn end_group(&mut self) -> &mut Self {
        self.append(&[keyword::END_GROUP]);
        self
    }

    /// Ascending order by field
    pub fn order_by_asc(&mut self, field: &str) -> &mut Self {
        if self.check_field(keyword::ORDER_BY_ASC, field) {
            self.append(&[keyword::ORDER_BY_ASC, &escape(field)]);
        }
        self
    }

    /// Descending order by field
    pub fn order_by_desc(&mut self, field: &str) -> &mut Self {
        if self.check_field(keyword::ORDER_BY_DESC, field) {
            self.append(&[keyword::ORDER_BY_DESC, &escape(field)]);
        }
        self
    }

    /// Order by last write time
    pub fn order_by_write_time(&mut self, ascending: bool) -> &mut Self {
        let direction = if ascending {
            keyword::IS_ASC
        } else {
            keyword::IS_DESC
        };
        self.append(&[keyword::ORDER_BY_WRITE_TIME, direction]);
        self
    }

    /// Return at most `number` results after skipping `offset`
    pub fn limit(&mut self, number: usize, offset: usize) -> &mut Self {
        self.append(&[keyword::LIMIT, &number.to_string(), &offset.to_string()]);
        self
    }

    /// Restrict to keys starting with `prefix`
    pub fn key_prefix(&mut self, prefix: &str) -> &mut Self {
        if self.check_field(keyword::KEY_PREFIX, prefix) {
            self.append(&[keyword::KEY_PREFIX, &escape(prefix)]);
        }
        self
    }

    /// Scope the query to one device, identified by network id
    ///
    /// The clause is always rendered first, wherever it is added.
    pub fn device_id(&mut self, network_id: &str) -> &mut Self {
        if self.check_field(keyword::DEVICE_ID, network_id) {
            self.device_id = Some(network_id.to_string());
        }
        self
    }

    /// Index hint for the persistence engine
    pub fn set_suggest_index(&mut self, index: &str) -> &mut Self {
        if self.check_field(keyword::SUGGEST_INDEX, index) {
            self.append(&[keyword::SUGGEST_INDEX, &escape(index)]);
        }
        self
    }

    /// Restrict to exactly these keys; may be given once
    pub fn in_keys<S: AsRef<str>>(&mut self, keys: &[S]) -> &mut Self {
        if keys.is_empty() {
            self.reject(keyword::IN_KEYS, "key list is empty");
            return self;
        }
        if self.has_keys {
            self.reject(keyword::IN_KEYS, "key list given more than once");
            return self;
        }
        let mut tokens = vec![keyword::IN_KEYS.to_string(), keyword::START.to_string()];
        for key in keys {
            let key = key.as_ref();
            if !self.check_field(keyword::IN_KEYS, key) {
                return self;
            }
            tokens.push(escape(key));
        }
        tokens.push(keyword::END.to_string());
        let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        self.append(&refs);
        self.has_keys = true;
        self
    }

    /// Render the query text
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if any builder call was rejected or the
    /// rendered text exceeds the query length limit.
    pub fn to_query_string(&self) -> Result<String> {
        if let Some(reason) = &self.error {
            return Err(Status::invalid_argument(reason.clone()));
        }
        let mut out = String::new();
        if let Some(device) = &self.device_id {
            out.push_str(keyword::SPACE);
            out.push_str(keyword::DEVICE_ID);
            out.push_str(keyword::SPACE);
            out.push_str(&escape(device));
        }
        out.push_str(&self.text);
        if out.len() > MAX_QUERY_BYTES {
            return Err(Status::invalid_argument(format!(
                "query too long: {} bytes exceeds maximum {}",
                out.len(),
                MAX_QUERY_BYTES
            )));
        }
        Ok(out)
    }

    fn typed<T: QueryLiteral>(
        &mut self,
        kw: &'static str,
        field: &str,
        value: T,
        allow_bool: bool,
    ) -> &mut Self {
        if !self.check_field(kw, field) {
            return self;
        }
        if !allow_bool && T::FIELD_TYPE == FieldType::Bool {
            self.reject(kw, "boolean values cannot be ordered");
            return self;
        }
        let literal = render(value.into_field_value());
        self.append(&[kw, T::FIELD_TYPE.as_str(), &escape(field), &literal]);
        self
    }

    fn list<T, I>(&mut self, kw: &'static str, field: &str, values: I) -> &mut Self
    where
        T: QueryLiteral,
        I: IntoIterator<Item = T>,
    {
        if !self.check_field(kw, field) {
            return self;
        }
        if T::FIELD_TYPE == FieldType::Bool {
            self.reject(kw, "boolean value lists are not supported");
            return self;
        }
        let mut tokens = vec![
            kw.to_string(),
            T::FIELD_TYPE.as_str().to_string(),
            escape(field),
            keyword::START.to_string(),
        ];
        tokens.extend(values.into_iter().map(|v| render(v.into_field_value())));
        tokens.push(keyword::END.to_string());
        let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        self.append(&refs);
        self
    }

    fn append(&mut self, tokens: &[&str]) {
        for token in tokens {
            self.text.push_str(keyword::SPACE);
            self.text.push_str(token);
        }
    }

    fn check_field(&mut self, kw: &'static str, field: &str) -> bool {
        if field.is_empty() || field.contains(keyword::SPECIAL) {
            self.reject(kw, "argument is empty or contains '^'");
            return false;
        }
        true
    }

    fn reject(&mut self, kw: &'static str, reason: &str) {
        warn!(keyword = kw, reason, "query builder argument rejected");
        if self.error.is_none() {
            self.error = Some(format!("{}: {}", kw, reason));
        }
    }
}

fn render(value: FieldValue) -> String {
    match value {
        FieldValue::String(s) => escape(&s),
        other => other.to_string(),
    }
}
