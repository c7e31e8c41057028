//! Compiled query representation
//!
//! A `Query` is an ordered list of typed clauses, exactly as they appeared in
//! the source text. `Query::plan` turns it into a `QueryPlan`: a predicate
//! tree plus the ordering, paging and key-selection modifiers, validating
//! clause combinations on the way.

use std::collections::BTreeSet;
use std::fmt;

use replikv_core::{Result, Status};
use serde::{Deserialize, Serialize};

use crate::keyword::FieldType;

/// Typed literal carried by a predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// `INTEGER`
    Integer(i32),
    /// `LONG`
    Long(i64),
    /// `DOUBLE`
    Double(f64),
    /// `BOOL`
    Bool(bool),
    /// `STRING`
    String(String),
}

impl FieldValue {
    /// Type tag of this literal
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Integer(_) => FieldType::Integer,
            FieldValue::Long(_) => FieldType::Long,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::String(_) => FieldType::String,
        }
    }

    /// Numeric view used for cross-width comparisons
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(f64::from(*v)),
            FieldValue::Long(v) => Some(*v as f64),
            FieldValue::Double(v) => Some(*v),
            FieldValue::Bool(_) | FieldValue::String(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Long(v) => write!(f, "{}", v),
            FieldValue::Double(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Long(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

/// Comparison operator of a typed predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `>`
    Greater,
    /// `<`
    Less,
    /// `>=`
    GreaterOrEqual,
    /// `<=`
    LessOrEqual,
}

impl CompareOp {
    /// Whether this operator orders values rather than testing equality
    pub fn is_ordering(self) -> bool {
        !matches!(self, CompareOp::Equal | CompareOp::NotEqual)
    }
}

/// One clause of a compiled query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    /// Typed comparison against a field
    Compare {
        /// Operator
        op: CompareOp,
        /// Field path
        field: String,
        /// Literal
        value: FieldValue,
    },
    /// Field value is one of `values`
    In {
        /// Field path
        field: String,
        /// Candidate literals
        values: Vec<FieldValue>,
    },
    /// Field value is none of `values`
    NotIn {
        /// Field path
        field: String,
        /// Excluded literals
        values: Vec<FieldValue>,
    },
    /// Field string matches an SQL-style pattern
    Like {
        /// Field path
        field: String,
        /// Pattern using `%` and `_`
        pattern: String,
    },
    /// Field string does not match an SQL-style pattern
    NotLike {
        /// Field path
        field: String,
        /// Pattern using `%` and `_`
        pattern: String,
    },
    /// Field is missing or null
    IsNull {
        /// Field path
        field: String,
    },
    /// Field is present and not null
    IsNotNull {
        /// Field path
        field: String,
    },
    /// Conjunction of the neighbouring predicates
    And,
    /// Disjunction of the neighbouring predicates
    Or,
    /// Opens a parenthesized group
    BeginGroup,
    /// Closes a parenthesized group
    EndGroup,
    /// Order results by a field
    OrderBy {
        /// Field path
        field: String,
        /// Ascending when true
        ascending: bool,
    },
    /// Order results by last write time
    OrderByWriteTime {
        /// Ascending when true
        ascending: bool,
    },
    /// Page the results
    Limit {
        /// Maximum number of results
        number: usize,
        /// Number of results skipped first
        offset: usize,
    },
    /// Restrict to keys starting with these bytes
    KeyPrefix(Vec<u8>),
    /// Restrict to exactly these keys
    InKeys(BTreeSet<Vec<u8>>),
    /// Resolved device id the query is scoped to
    DeviceId(String),
    /// Index hint for the persistence engine
    SuggestIndex(String),
}

impl Clause {
    fn is_predicate(&self) -> bool {
        matches!(
            self,
            Clause::Compare { .. }
                | Clause::In { .. }
                | Clause::NotIn { .. }
                | Clause::Like { .. }
                | Clause::NotLike { .. }
                | Clause::IsNull { .. }
                | Clause::IsNotNull { .. }
        )
    }

    fn is_filter_structure(&self) -> bool {
        self.is_predicate()
            || matches!(
                self,
                Clause::And | Clause::Or | Clause::BeginGroup | Clause::EndGroup
            )
    }
}

/// An ordered sequence of clauses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    clauses: Vec<Clause>,
}

impl Query {
    /// The query that selects every entry
    pub fn select_all() -> Self {
        Self::default()
    }

    /// Append a clause
    pub fn push(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    /// Clauses in source order
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Whether the query has no clauses at all
    pub fn is_select_all(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Resolved device id, if the query carries one
    pub fn device_id(&self) -> Option<&str> {
        self.clauses.iter().find_map(|c| match c {
            Clause::DeviceId(id) => Some(id.as_str()),
            _ => None,
        })
    }

    /// Validate clause combinations and build an evaluation plan
    ///
    /// # Errors
    ///
    /// - `NotSupport` when `OrderByWriteTime` is combined with anything other
    ///   than key selection and `Limit`
    /// - `InvalidArgument` for unbalanced groups, dangling connectors,
    ///   adjacent predicates with no connector, or a modifier given twice
    pub fn plan(&self) -> Result<QueryPlan> {
        let mut plan = QueryPlan::default();
        let mut filter_clauses = Vec::new();

        for clause in &self.clauses {
            match clause {
                c if c.is_filter_structure() => filter_clauses.push(c),
                Clause::OrderBy { field, ascending } => {
                    plan.order_by.push((field.clone(), *ascending));
                }
                Clause::OrderByWriteTime { ascending } => {
                    if plan.order_by_write_time.is_some() {
                        return Err(Status::invalid_argument(
                            "write-time ordering given more than once",
                        ));
                    }
                    plan.order_by_write_time = Some(*ascending);
                }
                Clause::Limit { number, offset } => {
                    if plan.limit.is_some() {
                        return Err(Status::invalid_argument("limit given more than once"));
                    }
                    plan.limit = Some((*number, *offset));
                }
                Clause::KeyPrefix(prefix) => {
                    if plan.key_prefix.is_some() {
                        return Err(Status::invalid_argument("key prefix given more than once"));
                    }
                    plan.key_prefix = Some(prefix.clone());
                }
                Clause::InKeys(keys) => {
                    if plan.in_keys.is_some() {
                        return Err(Status::invalid_argument("key list given more than once"));
                    }
                    plan.in_keys = Some(keys.clone());
                }
                Clause::SuggestIndex(index) => plan.suggest_index = Some(index.clone()),
                _ => {}
            }
        }

        if plan.order_by_write_time.is_some()
            && (!filter_clauses.is_empty()
                || !plan.order_by.is_empty()
                || plan.suggest_index.is_some())
        {
            return Err(Status::not_support(
                "write-time ordering only combines with key selection and limit",
            ));
        }

        plan.filter = FilterParser::new(&filter_clauses).parse()?;
        Ok(plan)
    }
}

/// Predicate tree built from the filter clauses of a query
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// A single predicate clause
    Leaf(Clause),
    /// Every child must hold
    And(Vec<Filter>),
    /// At least one child must hold
    Or(Vec<Filter>),
}

/// Evaluation plan derived from a `Query`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    /// Predicate tree; `None` selects everything
    pub filter: Option<Filter>,
    /// Field orderings, most significant first
    pub order_by: Vec<(String, bool)>,
    /// Write-time ordering, ascending when `Some(true)`
    pub order_by_write_time: Option<bool>,
    /// `(number, offset)` paging
    pub limit: Option<(usize, usize)>,
    /// Required key prefix
    pub key_prefix: Option<Vec<u8>>,
    /// Exact key set
    pub in_keys: Option<BTreeSet<Vec<u8>>>,
    /// Index hint, informational only
    pub suggest_index: Option<String>,
}

impl QueryPlan {
    /// Whether a stored key passes the key-selection modifiers
    pub fn selects_key(&self, key: &[u8]) -> bool {
        if let Some(prefix) = &self.key_prefix {
            if !key.starts_with(prefix) {
                return false;
            }
        }
        if let Some(keys) = &self.in_keys {
            if !keys.contains(key) {
                return false;
            }
        }
        true
    }
}

// expr   := term (OR term)*
// term   := factor (AND factor)*
// factor := predicate | BEGIN_GROUP expr END_GROUP
struct FilterParser<'a> {
    clauses: &'a [&'a Clause],
    pos: usize,
}

impl<'a> FilterParser<'a> {
    fn new(clauses: &'a [&'a Clause]) -> Self {
        Self { clauses, pos: 0 }
    }

    fn parse(mut self) -> Result<Option<Filter>> {
        if self.clauses.is_empty() {
            return Ok(None);
        }
        let filter = self.expr()?;
        match self.clauses.get(self.pos) {
            None => Ok(Some(filter)),
            Some(Clause::EndGroup) => Err(Status::invalid_argument("unbalanced end group")),
            Some(_) => Err(Status::invalid_argument(
                "predicates must be joined by and/or",
            )),
        }
    }

    fn peek(&self) -> Option<&'a Clause> {
        self.clauses.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<Filter> {
        let mut terms = vec![self.term()?];
        while let Some(Clause::Or) = self.peek() {
            self.pos += 1;
            terms.push(self.term()?);
        }
        Ok(collapse(terms, Filter::Or))
    }

    fn term(&mut self) -> Result<Filter> {
        let mut factors = vec![self.factor()?];
        while let Some(Clause::And) = self.peek() {
            self.pos += 1;
            factors.push(self.factor()?);
        }
        Ok(collapse(factors, Filter::And))
    }

    fn factor(&mut self) -> Result<Filter> {
        match self.peek() {
            Some(Clause::BeginGroup) => {
                self.pos += 1;
                let inner = self.expr()?;
                match self.peek() {
                    Some(Clause::EndGroup) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(Status::invalid_argument("unbalanced begin group")),
                }
            }
            Some(c) if c.is_predicate() => {
                self.pos += 1;
                Ok(Filter::Leaf(c.clone()))
            }
            Some(_) => Err(Status::invalid_argument("expected a predicate")),
            None => Err(Status::invalid_argument("query ends with a connector")),
        }
    }
}

fn collapse(mut items: Vec<Filter>, join: fn(Vec<Filter>) -> Filter) -> Filter {
    if items.len() == 1 {
        items.remove(0)
    } else {
        join(items)
    }
}
