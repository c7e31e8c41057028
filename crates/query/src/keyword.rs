//! Query sublanguage vocabulary
//!
//! Every reserved word starts with `^`. Literal values never contain a bare
//! `^` once escaped, so a token that starts with it is always a keyword or a
//! marker.

use serde::{Deserialize, Serialize};

/// `^EQUAL`
pub const EQUAL_TO: &str = "^EQUAL";
/// `^NOT_EQUAL`
pub const NOT_EQUAL_TO: &str = "^NOT_EQUAL";
/// `^GREATER`
pub const GREATER_THAN: &str = "^GREATER";
/// `^LESS`
pub const LESS_THAN: &str = "^LESS";
/// `^GREATER_EQUAL`
pub const GREATER_THAN_OR_EQUAL_TO: &str = "^GREATER_EQUAL";
/// `^LESS_EQUAL`
pub const LESS_THAN_OR_EQUAL_TO: &str = "^LESS_EQUAL";
/// `^IS_NULL`
pub const IS_NULL: &str = "^IS_NULL";
/// `^IS_NOT_NULL`
pub const IS_NOT_NULL: &str = "^IS_NOT_NULL";
/// `^IN`
pub const IN: &str = "^IN";
/// `^NOT_IN`
pub const NOT_IN: &str = "^NOT_IN";
/// `^LIKE`
pub const LIKE: &str = "^LIKE";
/// `^NOT_LIKE`
pub const NOT_LIKE: &str = "^NOT_LIKE";
/// `^AND`
pub const AND: &str = "^AND";
/// `^OR`
pub const OR: &str = "^OR";
/// `^ASC`
pub const ORDER_BY_ASC: &str = "^ASC";
/// `^DESC`
pub const ORDER_BY_DESC: &str = "^DESC";
/// `^OrderByWriteTime`
pub const ORDER_BY_WRITE_TIME: &str = "^OrderByWriteTime";
/// `^IS_ASC`
pub const IS_ASC: &str = "^IS_ASC";
/// `^IS_DESC`
pub const IS_DESC: &str = "^IS_DESC";
/// `^LIMIT`
pub const LIMIT: &str = "^LIMIT";
/// `^BEGIN_GROUP`
pub const BEGIN_GROUP: &str = "^BEGIN_GROUP";
/// `^END_GROUP`
pub const END_GROUP: &str = "^END_GROUP";
/// `^KEY_PREFIX`
pub const KEY_PREFIX: &str = "^KEY_PREFIX";
/// `^DEVICE_ID`
pub const DEVICE_ID: &str = "^DEVICE_ID";
/// `^SUGGEST_INDEX`
pub const SUGGEST_INDEX: &str = "^SUGGEST_INDEX";
/// `^IN_KEYS`
pub const IN_KEYS: &str = "^IN_KEYS";

/// Opens a value list
pub const START: &str = "^START";
/// Closes a value list
pub const END: &str = "^END";

/// Literal for the empty string
pub const EMPTY_STRING: &str = "^EMPTY_STRING";
/// Reserved character
pub const SPECIAL: &str = "^";
/// Escape for the reserved character
pub const SPECIAL_ESCAPE: &str = "(^)";
/// Token separator
pub const SPACE: &str = " ";
/// Escape for a literal space
pub const SPACE_ESCAPE: &str = "^^";

/// Boolean true literal
pub const VALUE_TRUE: &str = "true";
/// Boolean false literal
pub const VALUE_FALSE: &str = "false";

/// Clause kinds a keyword can introduce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseKind {
    /// `^EQUAL type field value`
    EqualTo,
    /// `^NOT_EQUAL type field value`
    NotEqualTo,
    /// `^GREATER type field value`
    GreaterThan,
    /// `^LESS type field value`
    LessThan,
    /// `^GREATER_EQUAL type field value`
    GreaterThanOrEqualTo,
    /// `^LESS_EQUAL type field value`
    LessThanOrEqualTo,
    /// `^IS_NULL field`
    IsNull,
    /// `^IS_NOT_NULL field`
    IsNotNull,
    /// `^IN type field ^START values ^END`
    In,
    /// `^NOT_IN type field ^START values ^END`
    NotIn,
    /// `^LIKE field pattern`
    Like,
    /// `^NOT_LIKE field pattern`
    NotLike,
    /// `^AND`
    And,
    /// `^OR`
    Or,
    /// `^ASC field`
    OrderByAsc,
    /// `^DESC field`
    OrderByDesc,
    /// `^OrderByWriteTime ^IS_ASC|^IS_DESC`
    OrderByWriteTime,
    /// `^LIMIT number offset`
    Limit,
    /// `^BEGIN_GROUP`
    BeginGroup,
    /// `^END_GROUP`
    EndGroup,
    /// `^KEY_PREFIX prefix`
    KeyPrefix,
    /// `^IN_KEYS ^START keys ^END`
    InKeys,
    /// `^SUGGEST_INDEX index`
    SuggestIndex,
    /// `^DEVICE_ID network_id`
    DeviceId,
}

impl ClauseKind {
    /// Map a token to the clause it introduces
    pub fn from_keyword(token: &str) -> Option<Self> {
        let kind = match token {
            EQUAL_TO => ClauseKind::EqualTo,
            NOT_EQUAL_TO => ClauseKind::NotEqualTo,
            GREATER_THAN => ClauseKind::GreaterThan,
            LESS_THAN => ClauseKind::LessThan,
            GREATER_THAN_OR_EQUAL_TO => ClauseKind::GreaterThanOrEqualTo,
            LESS_THAN_OR_EQUAL_TO => ClauseKind::LessThanOrEqualTo,
            IS_NULL => ClauseKind::IsNull,
            IS_NOT_NULL => ClauseKind::IsNotNull,
            IN => ClauseKind::In,
            NOT_IN => ClauseKind::NotIn,
            LIKE => ClauseKind::Like,
            NOT_LIKE => ClauseKind::NotLike,
            AND => ClauseKind::And,
            OR => ClauseKind::Or,
            ORDER_BY_ASC => ClauseKind::OrderByAsc,
            ORDER_BY_DESC => ClauseKind::OrderByDesc,
            ORDER_BY_WRITE_TIME => ClauseKind::OrderByWriteTime,
            LIMIT => ClauseKind::Limit,
            BEGIN_GROUP => ClauseKind::BeginGroup,
            END_GROUP => ClauseKind::EndGroup,
            KEY_PREFIX => ClauseKind::KeyPrefix,
            IN_KEYS => ClauseKind::InKeys,
            SUGGEST_INDEX => ClauseKind::SuggestIndex,
            DEVICE_ID => ClauseKind::DeviceId,
            _ => return None,
        };
        Some(kind)
    }

    /// The keyword that introduces this clause
    pub fn keyword(self) -> &'static str {
        match self {
            ClauseKind::EqualTo => EQUAL_TO,
            ClauseKind::NotEqualTo => NOT_EQUAL_TO,
            ClauseKind::GreaterThan => GREATER_THAN,
            ClauseKind::LessThan => LESS_THAN,
            ClauseKind::GreaterThanOrEqualTo => GREATER_THAN_OR_EQUAL_TO,
            ClauseKind::LessThanOrEqualTo => LESS_THAN_OR_EQUAL_TO,
            ClauseKind::IsNull => IS_NULL,
            ClauseKind::IsNotNull => IS_NOT_NULL,
            ClauseKind::In => IN,
            ClauseKind::NotIn => NOT_IN,
            ClauseKind::Like => LIKE,
            ClauseKind::NotLike => NOT_LIKE,
            ClauseKind::And => AND,
            ClauseKind::Or => OR,
            ClauseKind::OrderByAsc => ORDER_BY_ASC,
            ClauseKind::OrderByDesc => ORDER_BY_DESC,
            ClauseKind::OrderByWriteTime => ORDER_BY_WRITE_TIME,
            ClauseKind::Limit => LIMIT,
            ClauseKind::BeginGroup => BEGIN_GROUP,
            ClauseKind::EndGroup => END_GROUP,
            ClauseKind::KeyPrefix => KEY_PREFIX,
            ClauseKind::InKeys => IN_KEYS,
            ClauseKind::SuggestIndex => SUGGEST_INDEX,
            ClauseKind::DeviceId => DEVICE_ID,
        }
    }
}

/// Literal type tag of a typed predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// 32-bit signed integer
    Integer,
    /// 64-bit signed integer
    Long,
    /// 64-bit float
    Double,
    /// `true` or `false`
    Bool,
    /// Escaped string
    String,
}

impl FieldType {
    /// Parse a type tag token
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "INTEGER" => Some(FieldType::Integer),
            "LONG" => Some(FieldType::Long),
            "DOUBLE" => Some(FieldType::Double),
            "BOOL" => Some(FieldType::Bool),
            "STRING" => Some(FieldType::String),
            _ => None,
        }
    }

    /// Type tag as written in query text
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Integer => "INTEGER",
            FieldType::Long => "LONG",
            FieldType::Double => "DOUBLE",
            FieldType::Bool => "BOOL",
            FieldType::String => "STRING",
        }
    }
}
