//! Query string compiler
//!
//! `QueryCompiler::compile` turns query text into a `Query`. It never panics
//! and never returns a partially built query: on any failure the outcome
//! carries `Query::select_all()` with `success = false`.
//!
//! All per-call state (whether the text names a key prefix, the resolved
//! device id) lives in a `CompileContext` created for that call, so one
//! compiler can be shared freely between threads.

use std::collections::BTreeSet;
use std::sync::Arc;

use replikv_core::{DeviceDirectory, Limits, Result, Status};
use thiserror::Error;
use tracing::{debug, warn};

use crate::keyword::{self, ClauseKind, FieldType};
use crate::query::{Clause, CompareOp, FieldValue, Query};
use crate::tokenizer::{tokenize, unescape, TokenCursor};

/// Reasons a query string fails to compile
///
/// Messages name the offending keyword, never the query text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    /// Query text longer than allowed
    #[error("query too long: {actual} bytes exceeds maximum {max}")]
    TooLong {
        /// Actual length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// More clauses than allowed
    #[error("query too complex: more than {max} clauses")]
    TooComplex {
        /// Maximum allowed clauses
        max: usize,
    },

    /// Token in keyword position is not a keyword
    #[error("unknown keyword at token {position}")]
    UnknownKeyword {
        /// Token index
        position: usize,
    },

    /// Fewer tokens left than the keyword needs
    #[error("{keyword} is missing arguments")]
    MissingArguments {
        /// Keyword being handled
        keyword: &'static str,
    },

    /// Type tag unknown or not allowed for the keyword
    #[error("{keyword} does not accept field type {field_type}")]
    WrongType {
        /// Keyword being handled
        keyword: &'static str,
        /// Offending type tag
        field_type: String,
    },

    /// Literal does not parse as its declared type
    #[error("{keyword} has a malformed {field_type} literal")]
    MalformedLiteral {
        /// Keyword being handled
        keyword: &'static str,
        /// Declared type
        field_type: &'static str,
    },

    /// Value list without its start or end marker
    #[error("{keyword} value list is not enclosed in ^START ... ^END")]
    MissingListMarker {
        /// Keyword being handled
        keyword: &'static str,
    },

    /// Key list with no keys
    #[error("{keyword} needs at least one key")]
    EmptyKeyList {
        /// Keyword being handled
        keyword: &'static str,
    },

    /// Write-time direction other than `^IS_ASC` / `^IS_DESC`
    #[error("^OrderByWriteTime expects ^IS_ASC or ^IS_DESC")]
    BadOrderDirection,

    /// Network id unknown to the device directory
    #[error("device id could not be resolved")]
    UnresolvedDevice,
}

/// Result of compiling query text
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOutcome {
    /// Compiled query, or select-all on failure
    pub query: Query,
    /// Whether compilation succeeded
    pub success: bool,
    error: Option<CompileError>,
}

impl CompileOutcome {
    fn ok(query: Query) -> Self {
        Self {
            query,
            success: true,
            error: None,
        }
    }

    fn failed(error: CompileError) -> Self {
        Self {
            query: Query::select_all(),
            success: false,
            error: Some(error),
        }
    }

    /// Why compilation failed, if it did
    pub fn error(&self) -> Option<&CompileError> {
        self.error.as_ref()
    }

    /// Branch on the success flag
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when compilation failed.
    pub fn into_result(self) -> Result<Query> {
        if self.success {
            return Ok(self.query);
        }
        let reason = self
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "query failed to compile".to_string());
        Err(Status::invalid_argument(reason))
    }
}

/// State scoped to a single compile call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileContext {
    /// `^KEY_PREFIX` appears anywhere in the text, before or after
    /// `^DEVICE_ID`; a device clause then adds no prefix of its own
    pub has_key_prefix: bool,
    /// Device id resolved from a `^DEVICE_ID` clause
    pub device_id: Option<String>,
}

impl CompileContext {
    /// Prepare the context for `text`
    pub fn for_text(text: &str) -> Self {
        Self {
            has_key_prefix: tokenize(text).contains(&keyword::KEY_PREFIX),
            device_id: None,
        }
    }

    fn prefixed(&self, prefix: &str) -> Vec<u8> {
        let mut bytes = self
            .device_id
            .as_deref()
            .map(|d| d.as_bytes().to_vec())
            .unwrap_or_default();
        bytes.extend_from_slice(prefix.as_bytes());
        bytes
    }
}

/// Compiles query text into `Query` values
#[derive(Clone, Default)]
pub struct QueryCompiler {
    limits: Limits,
    directory: Option<Arc<dyn DeviceDirectory>>,
}

impl std::fmt::Debug for QueryCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCompiler")
            .field("limits", &self.limits)
            .field("has_directory", &self.directory.is_some())
            .finish()
    }
}

impl QueryCompiler {
    /// Compiler with default limits and no device directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Use custom limits
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Resolve `^DEVICE_ID` clauses through `directory`
    pub fn with_directory(mut self, directory: Arc<dyn DeviceDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Compile `text`, reporting failure through the success flag
    pub fn compile(&self, text: &str) -> CompileOutcome {
        match self.try_compile(text) {
            Ok(query) => {
                debug!(clauses = query.clauses().len(), "query compiled");
                CompileOutcome::ok(query)
            }
            Err(e) => {
                warn!(error = %e, "query failed to compile");
                CompileOutcome::failed(e)
            }
        }
    }

    /// Compile `text`, returning the failure reason
    ///
    /// # Errors
    ///
    /// Returns a `CompileError` describing the first problem found.
    pub fn try_compile(&self, text: &str) -> std::result::Result<Query, CompileError> {
        let max = self.limits.max_query_bytes;
        if text.len() > max {
            return Err(CompileError::TooLong {
                actual: text.len(),
                max,
            });
        }

        let mut ctx = CompileContext::for_text(text);
        let mut cursor = TokenCursor::new(text);
        let mut query = Query::select_all();
        let mut processed = 0usize;

        while !cursor.is_done() {
            processed += 1;
            if processed > self.limits.max_query_complexity {
                return Err(CompileError::TooComplex {
                    max: self.limits.max_query_complexity,
                });
            }
            let position = cursor.position();
            let kind = cursor
                .next_token()
                .and_then(ClauseKind::from_keyword)
                .ok_or(CompileError::UnknownKeyword { position })?;
            self.handle(kind, &mut cursor, &mut ctx, &mut query)?;
        }
        Ok(query)
    }

    fn handle(
        &self,
        kind: ClauseKind,
        cursor: &mut TokenCursor<'_>,
        ctx: &mut CompileContext,
        query: &mut Query,
    ) -> std::result::Result<(), CompileError> {
        let keyword = kind.keyword();
        let missing = || CompileError::MissingArguments { keyword };

        let clause = match kind {
            ClauseKind::EqualTo => compare(CompareOp::Equal, keyword, cursor)?,
            ClauseKind::NotEqualTo => compare(CompareOp::NotEqual, keyword, cursor)?,
            ClauseKind::GreaterThan => compare(CompareOp::Greater, keyword, cursor)?,
            ClauseKind::LessThan => compare(CompareOp::Less, keyword, cursor)?,
            ClauseKind::GreaterThanOrEqualTo => {
                compare(CompareOp::GreaterOrEqual, keyword, cursor)?
            }
            ClauseKind::LessThanOrEqualTo => compare(CompareOp::LessOrEqual, keyword, cursor)?,
            ClauseKind::IsNull => Clause::IsNull {
                field: unescape(cursor.next_token().ok_or_else(missing)?),
            },
            ClauseKind::IsNotNull => Clause::IsNotNull {
                field: unescape(cursor.next_token().ok_or_else(missing)?),
            },
            ClauseKind::In => {
                let (field, values) = value_list(keyword, cursor)?;
                Clause::In { field, values }
            }
            ClauseKind::NotIn => {
                let (field, values) = value_list(keyword, cursor)?;
                Clause::NotIn { field, values }
            }
            ClauseKind::Like => {
                let [field, pattern] = cursor.consume::<2>().ok_or_else(missing)?;
                Clause::Like {
                    field: unescape(field),
                    pattern: unescape(pattern),
                }
            }
            ClauseKind::NotLike => {
                let [field, pattern] = cursor.consume::<2>().ok_or_else(missing)?;
                Clause::NotLike {
                    field: unescape(field),
                    pattern: unescape(pattern),
                }
            }
            ClauseKind::And => Clause::And,
            ClauseKind::Or => Clause::Or,
            ClauseKind::BeginGroup => Clause::BeginGroup,
            ClauseKind::EndGroup => Clause::EndGroup,
            ClauseKind::OrderByAsc => Clause::OrderBy {
                field: unescape(cursor.next_token().ok_or_else(missing)?),
                ascending: true,
            },
            ClauseKind::OrderByDesc => Clause::OrderBy {
                field: unescape(cursor.next_token().ok_or_else(missing)?),
                ascending: false,
            },
            ClauseKind::OrderByWriteTime => {
                let ascending = match cursor.next_token().ok_or_else(missing)? {
                    keyword::IS_ASC => true,
                    keyword::IS_DESC => false,
                    _ => return Err(CompileError::BadOrderDirection),
                };
                Clause::OrderByWriteTime { ascending }
            }
            ClauseKind::Limit => {
                let [number, offset] = cursor.consume::<2>().ok_or_else(missing)?;
                Clause::Limit {
                    number: non_negative(keyword, number)?,
                    offset: non_negative(keyword, offset)?,
                }
            }
            ClauseKind::KeyPrefix => {
                let prefix = unescape(cursor.next_token().ok_or_else(missing)?);
                Clause::KeyPrefix(ctx.prefixed(&prefix))
            }
            ClauseKind::InKeys => {
                let [start] = cursor.consume::<1>().ok_or_else(missing)?;
                if start != keyword::START {
                    return Err(CompileError::MissingListMarker { keyword });
                }
                let items = cursor
                    .consume_until(keyword::END)
                    .ok_or(CompileError::MissingListMarker { keyword })?;
                if items.is_empty() {
                    return Err(CompileError::EmptyKeyList { keyword });
                }
                let keys: BTreeSet<Vec<u8>> =
                    items.into_iter().map(|k| unescape(k).into_bytes()).collect();
                Clause::InKeys(keys)
            }
            ClauseKind::SuggestIndex => {
                Clause::SuggestIndex(unescape(cursor.next_token().ok_or_else(missing)?))
            }
            ClauseKind::DeviceId => {
                let network_id = unescape(cursor.next_token().ok_or_else(missing)?);
                let device_id = self
                    .directory
                    .as_ref()
                    .and_then(|d| d.resolve(&network_id))
                    .ok_or(CompileError::UnresolvedDevice)?;
                ctx.device_id = Some(device_id.clone());
                if !ctx.has_key_prefix {
                    query.push(Clause::KeyPrefix(device_id.as_bytes().to_vec()));
                }
                Clause::DeviceId(device_id)
            }
        };
        query.push(clause);
        Ok(())
    }
}

fn compare(
    op: CompareOp,
    keyword: &'static str,
    cursor: &mut TokenCursor<'_>,
) -> std::result::Result<Clause, CompileError> {
    let [field_type, field, value] = cursor
        .consume::<3>()
        .ok_or(CompileError::MissingArguments { keyword })?;
    let ty = field_type_for(keyword, field_type)?;
    if op.is_ordering() && ty == FieldType::Bool {
        return Err(CompileError::WrongType {
            keyword,
            field_type: field_type.to_string(),
        });
    }
    Ok(Clause::Compare {
        op,
        field: unescape(field),
        value: parse_literal(keyword, ty, value)?,
    })
}

fn value_list(
    keyword: &'static str,
    cursor: &mut TokenCursor<'_>,
) -> std::result::Result<(String, Vec<FieldValue>), CompileError> {
    let [field_type, field, start] = cursor
        .consume::<3>()
        .ok_or(CompileError::MissingArguments { keyword })?;
    if start != keyword::START {
        return Err(CompileError::MissingListMarker { keyword });
    }
    let ty = field_type_for(keyword, field_type)?;
    if ty == FieldType::Bool {
        return Err(CompileError::WrongType {
            keyword,
            field_type: field_type.to_string(),
        });
    }
    let items = cursor
        .consume_until(keyword::END)
        .ok_or(CompileError::MissingListMarker { keyword })?;
    let values = items
        .into_iter()
        .map(|item| parse_literal(keyword, ty, item))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((unescape(field), values))
}

fn field_type_for(
    keyword: &'static str,
    token: &str,
) -> std::result::Result<FieldType, CompileError> {
    FieldType::parse(token).ok_or_else(|| CompileError::WrongType {
        keyword,
        field_type: token.to_string(),
    })
}

fn parse_literal(
    keyword: &'static str,
    ty: FieldType,
    token: &str,
) -> std::result::Result<FieldValue, CompileError> {
    let malformed = || CompileError::MalformedLiteral {
        keyword,
        field_type: ty.as_str(),
    };
    let value = match ty {
        FieldType::Integer => FieldValue::Integer(token.parse().map_err(|_| malformed())?),
        FieldType::Long => FieldValue::Long(token.parse().map_err(|_| malformed())?),
        FieldType::Double => FieldValue::Double(token.parse().map_err(|_| malformed())?),
        FieldType::Bool => match token {
            keyword::VALUE_TRUE => FieldValue::Bool(true),
            keyword::VALUE_FALSE => FieldValue::Bool(false),
            _ => return Err(malformed()),
        },
        FieldType::String => FieldValue::String(unescape(token)),
    };
    Ok(value)
}

fn non_negative(keyword: &'static str, token: &str) -> std::result::Result<usize, CompileError> {
    let n: i32 = token.parse().map_err(|_| CompileError::MalformedLiteral {
        keyword,
        field_type: FieldType::Integer.as_str(),
    })?;
    usize::try_from(n).map_err(|_| CompileError::MalformedLiteral {
        keyword,
        field_type: FieldType::Integer.as_str(),
    })
}
