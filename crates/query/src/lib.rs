//! Query sublanguage for replikv
//!
//! This crate turns query text into a typed clause list and back:
//! - keyword: the reserved vocabulary and keyword → clause mapping
//! - tokenizer: token splitting, literal escaping, bounds-checked cursor
//! - query: Query / Clause types and plan validation
//! - compiler: QueryCompiler (text → Query)
//! - data_query: DataQuery builder (clauses → text)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compiler;
pub mod data_query;
pub mod keyword;
pub mod query;
pub mod tokenizer;

pub use compiler::{CompileContext, CompileError, CompileOutcome, QueryCompiler};
pub use data_query::{DataQuery, QueryLiteral};
pub use keyword::{ClauseKind, FieldType};
pub use query::{Clause, CompareOp, FieldValue, Filter, Query, QueryPlan};
pub use tokenizer::{escape, unescape, TokenCursor};
