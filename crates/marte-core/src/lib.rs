//! Parsing, indexing, validating and building for the MARTe real-time
//! configuration language. This crate has no I/O backend of its own —
//! logging goes through the `log` facade, and callers (`marte-cli`,
//! `marte-lsp`) choose the subscriber.

pub mod ast;
pub mod builder;
pub mod diagnostics;
pub mod eval;
pub mod fmt;
pub mod index;
pub mod lexer;
pub mod parser;
pub mod query;
pub mod schema;
pub mod session;
pub mod validator;

pub use ast::{Configuration, Definition, Value};
pub use diagnostics::Diagnostic;
pub use index::ProjectIndex;
pub use schema::Schema;
pub use session::{Session, View};
