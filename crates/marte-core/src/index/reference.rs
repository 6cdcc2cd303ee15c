//! References produced by the index from every `Reference`/
//! `VariableReference` value encountered in a file; resolved in a later
//! pass (`ProjectIndex::resolve_references`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ast::Position;
use crate::index::node::NodeId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    pub position: Position,
    pub file: PathBuf,
    pub target: Option<NodeId>,
    pub target_variable: Option<String>,
    pub is_variable: bool,
}
