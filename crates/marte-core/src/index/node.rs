//! `ProjectNode`: one merged semantic entity in the project tree.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ast::{Annotation, Definition, Position};

/// Stable arena index. Arena allocation with stable indices keeps
/// snapshot cloning cheap and lets references survive tree rewrites
/// (see `SPEC_FULL.md` design notes) instead of raw pointers/`Rc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One file's contribution to a node. The unit of per-file removal:
/// dropping every fragment with a matching `file` and re-adding it must
/// reproduce the identical index (invariant I1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub file: PathBuf,
    /// Present when this fragment is the one that opened the node as an
    /// object (`NAME = { ... }`); carries the brace position used for
    /// go-to-definition.
    pub object_pos: Option<Position>,
    pub doc: Option<String>,
    /// Field/variable/macro definitions this fragment contributes
    /// directly to the node (not including nested `ObjectNode`s, which
    /// become their own child node's fragments).
    pub definitions: Vec<Definition>,
    pub pragmas: Vec<Annotation>,
}

/// A `#var`/`#let` declared in a node's scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub type_expr: String,
    pub default: Option<crate::ast::Value>,
    pub is_const: bool,
    pub file: PathBuf,
    pub pos: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeKind {
    Project,
    Isolated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectNode {
    pub(crate) alive: bool,
    pub name: String,
    pub real_name: String,
    pub parent: Option<NodeId>,
    pub children: IndexMap<String, NodeId>,
    pub fragments: Vec<Fragment>,
    pub doc: String,
    pub metadata: IndexMap<String, String>,
    pub variables: IndexMap<String, VariableInfo>,
    pub pragmas: Vec<Annotation>,
    /// Resolved by the validator's signal-wiring pass; cleared on any
    /// index mutation (invariant I5).
    pub target: Option<NodeId>,
    pub scope: ScopeKind,
}

impl ProjectNode {
    pub(crate) fn new_root(name: &str, scope: ScopeKind) -> Self {
        Self {
            alive: true,
            name: name.to_string(),
            real_name: name.to_string(),
            parent: None,
            children: IndexMap::new(),
            fragments: Vec::new(),
            doc: String::new(),
            metadata: IndexMap::new(),
            variables: IndexMap::new(),
            pragmas: Vec::new(),
            target: None,
            scope,
        }
    }

    pub(crate) fn new_child(name: String, real_name: String, parent: NodeId, scope: ScopeKind) -> Self {
        Self {
            alive: true,
            name,
            real_name,
            parent: Some(parent),
            children: IndexMap::new(),
            fragments: Vec::new(),
            doc: String::new(),
            metadata: IndexMap::new(),
            variables: IndexMap::new(),
            pragmas: Vec::new(),
            target: None,
            scope,
        }
    }

    pub fn is_object(&self) -> bool {
        self.fragments.iter().any(|f| f.object_pos.is_some())
    }

    pub fn starts_with_sigil(&self) -> bool {
        self.real_name.starts_with('+') || self.real_name.starts_with('$')
    }

    pub fn field_value(&self, name: &str) -> Option<&crate::ast::Value> {
        self.fragments.iter().flat_map(|f| &f.definitions).find_map(|d| match d {
            Definition::Field { name: n, value, .. } if n == name => Some(value),
            _ => None,
        })
    }

    /// Every fragment that defines `name` as a field, in fragment order.
    pub fn field_occurrences<'a>(&'a self, name: &'a str) -> impl Iterator<Item = (&'a Fragment, Position)> {
        self.fragments.iter().filter_map(move |f| {
            f.definitions.iter().find_map(|d| match d {
                Definition::Field { name: n, pos, .. } if n == name => Some((f, *pos)),
                _ => None,
            })
        })
    }
}

/// Strips a leading `+`/`$` sigil to compute a node's normalised name.
pub fn normalize_name(raw: &str) -> &str {
    raw.trim_start_matches(['+', '$'])
}

/// Picks the canonical spelling among fragments' raw names: a `+`-prefixed
/// form wins over `$`, which wins over a bare spelling (invariant I3).
pub fn pick_real_name<'a>(existing: Option<&'a str>, candidate: &'a str) -> &'a str {
    fn rank(s: &str) -> u8 {
        if s.starts_with('+') {
            0
        } else if s.starts_with('$') {
            1
        } else {
            2
        }
    }
    match existing {
        None => candidate,
        Some(existing) if rank(candidate) < rank(existing) => candidate,
        Some(existing) => existing,
    }
}
