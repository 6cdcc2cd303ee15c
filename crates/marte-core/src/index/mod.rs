//! The Project Index: an incrementally updated, file-keyed tree of
//! semantic nodes. Arena-backed (`node::NodeId` is a stable handle) so
//! snapshot cloning and cross-rewrite references stay cheap.

pub mod node;
pub mod reference;
pub mod scan;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::ast::{Configuration, Definition, DocTable, Position, PragmaTable, Value};
use node::{normalize_name, pick_real_name, Fragment, NodeId, ProjectNode, ScopeKind, VariableInfo};
use reference::Reference;

/// A fixed set of field names the index distils into per-node metadata,
/// rebuilt as a pure function of the fragment set whenever fragments
/// change (invariant I4).
const METADATA_KEYS: &[&str] = &[
    "Class",
    "Type",
    "NumberOfElements",
    "NumberOfDimensions",
    "DataSource",
    "DefaultDataSource",
    "Alias",
    "ByteSize",
    "ByteDimension",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    Node(NodeId),
    Field { node: NodeId, name_start: bool },
    Reference(usize),
    Variable { node: NodeId, name: String },
}

#[derive(Debug, Default, Clone)]
pub struct ProjectIndex {
    arena: Vec<ProjectNode>,
    root: Option<NodeId>,
    isolated_roots: HashMap<PathBuf, NodeId>,
    /// Nodes touched by each file, used to prune on removal without a
    /// full tree walk.
    file_nodes: HashMap<PathBuf, Vec<NodeId>>,
    references: Vec<Reference>,
}

impl ProjectIndex {
    pub fn new() -> Self {
        let mut index = Self::default();
        let root_id = index.push_node(ProjectNode::new_root("", ScopeKind::Project));
        index.root = Some(root_id);
        index
    }

    pub fn root(&self) -> NodeId {
        self.root.expect("index always has a project root")
    }

    pub fn node(&self, id: NodeId) -> &ProjectNode {
        &self.arena[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut ProjectNode {
        &mut self.arena[id.index()]
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn isolated_root(&self, file: &Path) -> Option<NodeId> {
        self.isolated_roots.get(file).copied()
    }

    pub fn isolated_roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.isolated_roots.values().copied()
    }

    fn push_node(&mut self, node: ProjectNode) -> NodeId {
        let id = NodeId(self.arena.len() as u32);
        self.arena.push(node);
        id
    }

    // ---------------------------------------------------------------
    // AddFile
    // ---------------------------------------------------------------

    /// Removes `file`'s prior contribution, then walks `config` to
    /// (re)attach its fragments. Every reference encountered is appended
    /// to `self.references` unresolved (`target = None`); call
    /// `resolve_references` afterward.
    pub fn add_file(&mut self, file: &Path, config: &Configuration, docs: &DocTable, pragmas: &PragmaTable) {
        self.remove_file(file);

        let (scope_root, scope) = match &config.package {
            Some(pkg) => (self.ensure_package_path(pkg), ScopeKind::Project),
            None => {
                let id = self.push_node(ProjectNode::new_root(&file.to_string_lossy(), ScopeKind::Isolated));
                self.isolated_roots.insert(file.to_path_buf(), id);
                (id, ScopeKind::Isolated)
            }
        };
        self.touch(file, scope_root);

        self.index_body(scope_root, file, &config.definitions, docs, pragmas, scope);

        if !config.header_pragmas.is_empty() {
            let root_node = self.node_mut(scope_root);
            for text in &config.header_pragmas {
                root_node.pragmas.push(crate::ast::Annotation {
                    text: text.clone(),
                    pos: Position::START,
                    kind: crate::ast::AnnotationKind::Pragma,
                });
            }
        }
    }

    fn touch(&mut self, file: &Path, node: NodeId) {
        self.file_nodes.entry(file.to_path_buf()).or_default().push(node);
    }

    fn ensure_package_path(&mut self, package: &str) -> NodeId {
        let mut current = self.root();
        for segment in package.split('.').filter(|s| !s.is_empty()) {
            current = self.get_or_create_child(current, segment, segment, ScopeKind::Project);
        }
        current
    }

    fn get_or_create_child(&mut self, parent: NodeId, normalized: &str, raw_name: &str, scope: ScopeKind) -> NodeId {
        if let Some(existing) = self.node(parent).children.get(normalized).copied() {
            let real = pick_real_name(Some(self.node(existing).real_name.as_str()), raw_name).to_string();
            self.node_mut(existing).real_name = real;
            return existing;
        }
        let real_name = raw_name.to_string();
        let child = ProjectNode::new_child(normalized.to_string(), real_name, parent, scope);
        let id = self.push_node(child);
        self.node_mut(parent).children.insert(normalized.to_string(), id);
        id
    }

    /// Walks a definition body, registering fields/variables on `node`
    /// directly and recursing into nested `ObjectNode`s to create/extend
    /// child nodes. Control-flow/template definitions are kept verbatim
    /// in the fragment (structural, pre-macro-expansion view — expansion
    /// is the Evaluator/Builder's job, see `SPEC_FULL.md` §[MODULE F]).
    fn index_body(
        &mut self,
        node: NodeId,
        file: &Path,
        defs: &[Definition],
        docs: &DocTable,
        pragmas: &PragmaTable,
        scope: ScopeKind,
    ) -> Vec<Definition> {
        let mut own_defs = Vec::new();
        for def in defs {
            match def {
                Definition::ObjectNode { name, object_pos, subnode, pos, .. } => {
                    let normalized = normalize_name(name).to_string();
                    let child = self.get_or_create_child(node, &normalized, name, scope);
                    self.touch(file, child);
                    let child_defs = self.index_body(child, file, subnode, docs, pragmas, scope);
                    let doc = docs.doc_for(*pos).map(str::to_string);
                    let frag_pragmas = pragmas
                        .pragmas_for(*pos)
                        .iter()
                        .map(|t| crate::ast::Annotation { text: t.clone(), pos: *pos, kind: crate::ast::AnnotationKind::Pragma })
                        .collect();
                    let child_node = self.node_mut(child);
                    if let Some(d) = &doc {
                        if !child_node.doc.is_empty() {
                            child_node.doc.push('\n');
                        }
                        child_node.doc.push_str(d);
                    }
                    child_node.fragments.push(Fragment {
                        file: file.to_path_buf(),
                        object_pos: Some(*object_pos),
                        doc,
                        definitions: child_defs,
                        pragmas: frag_pragmas,
                    });
                }
                Definition::VariableDefinition { name, type_expr, default, is_const, pos } => {
                    self.collect_references_in_value(default.as_ref(), file);
                    let info = VariableInfo {
                        name: name.clone(),
                        type_expr: type_expr.clone(),
                        default: default.clone(),
                        is_const: *is_const,
                        file: file.to_path_buf(),
                        pos: *pos,
                    };
                    self.node_mut(node).variables.insert(name.clone(), info);
                    own_defs.push(def.clone());
                }
                Definition::Field { value, .. } => {
                    self.collect_references_in_value(Some(value), file);
                    own_defs.push(def.clone());
                }
                Definition::If { condition, then_branch, else_branch, .. } => {
                    self.collect_references_in_value(Some(condition), file);
                    // Branch bodies are walked too so nested object nodes
                    // remain visible to hover/completion before expansion.
                    let _ = self.index_body(node, file, then_branch, docs, pragmas, scope);
                    let _ = self.index_body(node, file, else_branch, docs, pragmas, scope);
                    own_defs.push(def.clone());
                }
                Definition::Foreach { iterable, body, .. } => {
                    self.collect_references_in_value(Some(iterable), file);
                    let _ = self.index_body(node, file, body, docs, pragmas, scope);
                    own_defs.push(def.clone());
                }
                Definition::TemplateDefinition { .. } | Definition::TemplateInstantiation { .. } => {
                    own_defs.push(def.clone());
                }
            }
        }
        own_defs
    }

    fn collect_references_in_value(&mut self, value: Option<&Value>, file: &Path) {
        let Some(value) = value else { return };
        match value {
            Value::Reference { name, pos } => {
                self.references.push(Reference {
                    name: name.clone(),
                    position: *pos,
                    file: file.to_path_buf(),
                    target: None,
                    target_variable: None,
                    is_variable: false,
                });
            }
            Value::VariableReference { name, pos } => {
                self.references.push(Reference {
                    name: name.clone(),
                    position: *pos,
                    file: file.to_path_buf(),
                    target: None,
                    target_variable: None,
                    is_variable: true,
                });
            }
            Value::Array { elements, .. } => {
                for e in elements {
                    self.collect_references_in_value(Some(e), file);
                }
            }
            Value::Binary { lhs, rhs, .. } => {
                self.collect_references_in_value(Some(lhs), file);
                self.collect_references_in_value(Some(rhs), file);
            }
            Value::Unary { rhs, .. } => self.collect_references_in_value(Some(rhs), file),
            _ => {}
        }
    }

    // ---------------------------------------------------------------
    // RemoveFile
    // ---------------------------------------------------------------

    /// Drops every fragment with `file == file`, prunes empty nodes
    /// bottom-up, removes the file's references, and rebuilds metadata
    /// for nodes that lost a fragment.
    pub fn remove_file(&mut self, file: &Path) {
        let Some(touched) = self.file_nodes.remove(file) else { return };
        self.references.retain(|r| r.file != file);

        let mut to_check: Vec<NodeId> = Vec::new();
        for id in touched {
            if !self.arena[id.index()].alive {
                continue;
            }
            self.arena[id.index()].fragments.retain(|f| f.file != file);
            self.arena[id.index()].variables.retain(|_, v| v.file != file);
            self.rebuild_doc(id);
            self.rebuild_metadata(id);
            to_check.push(id);
        }

        // Prune bottom-up: a node with no fragments and no children is
        // destroyed and unlinked from its parent.
        let mut queue = to_check;
        while let Some(id) = queue.pop() {
            if !self.arena[id.index()].alive {
                continue;
            }
            let dead = self.arena[id.index()].fragments.is_empty() && self.arena[id.index()].children.is_empty();
            if !dead {
                continue;
            }
            let parent = self.arena[id.index()].parent;
            let name = self.arena[id.index()].name.clone();
            self.arena[id.index()].alive = false;
            if let Some(parent) = parent {
                self.arena[parent.index()].children.shift_remove(&name);
                queue.push(parent);
            } else {
                self.isolated_roots.retain(|_, v| *v != id);
            }
        }
    }

    fn rebuild_doc(&mut self, id: NodeId) {
        let doc = self.arena[id.index()]
            .fragments
            .iter()
            .filter_map(|f| f.doc.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        self.arena[id.index()].doc = doc;
    }

    /// Rebuilds `metadata` as a pure function of the current fragment
    /// set (invariant I4): the first fragment (in order) defining each
    /// tracked key wins.
    fn rebuild_metadata(&mut self, id: NodeId) {
        let mut metadata = IndexMap::new();
        for key in METADATA_KEYS {
            if metadata.contains_key(*key) {
                continue;
            }
            if let Some(value) = self.arena[id.index()].field_value(key) {
                metadata.insert((*key).to_string(), literal_display(value));
            }
        }
        self.arena[id.index()].metadata = metadata;
        self.arena[id.index()].target = None; // invariant I5
    }

    // ---------------------------------------------------------------
    // ResolveReferences / ResolveFields
    // ---------------------------------------------------------------

    /// Clears `target` on every reference, then resolves each via
    /// scoped search rooted at its declaring file's scope.
    pub fn resolve_references(&mut self) {
        for r in &mut self.references {
            r.target = None;
            r.target_variable = None;
        }
        let refs: Vec<Reference> = self.references.clone();
        let mut resolved = Vec::with_capacity(refs.len());
        for r in refs {
            let mut r = r;
            let scope_root = self.scope_root_for_file(&r.file);
            if r.is_variable {
                if let Some(found) = self.resolve_variable(scope_root, &r.name) {
                    r.target_variable = Some(found);
                }
            } else if let Some(found) = self.resolve_scoped_name(scope_root, scope_root, &r.name) {
                r.target = Some(found);
            }
            resolved.push(r);
        }
        self.references = resolved;
    }

    /// Recomputes metadata for every live node and, where a field's
    /// value is a simple literal, leaves it ready for downstream
    /// validators to read its concrete form (deeper constant folding is
    /// the Evaluator's job).
    pub fn resolve_fields(&mut self) {
        let ids: Vec<NodeId> = (0..self.arena.len()).map(|i| NodeId(i as u32)).collect();
        for id in ids {
            if self.arena[id.index()].alive {
                self.rebuild_metadata(id);
            }
        }
    }

    fn scope_root_for_file(&self, file: &Path) -> NodeId {
        self.isolated_roots.get(file).copied().unwrap_or_else(|| self.root())
    }

    /// Walks up from `node` to the root of its scope (project or
    /// isolated), used to find "the file's declaring scope".
    pub fn scope_root_of(&self, mut node: NodeId) -> NodeId {
        while let Some(parent) = self.arena[node.index()].parent {
            node = parent;
        }
        node
    }

    fn is_project_scope(&self, scope_root: NodeId) -> bool {
        scope_root == self.root()
    }

    /// Scoped name resolution (spec.md §4.E): dotted names walk from the
    /// scope root segment by segment; bare names search the starting
    /// node, its ancestors up to the scope root, and their immediate
    /// children, falling back to the scope root's direct children only
    /// in project scope (see `SPEC_FULL.md` open question 2 — the deep
    /// global search some reference implementations fall back to is
    /// deliberately not reproduced here).
    pub fn resolve_scoped_name(&self, start: NodeId, scope_root: NodeId, name: &str) -> Option<NodeId> {
        if let Some((first, rest)) = name.split_once('.') {
            let mut current = self.node(scope_root).children.get(first).copied()?;
            for segment in rest.split('.') {
                current = self.node(current).children.get(segment).copied()?;
            }
            return Some(current);
        }

        let mut current = Some(start);
        while let Some(node) = current {
            if let Some(found) = self.node(node).children.get(name) {
                return Some(*found);
            }
            if self.node(node).name == name || self.node(node).real_name.trim_start_matches(['+', '$']) == name {
                return Some(node);
            }
            if node == scope_root {
                break;
            }
            current = self.node(node).parent;
        }

        if self.is_project_scope(scope_root) {
            if let Some(found) = self.node(scope_root).children.get(name) {
                return Some(*found);
            }
        }
        None
    }

    /// Resolves a class name allowing `NS::Name` to match both verbatim
    /// and with the namespace prefix stripped.
    pub fn resolve_class_like_name(&self, start: NodeId, scope_root: NodeId, name: &str) -> Option<NodeId> {
        if let Some(found) = self.resolve_scoped_name(start, scope_root, name) {
            return Some(found);
        }
        let bare = crate::schema::strip_namespace(name);
        if bare != name {
            return self.resolve_scoped_name(start, scope_root, bare);
        }
        None
    }

    fn resolve_variable(&self, start: NodeId, name: &str) -> Option<String> {
        let mut current = Some(start);
        while let Some(node) = current {
            if self.node(node).variables.contains_key(name) {
                return Some(name.to_string());
            }
            current = self.node(node).parent;
        }
        None
    }

    // ---------------------------------------------------------------
    // Query / Walk / FindNode
    // ---------------------------------------------------------------

    pub fn query(&self, file: &Path, line: u32, col: u32) -> Option<QueryResult> {
        let target = Position::new(line, col);
        for (i, r) in self.references.iter().enumerate() {
            if r.file == file && position_within(r.position, &r.name, target) {
                return Some(QueryResult::Reference(i));
            }
        }
        self.query_walk(self.root(), file, target).or_else(|| {
            self.isolated_roots
                .get(file)
                .and_then(|&root| self.query_walk(root, file, target))
        })
    }

    fn query_walk(&self, node: NodeId, file: &Path, target: Position) -> Option<QueryResult> {
        let n = self.node(node);
        for fragment in &n.fragments {
            if fragment.file != file {
                continue;
            }
            if let Some(op) = fragment.object_pos {
                if op == target {
                    return Some(QueryResult::Node(node));
                }
            }
            for def in &fragment.definitions {
                if let Definition::Field { pos, .. } = def {
                    if *pos == target {
                        return Some(QueryResult::Field { node, name_start: true });
                    }
                }
                if let Definition::VariableDefinition { name, pos, .. } = def {
                    if *pos == target {
                        return Some(QueryResult::Variable { node, name: name.clone() });
                    }
                }
            }
        }
        for (_, child) in &n.children {
            if let Some(found) = self.query_walk(*child, file, target) {
                return Some(found);
            }
        }
        None
    }

    pub fn walk(&self, mut f: impl FnMut(NodeId, &ProjectNode)) {
        self.walk_from(self.root(), &mut f);
        for &root in self.isolated_roots.values() {
            self.walk_from(root, &mut f);
        }
    }

    fn walk_from(&self, id: NodeId, f: &mut impl FnMut(NodeId, &ProjectNode)) {
        let node = self.node(id);
        f(id, node);
        for child in node.children.values() {
            self.walk_from(*child, f);
        }
    }

    /// Finds a node by scoped name starting at `scope`, optionally
    /// filtered by `predicate`. `deep_global` explicitly requests the
    /// project-scope-children fallback (kept as an explicit opt-in per
    /// `SPEC_FULL.md` open question 2, never an implicit default).
    pub fn find_node(
        &self,
        scope: NodeId,
        name: &str,
        predicate: Option<&dyn Fn(&ProjectNode) -> bool>,
        deep_global: bool,
    ) -> Option<NodeId> {
        let scope_root = self.scope_root_of(scope);
        let found = self.resolve_scoped_name(scope, scope_root, name);
        let found = found.or_else(|| {
            if deep_global && self.is_project_scope(scope_root) {
                let mut result = None;
                self.walk(|id, node| {
                    if result.is_none() && node.name == name {
                        result = Some(id);
                    }
                });
                result
            } else {
                None
            }
        });
        match (found, predicate) {
            (Some(id), Some(pred)) if pred(self.node(id)) => Some(id),
            (Some(id), None) => Some(id),
            _ => None,
        }
    }

    pub fn scan_directory(&self, root: &Path) -> scan::ScanResult {
        scan::scan_directory(root)
    }
}

fn position_within(start: Position, text: &str, target: Position) -> bool {
    start.line == target.line && target.column >= start.column && target.column <= start.column + text.len() as u32
}

fn literal_display(value: &Value) -> String {
    match value {
        Value::String { value, .. } => value.clone(),
        Value::Int { value, .. } => value.to_string(),
        Value::Float { value, .. } => value.to_string(),
        Value::Bool { value, .. } => value.to_string(),
        Value::Reference { name, .. } => name.clone(),
        Value::VariableReference { name, .. } => format!("@{name}"),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn index_one(source: &str, path: &str) -> ProjectIndex {
        let mut index = ProjectIndex::new();
        let (config, docs, pragmas, _) = parse(source);
        index.add_file(Path::new(path), &config, &docs, &pragmas);
        index.resolve_references();
        index
    }

    #[test]
    fn add_then_remove_restores_empty_tree() {
        let mut index = ProjectIndex::new();
        let (config, docs, pragmas, _) = parse("#package P\n+N = { Field = 1 }");
        let path = Path::new("a.marte");
        index.add_file(path, &config, &docs, &pragmas);
        assert!(!index.node(index.root()).children.is_empty());
        index.remove_file(path);
        assert!(index.node(index.root()).children.is_empty());
    }

    #[test]
    fn merges_two_files_into_same_node() {
        let mut index = ProjectIndex::new();
        let (c1, d1, p1, _) = parse("#package P\n+N = { A = 1 }");
        let (c2, d2, p2, _) = parse("#package P\n+N = { B = 2 }");
        index.add_file(Path::new("a.marte"), &c1, &d1, &p1);
        index.add_file(Path::new("b.marte"), &c2, &d2, &p2);
        let root = index.root();
        let p = index.node(root).children.get("P").copied().unwrap();
        let n = index.node(p).children.get("N").copied().unwrap();
        assert_eq!(index.node(n).fragments.len(), 2);
    }

    #[test]
    fn isolated_file_reference_does_not_resolve_into_project_scope() {
        let mut index = ProjectIndex::new();
        let (shared_cfg, sd, sp, _) = parse("#package P\n+Shared = { Class = X }");
        index.add_file(Path::new("shared.marte"), &shared_cfg, &sd, &sp);
        let (iso_cfg, id, ip, _) = parse("Ref = Shared");
        index.add_file(Path::new("iso.marte"), &iso_cfg, &id, &ip);
        index.resolve_references();
        let r = index.references().iter().find(|r| r.name == "Shared").unwrap();
        assert!(r.target.is_none());
    }

    #[test]
    fn real_name_prefers_plus_over_dollar_over_bare() {
        let mut index = ProjectIndex::new();
        let (c1, d1, p1, _) = parse("#package P\n$N = { A = 1 }");
        let (c2, d2, p2, _) = parse("#package P\n+N = { B = 2 }");
        index.add_file(Path::new("a.marte"), &c1, &d1, &p1);
        index.add_file(Path::new("b.marte"), &c2, &d2, &p2);
        let root = index.root();
        let p = index.node(root).children.get("P").copied().unwrap();
        let n = index.node(p).children.get("N").copied().unwrap();
        assert_eq!(index.node(n).real_name, "+N");
    }

    #[test]
    fn scoped_resolution_finds_sibling_before_global_fallback() {
        let index = index_one("#package P\n+A = { Class = X }\n+B = { Target = A }", "a.marte");
        let r = index.references().iter().find(|r| r.name == "A").unwrap();
        assert!(r.target.is_some());
    }
}
