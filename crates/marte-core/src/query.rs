//! Query surface (spec.md §4.I): read-only operations over a resolved
//! `ProjectIndex`, consumed by `marte-lsp` to answer `textDocument/*` and
//! `workspace/*` requests without ever touching the tree directly.

use std::path::PathBuf;

use crate::ast::{Definition, Position, Value};
use crate::index::node::{NodeId, ProjectNode};
use crate::index::{ProjectIndex, QueryResult};
use crate::schema::Schema;

#[derive(Debug, Clone)]
pub struct Location {
    pub file: PathBuf,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct TextEdit {
    pub file: PathBuf,
    pub position: Position,
    pub old_text: String,
    pub new_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Object,
    Signal,
    Gam,
    DataSource,
    Application,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub location: Location,
}

/// Where in the grammar a completion request landed, resolved by the
/// caller (the LSP layer owns cursor/text inspection; this module only
/// knows how to answer once the context is classified).
#[derive(Debug, Clone)]
pub enum CompletionContext {
    AfterClassEquals,
    InsideObject { node: NodeId },
    AfterDataSourceEquals { container: NodeId },
    AfterTypeEquals,
    InsideSignalsContainer,
}

#[derive(Debug, Clone)]
pub struct CompletionItem {
    pub label: String,
    pub insert_text: String,
}

const SCALAR_TYPE_NAMES: &[&str] = &[
    "uint8", "uint16", "uint32", "uint64", "int8", "int16", "int32", "int64", "float32", "float64", "char8", "bool",
];

pub struct QuerySurface<'a> {
    index: &'a ProjectIndex,
    schema: &'a Schema,
}

impl<'a> QuerySurface<'a> {
    pub fn new(index: &'a ProjectIndex, schema: &'a Schema) -> Self {
        Self { index, schema }
    }

    /// Resolves whatever is at `(file, line, col)` to its target node,
    /// following a reference if the cursor sits on one.
    pub fn node_at(&self, file: &std::path::Path, line: u32, col: u32) -> Option<NodeId> {
        match self.index.query(file, line, col)? {
            QueryResult::Node(id) | QueryResult::Field { node: id, .. } | QueryResult::Variable { node: id, .. } => Some(id),
            QueryResult::Reference(i) => self.index.references()[i].target,
        }
    }

    /// Every fragment position that opened `node` as an object.
    pub fn definition(&self, node: NodeId) -> Vec<Location> {
        self.index
            .node(node)
            .fragments
            .iter()
            .filter_map(|f| f.object_pos.map(|pos| Location { file: f.file.clone(), position: pos }))
            .collect()
    }

    /// Every occurrence whose resolved target is `node`, plus the
    /// definition sites when `include_declaration` is set.
    pub fn references(&self, node: NodeId, include_declaration: bool) -> Vec<Location> {
        let mut locations: Vec<Location> = self
            .index
            .references()
            .iter()
            .filter(|r| r.target == Some(node))
            .map(|r| Location { file: r.file.clone(), position: r.position })
            .collect();
        if include_declaration {
            locations.extend(self.definition(node));
        }
        locations
    }

    /// Markdown hover text: kind, class (namespace stripped), type/size
    /// for signals, docstring, and referring GAMs when the node is a
    /// data-source signal.
    pub fn hover(&self, node: NodeId) -> String {
        let n = self.index.node(node);
        let mut out = String::new();
        out.push_str(&format!("**{}**\n\n", n.real_name));
        if let Some(class) = n.field_value("Class").and_then(literal_text) {
            out.push_str(&format!("Class: `{}`\n\n", crate::schema::strip_namespace(&class)));
        }
        if let Some(type_name) = n.field_value("Type").and_then(literal_text) {
            out.push_str(&format!("Type: `{type_name}`"));
            if let Some(elements) = n.field_value("NumberOfElements") {
                out.push_str(&format!(" × {}", display_value(elements)));
            }
            out.push_str("\n\n");
        }
        if !n.doc.is_empty() {
            out.push_str(&n.doc);
            out.push_str("\n\n");
        }
        let referring = self.referring_gams(node);
        if !referring.is_empty() {
            out.push_str("Referenced by: ");
            out.push_str(&referring.iter().map(|id| self.index.node(*id).real_name.clone()).collect::<Vec<_>>().join(", "));
        }
        out
    }

    fn referring_gams(&self, signal: NodeId) -> Vec<NodeId> {
        let mut gams = Vec::new();
        self.index.walk(|id, node| {
            let Some(class) = node.field_value("Class").and_then(literal_text) else { return };
            let Some(shape) = self.schema.class(&class) else { return };
            if !shape.is_gam() {
                return;
            }
            for container in ["InputSignals", "OutputSignals"] {
                let Some(&container_id) = node.children.get(container) else { continue };
                for &child in self.index.node(container_id).children.values() {
                    if child == signal {
                        gams.push(id);
                    }
                }
            }
        });
        gams
    }

    pub fn completion(&self, context: &CompletionContext) -> Vec<CompletionItem> {
        match context {
            CompletionContext::AfterClassEquals => {
                self.schema.classes().map(|c| CompletionItem { label: c.name.clone(), insert_text: c.name.clone() }).collect()
            }
            CompletionContext::InsideObject { node } => self.mandatory_first_fields(*node),
            CompletionContext::AfterDataSourceEquals { container } => self.reachable_data_sources(*container),
            CompletionContext::AfterTypeEquals => {
                SCALAR_TYPE_NAMES.iter().map(|t| CompletionItem { label: (*t).to_string(), insert_text: (*t).to_string() }).collect()
            }
            CompletionContext::InsideSignalsContainer => self.signal_snippets(),
        }
    }

    fn mandatory_first_fields(&self, node: NodeId) -> Vec<CompletionItem> {
        let n = self.index.node(node);
        let Some(class) = n.field_value("Class").and_then(literal_text) else { return Vec::new() };
        let Some(shape) = self.schema.class(&class) else { return Vec::new() };
        let present: std::collections::HashSet<String> =
            n.fragments.iter().flat_map(|f| &f.definitions).filter_map(field_name).collect();
        let mut items: Vec<(bool, CompletionItem)> = shape
            .fields
            .iter()
            .filter_map(|f| match &f.name {
                crate::schema::types::NamePattern::Exact(name) if !present.contains(name) => {
                    Some((f.required, CompletionItem { label: name.clone(), insert_text: format!("{name} = ") }))
                }
                _ => None,
            })
            .collect();
        items.sort_by_key(|(required, _)| !*required);
        items.into_iter().map(|(_, item)| item).collect()
    }

    fn reachable_data_sources(&self, container: NodeId) -> Vec<CompletionItem> {
        let scope_root = self.index.scope_root_of(container);
        let role_is_input = self.index.node(container).name == "InputSignals";
        let mut items = Vec::new();
        self.index.walk(|id, node| {
            if self.index.scope_root_of(id) != scope_root {
                return;
            }
            let Some(class) = node.field_value("Class").and_then(literal_text) else { return };
            let Some(shape) = self.schema.class(&class) else { return };
            if !shape.is_datasource() {
                return;
            }
            let permitted = shape.direction.map_or(true, |d| if role_is_input { d.permits_input_role() } else { d.permits_output_role() });
            if permitted {
                items.push(CompletionItem { label: node.real_name.clone(), insert_text: node.real_name.clone() });
            }
        });
        items
    }

    fn signal_snippets(&self) -> Vec<CompletionItem> {
        let mut items = Vec::new();
        self.index.walk(|_, node| {
            let Some(class) = node.field_value("Class").and_then(literal_text) else { return };
            let Some(shape) = self.schema.class(&class) else { return };
            if !shape.is_datasource() {
                return;
            }
            let Some(&signals_id) = node.children.get("Signals") else { return };
            for &signal_id in self.index.node(signals_id).children.values() {
                let signal = self.index.node(signal_id);
                items.push(CompletionItem {
                    label: format!("{}:{}", node.real_name, signal.name),
                    insert_text: format!("DataSource = {}\n", node.real_name),
                });
            }
        });
        items
    }

    /// Edits renaming `node`'s declared spelling everywhere it appears:
    /// every fragment that opened it, plus every reference (including
    /// implicit signal-name matches and `Alias` targets) resolving to it.
    pub fn rename(&self, node: NodeId, new_name: &str) -> Vec<TextEdit> {
        let n = self.index.node(node);
        let mut edits = Vec::new();
        let sigil = if n.real_name.starts_with('+') {
            "+"
        } else if n.real_name.starts_with('$') {
            "$"
        } else {
            ""
        };
        let replacement = format!("{sigil}{new_name}");
        for fragment in &n.fragments {
            if let Some(pos) = fragment.object_pos {
                edits.push(TextEdit { file: fragment.file.clone(), position: pos, old_text: n.real_name.clone(), new_text: replacement.clone() });
            }
        }
        for location in self.references(node, false) {
            edits.push(TextEdit { file: location.file, position: location.position, old_text: n.name.clone(), new_text: new_name.to_string() });
        }
        edits
    }

    pub fn document_symbols(&self, file: &std::path::Path) -> Vec<Symbol> {
        let mut symbols = Vec::new();
        self.index.walk(|_, node| {
            if let Some(pos) = node.fragments.iter().find(|f| f.file == file).and_then(|f| f.object_pos) {
                symbols.push(Symbol { name: node.real_name.clone(), kind: self.symbol_kind(node), location: Location { file: file.to_path_buf(), position: pos } });
            }
        });
        symbols
    }

    pub fn workspace_symbols(&self, query: &str) -> Vec<Symbol> {
        let mut symbols = Vec::new();
        self.index.walk(|id, node| {
            if node.is_object() && node.real_name.to_lowercase().contains(&query.to_lowercase()) {
                if let Some(location) = self.definition(id).into_iter().next() {
                    symbols.push(Symbol { name: node.real_name.clone(), kind: self.symbol_kind(node), location });
                }
            }
        });
        symbols
    }

    fn symbol_kind(&self, node: &ProjectNode) -> SymbolKind {
        if let Some(class) = node.field_value("Class").and_then(literal_text) {
            if let Some(shape) = self.schema.class(&class) {
                return match shape.kind.as_deref() {
                    Some("gam") => SymbolKind::Gam,
                    Some("datasource") => SymbolKind::DataSource,
                    Some("application") => SymbolKind::Application,
                    _ => SymbolKind::Object,
                };
            }
        }
        if node.field_value("Type").is_some() {
            SymbolKind::Signal
        } else {
            SymbolKind::Object
        }
    }

    /// GAM↔GAM edges over shared data-source signals: the edge's
    /// direction follows the signal's role (an output-side GAM points to
    /// every input-side GAM reading the same resolved signal).
    pub fn call_hierarchy_outgoing(&self, gam: NodeId) -> Vec<NodeId> {
        self.gam_edges(gam, "OutputSignals", "InputSignals")
    }

    pub fn call_hierarchy_incoming(&self, gam: NodeId) -> Vec<NodeId> {
        self.gam_edges(gam, "InputSignals", "OutputSignals")
    }

    fn gam_edges(&self, gam: NodeId, own_container: &str, peer_container: &str) -> Vec<NodeId> {
        let node = self.index.node(gam);
        let Some(&container_id) = node.children.get(own_container) else { return Vec::new() };
        let mut targets: std::collections::HashSet<NodeId> = std::collections::HashSet::new();
        for &signal_id in self.index.node(container_id).children.values() {
            let signal = self.index.node(signal_id);
            let Some(ds_name) = signal.field_value("DataSource").and_then(literal_text) else { continue };
            let scope_root = self.index.scope_root_of(gam);
            if self.index.resolve_class_like_name(gam, scope_root, &ds_name).is_none() {
                continue;
            }
            let resolved_signal_name = signal.field_value("Alias").and_then(literal_text).unwrap_or_else(|| signal.name.clone());

            self.index.walk(|peer_id, peer| {
                if peer_id == gam {
                    return;
                }
                let Some(&peer_container_id) = peer.children.get(peer_container) else { return };
                for &peer_signal_id in self.index.node(peer_container_id).children.values() {
                    let peer_signal = self.index.node(peer_signal_id);
                    let Some(peer_ds_name) = peer_signal.field_value("DataSource").and_then(literal_text) else { continue };
                    if peer_ds_name != ds_name {
                        continue;
                    }
                    let peer_resolved = peer_signal.field_value("Alias").and_then(literal_text).unwrap_or_else(|| peer_signal.name.clone());
                    if peer_resolved == resolved_signal_name {
                        targets.insert(peer_id);
                    }
                }
            });
        }
        targets.into_iter().collect()
    }
}

fn literal_text(value: &Value) -> Option<String> {
    match value {
        Value::String { value, .. } => Some(value.clone()),
        Value::Reference { name, .. } => Some(name.clone()),
        _ => None,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Int { value, .. } => value.to_string(),
        Value::Float { value, .. } => value.to_string(),
        other => literal_text(other).unwrap_or_default(),
    }
}

fn field_name(def: &Definition) -> Option<String> {
    match def {
        Definition::Field { name, .. } => Some(name.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use std::path::Path;

    fn build(sources: &[(&str, &str)]) -> ProjectIndex {
        let mut index = ProjectIndex::new();
        for (file, source) in sources {
            let (config, docs, pragmas, _) = parse(source);
            index.add_file(Path::new(file), &config, &docs, &pragmas);
        }
        index.resolve_references();
        index.resolve_fields();
        index
    }

    #[test]
    fn definition_returns_object_position() {
        let index = build(&[("a.marte", "#package P\n+N = { Class = X }")]);
        let schema = Schema::compile(crate::schema::types::SchemaDocument::default());
        let surface = QuerySurface::new(&index, &schema);
        let root = index.root();
        let p = index.node(root).children.get("P").copied().unwrap();
        let n = index.node(p).children.get("N").copied().unwrap();
        let defs = surface.definition(n);
        assert_eq!(defs.len(), 1);
    }

    #[test]
    fn hover_strips_namespace_from_class() {
        let index = build(&[("a.marte", "#package P\n+N = { Class = NS::X }")]);
        let schema = Schema::compile(crate::schema::types::SchemaDocument::default());
        let surface = QuerySurface::new(&index, &schema);
        let root = index.root();
        let p = index.node(root).children.get("P").copied().unwrap();
        let n = index.node(p).children.get("N").copied().unwrap();
        assert!(surface.hover(n).contains("Class: `X`"));
    }
}
