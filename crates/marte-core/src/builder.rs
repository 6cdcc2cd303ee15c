//! Builder: merges an ordered file list and a CLI override map into one
//! expanded configuration tree (spec.md §4.J). Runs after
//! `ResolveReferences`/`ResolveFields`; this module only macro-expands
//! and re-orders, it never re-indexes.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::ast::Definition;
use crate::diagnostics::Diagnostic;
use crate::eval::{Evaluator, VarScope};
use crate::index::node::{NodeId, ProjectNode};
use crate::index::ProjectIndex;

/// One node of the flattened, fully macro-expanded output tree: project
/// scope and every isolated-file scope are merged as siblings under a
/// single synthetic root (spec.md §4.J: "project + isolated roots
/// flattened").
#[derive(Debug, Clone, Default)]
pub struct MergedNode {
    pub name: String,
    pub real_name: String,
    pub definitions: Vec<Definition>,
    pub children: IndexMap<String, MergedNode>,
}

pub struct Builder<'a> {
    overrides: &'a HashMap<String, String>,
}

impl<'a> Builder<'a> {
    pub fn new(overrides: &'a HashMap<String, String>) -> Self {
        Self { overrides }
    }

    pub fn build(&self, index: &ProjectIndex) -> (MergedNode, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();
        let mut evaluator = Evaluator::new(self.overrides);
        let mut root = self.build_node(index.root(), index, &mut evaluator, &VarScope::root(), &mut diagnostics);

        for isolated_root in index.isolated_roots() {
            let expanded = self.build_node(isolated_root, index, &mut evaluator, &VarScope::root(), &mut diagnostics);
            for (name, child) in expanded.children {
                root.children.insert(name, child);
            }
            root.definitions.extend(expanded.definitions);
        }
        (root, diagnostics)
    }

    fn build_node(
        &self,
        id: NodeId,
        index: &ProjectIndex,
        evaluator: &mut Evaluator<'_>,
        scope: &VarScope,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> MergedNode {
        let node = index.node(id);
        let ordered = self.ordered_definitions(node);
        let file = node.fragments.first().map(|f| f.file.clone()).unwrap_or_default();

        let mut node_scope = scope.child();
        for (name, info) in &node.variables {
            let value = evaluator.resolve_variable_default(
                name,
                info.is_const,
                info.default.as_ref(),
                scope,
                &info.file,
                info.pos,
                diagnostics,
            );
            node_scope.bind(name.clone(), value);
        }

        let expanded = evaluator.expand(&ordered, &node_scope, &file, diagnostics);

        let mut children = IndexMap::new();
        for (name, &child_id) in &node.children {
            children.insert(name.clone(), self.build_node(child_id, index, evaluator, &node_scope, diagnostics));
        }

        MergedNode { name: node.name.clone(), real_name: node.real_name.clone(), definitions: expanded, children }
    }

    /// Orders `node`'s fragments so the one declaring `Class` comes
    /// first (stable otherwise), then concatenates their definitions in
    /// fragment order, preserving source order within each fragment.
    fn ordered_definitions(&self, node: &ProjectNode) -> Vec<Definition> {
        let mut fragments: Vec<&crate::index::node::Fragment> = node.fragments.iter().collect();
        fragments.sort_by_key(|f| !f.definitions.iter().any(|d| matches!(d, Definition::Field { name, .. } if name == "Class")));
        fragments.into_iter().flat_map(|f| f.definitions.clone()).collect()
    }
}

/// Renders a fully expanded tree back to MARTe source text, the way
/// `marte-cli build -o` emits its output: one indentation level per
/// nesting depth, fields before child objects, matching source order.
pub fn render(root: &MergedNode) -> String {
    let mut out = String::new();
    for (name, child) in &root.children {
        render_node(name, child, 0, &mut out);
    }
    out
}

fn render_node(name: &str, node: &MergedNode, depth: usize, out: &mut String) {
    let indent = "    ".repeat(depth);
    out.push_str(&indent);
    out.push_str(&node.real_name_or(name));
    out.push_str(" = {\n");
    for def in &node.definitions {
        if let Definition::Field { name, value, .. } = def {
            out.push_str(&indent);
            out.push_str("    ");
            out.push_str(name);
            out.push_str(" = ");
            out.push_str(&render_value(value));
            out.push('\n');
        }
    }
    for (child_name, child) in &node.children {
        render_node(child_name, child, depth + 1, out);
    }
    out.push_str(&indent);
    out.push_str("}\n");
}

fn render_value(value: &crate::ast::Value) -> String {
    use crate::ast::Value;
    match value {
        Value::String { value, .. } => format!("\"{value}\""),
        Value::Int { raw, .. } => raw.clone(),
        Value::Float { raw, .. } => raw.clone(),
        Value::Bool { value, .. } => value.to_string(),
        Value::Reference { name, .. } => name.clone(),
        Value::VariableReference { name, .. } => format!("@{name}"),
        Value::Array { elements, .. } => format!("{{{}}}", elements.iter().map(render_value).collect::<Vec<_>>().join(", ")),
        Value::Binary { .. } | Value::Unary { .. } => String::new(),
    }
}

impl MergedNode {
    fn real_name_or(&self, fallback: &str) -> String {
        if self.real_name.is_empty() {
            fallback.to_string()
        } else {
            self.real_name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use std::path::Path;

    fn build_index(sources: &[(&str, &str)]) -> ProjectIndex {
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
    fn class_fragment_is_emitted_first() {
        let index = build_index(&[
            ("a.marte", "#package P\n+N = { F = 1 }"),
            ("b.marte", "#package P\n+N = { Class = X }"),
        ]);
        let overrides = HashMap::new();
        let (root, diags) = Builder::new(&overrides).build(&index);
        assert!(diags.is_empty());
        let p = root.children.get("P").unwrap();
        let n = p.children.get("N").unwrap();
        let first_is_class = matches!(n.definitions.first(), Some(Definition::Field { name, .. }) if name == "Class");
        assert!(first_is_class);
    }

    #[test]
    fn cli_override_is_applied_through_build() {
        let index = build_index(&[("a.marte", "#package P\n+N = { Class = X\n#var Period : int = 10\nVal = @Period }")]);
        let mut overrides = HashMap::new();
        overrides.insert("Period".to_string(), "42".to_string());
        let (root, _) = Builder::new(&overrides).build(&index);
        let p = root.children.get("P").unwrap();
        let n = p.children.get("N").unwrap();
        let val = n.definitions.iter().find_map(|d| match d {
            Definition::Field { name, value, .. } if name == "Val" => Some(value.clone()),
            _ => None,
        });
        assert_eq!(val, Some(crate::ast::Value::String { value: "42".to_string(), quoted: true, pos: crate::ast::Position::START }));
    }
}
