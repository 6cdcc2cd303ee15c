//! Validator: per-node structural/schema checks (spec.md §4.G.1-6,9,10)
//! plus whole-application topology checks over the signal graph
//! (§4.G.7-8), driven from a resolved `ProjectIndex`.

use std::collections::{HashMap, HashSet};

use crate::ast::{Definition, Position, Value};
use crate::diagnostics::{self, Diagnostic, Kind};
use crate::index::node::{NodeId, ProjectNode};
use crate::index::ProjectIndex;
use crate::schema::types::Direction;
use crate::schema::Schema;

const SIGNALS_CONTAINERS: &[&str] = &["Signals", "InputSignals", "OutputSignals"];

/// `sizeof` in bytes for the scalar type names signals may declare.
fn scalar_size(type_name: &str) -> Option<u64> {
    Some(match type_name {
        "uint8" | "int8" | "char8" | "bool" => 1,
        "uint16" | "int16" => 2,
        "uint32" | "int32" | "float32" => 4,
        "uint64" | "int64" | "float64" => 8,
        _ => return None,
    })
}

const SCALAR_TYPE_NAMES: &[&str] = &[
    "uint8", "uint16", "uint32", "uint64", "int8", "int16", "int32", "int64", "float32", "float64", "char8", "bool",
];

pub struct Validator<'a> {
    index: &'a ProjectIndex,
    schema: &'a Schema,
}

impl<'a> Validator<'a> {
    pub fn new(index: &'a ProjectIndex, schema: &'a Schema) -> Self {
        Self { index, schema }
    }

    /// Runs every check in tree order, then the whole-application
    /// topology passes, then applies pragma suppressions per node.
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        self.index.walk(|id, node| {
            let node_diags = self.check_node(id, node);
            diagnostics.extend(self.suppress_for_node(node, node_diags));
        });
        let topology_diags = self.check_topology();
        diagnostics.extend(topology_diags);
        diagnostics
    }

    fn suppress_for_node(&self, node: &ProjectNode, diags: Vec<Diagnostic>) -> Vec<Diagnostic> {
        let pragmas: Vec<String> = node.pragmas.iter().map(|a| a.text.clone()).collect();
        let header = self.header_pragmas_for(node);
        diagnostics::apply_suppressions(diags, &pragmas, &header)
    }

    fn header_pragmas_for(&self, node: &ProjectNode) -> Vec<String> {
        let scope_root = self.scope_root_of_node(node);
        self.index.node(scope_root).pragmas.iter().map(|a| a.text.clone()).collect()
    }

    fn scope_root_of_node(&self, node: &ProjectNode) -> NodeId {
        let mut current = node.parent;
        let mut last = self.index.root();
        while let Some(id) = current {
            last = id;
            current = self.index.node(id).parent;
        }
        last
    }

    fn first_object_pos(&self, node: &ProjectNode) -> Position {
        node.fragments.iter().find_map(|f| f.object_pos).unwrap_or(Position::START)
    }

    fn fields<'n>(&self, node: &'n ProjectNode) -> Vec<(&'n str, &'n Value, Position)> {
        node.fragments
            .iter()
            .flat_map(|f| &f.definitions)
            .filter_map(|d| match d {
                Definition::Field { name, value, pos } => Some((name.as_str(), value, *pos)),
                _ => None,
            })
            .collect()
    }

    fn is_signal(&self, node: &ProjectNode) -> bool {
        node.parent.is_some_and(|p| SIGNALS_CONTAINERS.contains(&self.index.node(p).name.as_str()))
    }

    fn is_signals_container(&self, node: &ProjectNode) -> bool {
        SIGNALS_CONTAINERS.contains(&node.name.as_str())
    }

    fn class_shape(&self, node: &ProjectNode) -> Option<&'a crate::schema::types::ClassShape> {
        let class = node.field_value("Class")?;
        let name = literal_text(class)?;
        self.schema.class(&name)
    }

    // -----------------------------------------------------------------
    // Checks 1, 2, 3, 4, 5
    // -----------------------------------------------------------------

    fn check_node(&self, id: NodeId, node: &ProjectNode) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        let file_for_message = node.fragments.first().map(|f| f.file.clone()).unwrap_or_default();

        if node.starts_with_sigil() {
            self.check_object_ness(node, &file_for_message, &mut diags);
        }
        self.check_duplicate_fields(node, &file_for_message, &mut diags);
        if let Some(class) = node.field_value("Class") {
            self.check_schema_unification(node, class, &file_for_message, &mut diags);
        }
        if self.is_signal(node) {
            self.check_signal_structure(node, &file_for_message, &mut diags);
        }
        if self.is_signals_container(node) {
            self.check_signals_purity(node, &file_for_message, &mut diags);
        }
        if self.class_shape(node).is_some_and(|c| c.is_gam()) {
            diags.extend(self.check_gam_wiring(id, node));
        }
        diags
    }

    fn check_object_ness(&self, node: &ProjectNode, file: &std::path::Path, diags: &mut Vec<Diagnostic>) {
        if self.is_signal(node) {
            if node.field_value("Type").is_none() {
                diags.push(Diagnostic::error(
                    Kind::MissingSignalType,
                    file,
                    self.first_object_pos(node),
                    format!("signal `{}` is missing a `Type` field", node.real_name),
                ));
            }
        } else if node.field_value("Class").is_none() {
            diags.push(Diagnostic::error(
                Kind::MissingClass,
                file,
                self.first_object_pos(node),
                format!("`{}` must declare a `Class` field", node.real_name),
            ));
        }
    }

    fn check_duplicate_fields(&self, node: &ProjectNode, file: &std::path::Path, diags: &mut Vec<Diagnostic>) {
        let mut first_seen: HashMap<&str, Position> = HashMap::new();
        for fragment in &node.fragments {
            for def in &fragment.definitions {
                if let Definition::Field { name, pos, .. } = def {
                    match first_seen.get(name.as_str()) {
                        Some(first) => diags.push(Diagnostic::error(
                            Kind::DuplicateField,
                            file,
                            *pos,
                            format!("duplicate field `{name}`, first defined at {first}"),
                        )),
                        None => {
                            first_seen.insert(name.as_str(), *pos);
                        }
                    }
                }
            }
        }
    }

    fn check_schema_unification(&self, node: &ProjectNode, class_value: &Value, file: &std::path::Path, diags: &mut Vec<Diagnostic>) {
        let Some(class_name) = literal_text(class_value) else { return };
        let Some(shape) = self.schema.class(&class_name) else {
            diags.push(Diagnostic::warning(
                Kind::UnknownClass,
                file,
                class_value.pos(),
                format!("unknown class `{class_name}`"),
            ));
            return;
        };
        let fields = self.fields(node);
        let issues = self.schema.unify(shape, fields.iter().map(|(n, v, _)| (*n, *v)));
        for issue in issues {
            diags.push(unify_issue_to_diagnostic(issue, file));
        }
    }

    fn check_signal_structure(&self, node: &ProjectNode, file: &std::path::Path, diags: &mut Vec<Diagnostic>) {
        let Some(type_value) = node.field_value("Type") else { return };
        let Some(type_name) = literal_text(type_value) else { return };
        if !SCALAR_TYPE_NAMES.contains(&type_name.as_str()) {
            diags.push(Diagnostic::error(
                Kind::SignalPropertyMismatch,
                file,
                type_value.pos(),
                format!("`{type_name}` is not a recognised scalar signal type"),
            ));
            return;
        }
        let Some(size) = scalar_size(&type_name) else { return };
        let elements = node.field_value("NumberOfElements").and_then(literal_int).unwrap_or(1).max(1);
        let dimensions = node.field_value("NumberOfDimensions").and_then(literal_int).unwrap_or(1).max(1);
        let expected = size as i64 * elements * dimensions;
        for key in ["ByteSize", "ByteDimension"] {
            if let Some(declared_value) = node.field_value(key) {
                if let Some(declared) = literal_int(declared_value) {
                    if declared != expected {
                        diags.push(Diagnostic::error(
                            Kind::SignalPropertyMismatch,
                            file,
                            declared_value.pos(),
                            format!("`{key}` is {declared}, expected {expected} for `{type_name}`"),
                        ));
                    }
                }
            }
        }
    }

    fn check_signals_purity(&self, node: &ProjectNode, file: &std::path::Path, diags: &mut Vec<Diagnostic>) {
        for fragment in &node.fragments {
            for def in &fragment.definitions {
                if let Definition::Field { name, pos, .. } = def {
                    diags.push(Diagnostic::error(
                        Kind::SignalsContainerPurity,
                        file,
                        *pos,
                        format!("bare field `{name}` is not allowed directly inside a signals container"),
                    ));
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Check 6: GAM signal wiring
    // -----------------------------------------------------------------

    fn check_gam_wiring(&self, gam_id: NodeId, gam: &ProjectNode) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        let file = gam.fragments.first().map(|f| f.file.clone()).unwrap_or_default();
        for (container_name, permits_role) in [
            ("InputSignals", Direction::permits_input_role as fn(Direction) -> bool),
            ("OutputSignals", Direction::permits_output_role as fn(Direction) -> bool),
        ] {
            let Some(&container_id) = gam.children.get(container_name) else { continue };
            let container = self.index.node(container_id);
            for &signal_id in container.children.values() {
                let signal = self.index.node(signal_id);
                diags.extend(self.check_one_signal_wiring(gam_id, signal_id, signal, permits_role, &file));
            }
        }
        diags
    }

    fn check_one_signal_wiring(
        &self,
        gam_id: NodeId,
        signal_id: NodeId,
        signal: &ProjectNode,
        permits_role: fn(Direction) -> bool,
        file: &std::path::Path,
    ) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        let Some(ds_value) = signal.field_value("DataSource") else { return diags };
        let Some(ds_name) = literal_text(ds_value) else { return diags };
        let scope_root = self.index.scope_root_of(gam_id);
        let Some(ds_id) = self.index.resolve_class_like_name(gam_id, scope_root, &ds_name) else {
            diags.push(Diagnostic::error(Kind::UnresolvedReference, file, ds_value.pos(), format!("unresolved data source `{ds_name}`")));
            return diags;
        };
        let ds_node = self.index.node(ds_id);
        let Some(ds_shape) = self.class_shape(ds_node) else { return diags };
        if let Some(direction) = ds_shape.direction {
            if !permits_role(direction) {
                diags.push(Diagnostic::error(
                    Kind::DirectionViolation,
                    file,
                    ds_value.pos(),
                    format!("data source `{ds_name}` direction does not permit this role"),
                ));
            }
        }

        let alias = signal.field_value("Alias").and_then(literal_text);
        let target_name = alias.unwrap_or_else(|| signal.name.clone());
        let Some(&signals_container) = ds_node.children.get("Signals") else { return diags };
        let target = self.index.node(signals_container).children.get(&target_name).copied();

        match target {
            None => {
                diags.push(Diagnostic::warning(
                    Kind::ImplicitSignal,
                    file,
                    self.first_object_pos(signal),
                    format!("signal `{}` is implicitly defined on `{ds_name}`", signal.real_name),
                ));
                if signal.field_value("Type").is_none() {
                    diags.push(Diagnostic::error(
                        Kind::MissingSignalType,
                        file,
                        self.first_object_pos(signal),
                        format!("implicitly defined signal `{}` must declare `Type`", signal.real_name),
                    ));
                }
            }
            Some(target_id) => {
                let target_node = self.index.node(target_id);
                let suppressed = self.cast_suppressed_fields(signal);
                for key in ["Type", "NumberOfElements", "NumberOfDimensions"] {
                    if suppressed.contains(key) {
                        continue;
                    }
                    let (own, their) = (signal.field_value(key), target_node.field_value(key));
                    if let (Some(own), Some(their)) = (own, their) {
                        if own != their {
                            diags.push(Diagnostic::error(
                                Kind::SignalPropertyMismatch,
                                file,
                                own.pos(),
                                format!("`{key}` on `{}` does not match the data source signal", signal.real_name),
                            ));
                        }
                    }
                }
            }
        }
        diags
    }

    /// Field names covered by a `//! cast(defType,curType): reason`
    /// pragma on the signal, suppressing the Type/Elements/Dimensions
    /// mismatch it names.
    fn cast_suppressed_fields(&self, signal: &ProjectNode) -> HashSet<&'static str> {
        let mut out = HashSet::new();
        for pragma in &signal.pragmas {
            if let Some(parsed) = diagnostics::parse_pragma(&pragma.text) {
                if matches!(parsed.action, diagnostics::PragmaAction::Cast) {
                    out.insert("Type");
                }
            }
        }
        out
    }

    // -----------------------------------------------------------------
    // Checks 7, 8, 9: whole-application topology
    // -----------------------------------------------------------------

    fn check_topology(&self) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        let mut referenced_gams: HashSet<NodeId> = HashSet::new();
        let mut referenced_signals: HashSet<NodeId> = HashSet::new();
        let mut datasource_threads: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();

        self.index.walk(|app_id, app_node| {
            if !self.class_shape(app_node).is_some_and(|c| c.name.contains("RealTimeApplication") || c.kind.as_deref() == Some("application")) {
                return;
            }
            let Some(&states_id) = app_node.children.get("States") else { return };
            for &state_id in self.index.node(states_id).children.values() {
                let state = self.index.node(state_id);
                for &thread_id in state.children.values() {
                    self.check_thread(thread_id, &mut diags, &mut referenced_gams, &mut referenced_signals, &mut datasource_threads);
                }
            }
        });

        for (ds_id, threads) in &datasource_threads {
            let ds = self.index.node(*ds_id);
            if threads.len() > 1 && self.class_shape(ds).and_then(|c| c.multithreaded) == Some(false) {
                let file = ds.fragments.first().map(|f| f.file.clone()).unwrap_or_default();
                diags.push(Diagnostic::error(
                    Kind::NonMultithreadedShared,
                    &file,
                    self.first_object_pos(ds),
                    format!("data source `{}` is not multithreaded but is used from {} threads", ds.real_name, threads.len()),
                ));
            }
        }

        self.index.walk(|id, node| {
            if self.class_shape(node).is_some_and(|c| c.is_gam()) && !referenced_gams.contains(&id) {
                let file = node.fragments.first().map(|f| f.file.clone()).unwrap_or_default();
                diags.push(Diagnostic::warning(Kind::UnusedGam, &file, self.first_object_pos(node), format!("GAM `{}` is never used", node.real_name)));
            }
        });
        self.index.walk(|id, node| {
            let Some(parent) = node.parent else { return };
            if self.index.node(parent).name != "Signals" {
                return;
            }
            let Some(ds) = node.parent.and_then(|p| self.index.node(p).parent) else { return };
            if !self.class_shape(self.index.node(ds)).is_some_and(|c| c.is_datasource()) {
                return;
            }
            if !referenced_signals.contains(&id) {
                let file = node.fragments.first().map(|f| f.file.clone()).unwrap_or_default();
                diags.push(Diagnostic::warning(
                    Kind::UnusedSignal,
                    &file,
                    self.first_object_pos(node),
                    format!("signal `{}` is never referenced by a GAM", node.real_name),
                ));
            }
        });

        diags
    }

    fn check_thread(
        &self,
        thread_id: NodeId,
        diags: &mut Vec<Diagnostic>,
        referenced_gams: &mut HashSet<NodeId>,
        referenced_signals: &mut HashSet<NodeId>,
        datasource_threads: &mut HashMap<NodeId, HashSet<NodeId>>,
    ) {
        let thread = self.index.node(thread_id);
        let Some(functions_value) = thread.field_value("Functions") else { return };
        let Value::Array { elements, .. } = functions_value else { return };
        let file = thread.fragments.first().map(|f| f.file.clone()).unwrap_or_default();

        let scope_root = self.index.scope_root_of(thread_id);
        let mut produced: HashSet<NodeId> = HashSet::new();

        for element in elements {
            let Some(gam_name) = literal_text(element) else {
                diags.push(Diagnostic::error(Kind::InvalidFunctionReference, &file, element.pos(), "Functions entry is not a GAM reference"));
                continue;
            };
            let Some(gam_id) = self.index.resolve_scoped_name(thread_id, scope_root, &gam_name) else {
                diags.push(Diagnostic::error(Kind::UnresolvedReference, &file, element.pos(), format!("unresolved GAM `{gam_name}`")));
                continue;
            };
            referenced_gams.insert(gam_id);
            let gam = self.index.node(gam_id);

            for (container, is_output) in [("InputSignals", false), ("OutputSignals", true)] {
                let Some(&container_id) = gam.children.get(container) else { continue };
                for &signal_id in self.index.node(container_id).children.values() {
                    referenced_signals.insert(signal_id);
                    let signal = self.index.node(signal_id);
                    let Some(ds_name) = signal.field_value("DataSource").and_then(literal_text) else { continue };
                    let Some(ds_id) = self.index.resolve_class_like_name(gam_id, scope_root, &ds_name) else { continue };
                    datasource_threads.entry(ds_id).or_default().insert(thread_id);

                    let Some(direction) = self.class_shape(self.index.node(ds_id)).and_then(|c| c.direction) else { continue };
                    if direction != Direction::Inout {
                        continue;
                    }
                    let target_signal = self.resolve_target_signal(ds_id, signal);
                    let Some(target_signal) = target_signal else { continue };
                    if is_output {
                        produced.insert(target_signal);
                    } else if !produced.contains(&target_signal) {
                        diags.push(Diagnostic::error(
                            Kind::InoutConsumedBeforeProduced,
                            &file,
                            element.pos(),
                            format!("INOUT signal `{}` consumed before it is produced in this thread", signal.real_name),
                        ));
                    }
                }
            }
        }
    }

    fn resolve_target_signal(&self, ds_id: NodeId, signal: &ProjectNode) -> Option<NodeId> {
        let ds_node = self.index.node(ds_id);
        let &signals_container = ds_node.children.get("Signals")?;
        let alias = signal.field_value("Alias").and_then(literal_text);
        let target_name = alias.unwrap_or_else(|| signal.name.clone());
        self.index.node(signals_container).children.get(&target_name).copied()
    }
}

fn literal_text(value: &Value) -> Option<String> {
    match value {
        Value::String { value, .. } => Some(value.clone()),
        Value::Reference { name, .. } => Some(name.clone()),
        _ => None,
    }
}

fn literal_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int { value, .. } => Some(*value),
        _ => None,
    }
}

fn unify_issue_to_diagnostic(issue: crate::schema::UnifyIssue, file: &std::path::Path) -> Diagnostic {
    use crate::schema::UnifyIssue;
    match issue {
        UnifyIssue::MissingRequiredField { class, field } => {
            Diagnostic::error(Kind::MissingRequiredField, file, Position::START, format!("`{class}` is missing required field `{field}`"))
        }
        UnifyIssue::UnknownField { class, field, pos } => {
            Diagnostic::error(Kind::ExtraField, file, pos, format!("`{field}` is not a field of closed class `{class}`"))
        }
        UnifyIssue::TypeMismatch { field, expected, pos } => {
            Diagnostic::error(Kind::TypeMismatch, file, pos, format!("field `{field}` does not match expected shape {expected}"))
        }
        UnifyIssue::RegexMismatch { field, pattern, pos } => {
            Diagnostic::error(Kind::RegexViolation, file, pos, format!("field `{field}` does not match pattern `{pattern}`"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::PragmaTable;
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

    fn schema_with_gam_and_ds() -> Schema {
        use crate::schema::types::*;
        let doc = SchemaDocument {
            classes: vec![
                ClassShape {
                    name: "MyGAM".into(),
                    fields: vec![],
                    closed: false,
                    direction: None,
                    multithreaded: None,
                    kind: Some("gam".into()),
                },
                ClassShape {
                    name: "MyDS".into(),
                    fields: vec![],
                    closed: false,
                    direction: Some(Direction::Inout),
                    multithreaded: Some(true),
                    kind: Some("datasource".into()),
                },
            ],
        };
        Schema::compile(doc)
    }

    #[test]
    fn missing_class_is_reported() {
        let index = build_index(&[("a.marte", "#package P\n+N = { Foo = 1 }")]);
        let schema = Schema::compile(crate::schema::types::SchemaDocument::default());
        let diags = Validator::new(&index, &schema).validate();
        assert!(diags.iter().any(|d| d.kind == Kind::MissingClass));
    }

    #[test]
    fn duplicate_field_across_fragments_is_reported() {
        let index = build_index(&[
            ("a.marte", "#package P\n+N = { Class = X\nF = 1 }"),
            ("b.marte", "#package P\n+N = { F = 2 }"),
        ]);
        let schema = Schema::compile(crate::schema::types::SchemaDocument::default());
        let diags = Validator::new(&index, &schema).validate();
        assert!(diags.iter().any(|d| d.kind == Kind::DuplicateField));
    }

    #[test]
    fn signal_missing_type_is_error() {
        let index = build_index(&[("a.marte", "#package P\n+DS = { Class = MyDS\n+Signals = { +A = { } } }")]);
        let schema = schema_with_gam_and_ds();
        let diags = Validator::new(&index, &schema).validate();
        assert!(diags.iter().any(|d| d.kind == Kind::MissingSignalType));
    }

    #[test]
    fn unknown_class_is_warning_not_error() {
        let index = build_index(&[("a.marte", "#package P\n+N = { Class = Bogus }")]);
        let schema = Schema::compile(crate::schema::types::SchemaDocument::default());
        let diags = Validator::new(&index, &schema).validate();
        let found = diags.iter().find(|d| d.kind == Kind::UnknownClass).unwrap();
        assert_eq!(found.level, crate::diagnostics::Level::Warning);
    }
}
