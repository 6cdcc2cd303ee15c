//! Schema engine: compiles the embedded default schema, merges an
//! optional project overlay, and unifies a node's concrete fields against
//! its declared class shape.

pub mod discovery;
pub mod types;

use std::collections::HashMap;
use std::fmt;

use crate::ast::{Position, Value};
use crate::schema::types::{ClassShape, SchemaDocument, ValueShape};

const DEFAULT_SCHEMA_JSON: &str = include_str!("../../assets/default_schema.json");

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    Malformed(String),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::Malformed(msg) => write!(f, "malformed schema: {msg}"),
        }
    }
}

impl std::error::Error for SchemaError {}

/// The unification result for one field: either it matched the class
/// shape, or it is a typed mismatch the validator turns into a
/// position-bearing diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum UnifyIssue {
    MissingRequiredField { class: String, field: String },
    UnknownField { class: String, field: String, pos: Position },
    TypeMismatch { field: String, expected: String, pos: Position },
    RegexMismatch { field: String, pattern: String, pos: Position },
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    classes: HashMap<String, ClassShape>,
}

impl Schema {
    pub fn compile(doc: SchemaDocument) -> Self {
        let mut classes = HashMap::new();
        for class in doc.classes {
            classes.insert(class.name.clone(), class);
        }
        Self { classes }
    }

    pub fn load_default() -> Result<Self, SchemaError> {
        let doc: SchemaDocument =
            serde_json::from_str(DEFAULT_SCHEMA_JSON).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        Ok(Self::compile(doc))
    }

    /// Built-in schema overlaid by every file in `discovery::resolve_overlay_chain`,
    /// in precedence order. A malformed or unreadable overlay is logged and
    /// skipped rather than aborting the whole load (callers are `marte-cli`
    /// and `marte-lsp`, neither of which should refuse to start over one
    /// bad overlay file).
    pub fn load_for_project(project_root: &std::path::Path) -> Result<Self, SchemaError> {
        let mut schema = Self::load_default()?;
        for overlay_path in discovery::resolve_overlay_chain(project_root) {
            match std::fs::read_to_string(&overlay_path) {
                Ok(text) => match serde_json::from_str::<SchemaDocument>(&text) {
                    Ok(doc) => schema.merge_overlay(doc),
                    Err(err) => log::warn!("skipping malformed schema overlay {}: {err}", overlay_path.display()),
                },
                Err(err) => log::warn!("could not read schema overlay {}: {err}", overlay_path.display()),
            }
        }
        Ok(schema)
    }

    /// Overlays `overlay` atop `self`: new classes are added, existing
    /// classes' fields are overridden by name, other attributes replaced
    /// only when the overlay's value is non-empty/`Some`.
    pub fn merge_overlay(&mut self, overlay: SchemaDocument) {
        for incoming in overlay.classes {
            match self.classes.get_mut(&incoming.name) {
                Some(existing) => {
                    for field in incoming.fields {
                        if let Some(slot) = existing.fields.iter_mut().find(|f| same_field_name(f, &field)) {
                            *slot = field;
                        } else {
                            existing.fields.push(field);
                        }
                    }
                    if incoming.direction.is_some() {
                        existing.direction = incoming.direction;
                    }
                    if incoming.multithreaded.is_some() {
                        existing.multithreaded = incoming.multithreaded;
                    }
                    if incoming.kind.is_some() {
                        existing.kind = incoming.kind;
                    }
                    existing.closed = incoming.closed || existing.closed;
                }
                None => {
                    self.classes.insert(incoming.name.clone(), incoming);
                }
            }
        }
    }

    /// Looks up a class, stripping any `NS::` prefix so both spellings
    /// resolve to the same entry.
    pub fn class(&self, name: &str) -> Option<&ClassShape> {
        if let Some(found) = self.classes.get(name) {
            return Some(found);
        }
        let bare = strip_namespace(name);
        self.classes.get(bare)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassShape> {
        self.classes.values()
    }

    /// Unifies `fields` (name -> (value, position)) against `class`'s
    /// shape, returning every mismatch found (not just the first).
    pub fn unify<'a>(&self, class: &ClassShape, fields: impl Iterator<Item = (&'a str, &'a Value)>) -> Vec<UnifyIssue> {
        let mut issues = Vec::new();
        let mut seen = Vec::new();
        for (name, value) in fields {
            seen.push(name.to_string());
            match class.field_shape(name) {
                Some(shape) => {
                    if !value_matches(&shape.value, value) {
                        issues.push(UnifyIssue::TypeMismatch {
                            field: name.to_string(),
                            expected: format!("{:?}", shape.value),
                            pos: value.pos(),
                        });
                    }
                    if let ValueShape::StringRegex { pattern } = &shape.value {
                        if !regex_matches(pattern, value) {
                            issues.push(UnifyIssue::RegexMismatch {
                                field: name.to_string(),
                                pattern: pattern.clone(),
                                pos: value.pos(),
                            });
                        }
                    }
                }
                None if class.closed => {
                    issues.push(UnifyIssue::UnknownField {
                        class: class.name.clone(),
                        field: name.to_string(),
                        pos: value.pos(),
                    });
                }
                None => {}
            }
        }
        for required in class.required_fields() {
            let (present, field_name) = match &required.name {
                types::NamePattern::Exact(n) => (seen.iter().any(|s| s == n), n.clone()),
                types::NamePattern::Regex { regex } => (
                    regex::Regex::new(regex).is_ok_and(|re| seen.iter().any(|s| re.is_match(s))),
                    regex.clone(),
                ),
            };
            if !present {
                issues.push(UnifyIssue::MissingRequiredField { class: class.name.clone(), field: field_name });
            }
        }
        issues
    }
}

fn same_field_name(a: &crate::schema::types::FieldShape, b: &crate::schema::types::FieldShape) -> bool {
    use types::NamePattern::*;
    match (&a.name, &b.name) {
        (Exact(x), Exact(y)) => x == y,
        (Regex { regex: x }, Regex { regex: y }) => x == y,
        _ => false,
    }
}

pub fn strip_namespace(name: &str) -> &str {
    name.rsplit_once("::").map_or(name, |(_, tail)| tail)
}

fn value_matches(shape: &ValueShape, value: &Value) -> bool {
    match shape {
        ValueShape::Int => matches!(value, Value::Int { .. }),
        ValueShape::Float => matches!(value, Value::Int { .. } | Value::Float { .. }),
        ValueShape::Bool => matches!(value, Value::Bool { .. }),
        ValueShape::String | ValueShape::StringRegex { .. } => {
            matches!(value, Value::String { .. } | Value::Reference { .. })
        }
        ValueShape::Array { of } => match value {
            Value::Array { elements, .. } => elements.iter().all(|e| value_matches(of, e)),
            _ => false,
        },
        ValueShape::OneOf { options } => options.iter().any(|o| value_matches(o, value)),
        ValueShape::Reference => matches!(value, Value::Reference { .. }),
        ValueShape::Any => true,
    }
}

fn regex_matches(pattern: &str, value: &Value) -> bool {
    let text = match value {
        Value::String { value, .. } => value.clone(),
        Value::Reference { name, .. } => name.clone(),
        _ => return true,
    };
    regex::Regex::new(pattern).is_ok_and(|re| re.is_match(&text))
}
