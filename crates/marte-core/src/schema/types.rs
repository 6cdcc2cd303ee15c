//! Structural description of a schema document: classes, field shapes,
//! and the metadata tags the validator reads (`direction`, `multithreaded`,
//! `type`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
    Inout,
}

impl Direction {
    pub fn permits_input_role(self) -> bool {
        matches!(self, Direction::In | Direction::Inout)
    }

    pub fn permits_output_role(self) -> bool {
        matches!(self, Direction::Out | Direction::Inout)
    }
}

/// How a field's permitted key(s) are matched: an exact literal name, or
/// a regex-constrained pattern (schema-level "regex-constrained keys").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NamePattern {
    Exact(String),
    Regex { regex: String },
}

/// The allowed shape(s) of a field's value. A `oneOf` list models the
/// "disjunctive value types" requirement; `Regex` models
/// `string & =~"^...$"` constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueShape {
    Int,
    Float,
    Bool,
    String,
    /// A string value additionally constrained by a regex.
    StringRegex { pattern: String },
    Array { of: Box<ValueShape> },
    /// Any of the listed shapes is acceptable (disjunction).
    OneOf { options: Vec<ValueShape> },
    /// A bareword identifier naming another node (by class or by name).
    Reference,
    Any,
}

/// One field a class schema declares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldShape {
    pub name: NamePattern,
    #[serde(default)]
    pub required: bool,
    pub value: ValueShape,
    #[serde(default)]
    pub default: Option<String>,
}

/// A class's full structural shape, plus the metadata tags the
/// validator reads directly (schema is their authoritative source; see
/// `SPEC_FULL.md` open question 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassShape {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldShape>,
    /// When true, fields not declared by this shape are a validator error
    /// ("extra field where the schema is closed").
    #[serde(default)]
    pub closed: bool,
    pub direction: Option<Direction>,
    #[serde(default)]
    pub multithreaded: Option<bool>,
    /// `gam`, `datasource`, `scheduler`, … — the coarse role tag the
    /// validator switches on.
    pub kind: Option<String>,
}

impl ClassShape {
    pub fn field_shape(&self, name: &str) -> Option<&FieldShape> {
        self.fields.iter().find(|f| match &f.name {
            NamePattern::Exact(n) => n == name,
            NamePattern::Regex { regex } => regex::Regex::new(regex).is_ok_and(|re| re.is_match(name)),
        })
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldShape> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn is_datasource(&self) -> bool {
        self.kind.as_deref() == Some("datasource")
    }

    pub fn is_gam(&self) -> bool {
        self.kind.as_deref() == Some("gam")
    }
}

/// A schema document: built-in, or a project overlay in the same format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub classes: Vec<ClassShape>,
}
