//! The diagnostic type shared by the parser, schema engine, evaluator
//! and validator. Every core operation accumulates these and returns
//! normally rather than bailing out (spec.md §7).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ast::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    Lex,
    Parse,
    DuplicateField,
    MissingClass,
    MissingSignalType,
    UnknownClass,
    TypeMismatch,
    MissingRequiredField,
    ExtraField,
    EnumMismatch,
    UnresolvedReference,
    UnresolvedVariable,
    WrongReferenceKind,
    DirectionViolation,
    SignalPropertyMismatch,
    ImplicitSignal,
    ValueTypeMismatch,
    InoutConsumedBeforeProduced,
    InoutNeverConsumed,
    NonMultithreadedShared,
    InvalidFunctionReference,
    UnusedGam,
    UnusedSignal,
    EvaluatorTypeError,
    DivisionByZero,
    UndefinedVariable,
    RegexViolation,
    SignalsContainerPurity,
    DuplicateVariable,
}

impl Kind {
    /// The pragma-suppression key this kind is grouped under (spec.md
    /// §4.G.10): several concrete kinds share one suppressible bucket.
    pub fn pragma_group(&self) -> &'static str {
        match self {
            Kind::UnusedGam | Kind::UnusedSignal => "unused",
            Kind::ImplicitSignal => "implicit",
            Kind::DirectionViolation | Kind::SignalPropertyMismatch => "parent_mismatch",
            Kind::UnknownClass => "unknown_class",
            _ => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: Level,
    pub kind: Kind,
    pub message: String,
    pub file: PathBuf,
    pub position: Position,
}

impl Diagnostic {
    pub fn error(kind: Kind, file: &Path, position: Position, message: impl Into<String>) -> Self {
        Self { level: Level::Error, kind, message: message.into(), file: file.to_path_buf(), position }
    }

    pub fn warning(kind: Kind, file: &Path, position: Position, message: impl Into<String>) -> Self {
        Self { level: Level::Warning, kind, message: message.into(), file: file.to_path_buf(), position }
    }
}

/// A parsed `//! ignore(kind)` / `//! allow(kind)` pragma.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPragma {
    pub action: PragmaAction,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PragmaAction {
    Ignore,
    Allow,
    /// `//! cast(defType,curType): reason` — handled specially by the
    /// signal-wiring check, not a suppression group.
    Cast,
}

/// Parses one pragma text body (without the leading `//!`) into its
/// action and covered groups. Returns `None` for unrecognised pragmas
/// (treated as plain comments).
pub fn parse_pragma(text: &str) -> Option<ParsedPragma> {
    let text = text.trim();
    let (head, rest) = text.split_once('(')?;
    let args = rest.strip_suffix(')').unwrap_or(rest);
    let groups: Vec<String> = args.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    let action = match head.trim() {
        "ignore" => PragmaAction::Ignore,
        "allow" => PragmaAction::Allow,
        "cast" => PragmaAction::Cast,
        _ => return None,
    };
    Some(ParsedPragma { action, groups })
}

/// Filters `diagnostics` dropping any whose `pragma_group()` is named by
/// an `ignore`/`allow` pragma in `pragmas` (definition-local) or
/// `header_pragmas` (whole-file).
pub fn apply_suppressions(diagnostics: Vec<Diagnostic>, pragmas: &[String], header_pragmas: &[String]) -> Vec<Diagnostic> {
    let mut suppressed = std::collections::HashSet::new();
    for text in pragmas.iter().chain(header_pragmas) {
        if let Some(parsed) = parse_pragma(text) {
            if matches!(parsed.action, PragmaAction::Ignore | PragmaAction::Allow) {
                suppressed.extend(parsed.groups);
            }
        }
    }
    if suppressed.is_empty() {
        return diagnostics;
    }
    diagnostics.into_iter().filter(|d| !suppressed.contains(d.kind.pragma_group())).collect()
}
