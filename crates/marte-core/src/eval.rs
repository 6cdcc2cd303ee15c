//! Value evaluation and macro expansion (spec.md §4.F). Runs at build
//! time over a merged, pre-expansion definition tree: the Index keeps
//! `#if`/`#foreach`/`#template`/`#use` verbatim, and this module turns
//! them into plain `Field`/`ObjectNode` definitions.

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;

use crate::ast::{BinOp, Definition, Position, TemplateParam, UnaryOp, Value};
use crate::diagnostics::{Diagnostic, Kind};

/// A value after evaluation: a superset of the parser's `Value` with
/// arithmetic folded and an explicit "could not be evaluated" state
/// instead of a propagated `Result` (every failure still yields a usable
/// placeholder plus a diagnostic, per spec.md §7).
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Reference(String),
    Array(Vec<EvalValue>),
    Unevaluable,
}

impl EvalValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            EvalValue::Int(_) => "int",
            EvalValue::Float(_) => "float",
            EvalValue::String(_) => "string",
            EvalValue::Bool(_) => "bool",
            EvalValue::Reference(_) => "reference",
            EvalValue::Array(_) => "array",
            EvalValue::Unevaluable => "unevaluable",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EvalValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn display(&self) -> String {
        match self {
            EvalValue::Int(v) => v.to_string(),
            EvalValue::Float(v) => v.to_string(),
            EvalValue::String(v) => v.clone(),
            EvalValue::Bool(v) => v.to_string(),
            EvalValue::Reference(v) => v.clone(),
            EvalValue::Array(items) => format!("{{{}}}", items.iter().map(EvalValue::display).collect::<Vec<_>>().join(", ")),
            EvalValue::Unevaluable => "<unevaluable>".to_string(),
        }
    }

    fn as_literal(&self) -> Value {
        let pos = Position::START;
        match self {
            EvalValue::Int(v) => Value::Int { value: *v, raw: v.to_string(), pos },
            EvalValue::Float(v) => Value::Float { value: *v, raw: v.to_string(), pos },
            EvalValue::String(v) => Value::String { value: v.clone(), quoted: true, pos },
            EvalValue::Bool(v) => Value::Bool { value: *v, pos },
            EvalValue::Reference(v) => Value::Reference { name: v.clone(), pos },
            EvalValue::Array(items) => Value::Array { elements: items.iter().map(EvalValue::as_literal).collect(), pos },
            EvalValue::Unevaluable => Value::Reference { name: String::new(), pos },
        }
    }
}

/// Variables visible while evaluating one scope: local bindings first
/// (loop/template parameters), then the enclosing node chain, with a
/// CLI override map applied only to `#var` (never `#let`) defaults.
#[derive(Debug, Clone, Default)]
pub struct VarScope {
    locals: IndexMap<String, EvalValue>,
    parent: Option<Box<VarScope>>,
}

impl VarScope {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self { locals: IndexMap::new(), parent: Some(Box::new(self.clone())) }
    }

    pub fn bind(&mut self, name: impl Into<String>, value: EvalValue) {
        self.locals.insert(name.into(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<&EvalValue> {
        self.locals.get(name).or_else(|| self.parent.as_deref().and_then(|p| p.lookup(name)))
    }
}

/// A registered `#template` body, captured once per file-set before
/// expansion so `#use` can find it regardless of declaration order.
#[derive(Debug, Clone)]
pub struct TemplateEntry {
    pub parameters: Vec<TemplateParam>,
    pub body: Vec<Definition>,
}

pub struct Evaluator<'a> {
    /// CLI `-D key=val` overrides, applied to `#var` defaults only.
    pub overrides: &'a HashMap<String, String>,
    templates: HashMap<String, TemplateEntry>,
    declared_consts: std::collections::HashSet<String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(overrides: &'a HashMap<String, String>) -> Self {
        Self { overrides, templates: HashMap::new(), declared_consts: std::collections::HashSet::new() }
    }

    pub fn evaluate(&self, value: &Value, scope: &VarScope, file: &Path, diagnostics: &mut Vec<Diagnostic>) -> EvalValue {
        match value {
            Value::Int { value, .. } => EvalValue::Int(*value),
            Value::Float { value, .. } => EvalValue::Float(*value),
            Value::String { value, .. } => EvalValue::String(value.clone()),
            Value::Bool { value, .. } => EvalValue::Bool(*value),
            Value::Reference { name, .. } => EvalValue::Reference(name.clone()),
            Value::VariableReference { name, pos } => match scope.lookup(name) {
                Some(v) => v.clone(),
                None => {
                    diagnostics.push(Diagnostic::error(
                        Kind::UndefinedVariable,
                        file,
                        *pos,
                        format!("undefined variable `{name}`"),
                    ));
                    EvalValue::Unevaluable
                }
            },
            Value::Array { elements, .. } => {
                EvalValue::Array(elements.iter().map(|e| self.evaluate(e, scope, file, diagnostics)).collect())
            }
            Value::Unary { op, rhs, pos } => {
                let rhs = self.evaluate(rhs, scope, file, diagnostics);
                match (op, &rhs) {
                    (UnaryOp::Neg, EvalValue::Int(v)) => EvalValue::Int(-v),
                    (UnaryOp::Neg, EvalValue::Float(v)) => EvalValue::Float(-v),
                    (UnaryOp::Not, EvalValue::Bool(v)) => EvalValue::Bool(!v),
                    _ => {
                        diagnostics.push(Diagnostic::error(
                            Kind::EvaluatorTypeError,
                            file,
                            *pos,
                            format!("operator not applicable to {}", rhs.type_name()),
                        ));
                        EvalValue::Unevaluable
                    }
                }
            }
            Value::Binary { op, lhs, rhs, pos } => {
                let lhs = self.evaluate(lhs, scope, file, diagnostics);
                let rhs = self.evaluate(rhs, scope, file, diagnostics);
                self.apply_binop(*op, lhs, rhs, *pos, file, diagnostics)
            }
        }
    }

    fn apply_binop(
        &self,
        op: BinOp,
        lhs: EvalValue,
        rhs: EvalValue,
        pos: Position,
        file: &Path,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> EvalValue {
        use BinOp::*;
        if matches!(lhs, EvalValue::Unevaluable) || matches!(rhs, EvalValue::Unevaluable) {
            return EvalValue::Unevaluable;
        }
        if matches!(op, Concat) {
            return EvalValue::String(format!("{}{}", lhs.display(), rhs.display()));
        }
        let numeric = matches!(
            (&lhs, &rhs),
            (EvalValue::Int(_) | EvalValue::Float(_), EvalValue::Int(_) | EvalValue::Float(_))
        );
        if matches!(op, Eq | Ne) {
            return EvalValue::Bool(if op == Eq { lhs == rhs } else { lhs != rhs });
        }
        if !numeric {
            diagnostics.push(Diagnostic::error(
                Kind::EvaluatorTypeError,
                file,
                pos,
                format!("operator not applicable between {} and {}", lhs.type_name(), rhs.type_name()),
            ));
            return EvalValue::Unevaluable;
        }
        let both_int = matches!((&lhs, &rhs), (EvalValue::Int(_), EvalValue::Int(_)));
        let as_f64 = |v: &EvalValue| match v {
            EvalValue::Int(i) => *i as f64,
            EvalValue::Float(f) => *f,
            _ => unreachable!(),
        };
        match op {
            Mul | Add | Sub => {
                if both_int {
                    let (a, b) = (as_f64(&lhs) as i64, as_f64(&rhs) as i64);
                    EvalValue::Int(match op {
                        Mul => a.wrapping_mul(b),
                        Add => a.wrapping_add(b),
                        Sub => a.wrapping_sub(b),
                        _ => unreachable!(),
                    })
                } else {
                    let (a, b) = (as_f64(&lhs), as_f64(&rhs));
                    EvalValue::Float(match op {
                        Mul => a * b,
                        Add => a + b,
                        Sub => a - b,
                        _ => unreachable!(),
                    })
                }
            }
            Div => {
                let (a, b) = (as_f64(&lhs), as_f64(&rhs));
                if b == 0.0 {
                    diagnostics.push(Diagnostic::error(Kind::DivisionByZero, file, pos, "division by zero"));
                    return EvalValue::Unevaluable;
                }
                if both_int {
                    EvalValue::Int(a as i64 / b as i64)
                } else {
                    EvalValue::Float(a / b)
                }
            }
            Mod => {
                let (a, b) = (as_f64(&lhs) as i64, as_f64(&rhs) as i64);
                if b == 0 {
                    diagnostics.push(Diagnostic::error(Kind::DivisionByZero, file, pos, "modulo by zero"));
                    return EvalValue::Unevaluable;
                }
                EvalValue::Int(a % b)
            }
            Lt | Gt | Le | Ge => {
                let (a, b) = (as_f64(&lhs), as_f64(&rhs));
                EvalValue::Bool(match op {
                    Lt => a < b,
                    Gt => a > b,
                    Le => a <= b,
                    Ge => a >= b,
                    _ => unreachable!(),
                })
            }
            BitAnd | BitOr | BitXor => {
                if !both_int {
                    diagnostics.push(Diagnostic::error(Kind::EvaluatorTypeError, file, pos, "bitwise operator requires integers"));
                    return EvalValue::Unevaluable;
                }
                let (a, b) = (as_f64(&lhs) as i64, as_f64(&rhs) as i64);
                EvalValue::Int(match op {
                    BitAnd => a & b,
                    BitOr => a | b,
                    BitXor => a ^ b,
                    _ => unreachable!(),
                })
            }
            Concat | Eq | Ne => unreachable!("handled above"),
        }
    }

    /// Resolves a `#var`/`#let` default, applying the CLI override map
    /// to `#var` only. A later duplicate `#let` of an already-declared
    /// constant name is reported by the caller as a duplicate-variable
    /// error; overriding a constant by CLI is a silent no-op.
    pub fn resolve_variable_default(
        &mut self,
        name: &str,
        is_const: bool,
        default: Option<&Value>,
        scope: &VarScope,
        file: &Path,
        pos: Position,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> EvalValue {
        if is_const {
            if !self.declared_consts.insert(name.to_string()) {
                diagnostics.push(Diagnostic::error(Kind::DuplicateVariable, file, pos, format!("`{name}` is already declared as a constant")));
            }
        } else if let Some(raw) = self.overrides.get(name) {
            return EvalValue::String(raw.clone());
        }
        default.map_or(EvalValue::Unevaluable, |d| self.evaluate(d, scope, file, diagnostics))
    }

    fn register_templates(&mut self, defs: &[Definition]) {
        for def in defs {
            if let Definition::TemplateDefinition { name, parameters, body, .. } = def {
                self.templates.insert(name.clone(), TemplateEntry { parameters: parameters.clone(), body: body.clone() });
            }
        }
    }

    /// Expands `#if`/`#foreach`/`#template`/`#use` within `defs`,
    /// returning a tree containing only `Field`/`ObjectNode`/
    /// `VariableDefinition`.
    pub fn expand(&mut self, defs: &[Definition], scope: &VarScope, file: &Path, diagnostics: &mut Vec<Diagnostic>) -> Vec<Definition> {
        self.register_templates(defs);
        self.expand_inner(defs, scope, file, diagnostics)
    }

    fn expand_inner(&mut self, defs: &[Definition], scope: &VarScope, file: &Path, diagnostics: &mut Vec<Diagnostic>) -> Vec<Definition> {
        let mut out = Vec::new();
        for def in defs {
            match def {
                Definition::Field { name, value, pos } => {
                    let resolved_value = match value {
                        Value::VariableReference { .. } | Value::Binary { .. } | Value::Unary { .. } => {
                            self.evaluate(value, scope, file, diagnostics).as_literal()
                        }
                        _ => value.clone(),
                    };
                    out.push(Definition::Field { name: name.clone(), value: resolved_value, pos: *pos });
                }
                Definition::VariableDefinition { .. } => out.push(def.clone()),
                Definition::ObjectNode { name, name_pos, object_pos, subnode, pos } => {
                    let expanded = self.expand_inner(subnode, scope, file, diagnostics);
                    out.push(Definition::ObjectNode {
                        name: name.clone(),
                        name_pos: *name_pos,
                        object_pos: *object_pos,
                        subnode: expanded,
                        pos: *pos,
                    });
                }
                Definition::If { condition, then_branch, else_branch, .. } => {
                    let cond = self.evaluate(condition, scope, file, diagnostics);
                    match cond.as_bool() {
                        Some(true) => out.extend(self.expand_inner(then_branch, scope, file, diagnostics)),
                        Some(false) => out.extend(self.expand_inner(else_branch, scope, file, diagnostics)),
                        None => {
                            diagnostics.push(Diagnostic::error(
                                Kind::EvaluatorTypeError,
                                file,
                                condition.pos(),
                                "#if condition did not evaluate to a boolean",
                            ));
                        }
                    }
                }
                Definition::Foreach { key_var, value_var, iterable, body, pos } => {
                    let values = self.evaluate(iterable, scope, file, diagnostics);
                    let EvalValue::Array(items) = values else {
                        diagnostics.push(Diagnostic::error(Kind::EvaluatorTypeError, file, *pos, "#foreach iterable is not an array"));
                        continue;
                    };
                    for (index, item) in items.into_iter().enumerate() {
                        let mut iter_scope = scope.child();
                        iter_scope.bind(value_var.clone(), item);
                        if let Some(key) = key_var {
                            iter_scope.bind(key.clone(), EvalValue::Int(index as i64));
                        }
                        out.extend(self.expand_inner(body, &iter_scope, file, diagnostics));
                    }
                }
                Definition::TemplateDefinition { .. } => {} // registered up front, not emitted
                Definition::TemplateInstantiation { instance_name, template_name, arguments, pos } => {
                    let Some(template) = self.templates.get(template_name).cloned() else {
                        diagnostics.push(Diagnostic::error(
                            Kind::UnresolvedReference,
                            file,
                            *pos,
                            format!("unresolved template `{template_name}`"),
                        ));
                        continue;
                    };
                    let mut call_scope = scope.child();
                    let mut supplied = std::collections::HashSet::new();
                    for arg in arguments {
                        let value = self.evaluate(&arg.value, scope, file, diagnostics);
                        call_scope.bind(arg.name.clone(), value);
                        supplied.insert(arg.name.clone());
                    }
                    for param in &template.parameters {
                        if supplied.contains(&param.name) {
                            continue;
                        }
                        let value = param
                            .default
                            .as_ref()
                            .map_or(EvalValue::Unevaluable, |d| self.evaluate(d, scope, file, diagnostics));
                        call_scope.bind(param.name.clone(), value);
                    }
                    let name_value = self.evaluate(instance_name, &call_scope, file, diagnostics);
                    let name = name_value.display();
                    let body = self.expand_inner(&template.body, &call_scope, file, diagnostics);
                    out.push(Definition::ObjectNode { name, name_pos: *pos, object_pos: *pos, subnode: body, pos: *pos });
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Value {
        Value::Int { value: v, raw: v.to_string(), pos: Position::START }
    }

    #[test]
    fn arithmetic_auto_promotes_to_float() {
        let overrides = HashMap::new();
        let eval = Evaluator::new(&overrides);
        let mut diags = Vec::new();
        let expr = Value::Binary {
            op: BinOp::Div,
            lhs: Box::new(int(3)),
            rhs: Box::new(Value::Float { value: 2.0, raw: "2.0".into(), pos: Position::START }),
            pos: Position::START,
        };
        let result = eval.evaluate(&expr, &VarScope::root(), Path::new("a.marte"), &mut diags);
        assert_eq!(result, EvalValue::Float(1.5));
        assert!(diags.is_empty());
    }

    #[test]
    fn division_by_zero_is_unevaluable() {
        let overrides = HashMap::new();
        let eval = Evaluator::new(&overrides);
        let mut diags = Vec::new();
        let expr = Value::Binary { op: BinOp::Div, lhs: Box::new(int(1)), rhs: Box::new(int(0)), pos: Position::START };
        let result = eval.evaluate(&expr, &VarScope::root(), Path::new("a.marte"), &mut diags);
        assert_eq!(result, EvalValue::Unevaluable);
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn cli_override_replaces_var_but_not_let() {
        let mut overrides = HashMap::new();
        overrides.insert("Period".to_string(), "42".to_string());
        let mut eval = Evaluator::new(&overrides);
        let mut diags = Vec::new();
        let scope = VarScope::root();
        let value = eval.resolve_variable_default(
            "Period",
            false,
            Some(&int(10)),
            &scope,
            Path::new("a.marte"),
            Position::START,
            &mut diags,
        );
        assert_eq!(value, EvalValue::String("42".to_string()));

        overrides.insert("Limit".to_string(), "99".to_string());
        let mut eval = Evaluator::new(&overrides);
        let value = eval.resolve_variable_default(
            "Limit",
            true,
            Some(&int(5)),
            &scope,
            Path::new("a.marte"),
            Position::START,
            &mut diags,
        );
        assert_eq!(value, EvalValue::Int(5));
    }

    #[test]
    fn foreach_binds_index_and_value() {
        let overrides = HashMap::new();
        let mut eval = Evaluator::new(&overrides);
        let mut diags = Vec::new();
        let defs = vec![Definition::Foreach {
            key_var: Some("i".to_string()),
            value_var: "v".to_string(),
            iterable: Value::Array { elements: vec![int(10), int(20)], pos: Position::START },
            body: vec![Definition::Field {
                name: "V".to_string(),
                value: Value::VariableReference { name: "v".to_string(), pos: Position::START },
                pos: Position::START,
            }],
            pos: Position::START,
        }];
        let expanded = eval.expand(&defs, &VarScope::root(), Path::new("a.marte"), &mut diags);
        assert_eq!(expanded.len(), 2);
    }
}
