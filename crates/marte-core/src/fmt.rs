//! Line-oriented pretty-printer: round-trips a parsed `Configuration`
//! back to canonical source text without touching macro directives or
//! evaluating anything (spec.md Non-goals: only as much formatter as
//! `marte-cli fmt` needs to round-trip through the parser).

use crate::ast::{Configuration, Definition, TemplateArg, TemplateParam, Value};

const INDENT: &str = "    ";

pub fn format_configuration(config: &Configuration) -> String {
    let mut out = String::new();
    if let Some(package) = &config.package {
        out.push_str("#package ");
        out.push_str(package);
        out.push('\n');
    }
    for def in &config.definitions {
        format_definition(def, 0, &mut out);
    }
    out
}

fn format_definition(def: &Definition, depth: usize, out: &mut String) {
    let indent = INDENT.repeat(depth);
    match def {
        Definition::Field { name, value, .. } => {
            out.push_str(&indent);
            out.push_str(name);
            out.push_str(" = ");
            out.push_str(&format_value(value));
            out.push('\n');
        }
        Definition::ObjectNode { name, subnode, .. } => {
            out.push_str(&indent);
            out.push_str(name);
            out.push_str(" = {\n");
            for child in subnode {
                format_definition(child, depth + 1, out);
            }
            out.push_str(&indent);
            out.push_str("}\n");
        }
        Definition::VariableDefinition { name, type_expr, default, is_const, .. } => {
            out.push_str(&indent);
            out.push_str(if *is_const { "#let " } else { "#var " });
            out.push_str(name);
            out.push_str(" : ");
            out.push_str(type_expr);
            if let Some(default) = default {
                out.push_str(" = ");
                out.push_str(&format_value(default));
            }
            out.push('\n');
        }
        Definition::If { condition, then_branch, else_branch, .. } => {
            out.push_str(&indent);
            out.push_str("#if ");
            out.push_str(&format_value(condition));
            out.push_str(" {\n");
            for child in then_branch {
                format_definition(child, depth + 1, out);
            }
            out.push_str(&indent);
            out.push('}');
            if !else_branch.is_empty() {
                out.push_str(" #else {\n");
                for child in else_branch {
                    format_definition(child, depth + 1, out);
                }
                out.push_str(&indent);
                out.push('}');
            }
            out.push('\n');
        }
        Definition::Foreach { key_var, value_var, iterable, body, .. } => {
            out.push_str(&indent);
            out.push_str("#foreach ");
            if let Some(key_var) = key_var {
                out.push_str(key_var);
                out.push_str(", ");
            }
            out.push_str(value_var);
            out.push_str(" in ");
            out.push_str(&format_value(iterable));
            out.push_str(" {\n");
            for child in body {
                format_definition(child, depth + 1, out);
            }
            out.push_str(&indent);
            out.push_str("}\n");
        }
        Definition::TemplateDefinition { name, parameters, body, .. } => {
            out.push_str(&indent);
            out.push_str("#template ");
            out.push_str(name);
            out.push('(');
            out.push_str(&parameters.iter().map(format_template_param).collect::<Vec<_>>().join(", "));
            out.push_str(") {\n");
            for child in body {
                format_definition(child, depth + 1, out);
            }
            out.push_str(&indent);
            out.push_str("}\n");
        }
        Definition::TemplateInstantiation { instance_name, template_name, arguments, .. } => {
            out.push_str(&indent);
            out.push_str(&format_value(instance_name));
            out.push_str(" = #use ");
            out.push_str(template_name);
            out.push('(');
            out.push_str(&arguments.iter().map(format_template_arg).collect::<Vec<_>>().join(", "));
            out.push_str(")\n");
        }
    }
}

fn format_template_param(param: &TemplateParam) -> String {
    let mut rendered = param.name.clone();
    if let Some(type_expr) = &param.type_expr {
        rendered.push_str(" : ");
        rendered.push_str(type_expr);
    }
    if let Some(default) = &param.default {
        rendered.push_str(" = ");
        rendered.push_str(&format_value(default));
    }
    rendered
}

fn format_template_arg(arg: &TemplateArg) -> String {
    format!("{} = {}", arg.name, format_value(&arg.value))
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String { value, quoted, .. } => {
            if *quoted {
                format!("\"{value}\"")
            } else {
                value.clone()
            }
        }
        Value::Int { raw, .. } => raw.clone(),
        Value::Float { raw, .. } => raw.clone(),
        Value::Bool { value, .. } => value.to_string(),
        Value::Reference { name, .. } => name.clone(),
        Value::VariableReference { name, .. } => format!("@{name}"),
        Value::Array { elements, .. } => {
            format!("{{{}}}", elements.iter().map(format_value).collect::<Vec<_>>().join(", "))
        }
        Value::Binary { op, lhs, rhs, .. } => format!("({} {} {})", format_value(lhs), op.symbol(), format_value(rhs)),
        Value::Unary { op, rhs, .. } => format!("{}{}", op.symbol(), format_value(rhs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn round_trips_a_simple_object() {
        let source = "#package P\n+N = {\n    Class = X\n    F = 1\n}\n";
        let (config, _, _, _) = parse(source);
        assert_eq!(format_configuration(&config), source);
    }

    #[test]
    fn preserves_macro_directives_unexpanded() {
        let source = "#var Period : int = 10\n+N = {\n    Class = X\n    Val = @Period\n}\n";
        let (config, _, _, _) = parse(source);
        let rendered = format_configuration(&config);
        assert!(rendered.contains("#var Period"));
        assert!(rendered.contains("@Period"));
    }
}
