//! `marte build --set NAME=VALUE` threads a CLI override through the
//! evaluator before the builder flattens and renders the tree, and the
//! unexpanded `#var`/`@name` syntax never survives into the rendered
//! output (spec.md §4.F, §6).

use std::collections::HashMap;
use std::path::Path;

use marte_core::ast::{Definition, Value};
use marte_core::builder::{render, Builder};
use marte_core::index::ProjectIndex;
use marte_core::parser::parse;

fn index_of(source: &str) -> ProjectIndex {
    let mut index = ProjectIndex::new();
    let (config, docs, pragmas, _) = parse(source);
    index.add_file(Path::new("a.marte"), &config, &docs, &pragmas);
    index.resolve_references();
    index.resolve_fields();
    index
}

#[test]
fn override_replaces_the_variable_default() {
    let index = index_of("#package P\n+N = { Class = X\n#var Period : int = 10\nVal = @Period }");
    let mut overrides = HashMap::new();
    overrides.insert("Period".to_string(), "42".to_string());

    let (root, diagnostics) = Builder::new(&overrides).build(&index);
    assert!(diagnostics.is_empty());

    let n = root.children.get("P").unwrap().children.get("N").unwrap();
    let val = n.definitions.iter().find_map(|d| match d {
        Definition::Field { name, value, .. } if name == "Val" => Some(value.clone()),
        _ => None,
    });
    assert_eq!(val, Some(Value::String { value: "42".to_string(), quoted: true, pos: marte_core::ast::Position::START }));
}

#[test]
fn without_an_override_the_declared_default_is_used() {
    let index = index_of("#package P\n+N = { Class = X\n#var Period : int = 10\nVal = @Period }");
    let overrides = HashMap::new();

    let (root, diagnostics) = Builder::new(&overrides).build(&index);
    assert!(diagnostics.is_empty());

    let n = root.children.get("P").unwrap().children.get("N").unwrap();
    let val = n.definitions.iter().find_map(|d| match d {
        Definition::Field { name, value, .. } if name == "Val" => Some(value.clone()),
        _ => None,
    });
    assert_eq!(val, Some(Value::String { value: "10".to_string(), quoted: true, pos: marte_core::ast::Position::START }));
}

#[test]
fn rendered_output_never_contains_unexpanded_macro_syntax() {
    let index = index_of("#package P\n+N = { Class = X\n#var Period : int = 10\nVal = @Period }");
    let mut overrides = HashMap::new();
    overrides.insert("Period".to_string(), "42".to_string());

    let (root, _) = Builder::new(&overrides).build(&index);
    let rendered = render(&root);

    assert!(rendered.contains("42"));
    assert!(!rendered.contains("#var"));
    assert!(!rendered.contains('@'));
}
