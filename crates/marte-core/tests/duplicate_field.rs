//! A field defined twice on the same node, whether in one file or split
//! across two contributing files, is always an error (spec.md §4.G.2).

use std::path::Path;

use marte_core::diagnostics::Kind;
use marte_core::index::ProjectIndex;
use marte_core::parser::parse;
use marte_core::schema::Schema;
use marte_core::validator::Validator;

fn index_of(sources: &[(&str, &str)]) -> ProjectIndex {
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
fn same_file_duplicate_is_reported() {
    let index = index_of(&[("a.marte", "#package P\n+N = { Class = X\nF = 1\nF = 2 }")]);
    let schema = Schema::compile(Default::default());
    let diags = Validator::new(&index, &schema).validate();
    assert!(diags.iter().any(|d| d.kind == Kind::DuplicateField));
}

#[test]
fn cross_file_duplicate_is_reported() {
    let index = index_of(&[
        ("a.marte", "#package P\n+N = { Class = X\nF = 1 }"),
        ("b.marte", "#package P\n+N = { F = 2 }"),
    ]);
    let schema = Schema::compile(Default::default());
    let diags = Validator::new(&index, &schema).validate();
    assert!(diags.iter().any(|d| d.kind == Kind::DuplicateField));
}

#[test]
fn distinct_field_names_are_not_flagged() {
    let index = index_of(&[
        ("a.marte", "#package P\n+N = { Class = X\nF = 1 }"),
        ("b.marte", "#package P\n+N = { G = 2 }"),
    ]);
    let schema = Schema::compile(Default::default());
    let diags = Validator::new(&index, &schema).validate();
    assert!(!diags.iter().any(|d| d.kind == Kind::DuplicateField));
}
