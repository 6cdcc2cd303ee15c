//! A file with no `#package` header gets its own isolated scope root
//! (spec.md §4.E): its references never escape into the shared project
//! scope, and a same-named node declared there never merges with one
//! declared under a package.

use std::path::Path;

use marte_core::index::ProjectIndex;
use marte_core::parser::parse;

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
fn isolated_reference_does_not_resolve_against_the_project_scope() {
    let index = index_of(&[
        ("project.marte", "#package P\n+Shared = { Class = X }"),
        ("standalone.marte", "Ref = Shared"),
    ]);
    let reference = index.references().iter().find(|r| r.name == "Shared").unwrap();
    assert!(reference.target.is_none());
}

#[test]
fn same_name_in_isolated_and_project_scope_stays_two_distinct_nodes() {
    let index = index_of(&[
        ("project.marte", "#package P\n+N = { Class = X }"),
        ("standalone.marte", "+N = { Class = Y }"),
    ]);
    let root = index.root();
    let project_n = index.node(root).children.get("P").and_then(|&p| index.node(p).children.get("N").copied());
    assert!(project_n.is_some());

    let isolated_root = index.isolated_root(Path::new("standalone.marte")).expect("standalone.marte has its own scope root");
    let isolated_n = index.node(isolated_root).children.get("N").copied();
    assert!(isolated_n.is_some());

    assert_ne!(project_n, isolated_n);
}

#[test]
fn removing_the_isolated_file_clears_its_scope_root() {
    let mut index = index_of(&[("standalone.marte", "+N = { Class = X }")]);
    assert!(index.isolated_root(Path::new("standalone.marte")).is_some());
    index.remove_file(Path::new("standalone.marte"));
    assert!(index.isolated_root(Path::new("standalone.marte")).is_none());
}
