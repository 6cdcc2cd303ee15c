//! An `Inout` data source signal must be produced by some GAM in a
//! thread's `Functions` list before any earlier entry consumes it
//! (spec.md §4.G.8).

use std::path::Path;

use marte_core::diagnostics::Kind;
use marte_core::index::ProjectIndex;
use marte_core::parser::parse;
use marte_core::schema::types::{ClassShape, Direction, SchemaDocument};
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

fn schema() -> Schema {
    Schema::compile(SchemaDocument {
        classes: vec![
            ClassShape { name: "MyGAM".into(), fields: vec![], closed: false, direction: None, multithreaded: None, kind: Some("gam".into()) },
            ClassShape {
                name: "MyDS".into(),
                fields: vec![],
                closed: false,
                direction: Some(Direction::Inout),
                multithreaded: Some(true),
                kind: Some("datasource".into()),
            },
            ClassShape { name: "RealTimeApplication".into(), fields: vec![], closed: false, direction: None, multithreaded: None, kind: Some("application".into()) },
        ],
    })
}

const DATA_SOURCE: &str = "+DS = { Class = MyDS\n+Signals = { +Sig = { Type = int32 } } }";

fn application_with(functions_order: &str) -> String {
    format!(
        "#package P\n\
         {DATA_SOURCE}\n\
         +Reader = {{ Class = MyGAM\n+InputSignals = {{ +Sig = {{ DataSource = DS }} }} }}\n\
         +Writer = {{ Class = MyGAM\n+OutputSignals = {{ +Sig = {{ DataSource = DS }} }} }}\n\
         +App = {{ Class = RealTimeApplication\n\
           +States = {{ +S1 = {{ +Thread1 = {{ Class = RealTimeThread\nFunctions = {{ {functions_order} }} }} }} }} }}"
    )
}

#[test]
fn consuming_before_producing_in_the_same_thread_is_an_error() {
    let source = application_with("Reader, Writer");
    let index = index_of(&[("a.marte", &source)]);
    let diags = Validator::new(&index, &schema()).validate();
    assert!(diags.iter().any(|d| d.kind == Kind::InoutConsumedBeforeProduced));
}

#[test]
fn producing_before_consuming_in_the_same_thread_is_fine() {
    let source = application_with("Writer, Reader");
    let index = index_of(&[("a.marte", &source)]);
    let diags = Validator::new(&index, &schema()).validate();
    assert!(!diags.iter().any(|d| d.kind == Kind::InoutConsumedBeforeProduced));
}
