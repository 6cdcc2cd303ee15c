//! A GAM wiring a signal against a data source whose declared `Direction`
//! does not permit that role is a `DirectionViolation` (spec.md §4.G.7).

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

fn gam_and_out_only_ds_schema() -> Schema {
    Schema::compile(SchemaDocument {
        classes: vec![
            ClassShape { name: "MyGAM".into(), fields: vec![], closed: false, direction: None, multithreaded: None, kind: Some("gam".into()) },
            ClassShape { name: "MyDS".into(), fields: vec![], closed: false, direction: Some(Direction::Out), multithreaded: Some(true), kind: Some("datasource".into()) },
        ],
    })
}

#[test]
fn reading_from_an_output_only_data_source_is_a_violation() {
    let index = index_of(&[(
        "a.marte",
        "#package P\n\
         +DS = { Class = MyDS\n+Signals = { +X = { Type = int32 } } }\n\
         +G = { Class = MyGAM\n+InputSignals = { +X = { DataSource = DS } } }",
    )]);
    let schema = gam_and_out_only_ds_schema();
    let diags = Validator::new(&index, &schema).validate();
    assert!(diags.iter().any(|d| d.kind == Kind::DirectionViolation));
}

#[test]
fn writing_to_an_output_only_data_source_is_fine() {
    let index = index_of(&[(
        "a.marte",
        "#package P\n\
         +DS = { Class = MyDS\n+Signals = { +X = { Type = int32 } } }\n\
         +G = { Class = MyGAM\n+OutputSignals = { +X = { DataSource = DS } } }",
    )]);
    let schema = gam_and_out_only_ds_schema();
    let diags = Validator::new(&index, &schema).validate();
    assert!(!diags.iter().any(|d| d.kind == Kind::DirectionViolation));
}
