//! `View::apply_incremental_edit` patches the stored text and republishes
//! a fresh snapshot (spec.md §4.H: "a full re-parse per file"); a
//! cancelled token leaves the previously published snapshot untouched.

use std::path::Path;
use std::sync::Arc;

use marte_core::ast::Value;
use marte_core::diagnostics::Kind;
use marte_core::schema::types::SchemaDocument;
use marte_core::schema::Schema;
use marte_core::session::{CancellationToken, TextEdit, View};

fn fresh_view() -> View {
    let schema = Arc::new(Schema::compile(SchemaDocument::default()));
    View::new("/project", schema)
}

/// "+N = { Class = X }\n" — `X` sits at utf16 column 15 on line 1 (0-based).
const SOURCE: &str = "#package P\n+N = { Class = X }\n";

#[test]
fn incremental_edit_reparses_and_republishes() {
    let view = fresh_view();
    let token = CancellationToken::new();
    view.open_or_replace(Path::new("a.marte"), SOURCE.to_string(), &token);

    let edit = TextEdit { start_line: 1, start_utf16: 15, end_line: 1, end_utf16: 16, text: "Y".to_string() };
    view.apply_incremental_edit(Path::new("a.marte"), &[edit], &token);

    let document = view.snapshot().documents.get(Path::new("a.marte")).unwrap();
    assert!(document.text.contains("Class = Y"));

    let root = view.snapshot().tree.root();
    let p = view.snapshot().tree.node(root).children.get("P").copied().unwrap();
    let n = view.snapshot().tree.node(p).children.get("N").copied().unwrap();
    let class = view.snapshot().tree.node(n).field_value("Class").cloned();
    assert!(matches!(class, Some(Value::String { value, .. }) if value == "Y"));
}

#[test]
fn cancelled_token_leaves_the_previous_snapshot_published() {
    let view = fresh_view();
    let token = CancellationToken::new();
    view.open_or_replace(Path::new("a.marte"), "#package P\n+N = { Class = X }".to_string(), &token);
    let before = view.snapshot().documents.get(Path::new("a.marte")).unwrap().text.clone();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    view.open_or_replace(Path::new("a.marte"), "#package P\n+N = { Class = Y }".to_string(), &cancelled);

    let after = view.snapshot().documents.get(Path::new("a.marte")).unwrap().text.clone();
    assert_eq!(before, after, "a cancelled pass must not publish its half-built snapshot");
}

#[test]
fn an_edit_introducing_a_duplicate_field_is_flagged_on_republish() {
    let view = fresh_view();
    let token = CancellationToken::new();
    view.open_or_replace(Path::new("a.marte"), "#package P\n+N = { Class = X\nF = 1 }".to_string(), &token);
    assert!(!view.snapshot().diagnostics.values().flatten().any(|d| d.kind == Kind::DuplicateField));

    let text = "#package P\n+N = { Class = X\nF = 1\nF = 2 }".to_string();
    view.open_or_replace(Path::new("a.marte"), text, &token);

    assert!(view.snapshot().diagnostics.values().flatten().any(|d| d.kind == Kind::DuplicateField));
}
