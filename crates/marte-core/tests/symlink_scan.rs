//! A project directory reached twice (once directly, once through a
//! symlinked subdirectory) contributes each source file exactly once to
//! the index, end to end through `scan_directory` and `View` (spec.md
//! §4.E/§7: "I/O failures in ScanDirectory are aggregated ... symlinked
//! directory contents are not indexed twice").

#![cfg(unix)]

use std::sync::Arc;

use marte_core::index::scan::scan_directory;
use marte_core::schema::Schema;
use marte_core::session::{CancellationToken, View};

#[test]
fn symlinked_directory_contents_contribute_one_fragment() {
    let dir = tempfile::tempdir().unwrap();
    let real = dir.path().join("real");
    std::fs::create_dir(&real).unwrap();
    std::fs::write(real.join("a.marte"), "#package P\n+N = { Class = X }").unwrap();
    std::os::unix::fs::symlink(&real, dir.path().join("link")).unwrap();

    let scan = scan_directory(dir.path());
    assert!(scan.errors.is_empty());
    assert_eq!(scan.files.len(), 1, "symlinked directory must not double the file list: {:?}", scan.files);

    let schema = Arc::new(Schema::load_default().unwrap());
    let view = View::new(dir.path(), schema);
    let token = CancellationToken::new();
    for file in &scan.files {
        let text = std::fs::read_to_string(file).unwrap();
        view.open_or_replace(file, text, &token);
    }

    let snapshot = view.snapshot();
    let root = snapshot.tree.root();
    let p = snapshot.tree.node(root).children.get("P").copied().unwrap();
    let n = snapshot.tree.node(p).children.get("N").copied().unwrap();
    assert_eq!(snapshot.tree.node(n).fragments.len(), 1, "the same file reached via two paths must not be indexed twice");
}
