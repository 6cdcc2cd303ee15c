//! Session/View/Snapshot: the live-editing layer a language server sits
//! on top of (spec.md §4.H). A `View` publishes a new immutable
//! `Snapshot` on every edit by cloning, mutating the clone, and
//! atomically swapping the published pointer — readers never block
//! beyond the swap itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use indexmap::IndexMap;

use crate::ast::{DocTable, PragmaTable};
use crate::diagnostics::Diagnostic;
use crate::index::ProjectIndex;
use crate::schema::Schema;
use crate::validator::Validator;

/// One URI's currently-open text plus the parser's derived tables,
/// recomputed on every full re-parse (spec.md §4.H: "a full re-parse per
/// file is the contract").
#[derive(Debug, Clone)]
pub struct DocumentState {
    pub text: String,
    pub docs: DocTable,
    pub pragmas: PragmaTable,
    pub parse_diagnostics: Vec<crate::parser::ParserDiagnostic>,
}

/// An immutable, shareable view of the project at one point in time.
/// Never mutated after publication (invariant backing the "no
/// reader-writer locking beyond the atomic swap" guarantee).
pub struct Snapshot {
    pub tree: ProjectIndex,
    pub schema: Arc<Schema>,
    pub documents: IndexMap<PathBuf, DocumentState>,
    pub diagnostics: HashMap<PathBuf, Vec<Diagnostic>>,
}

impl Snapshot {
    fn empty(schema: Arc<Schema>) -> Self {
        Self { tree: ProjectIndex::new(), schema, documents: IndexMap::new(), diagnostics: HashMap::new() }
    }

    /// Clones the tree and document map so the in-progress rebuild never
    /// touches the published snapshot (the arena is plain `Vec`/`IndexMap`
    /// data, so this clone is proportional to project size, not to any
    /// external resource).
    fn fork(&self) -> ClonedSnapshot {
        ClonedSnapshot {
            tree: self.tree.clone(),
            schema: self.schema.clone(),
            documents: self.documents.clone(),
            diagnostics: self.diagnostics.clone(),
        }
    }
}

/// A private, still-mutable copy of a `Snapshot` under construction.
struct ClonedSnapshot {
    tree: ProjectIndex,
    schema: Arc<Schema>,
    documents: IndexMap<PathBuf, DocumentState>,
    diagnostics: HashMap<PathBuf, Vec<Diagnostic>>,
}

impl ClonedSnapshot {
    fn publish(self) -> Snapshot {
        Snapshot { tree: self.tree, schema: self.schema, documents: self.documents, diagnostics: self.diagnostics }
    }
}

/// A cancellation token threaded through validation; checked between
/// nodes so a superseded edit's validation pass can bail out early
/// without publishing a partial result (spec.md §5).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One workspace root. Exactly one mutator is expected to drive
/// `open`/`change`/`close` at a time (spec.md §5's single-writer
/// discipline); readers call `snapshot()` from any thread.
pub struct View {
    root: PathBuf,
    current: ArcSwap<Snapshot>,
}

impl View {
    pub fn new(root: impl Into<PathBuf>, schema: Arc<Schema>) -> Self {
        Self { root: root.into(), current: ArcSwap::new(Arc::new(Snapshot::empty(schema))) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A cheap, wait-free load of the currently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Parses `text` and folds it into the index as `uri`'s contribution,
    /// publishing a new snapshot. Used for both `didOpen` and a full
    /// `didChange` payload (no incremental range-patching of the tree
    /// itself — only of document text, see `apply_incremental_edit`).
    pub fn open_or_replace(&self, uri: &Path, text: String, token: &CancellationToken) {
        let previous = self.snapshot();
        let mut next = previous.fork();

        let (config, docs, pragmas, parse_diagnostics) = crate::parser::parse(&text);
        next.tree.add_file(uri, &config, &docs, &pragmas);
        next.documents.insert(uri.to_path_buf(), DocumentState { text, docs, pragmas, parse_diagnostics: parse_diagnostics.clone() });

        if token.is_cancelled() {
            log::debug!("validation for {} cancelled before publish", uri.display());
            return;
        }
        next.tree.resolve_references();
        next.tree.resolve_fields();

        let mut diagnostics: HashMap<PathBuf, Vec<Diagnostic>> = HashMap::new();
        diagnostics
            .entry(uri.to_path_buf())
            .or_default()
            .extend(parse_diagnostics.iter().map(|d| d.to_diagnostic(uri)));
        for diagnostic in Validator::new(&next.tree, &next.schema).validate() {
            if token.is_cancelled() {
                log::debug!("validation cancelled mid-pass for {}", self.root.display());
                return;
            }
            diagnostics.entry(diagnostic.file.clone()).or_default().push(diagnostic);
        }
        next.diagnostics = diagnostics;

        log::info!("publishing snapshot for {} ({} tracked files)", self.root.display(), next.documents.len());
        self.current.store(Arc::new(next.publish()));
    }

    pub fn close(&self, uri: &Path) {
        let previous = self.snapshot();
        let mut next = previous.fork();
        next.tree.remove_file(uri);
        next.documents.shift_remove(uri);
        next.diagnostics.remove(uri);
        next.tree.resolve_references();
        next.tree.resolve_fields();
        self.current.store(Arc::new(next.publish()));
    }

    /// Applies ordered `didChange` range edits to the stored text,
    /// converting each edit's UTF-16 code-unit positions to byte offsets
    /// against the *current* text before applying the next edit in the
    /// same batch, then re-parses the whole result (spec.md §4.H: a full
    /// re-parse per file, no tree diffing required).
    pub fn apply_incremental_edit(&self, uri: &Path, edits: &[TextEdit], token: &CancellationToken) {
        let previous = self.snapshot();
        let mut text = previous.documents.get(uri).map(|d| d.text.clone()).unwrap_or_default();
        for edit in edits {
            text = apply_one_edit(&text, edit);
        }
        self.open_or_replace(uri, text, token);
    }
}

/// One `textDocument/didChange` range edit, positions in UTF-16
/// code-unit line/character as the LSP wire format specifies.
#[derive(Debug, Clone)]
pub struct TextEdit {
    pub start_line: u32,
    pub start_utf16: u32,
    pub end_line: u32,
    pub end_utf16: u32,
    pub text: String,
}

fn apply_one_edit(source: &str, edit: &TextEdit) -> String {
    let start = utf16_position_to_byte_offset(source, edit.start_line, edit.start_utf16);
    let end = utf16_position_to_byte_offset(source, edit.end_line, edit.end_utf16);
    let mut result = String::with_capacity(source.len() + edit.text.len());
    result.push_str(&source[..start]);
    result.push_str(&edit.text);
    result.push_str(&source[end..]);
    result
}

fn utf16_position_to_byte_offset(source: &str, line: u32, utf16_character: u32) -> usize {
    let mut current_line = 0u32;
    let mut byte_offset = 0usize;
    for line_text in source.split_inclusive('\n') {
        if current_line == line {
            return byte_offset + utf16_offset_within_line(line_text, utf16_character);
        }
        byte_offset += line_text.len();
        current_line += 1;
    }
    byte_offset
}

fn utf16_offset_within_line(line_text: &str, utf16_character: u32) -> usize {
    let mut units = 0u32;
    for (byte_index, ch) in line_text.char_indices() {
        if units >= utf16_character {
            return byte_index;
        }
        units += ch.len_utf16() as u32;
    }
    line_text.len()
}

/// A `Session` owns every open workspace root. LSP `initialize` creates
/// one `View` per workspace folder; `marte-cli` uses a single ad-hoc
/// `View` rooted at the current directory.
#[derive(Default)]
pub struct Session {
    views: IndexMap<PathBuf, Arc<View>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_view(&mut self, root: impl Into<PathBuf>, schema: Arc<Schema>) -> Arc<View> {
        let root = root.into();
        self.views.entry(root.clone()).or_insert_with(|| Arc::new(View::new(root, schema))).clone()
    }

    pub fn view_for(&self, uri: &Path) -> Option<Arc<View>> {
        self.views.values().filter(|v| uri.starts_with(v.root())).max_by_key(|v| v.root().as_os_str().len()).cloned()
    }

    pub fn views(&self) -> impl Iterator<Item = &Arc<View>> {
        self.views.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_edit_converts_utf16_offsets() {
        let text = "abc\ndef\n";
        let edit = TextEdit { start_line: 1, start_utf16: 0, end_line: 1, end_utf16: 3, text: "xyz".to_string() };
        let result = apply_one_edit(text, &edit);
        assert_eq!(result, "abc\nxyz\n");
    }

    #[test]
    fn open_then_close_clears_documents() {
        let schema = Arc::new(Schema::compile(crate::schema::types::SchemaDocument::default()));
        let view = View::new("/project", schema);
        let token = CancellationToken::new();
        view.open_or_replace(Path::new("a.marte"), "#package P\n+N = { Class = X }".to_string(), &token);
        assert!(view.snapshot().documents.contains_key(Path::new("a.marte")));
        view.close(Path::new("a.marte"));
        assert!(!view.snapshot().documents.contains_key(Path::new("a.marte")));
    }
}
