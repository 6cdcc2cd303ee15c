//! Translates `tower-lsp` requests into `marte_core` Query-surface calls.
//! JSON-RPC framing and argument parsing are the only things genuinely
//! out of the core's scope (spec.md §6); everything else here is a thin
//! forward to `marte_core::session`/`query`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tower_lsp::jsonrpc::Result as RpcResult;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use marte_core::diagnostics::Level;
use marte_core::index::node::NodeId;
use marte_core::index::ProjectIndex;
use marte_core::query::{CompletionContext, QuerySurface, SymbolKind as CoreSymbolKind};
use marte_core::schema::Schema;
use marte_core::session::{CancellationToken, Session, TextEdit as CoreTextEdit, View};

pub struct Backend {
    client: Client,
    session: tokio::sync::Mutex<Session>,
    /// Cancels the in-flight validation pass of a document's previous
    /// edit before its successor re-parses (spec.md §5).
    tokens: DashMap<PathBuf, CancellationToken>,
    /// Files we've published non-empty diagnostics for, so a fix can be
    /// reported by publishing an empty list once it clears.
    diagnosed: DashSet<PathBuf>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self { client, session: tokio::sync::Mutex::new(Session::new()), tokens: DashMap::new(), diagnosed: DashSet::new() }
    }

    async fn view_for(&self, path: &Path) -> Arc<View> {
        let mut session = self.session.lock().await;
        if let Some(view) = session.view_for(path) {
            return view;
        }
        let root = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let schema = Arc::new(Schema::load_for_project(&root).unwrap_or_default());
        session.open_view(root, schema)
    }

    fn fresh_token(&self, path: &Path) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.tokens.insert(path.to_path_buf(), token.clone()) {
            previous.cancel();
        }
        token
    }

    async fn publish_diagnostics(&self, view: &View) {
        let snapshot = view.snapshot();
        let mut still_diagnosed = std::collections::HashSet::new();
        for (file, diagnostics) in &snapshot.diagnostics {
            let Some(uri) = path_to_url(file) else { continue };
            let lsp_diagnostics = diagnostics.iter().map(core_diagnostic_to_lsp).collect();
            self.client.publish_diagnostics(uri, lsp_diagnostics, None).await;
            still_diagnosed.insert(file.clone());
            self.diagnosed.insert(file.clone());
        }
        let stale: Vec<PathBuf> = self.diagnosed.iter().map(|f| f.clone()).filter(|f| !still_diagnosed.contains(f)).collect();
        for file in stale {
            if let Some(uri) = path_to_url(&file) {
                self.client.publish_diagnostics(uri, Vec::new(), None).await;
            }
            self.diagnosed.remove(&file);
        }
    }

    async fn with_query<T>(&self, uri: &Url, f: impl FnOnce(&ProjectIndex, &Schema, &QuerySurface<'_>, &Path) -> T) -> Option<T> {
        let path = uri_to_path(uri)?;
        let view = self.view_for(&path).await;
        let snapshot = view.snapshot();
        let surface = QuerySurface::new(&snapshot.tree, &snapshot.schema);
        Some(f(&snapshot.tree, &snapshot.schema, &surface, &path))
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> RpcResult<InitializeResult> {
        let mut roots = Vec::new();
        if let Some(folders) = params.workspace_folders {
            roots.extend(folders.into_iter().filter_map(|f| uri_to_path(&f.uri)));
        } else if let Some(root_uri) = params.root_uri {
            if let Some(path) = uri_to_path(&root_uri) {
                roots.push(path);
            }
        }
        let mut session = self.session.lock().await;
        for root in roots {
            let schema = Arc::new(Schema::load_for_project(&root).unwrap_or_default());
            session.open_view(root, schema);
        }
        drop(session);

        Ok(InitializeResult {
            server_info: Some(ServerInfo { name: "marte-lsp".to_string(), version: Some(env!("CARGO_PKG_VERSION").to_string()) }),
            offset_encoding: None,
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::INCREMENTAL),
                    save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                    ..Default::default()
                })),
                completion_provider: Some(CompletionOptions {
                    resolve_provider: Some(false),
                    trigger_characters: Some(vec!["=".to_string(), ":".to_string()]),
                    ..Default::default()
                }),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                rename_provider: Some(OneOf::Left(true)),
                document_symbol_provider: Some(OneOf::Left(true)),
                workspace_symbol_provider: Some(OneOf::Left(true)),
                call_hierarchy_provider: Some(CallHierarchyServerCapability::Simple(true)),
                ..Default::default()
            },
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("marte-lsp initialized");
    }

    async fn shutdown(&self) -> RpcResult<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let Some(path) = uri_to_path(&params.text_document.uri) else { return };
        let view = self.view_for(&path).await;
        let token = self.fresh_token(&path);
        view.open_or_replace(&path, params.text_document.text, &token);
        self.publish_diagnostics(&view).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let Some(path) = uri_to_path(&params.text_document.uri) else { return };
        let view = self.view_for(&path).await;
        let token = self.fresh_token(&path);

        let mut incremental_edits = Vec::new();
        for change in params.content_changes {
            match change.range {
                Some(range) => incremental_edits.push(lsp_range_to_core_edit(range, change.text)),
                None => {
                    view.open_or_replace(&path, change.text, &token);
                    incremental_edits.clear();
                }
            }
        }
        if !incremental_edits.is_empty() {
            view.apply_incremental_edit(&path, &incremental_edits, &token);
        }
        self.publish_diagnostics(&view).await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let Some(path) = uri_to_path(&params.text_document.uri) else { return };
        let view = self.view_for(&path).await;
        view.close(&path);
        self.tokens.remove(&path);
        self.publish_diagnostics(&view).await;
    }

    async fn goto_definition(&self, params: GotoDefinitionParams) -> RpcResult<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let result = self
            .with_query(&uri, |_, _, surface, path| {
                let (line, col) = lsp_pos_to_core(position);
                let node = surface.node_at(path, line, col)?;
                let locations = surface.definition(node).into_iter().filter_map(core_location_to_lsp).collect::<Vec<_>>();
                Some(locations)
            })
            .await
            .flatten();
        Ok(result.filter(|v| !v.is_empty()).map(GotoDefinitionResponse::Array))
    }

    async fn references(&self, params: ReferenceParams) -> RpcResult<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let include_declaration = params.context.include_declaration;
        let result = self
            .with_query(&uri, |_, _, surface, path| {
                let (line, col) = lsp_pos_to_core(position);
                let node = surface.node_at(path, line, col)?;
                Some(surface.references(node, include_declaration).into_iter().filter_map(core_location_to_lsp).collect::<Vec<_>>())
            })
            .await
            .flatten();
        Ok(result)
    }

    async fn hover(&self, params: HoverParams) -> RpcResult<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let result = self
            .with_query(&uri, |_, _, surface, path| {
                let (line, col) = lsp_pos_to_core(position);
                let node = surface.node_at(path, line, col)?;
                Some(surface.hover(node))
            })
            .await
            .flatten();
        Ok(result.map(|text| Hover { contents: HoverContents::Markup(MarkupContent { kind: MarkupKind::Markdown, value: text }), range: None }))
    }

    async fn completion(&self, params: CompletionParams) -> RpcResult<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let path = match uri_to_path(&uri) {
            Some(path) => path,
            None => return Ok(None),
        };
        let view = self.view_for(&path).await;
        let snapshot = view.snapshot();
        let Some(document) = snapshot.documents.get(&path) else { return Ok(None) };
        let line_prefix = line_before_cursor(&document.text, position);

        let surface = QuerySurface::new(&snapshot.tree, &snapshot.schema);
        let (core_line, _) = lsp_pos_to_core(position);
        let enclosing = find_enclosing_node(&snapshot.tree, &path, core_line);

        let Some(context) = classify_completion(&line_prefix, &snapshot.tree, enclosing) else { return Ok(None) };
        let items = surface
            .completion(&context)
            .into_iter()
            .map(|item| CompletionItem { label: item.label, insert_text: Some(item.insert_text), kind: Some(CompletionItemKind::FIELD), ..Default::default() })
            .collect();
        Ok(Some(CompletionResponse::Array(items)))
    }

    async fn rename(&self, params: RenameParams) -> RpcResult<Option<WorkspaceEdit>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let new_name = params.new_name;
        let result = self
            .with_query(&uri, |_, _, surface, path| {
                let (line, col) = lsp_pos_to_core(position);
                let node = surface.node_at(path, line, col)?;
                Some(surface.rename(node, &new_name))
            })
            .await
            .flatten();
        Ok(result.map(core_edits_to_workspace_edit))
    }

    async fn document_symbol(&self, params: DocumentSymbolParams) -> RpcResult<Option<DocumentSymbolResponse>> {
        let uri = params.text_document.uri;
        let result = self.with_query(&uri, |_, _, surface, path| surface.document_symbols(path)).await;
        Ok(result.map(|symbols| DocumentSymbolResponse::Flat(symbols.into_iter().filter_map(core_symbol_to_lsp_flat).collect())))
    }

    async fn symbol(&self, params: WorkspaceSymbolParams) -> RpcResult<Option<Vec<SymbolInformation>>> {
        let session = self.session.lock().await;
        let mut all = Vec::new();
        for view in session.views() {
            let snapshot = view.snapshot();
            let surface = QuerySurface::new(&snapshot.tree, &snapshot.schema);
            all.extend(surface.workspace_symbols(&params.query).into_iter().filter_map(core_symbol_to_lsp_flat));
        }
        Ok(Some(all))
    }

    async fn prepare_call_hierarchy(&self, params: CallHierarchyPrepareParams) -> RpcResult<Option<Vec<CallHierarchyItem>>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let result = self
            .with_query(&uri, |tree, _, surface, path| {
                let (line, col) = lsp_pos_to_core(position);
                let node = surface.node_at(path, line, col)?;
                Some(node_to_call_hierarchy_item(tree, surface, node))
            })
            .await
            .flatten()
            .flatten();
        Ok(result.map(|item| vec![item]))
    }

    async fn incoming_calls(&self, params: CallHierarchyIncomingCallParams) -> RpcResult<Option<Vec<CallHierarchyIncomingCall>>> {
        let item = params.item;
        let result = self
            .with_query(&item.uri, |tree, _, surface, path| {
                let (line, col) = lsp_pos_to_core(item.selection_range.start);
                let node = surface.node_at(path, line, col)?;
                let calls = surface
                    .call_hierarchy_incoming(node)
                    .into_iter()
                    .filter_map(|from| {
                        let from_item = node_to_call_hierarchy_item(tree, surface, from)?;
                        let range = from_item.range;
                        Some(CallHierarchyIncomingCall { from: from_item, from_ranges: vec![range] })
                    })
                    .collect::<Vec<_>>();
                Some(calls)
            })
            .await
            .flatten();
        Ok(result)
    }

    async fn outgoing_calls(&self, params: CallHierarchyOutgoingCallParams) -> RpcResult<Option<Vec<CallHierarchyOutgoingCall>>> {
        let item = params.item;
        let result = self
            .with_query(&item.uri, |tree, _, surface, path| {
                let (line, col) = lsp_pos_to_core(item.selection_range.start);
                let node = surface.node_at(path, line, col)?;
                let calls = surface
                    .call_hierarchy_outgoing(node)
                    .into_iter()
                    .filter_map(|to| {
                        let to_item = node_to_call_hierarchy_item(tree, surface, to)?;
                        let range = to_item.range;
                        Some(CallHierarchyOutgoingCall { to: to_item, to_ranges: vec![range] })
                    })
                    .collect::<Vec<_>>();
                Some(calls)
            })
            .await
            .flatten();
        Ok(result)
    }
}

fn node_to_call_hierarchy_item(tree: &ProjectIndex, surface: &QuerySurface<'_>, node: NodeId) -> Option<CallHierarchyItem> {
    let n = tree.node(node);
    let location = surface.definition(node).into_iter().next()?;
    let uri = path_to_url(&location.file)?;
    let pos = core_pos_to_lsp(location.position);
    Some(CallHierarchyItem {
        name: n.real_name.clone(),
        kind: SymbolKind::CLASS,
        tags: None,
        detail: None,
        uri,
        range: Range::new(pos, pos),
        selection_range: Range::new(pos, pos),
        data: None,
    })
}

fn uri_to_path(uri: &Url) -> Option<PathBuf> {
    uri.to_file_path().ok()
}

fn path_to_url(path: &Path) -> Option<Url> {
    Url::from_file_path(path).ok()
}

/// `marte_core::ast::Position` is 1-based line/column counted in bytes;
/// LSP positions are 0-based with UTF-16 code-unit columns. For the
/// ASCII-dominated configuration sources this tool targets the two
/// column schemes coincide; non-ASCII identifiers are not expected.
fn lsp_pos_to_core(pos: Position) -> (u32, u32) {
    (pos.line + 1, pos.character + 1)
}

fn core_pos_to_lsp(pos: marte_core::ast::Position) -> Position {
    Position::new(pos.line.saturating_sub(1), pos.column.saturating_sub(1))
}

fn core_location_to_lsp(location: marte_core::query::Location) -> Option<Location> {
    let uri = path_to_url(&location.file)?;
    let start = core_pos_to_lsp(location.position);
    Some(Location { uri, range: Range::new(start, start) })
}

fn core_diagnostic_to_lsp(diagnostic: &marte_core::diagnostics::Diagnostic) -> Diagnostic {
    let start = core_pos_to_lsp(diagnostic.position);
    Diagnostic {
        range: Range::new(start, start),
        severity: Some(match diagnostic.level {
            Level::Error => DiagnosticSeverity::ERROR,
            Level::Warning => DiagnosticSeverity::WARNING,
        }),
        source: Some("marte".to_string()),
        message: diagnostic.message.clone(),
        ..Default::default()
    }
}

fn core_edits_to_workspace_edit(edits: Vec<marte_core::query::TextEdit>) -> WorkspaceEdit {
    let mut by_file: HashMap<Url, Vec<tower_lsp::lsp_types::TextEdit>> = HashMap::new();
    for edit in edits {
        let Some(uri) = path_to_url(&edit.file) else { continue };
        let start = core_pos_to_lsp(edit.position);
        let end = Position::new(start.line, start.character + edit.old_text.encode_utf16().count() as u32);
        by_file.entry(uri).or_default().push(tower_lsp::lsp_types::TextEdit { range: Range::new(start, end), new_text: edit.new_text });
    }
    WorkspaceEdit { changes: Some(by_file), document_changes: None, change_annotations: None }
}

fn core_symbol_to_lsp_flat(symbol: marte_core::query::Symbol) -> Option<SymbolInformation> {
    let uri = path_to_url(&symbol.location.file)?;
    let start = core_pos_to_lsp(symbol.location.position);
    #[allow(deprecated)]
    Some(SymbolInformation {
        name: symbol.name,
        kind: core_symbol_kind_to_lsp(symbol.kind),
        tags: None,
        deprecated: None,
        location: Location { uri, range: Range::new(start, start) },
        container_name: None,
    })
}

fn core_symbol_kind_to_lsp(kind: CoreSymbolKind) -> SymbolKind {
    match kind {
        CoreSymbolKind::Object => SymbolKind::OBJECT,
        CoreSymbolKind::Signal => SymbolKind::FIELD,
        CoreSymbolKind::Gam => SymbolKind::CLASS,
        CoreSymbolKind::DataSource => SymbolKind::MODULE,
        CoreSymbolKind::Application => SymbolKind::NAMESPACE,
    }
}

fn lsp_range_to_core_edit(range: Range, text: String) -> CoreTextEdit {
    CoreTextEdit { start_line: range.start.line, start_utf16: range.start.character, end_line: range.end.line, end_utf16: range.end.character, text }
}

fn line_before_cursor(text: &str, position: Position) -> String {
    text.lines().nth(position.line as usize).map(|line| {
        let byte_end = line.char_indices().nth(position.character as usize).map_or(line.len(), |(i, _)| i);
        line[..byte_end].to_string()
    }).unwrap_or_default()
}

/// Best-effort "which object is the cursor inside" lookup: the core
/// index only records exact-position hits (`ProjectIndex::query`), so
/// this picks the fragment opened latest at or before `line` in the
/// same file — correct unless the cursor sits after that object's
/// closing brace with no sibling opened in between.
fn find_enclosing_node(index: &ProjectIndex, file: &Path, line: u32) -> Option<NodeId> {
    let mut best: Option<(u32, NodeId)> = None;
    index.walk(|id, node| {
        for fragment in &node.fragments {
            if fragment.file != file {
                continue;
            }
            if let Some(pos) = fragment.object_pos {
                if pos.line <= line && best.map_or(true, |(best_line, _)| pos.line >= best_line) {
                    best = Some((pos.line, id));
                }
            }
        }
    });
    best.map(|(_, id)| id)
}

fn classify_completion(line_prefix: &str, index: &ProjectIndex, enclosing: Option<NodeId>) -> Option<CompletionContext> {
    let trimmed = line_prefix.trim_end();
    if trimmed.ends_with("Class =") || trimmed.ends_with("Class=") {
        return Some(CompletionContext::AfterClassEquals);
    }
    if trimmed.ends_with("Type =") || trimmed.ends_with("Type=") {
        return Some(CompletionContext::AfterTypeEquals);
    }
    if trimmed.ends_with("DataSource =") || trimmed.ends_with("DataSource=") {
        let container = enclosing?;
        return Some(CompletionContext::AfterDataSourceEquals { container });
    }
    let node = enclosing?;
    if matches!(index.node(node).name.as_str(), "Signals" | "InputSignals" | "OutputSignals") {
        return Some(CompletionContext::InsideSignalsContainer);
    }
    Some(CompletionContext::InsideObject { node })
}
