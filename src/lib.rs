//! In-memory emulation of an editor host's document surface.
//!
//! `edhost` models text documents, coordinates, edits, and lifecycle events
//! without a real editor attached, so extension-style code can be exercised
//! against a deterministic substrate. The [`Host`] is the explicit root
//! context replacing the process-wide singletons of the emulated surface:
//! it owns the open documents, the lifecycle events, the subscription
//! registry, and the resolved settings.
//!
//! All dispatch is synchronous: operations and their events run to
//! completion on the caller's thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

mod document;
mod edit;
mod error;
mod event;
mod position;
mod settings;

pub use document::{EndOfLine, LineIndex, TextDocument, TextLine};
pub use edit::{
    DocumentChangeEvent, FileOperation, TextDocumentContentChange, TextEdit, WorkspaceEdit,
};
pub use error::{HostError, Result};
pub use event::{
    Disposable, DisposableRegistry, EventEmitter, ListenerFailure, ListenerFault, ListenerResult,
};
pub use position::{Position, Range};
pub use settings::{
    discover_settings, load_settings, parse_eol_string, DocumentSettings, EolMode,
    ResolvedSettings, Settings, DEFAULT_LANGUAGE_ID, DEFAULT_WORD_PATTERN,
};
pub use url::Url;

use document::DocumentStore;
use edit::ResolvedEdit;

/// The root context of an emulated host.
///
/// Constructed once at startup and torn down with [`shutdown`](Host::shutdown).
/// There is no implicit global lookup: everything that needs host state
/// receives a `&Host`.
pub struct Host {
    documents: DocumentStore,
    settings: ResolvedSettings,
    subscriptions: DisposableRegistry,
    did_open: EventEmitter<Arc<TextDocument>>,
    did_change: EventEmitter<DocumentChangeEvent>,
    did_close: EventEmitter<Arc<TextDocument>>,
    listener_failures: EventEmitter<ListenerFailure>,
    shut_down: AtomicBool,
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

/// A lifecycle event queued during a transaction and fired after commit.
enum QueuedEvent {
    Opened(Arc<TextDocument>),
    Closed(Arc<TextDocument>),
    Changed(DocumentChangeEvent),
}

/// Where an edit's target document comes from during validation.
enum Planned {
    /// Closed (or renamed away) earlier in the same transaction.
    Deleted,
    /// Created earlier in the same transaction.
    Fresh { content: String },
    /// Renamed into this uri earlier in the same transaction.
    Moved { doc: Arc<TextDocument> },
}

impl Host {
    /// A host with default settings.
    pub fn new() -> Self {
        Self::with_settings(ResolvedSettings::default())
    }

    /// A host with the given resolved settings (see [`Settings::resolve`]).
    pub fn with_settings(settings: ResolvedSettings) -> Self {
        // Every document emitter forwards listener failures into the
        // dedicated failure channel; the channel itself only logs, so a
        // failing failure-listener cannot recurse.
        let listener_failures = EventEmitter::new("host/listener_failure");
        let forward: Arc<dyn Fn(ListenerFailure) + Send + Sync> = {
            let failures = listener_failures.clone();
            Arc::new(move |failure| failures.fire(&failure))
        };

        Self {
            documents: DocumentStore::new(),
            settings,
            subscriptions: DisposableRegistry::new(),
            did_open: EventEmitter::with_shared_fault_handler(
                "document/did_open",
                Arc::clone(&forward),
            ),
            did_change: EventEmitter::with_shared_fault_handler(
                "document/did_change",
                Arc::clone(&forward),
            ),
            did_close: EventEmitter::with_shared_fault_handler("document/did_close", forward),
            listener_failures,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &ResolvedSettings {
        &self.settings
    }

    /// Disposables registered here are disposed in reverse order at
    /// [`shutdown`](Host::shutdown).
    pub fn subscriptions(&self) -> &DisposableRegistry {
        &self.subscriptions
    }

    /// Fires after a document is opened (including files created through a
    /// [`WorkspaceEdit`]).
    pub fn on_did_open_document(&self) -> &EventEmitter<Arc<TextDocument>> {
        &self.did_open
    }

    /// Fires once per document after a successful edit application, with
    /// the applied changes in applied order.
    pub fn on_did_change_document(&self) -> &EventEmitter<DocumentChangeEvent> {
        &self.did_change
    }

    /// Fires after a document is closed.
    pub fn on_did_close_document(&self) -> &EventEmitter<Arc<TextDocument>> {
        &self.did_close
    }

    /// Side channel for failures raised by listeners during dispatch.
    pub fn on_listener_failure(&self) -> &EventEmitter<ListenerFailure> {
        &self.listener_failures
    }

    /// Open a document with the settings' default language id.
    ///
    /// Opening a uri that is already open returns the existing document
    /// unchanged and fires no event.
    pub fn open_document(&self, uri: Url, text: impl Into<String>) -> Arc<TextDocument> {
        let language = self.settings.default_language.clone();
        self.open_document_with_language(uri, &language, text)
    }

    /// Open a document with an explicit language id.
    pub fn open_document_with_language(
        &self,
        uri: Url,
        language_id: &str,
        text: impl Into<String>,
    ) -> Arc<TextDocument> {
        if let Ok(existing) = self.documents.get_open(&uri) {
            return existing;
        }
        let doc = Arc::new(self.make_document(uri, language_id.to_string(), text.into()));
        self.documents.insert(Arc::clone(&doc));
        debug!(uri = %doc.uri(), language = language_id, "opened document");
        self.did_open.fire(&doc);
        doc
    }

    fn make_document(&self, uri: Url, language_id: String, text: String) -> TextDocument {
        let eol = self.settings.eol.resolve(&text);
        TextDocument::new(
            uri,
            language_id,
            text,
            eol,
            Arc::clone(&self.settings.word_pattern),
        )
    }

    /// The open document at `uri`.
    pub fn document(&self, uri: &Url) -> Result<Arc<TextDocument>> {
        self.documents.get_open(uri)
    }

    /// All currently open documents.
    pub fn documents(&self) -> Vec<Arc<TextDocument>> {
        self.documents.all()
    }

    /// Close the document at `uri`. Every snapshot of it starts rejecting
    /// content queries; a close event fires.
    pub fn close_document(&self, uri: &Url) -> Result<()> {
        let doc = self.documents.close(uri)?;
        self.did_close.fire(&doc);
        Ok(())
    }

    /// Apply a workspace edit as one transaction.
    ///
    /// Validation runs before anything is mutated: unknown documents,
    /// conflicting edits, and failing file operations reject the whole
    /// batch and leave every document at its pre-call version. On success,
    /// file operations commit first in recorded order, then each touched
    /// document advances by exactly one version, and all lifecycle events
    /// fire after the commit is complete.
    pub fn apply_edit(&self, edit: &WorkspaceEdit) -> Result<()> {
        let mut planned: HashMap<Url, Planned> = HashMap::new();

        // ---- validation: file operations, in recorded order ----
        for op in edit.file_operations() {
            match op {
                FileOperation::Create { uri, contents, overwrite } => {
                    if self.target_exists(&planned, uri) && !overwrite {
                        return Err(HostError::DocumentExists { uri: uri.clone() });
                    }
                    planned.insert(
                        uri.clone(),
                        Planned::Fresh {
                            content: contents.clone(),
                        },
                    );
                }
                FileOperation::Delete {
                    uri,
                    ignore_if_not_exists,
                } => {
                    if !self.target_exists(&planned, uri) {
                        if !ignore_if_not_exists {
                            return Err(HostError::DocumentNotFound { uri: uri.clone() });
                        }
                        continue;
                    }
                    planned.insert(uri.clone(), Planned::Deleted);
                }
                FileOperation::Rename { from, to, overwrite } => {
                    if self.target_exists(&planned, to) && !overwrite {
                        return Err(HostError::DocumentExists { uri: to.clone() });
                    }
                    let source = match planned.remove(from) {
                        Some(Planned::Fresh { content }) => Planned::Fresh { content },
                        Some(Planned::Moved { doc }) => Planned::Moved { doc },
                        Some(Planned::Deleted) => {
                            return Err(HostError::DocumentNotFound { uri: from.clone() })
                        }
                        None => {
                            let doc = self.documents.get_open(from)?;
                            Planned::Moved { doc }
                        }
                    };
                    planned.insert(from.clone(), Planned::Deleted);
                    planned.insert(to.clone(), source);
                }
            }
        }

        // ---- validation: text edits, clamped / sorted / conflict-checked ----
        let mut resolved_edits: Vec<(Url, Vec<ResolvedEdit>)> = Vec::new();
        for (uri, edits) in edit.entries() {
            if edits.is_empty() {
                continue;
            }
            let resolved = match planned.get(uri) {
                Some(Planned::Deleted) => {
                    return Err(HostError::DocumentNotFound { uri: uri.clone() })
                }
                Some(Planned::Fresh { content }) => {
                    let index = LineIndex::new(content.clone());
                    edit::resolve_edits(uri, &index, edits)?
                }
                Some(Planned::Moved { doc }) => edit::resolve_edits(uri, doc.line_index(), edits)?,
                None => {
                    let doc = self.documents.get_open(uri)?;
                    edit::resolve_edits(uri, doc.line_index(), edits)?
                }
            };
            resolved_edits.push((uri.clone(), resolved));
        }

        // ---- commit ----
        let mut queued: Vec<QueuedEvent> = Vec::new();

        for op in edit.file_operations() {
            match op {
                FileOperation::Create { uri, contents, .. } => {
                    if let Ok(replaced) = self.documents.close(uri) {
                        queued.push(QueuedEvent::Closed(replaced));
                    }
                    let doc = Arc::new(self.make_document(
                        uri.clone(),
                        self.settings.default_language.clone(),
                        contents.clone(),
                    ));
                    self.documents.insert(Arc::clone(&doc));
                    queued.push(QueuedEvent::Opened(doc));
                }
                FileOperation::Delete { uri, .. } => {
                    if let Ok(doc) = self.documents.close(uri) {
                        queued.push(QueuedEvent::Closed(doc));
                    }
                }
                FileOperation::Rename { from, to, .. } => {
                    let Ok(old) = self.documents.close(from) else {
                        continue;
                    };
                    if let Ok(replaced) = self.documents.close(to) {
                        queued.push(QueuedEvent::Closed(replaced));
                    }
                    let renamed = Arc::new(old.renamed(to.clone()));
                    self.documents.insert(Arc::clone(&renamed));
                    queued.push(QueuedEvent::Closed(old));
                    queued.push(QueuedEvent::Opened(renamed));
                }
            }
        }

        for (uri, resolved) in resolved_edits {
            let doc = self.documents.get_open(&uri)?;
            let (new_content, changes) = edit::splice(doc.line_index().source(), &resolved);
            let new_doc = Arc::new(doc.with_content(new_content));
            self.documents.insert(Arc::clone(&new_doc));
            debug!(
                uri = %uri,
                version = new_doc.version(),
                changes = changes.len(),
                "applied edits"
            );
            queued.push(QueuedEvent::Changed(DocumentChangeEvent {
                document: new_doc,
                content_changes: changes,
            }));
        }

        // ---- events, after the whole transaction committed ----
        for event in queued {
            match event {
                QueuedEvent::Opened(doc) => self.did_open.fire(&doc),
                QueuedEvent::Closed(doc) => self.did_close.fire(&doc),
                QueuedEvent::Changed(change) => self.did_change.fire(&change),
            }
        }

        Ok(())
    }

    /// Whether a document would exist at `uri` at this point of the
    /// transaction being validated.
    fn target_exists(&self, planned: &HashMap<Url, Planned>, uri: &Url) -> bool {
        match planned.get(uri) {
            Some(Planned::Deleted) => false,
            Some(Planned::Fresh { .. }) | Some(Planned::Moved { .. }) => true,
            None => self.documents.get_open(uri).is_ok(),
        }
    }

    /// Tear the host down: dispose registered subscriptions in reverse
    /// order, then close every remaining document (firing close events).
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("shutting down host");
        self.subscriptions.dispose();
        for doc in self.documents.all() {
            if let Ok(closed) = self.documents.close(doc.uri()) {
                self.did_close.fire(&closed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn uri(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn open_get_close() {
        let host = Host::new();
        let doc = host.open_document(uri("test:a"), "hello");
        assert_eq!(doc.version(), 1);
        assert_eq!(doc.language_id(), DEFAULT_LANGUAGE_ID);

        // reopening returns the same document
        let again = host.open_document(uri("test:a"), "ignored");
        assert_eq!(again.get_text().unwrap(), "hello");

        host.close_document(&uri("test:a")).unwrap();
        assert!(host.document(&uri("test:a")).is_err());
        assert!(doc.get_text().is_err());
    }

    #[test]
    fn open_and_close_events_fire() {
        let host = Host::new();
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        host.subscriptions()
            .push(host.on_did_open_document().listen(move |doc| {
                l.lock().push(format!("open {}", doc.uri()));
            }));
        let l = log.clone();
        host.subscriptions()
            .push(host.on_did_close_document().listen(move |doc| {
                l.lock().push(format!("close {}", doc.uri()));
            }));

        host.open_document(uri("test:a"), "x");
        host.close_document(&uri("test:a")).unwrap();
        assert_eq!(*log.lock(), vec!["open test:a", "close test:a"]);
    }

    #[test]
    fn apply_edit_scenario() {
        // replace (0,0)-(0,1) with "X" on "ab\ncd"
        let host = Host::new();
        host.open_document(uri("test:a"), "ab\ncd");

        let events: Arc<Mutex<Vec<DocumentChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        let _sub = host.on_did_change_document().listen(move |change| {
            e.lock().push(change.clone());
        });

        let mut edit = WorkspaceEdit::new();
        edit.replace(uri("test:a"), Range::from_coords(0, 0, 0, 1), "X");
        host.apply_edit(&edit).unwrap();

        let doc = host.document(&uri("test:a")).unwrap();
        assert_eq!(doc.get_text().unwrap(), "Xb\ncd");
        assert_eq!(doc.version(), 2);

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content_changes.len(), 1);
        assert_eq!(events[0].content_changes[0].range, Range::from_coords(0, 0, 0, 1));
        assert_eq!(events[0].content_changes[0].text, "X");
        assert_eq!(events[0].document.version(), 2);
    }

    #[test]
    fn conflicting_edit_changes_nothing() {
        let host = Host::new();
        host.open_document(uri("test:a"), "0123456789");

        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        let _sub = host.on_did_change_document().listen(move |_| {
            f.store(true, Ordering::SeqCst);
        });

        let mut edit = WorkspaceEdit::new();
        edit.replace(uri("test:a"), Range::from_coords(0, 0, 0, 5), "1");
        edit.replace(uri("test:a"), Range::from_coords(0, 3, 0, 8), "2");

        let err = host.apply_edit(&edit).unwrap_err();
        assert!(matches!(err, HostError::EditConflict { .. }));

        let doc = host.document(&uri("test:a")).unwrap();
        assert_eq!(doc.version(), 1);
        assert_eq!(doc.get_text().unwrap(), "0123456789");
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn multi_document_edit_is_atomic() {
        let host = Host::new();
        host.open_document(uri("test:a"), "aa");

        let mut edit = WorkspaceEdit::new();
        edit.replace(uri("test:a"), Range::from_coords(0, 0, 0, 1), "X");
        edit.replace(uri("test:missing"), Range::from_coords(0, 0, 0, 1), "Y");

        assert!(matches!(
            host.apply_edit(&edit),
            Err(HostError::DocumentNotFound { .. })
        ));
        let doc = host.document(&uri("test:a")).unwrap();
        assert_eq!(doc.version(), 1);
        assert_eq!(doc.get_text().unwrap(), "aa");
    }

    #[test]
    fn file_operations_commit_and_roll_back() {
        let host = Host::new();
        host.open_document(uri("test:a"), "a");

        // create + edit the created file in one transaction
        let mut edit = WorkspaceEdit::new();
        edit.create_file(uri("test:new"), "fresh\n", false);
        edit.insert(uri("test:new"), Position::new(1, 0), "more");
        host.apply_edit(&edit).unwrap();

        let created = host.document(&uri("test:new")).unwrap();
        assert_eq!(created.get_text().unwrap(), "fresh\nmore");
        assert_eq!(created.version(), 2);

        // a conflicting edit rolls back the create in the same batch
        let mut failing = WorkspaceEdit::new();
        failing.create_file(uri("test:other"), "", false);
        failing.replace(uri("test:a"), Range::from_coords(0, 0, 0, 1), "x");
        failing.replace(uri("test:a"), Range::from_coords(0, 0, 0, 1), "y");
        assert!(host.apply_edit(&failing).is_err());
        assert!(host.document(&uri("test:other")).is_err());
        assert_eq!(host.document(&uri("test:a")).unwrap().version(), 1);
    }

    #[test]
    fn rename_preserves_version_and_content() {
        let host = Host::new();
        host.open_document(uri("test:old"), "body");

        let mut bump = WorkspaceEdit::new();
        bump.insert(uri("test:old"), Position::new(0, 4), "!");
        host.apply_edit(&bump).unwrap();

        let mut rename = WorkspaceEdit::new();
        rename.rename_file(uri("test:old"), uri("test:new"), false);
        host.apply_edit(&rename).unwrap();

        assert!(host.document(&uri("test:old")).is_err());
        let doc = host.document(&uri("test:new")).unwrap();
        assert_eq!(doc.get_text().unwrap(), "body!");
        assert_eq!(doc.version(), 2);
    }

    #[test]
    fn delete_requires_existence_unless_ignored() {
        let host = Host::new();

        let mut edit = WorkspaceEdit::new();
        edit.delete_file(uri("test:missing"), false);
        assert!(matches!(
            host.apply_edit(&edit),
            Err(HostError::DocumentNotFound { .. })
        ));

        let mut tolerant = WorkspaceEdit::new();
        tolerant.delete_file(uri("test:missing"), true);
        host.apply_edit(&tolerant).unwrap();
    }

    #[test]
    fn create_conflicts_with_open_document() {
        let host = Host::new();
        host.open_document(uri("test:a"), "x");

        let mut edit = WorkspaceEdit::new();
        edit.create_file(uri("test:a"), "", false);
        assert!(matches!(
            host.apply_edit(&edit),
            Err(HostError::DocumentExists { .. })
        ));

        // overwrite replaces the document with a fresh version 1
        let mut overwrite = WorkspaceEdit::new();
        overwrite.create_file(uri("test:a"), "new", true);
        host.apply_edit(&overwrite).unwrap();
        let doc = host.document(&uri("test:a")).unwrap();
        assert_eq!(doc.get_text().unwrap(), "new");
        assert_eq!(doc.version(), 1);
    }

    #[test]
    fn listener_failure_reaches_side_channel() {
        let host = Host::new();
        let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let f = failures.clone();
        let _watch = host.on_listener_failure().listen(move |failure| {
            f.lock().push(failure.event.to_string());
        });

        let _bad = host
            .on_did_open_document()
            .subscribe(|_| Err("listener exploded".into()));

        host.open_document(uri("test:a"), "");
        assert_eq!(*failures.lock(), vec!["document/did_open".to_string()]);
    }

    #[test]
    fn shutdown_disposes_and_closes() {
        let host = Host::new();
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let l = log.clone();
            host.subscriptions()
                .push(Disposable::new(move || l.lock().push(name.to_string())));
        }
        let doc = host.open_document(uri("test:a"), "x");

        host.shutdown();
        host.shutdown(); // idempotent

        assert_eq!(*log.lock(), vec!["second", "first"]);
        assert!(doc.is_closed());
        assert!(host.documents().is_empty());
    }

    #[test]
    fn settings_shape_documents() {
        let settings: Settings = toml::from_str(
            "[document]\neol = \"crlf\"\ndefault_language = \"rust\"\n",
        )
        .unwrap();
        let host = Host::with_settings(settings.resolve().unwrap());

        let doc = host.open_document(uri("test:a"), "a\nb");
        assert_eq!(doc.eol(), EndOfLine::Crlf);
        assert_eq!(doc.language_id(), "rust");
    }
}
