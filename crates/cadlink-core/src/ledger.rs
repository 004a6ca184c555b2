//! File integrity ledger.
//!
//! Durable map of session id to the local file that session is bound to.
//! Status is always derived from live filesystem metadata, never trusted
//! from the stored value. The in-memory map sits behind one lock; the
//! encrypted snapshot is written outside it.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::errors::{Classify, ErrorKind};
use crate::secure_store::{SecureStore, StoreError, LINKED_FILES_KEY};
use crate::types::{
    FileStatus, FileStatusChange, LinkedFileRecord, ValidationOutcome, ValidationScenario,
};

#[derive(Debug, Error, Clone)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("file path is empty")]
    EmptyPath,

    #[error("no ledger entry for session {0}")]
    UnknownSession(String),

    #[error("cannot resolve path: {0}")]
    Io(String),
}

impl Classify for LedgerError {
    fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Store(_) | LedgerError::Io(_) => ErrorKind::Storage,
            LedgerError::EmptyPath => ErrorKind::Configuration,
            LedgerError::UnknownSession(_) => ErrorKind::IntegrityConflict,
        }
    }
}

/// Live metadata of a file, if it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileMeta {
    size: u64,
    modified: Option<DateTime<Utc>>,
}

fn file_meta(path: &Path) -> Option<FileMeta> {
    let meta = fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    Some(FileMeta {
        size: meta.len(),
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
    })
}

pub struct FileIntegrityLedger {
    store: SecureStore,
    records: Mutex<HashMap<String, LinkedFileRecord>>,
    /// Serializes snapshot-and-write so the newest snapshot lands last.
    persist_lock: Mutex<()>,
}

impl FileIntegrityLedger {
    /// Open the ledger, loading any persisted entries.
    pub fn load(store: SecureStore) -> Self {
        let records: Vec<LinkedFileRecord> =
            store.retrieve(LINKED_FILES_KEY).unwrap_or_default();
        debug!(entries = records.len(), "loaded file ledger");
        let records = records
            .into_iter()
            .map(|r| (r.session_id.clone(), r))
            .collect();
        Self {
            store,
            records: Mutex::new(records),
            persist_lock: Mutex::new(()),
        }
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Link `session_id` to the file at `file_path`.
    ///
    /// Any other session linked to the same path or GUID is evicted so each
    /// file resolves to exactly one session.
    pub fn register(
        &self,
        session_id: &str,
        file_path: &Path,
        document_guid: Option<&str>,
    ) -> Result<LinkedFileRecord, LedgerError> {
        let path = normalize_path(file_path)?;
        let guid = clean_guid(document_guid);
        let meta = file_meta(&path);
        let now = Utc::now();

        let record = LinkedFileRecord {
            session_id: session_id.to_string(),
            document_guid: guid.clone(),
            file_path: path.clone(),
            original_path: path.clone(),
            file_size: meta.map(|m| m.size).unwrap_or(0),
            last_modified: meta.and_then(|m| m.modified),
            registered_at: now,
            last_checked: now,
            status: if meta.is_some() {
                FileStatus::Available
            } else {
                FileStatus::Missing
            },
        };

        {
            let mut records = self.records.lock();
            let key = path_key(&path);
            records.retain(|id, existing| {
                if id == session_id {
                    return true;
                }
                let same_path = path_key(&existing.file_path) == key;
                let same_guid = match (&guid, &existing.document_guid) {
                    (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                    _ => false,
                };
                if same_path || same_guid {
                    info!(evicted = %id, session_id, "replacing ledger entry for the same file");
                    false
                } else {
                    true
                }
            });
            records.insert(session_id.to_string(), record.clone());
        }

        info!(session_id, path = %path.display(), status = %record.status, "file linked");
        self.persist();
        Ok(record)
    }

    /// Point an existing session at a new path (the file was moved or renamed).
    pub fn update_file_path(&self, session_id: &str, new_path: &Path) -> Result<(), LedgerError> {
        let path = normalize_path(new_path)?;
        let meta = file_meta(&path);
        {
            let mut records = self.records.lock();
            let record = records
                .get_mut(session_id)
                .ok_or_else(|| LedgerError::UnknownSession(session_id.to_string()))?;
            record.file_path = path.clone();
            if let Some(meta) = meta {
                record.file_size = meta.size;
                record.last_modified = meta.modified;
            }
            record.last_checked = Utc::now();
            let status = derive_status(record, meta, file_meta(&record.original_path));
            record.status = status;
        }
        info!(session_id, path = %path.display(), "ledger path updated");
        self.persist();
        Ok(())
    }

    /// Record the document GUID for an entry created before GUIDs existed.
    pub fn attach_guid(&self, session_id: &str, guid: &str) -> Result<(), LedgerError> {
        let guid = clean_guid(Some(guid));
        {
            let mut records = self.records.lock();
            let record = records
                .get_mut(session_id)
                .ok_or_else(|| LedgerError::UnknownSession(session_id.to_string()))?;
            record.document_guid = guid;
        }
        debug!(session_id, "document guid attached");
        self.persist();
        Ok(())
    }

    /// Move an entry to the session id the server assigned.
    ///
    /// Any entry already stored under `new_id` is replaced.
    pub fn rekey(&self, old_id: &str, new_id: &str) -> Result<(), LedgerError> {
        if old_id == new_id {
            return Ok(());
        }
        {
            let mut records = self.records.lock();
            let mut record = records
                .remove(old_id)
                .ok_or_else(|| LedgerError::UnknownSession(old_id.to_string()))?;
            record.session_id = new_id.to_string();
            records.insert(new_id.to_string(), record);
        }
        info!(old_id, new_id, "ledger entry re-keyed");
        self.persist();
        Ok(())
    }

    /// Apply the ledger update an auto-valid outcome asks for.
    pub fn apply_outcome(
        &self,
        outcome: &ValidationOutcome,
        file_path: &Path,
        document_guid: Option<&str>,
    ) -> Result<(), LedgerError> {
        let Some(session_id) = outcome.session_id.as_deref() else {
            return Ok(());
        };
        match outcome.scenario {
            ValidationScenario::FilePathChanged => self.update_file_path(session_id, file_path),
            ValidationScenario::LegacyFile => match clean_guid(document_guid) {
                Some(guid) => self.attach_guid(session_id, &guid),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    pub fn unregister(&self, session_id: &str) -> bool {
        let removed = self.records.lock().remove(session_id).is_some();
        if removed {
            info!(session_id, "file unlinked");
            self.persist();
        }
        removed
    }

    pub fn clear_all(&self) {
        let count = {
            let mut records = self.records.lock();
            let count = records.len();
            records.clear();
            count
        };
        info!(count, "file ledger cleared");
        self.persist();
    }

    // ------------------------------------------------------------------------
    // Integrity checks
    // ------------------------------------------------------------------------

    /// Recompute every entry's status from the filesystem.
    ///
    /// Returns only the entries whose status changed.
    pub fn check_all(&self) -> Vec<FileStatusChange> {
        let snapshot: Vec<LinkedFileRecord> = self.records.lock().values().cloned().collect();

        let computed: Vec<(String, FileStatus)> = snapshot
            .iter()
            .map(|r| {
                let status = derive_status(r, file_meta(&r.file_path), file_meta(&r.original_path));
                (r.session_id.clone(), status)
            })
            .collect();

        let now = Utc::now();
        let mut changes = Vec::new();
        {
            let mut records = self.records.lock();
            for (session_id, status) in computed {
                let Some(record) = records.get_mut(&session_id) else {
                    continue;
                };
                record.last_checked = now;
                if record.status != status {
                    changes.push(FileStatusChange {
                        session_id: session_id.clone(),
                        file_path: record.file_path.clone(),
                        old_status: record.status,
                        new_status: status,
                        message: status_message(status, record),
                        timestamp: now,
                    });
                    record.status = status;
                }
            }
        }

        if !changes.is_empty() {
            info!(changed = changes.len(), "file status changes detected");
            self.persist();
        }
        changes
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub fn get(&self, session_id: &str) -> Option<LinkedFileRecord> {
        self.records.lock().get(session_id).cloned()
    }

    /// All entries, oldest registration first.
    pub fn list(&self) -> Vec<LinkedFileRecord> {
        let mut all: Vec<_> = self.records.lock().values().cloned().collect();
        all.sort_by_key(|r| r.registered_at);
        all
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Most recently registered entry carrying `guid`.
    pub fn find_by_guid(&self, guid: &str) -> Option<LinkedFileRecord> {
        let guid = clean_guid(Some(guid))?;
        self.records
            .lock()
            .values()
            .filter(|r| {
                r.document_guid
                    .as_deref()
                    .is_some_and(|g| g.eq_ignore_ascii_case(&guid))
            })
            .max_by_key(|r| r.registered_at)
            .cloned()
    }

    /// Most recently registered entry at `path`.
    pub fn find_by_path(&self, path: &Path) -> Option<LinkedFileRecord> {
        let key = path_key(&normalize_path(path).ok()?);
        self.records
            .lock()
            .values()
            .filter(|r| path_key(&r.file_path) == key)
            .max_by_key(|r| r.registered_at)
            .cloned()
    }

    // ------------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------------

    /// Classify a candidate file against the ledger.
    pub fn validate_for_connection(
        &self,
        file_path: &Path,
        document_guid: Option<&str>,
    ) -> ValidationOutcome {
        match self.evaluate(file_path, document_guid) {
            Ok(outcome) => {
                debug!(scenario = ?outcome.scenario, session_id = ?outcome.session_id, "ledger validation");
                outcome
            }
            Err(e) => {
                warn!(error = %e, "ledger validation failed");
                ValidationOutcome {
                    scenario: ValidationScenario::ValidationError,
                    session_id: None,
                    requires_update: false,
                    requires_user_decision: false,
                    message: format!("File validation failed: {e}"),
                }
            }
        }
    }

    fn evaluate(
        &self,
        file_path: &Path,
        document_guid: Option<&str>,
    ) -> Result<ValidationOutcome, LedgerError> {
        let path = normalize_path(file_path)?;
        let candidate_key = path_key(&path);
        let guid = clean_guid(document_guid);

        let by_guid = guid.as_deref().and_then(|g| self.find_by_guid(g));
        let by_path = self.find_by_path(&path);

        if let Some(g) = &by_guid {
            let same_session = by_path
                .as_ref()
                .is_some_and(|p| p.session_id == g.session_id);
            if same_session || path_key(&g.file_path) == candidate_key {
                return Ok(outcome(
                    ValidationScenario::PerfectMatch,
                    Some(&g.session_id),
                    "File matches its linked session.",
                ));
            }
            return Ok(outcome(
                ValidationScenario::FilePathChanged,
                Some(&g.session_id),
                &format!(
                    "File was moved or renamed from {}.",
                    g.file_path.display()
                ),
            ));
        }

        let Some(p) = by_path else {
            return Ok(outcome(
                ValidationScenario::NoLinkFound,
                None,
                "No session is linked to this file.",
            ));
        };

        let scenario = match (&p.document_guid, &guid) {
            (None, _) => ValidationScenario::LegacyFile,
            (Some(_), None) => ValidationScenario::FileReplacedNoGuid,
            (Some(stored), Some(candidate)) if !stored.eq_ignore_ascii_case(candidate) => {
                ValidationScenario::FileReplaced
            }
            // Unreachable when the GUID lookup above is consistent.
            (Some(_), Some(_)) => ValidationScenario::PerfectMatch,
        };
        let message = match scenario {
            ValidationScenario::LegacyFile => "File was linked before document ids were tracked.",
            ValidationScenario::FileReplacedNoGuid => {
                "A different file without a document id now occupies this path. Choose whether to reuse the linked session."
            }
            ValidationScenario::FileReplaced => {
                "A different document now occupies this path. Choose whether to reuse the linked session."
            }
            _ => "File matches its linked session.",
        };
        Ok(outcome(scenario, Some(&p.session_id), message))
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    fn persist(&self) {
        let _guard = self.persist_lock.lock();
        let snapshot: Vec<LinkedFileRecord> = self.records.lock().values().cloned().collect();
        if let Err(e) = self.store.store(LINKED_FILES_KEY, &snapshot) {
            warn!(error = %e, "failed to persist file ledger");
        }
    }
}

fn outcome(scenario: ValidationScenario, session_id: Option<&str>, message: &str) -> ValidationOutcome {
    ValidationOutcome {
        scenario,
        session_id: session_id.map(str::to_string),
        requires_update: matches!(
            scenario,
            ValidationScenario::FilePathChanged | ValidationScenario::LegacyFile
        ),
        requires_user_decision: matches!(
            scenario,
            ValidationScenario::FileReplaced | ValidationScenario::FileReplacedNoGuid
        ),
        message: message.to_string(),
    }
}

/// Status of `record` given live metadata at its current and original paths.
fn derive_status(
    record: &LinkedFileRecord,
    current: Option<FileMeta>,
    original: Option<FileMeta>,
) -> FileStatus {
    let relocated = path_key(&record.file_path) != path_key(&record.original_path);
    match current {
        None if relocated && original.is_some() => FileStatus::Moved,
        None => FileStatus::Missing,
        Some(meta) if meta.size != record.file_size || meta.modified != record.last_modified => {
            FileStatus::Modified
        }
        Some(_) if relocated => FileStatus::PathChanged,
        Some(_) => FileStatus::Available,
    }
}

fn status_message(status: FileStatus, record: &LinkedFileRecord) -> String {
    let name = record
        .file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| record.file_path.display().to_string());
    match status {
        FileStatus::Available => format!("{name} is available"),
        FileStatus::Missing => format!("{name} is missing"),
        FileStatus::Modified => format!("{name} was modified"),
        FileStatus::Moved => format!("{name} was moved"),
        FileStatus::PathChanged => format!("{name} is linked under a new path"),
    }
}

fn clean_guid(guid: Option<&str>) -> Option<String> {
    guid.map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
}

/// Absolute path with `.` and `..` collapsed lexically.
pub fn normalize_path(path: &Path) -> Result<PathBuf, LedgerError> {
    if path.as_os_str().is_empty() {
        return Err(LedgerError::EmptyPath);
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| LedgerError::Io(e.to_string()))?
            .join(path)
    };
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

/// Comparison key honoring the platform's filesystem case rules.
fn path_key(path: &Path) -> String {
    let s = path.to_string_lossy();
    if cfg!(any(windows, target_os = "macos")) {
        s.to_lowercase()
    } else {
        s.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::test_store;
    use tempfile::TempDir;

    fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
        file_meta(path).and_then(|m| m.modified)
    }

    struct Fixture {
        dir: TempDir,
        ledger: FileIntegrityLedger,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let ledger = FileIntegrityLedger::load(test_store(&dir.path().join("store")));
            Self { dir, ledger }
        }

        fn file(&self, name: &str, contents: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, contents).unwrap();
            path
        }
    }

    #[test]
    fn test_register_sets_status_by_existence() {
        let fx = Fixture::new();
        let present = fx.file("a.3dm", "data");
        let rec = fx.ledger.register("S1", &present, Some("G1")).unwrap();
        assert_eq!(rec.status, FileStatus::Available);
        assert_eq!(rec.file_size, 4);

        let rec = fx
            .ledger
            .register("S2", &fx.dir.path().join("nope.3dm"), None)
            .unwrap();
        assert_eq!(rec.status, FileStatus::Missing);
    }

    #[test]
    fn test_register_rejects_empty_path() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.ledger.register("S", Path::new(""), None),
            Err(LedgerError::EmptyPath)
        ));
    }

    #[test]
    fn test_reconciliation_scenarios() {
        let fx = Fixture::new();
        let p = fx.file("model.3dm", "x");
        let p2 = fx.file("renamed.3dm", "x");
        let p3 = fx.file("other.3dm", "y");
        fx.ledger.register("S", &p, Some("G")).unwrap();

        let o = fx.ledger.validate_for_connection(&p, Some("G"));
        assert_eq!(o.scenario, ValidationScenario::PerfectMatch);
        assert_eq!(o.session_id.as_deref(), Some("S"));
        assert!(o.is_auto_valid());

        let o = fx.ledger.validate_for_connection(&p2, Some("G"));
        assert_eq!(o.scenario, ValidationScenario::FilePathChanged);
        assert_eq!(o.session_id.as_deref(), Some("S"));
        assert!(o.requires_update);

        let o = fx.ledger.validate_for_connection(&p, None);
        assert_eq!(o.scenario, ValidationScenario::FileReplacedNoGuid);
        assert!(o.requires_user_decision);
        assert!(!o.is_auto_valid());

        let o = fx.ledger.validate_for_connection(&p, Some("G2"));
        assert_eq!(o.scenario, ValidationScenario::FileReplaced);
        assert!(o.requires_user_decision);

        let o = fx.ledger.validate_for_connection(&p3, Some("G3"));
        assert_eq!(o.scenario, ValidationScenario::NoLinkFound);
        assert_eq!(o.session_id, None);
    }

    #[test]
    fn test_legacy_file_then_attach_guid() {
        let fx = Fixture::new();
        let p = fx.file("old.3dm", "x");
        fx.ledger.register("S", &p, None).unwrap();

        let o = fx.ledger.validate_for_connection(&p, Some("NEW"));
        assert_eq!(o.scenario, ValidationScenario::LegacyFile);
        assert!(o.requires_update);

        fx.ledger.apply_outcome(&o, &p, Some("NEW")).unwrap();
        let o = fx.ledger.validate_for_connection(&p, Some("NEW"));
        assert_eq!(o.scenario, ValidationScenario::PerfectMatch);
    }

    #[test]
    fn test_empty_path_is_validation_error() {
        let fx = Fixture::new();
        let o = fx.ledger.validate_for_connection(Path::new(""), Some("G"));
        assert_eq!(o.scenario, ValidationScenario::ValidationError);
        assert!(!o.is_auto_valid());
    }

    #[test]
    fn test_register_evicts_duplicates() {
        let fx = Fixture::new();
        let p = fx.file("dup.3dm", "x");
        fx.ledger.register("OLD", &p, None).unwrap();
        fx.ledger.register("NEW", &p, Some("G")).unwrap();
        assert_eq!(fx.ledger.len(), 1);
        assert_eq!(fx.ledger.find_by_path(&p).unwrap().session_id, "NEW");
    }

    #[test]
    fn test_path_lookup_normalizes() {
        let fx = Fixture::new();
        let p = fx.file("n.3dm", "x");
        fx.ledger.register("S", &p, None).unwrap();
        let dotted = fx.dir.path().join(".").join("sub").join("..").join("n.3dm");
        assert_eq!(fx.ledger.find_by_path(&dotted).unwrap().session_id, "S");
    }

    #[test]
    fn test_check_all_reports_transitions_once() {
        let fx = Fixture::new();
        let p = fx.file("watch.3dm", "x");
        fx.ledger.register("S", &p, None).unwrap();
        assert!(fx.ledger.check_all().is_empty());

        fs::write(&p, "longer contents").unwrap();
        let changes = fx.ledger.check_all();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_status, FileStatus::Available);
        assert_eq!(changes[0].new_status, FileStatus::Modified);
        assert!(fx.ledger.check_all().is_empty());

        fs::remove_file(&p).unwrap();
        let changes = fx.ledger.check_all();
        assert_eq!(changes[0].new_status, FileStatus::Missing);
    }

    #[test]
    fn test_moved_and_path_changed() {
        let fx = Fixture::new();
        let original = fx.file("orig.3dm", "x");
        let moved = fx.file("moved.3dm", "x");
        fx.ledger.register("S", &original, Some("G")).unwrap();

        fx.ledger.update_file_path("S", &moved).unwrap();
        assert_eq!(fx.ledger.get("S").unwrap().status, FileStatus::PathChanged);

        fs::remove_file(&moved).unwrap();
        let changes = fx.ledger.check_all();
        assert_eq!(changes[0].new_status, FileStatus::Moved);
    }

    #[test]
    fn test_check_all_never_touches_files() {
        let fx = Fixture::new();
        let p = fx.file("ro.3dm", "abc");
        fx.ledger.register("S", &p, None).unwrap();
        let before = modified_time(&p);
        fx.ledger.check_all();
        assert_eq!(fs::read_to_string(&p).unwrap(), "abc");
        assert_eq!(modified_time(&p), before);
    }

    #[test]
    fn test_persists_across_reload() {
        let fx = Fixture::new();
        let p = fx.file("keep.3dm", "x");
        fx.ledger.register("S", &p, Some("G")).unwrap();

        let reloaded = FileIntegrityLedger::load(test_store(&fx.dir.path().join("store")));
        let rec = reloaded.get("S").unwrap();
        assert_eq!(rec.document_guid.as_deref(), Some("G"));

        reloaded.unregister("S");
        let again = FileIntegrityLedger::load(test_store(&fx.dir.path().join("store")));
        assert!(again.is_empty());
    }

    #[test]
    fn test_clear_all() {
        let fx = Fixture::new();
        fx.ledger.register("A", &fx.file("a", "1"), None).unwrap();
        fx.ledger.register("B", &fx.file("b", "2"), None).unwrap();
        assert_eq!(fx.ledger.list().len(), 2);
        fx.ledger.clear_all();
        assert!(fx.ledger.list().is_empty());
    }

    #[test]
    fn test_rekey_moves_entry_and_persists() {
        let fx = Fixture::new();
        let path = fx.file("a", "1");
        fx.ledger.register("local-1", &path, Some("G")).unwrap();

        fx.ledger.rekey("local-1", "server-9").unwrap();
        assert!(fx.ledger.get("local-1").is_none());
        assert_eq!(fx.ledger.get("server-9").unwrap().session_id, "server-9");
        assert_eq!(fx.ledger.find_by_guid("G").unwrap().session_id, "server-9");

        let reloaded = FileIntegrityLedger::load(fx.ledger.store.clone());
        assert!(reloaded.get("server-9").is_some());

        fx.ledger.rekey("server-9", "server-9").unwrap();
        assert!(matches!(
            fx.ledger.rekey("missing", "x"),
            Err(LedgerError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_update_unknown_session() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.ledger.update_file_path("missing", &fx.file("z", "z")),
            Err(LedgerError::UnknownSession(_))
        ));
    }

    proptest::proptest! {
        #[test]
        fn prop_normalize_path_is_idempotent(
            parts in proptest::collection::vec("[a-z]{1,6}|\\.|\\.\\.", 1..8)
        ) {
            let raw: PathBuf = std::iter::once("/".to_string()).chain(parts).collect();
            let once = normalize_path(&raw).unwrap();
            let twice = normalize_path(&once).unwrap();
            proptest::prop_assert_eq!(&once, &twice);
            proptest::prop_assert!(once
                .components()
                .all(|c| !matches!(c, Component::CurDir | Component::ParentDir)));
        }
    }
}
