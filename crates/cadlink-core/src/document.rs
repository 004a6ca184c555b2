//! The host document the session is bound to.

use std::path::{Path, PathBuf};

/// The currently open file in the host application.
pub trait HostDocument: Send + Sync {
    /// Path of the open file; `None` when the document was never saved.
    fn file_path(&self) -> Option<PathBuf>;

    /// Durable document identifier embedded in the file, if the host supports one.
    fn document_guid(&self) -> Option<String>;
}

/// A fixed document, for headless hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDocument {
    path: Option<PathBuf>,
    guid: Option<String>,
}

impl StaticDocument {
    pub fn new(path: impl AsRef<Path>, guid: Option<&str>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            guid: guid.map(str::to_string),
        }
    }

    /// A document that has not been saved yet.
    pub fn unsaved() -> Self {
        Self::default()
    }
}

impl HostDocument for StaticDocument {
    fn file_path(&self) -> Option<PathBuf> {
        self.path.clone()
    }

    fn document_guid(&self) -> Option<String> {
        self.guid.clone()
    }
}
