use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::fs;

use tracing::{debug, warn};

/// Persistent key→value store of export offsets, shared across sessions.
/// Keys are `<canonical library path>::<export name>`, values are RVAs,
/// which are stable for a fixed library build regardless of where ASLR
/// places the module. Concurrent writers to one key race benignly: the
/// offset they write is identical.
pub struct OffsetStore {
    path: PathBuf,
    entries: HashMap<String, u32>,
}

impl OffsetStore {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    // Offsets are cheap to recompute; a mangled store file is
                    // discarded rather than fatal.
                    warn!(path = %path.display(), error = %e, "offset store unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };

        debug!(path = %path.display(), entries = entries.len(), "opened offset store");
        Ok(Self { path, entries })
    }

    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .map(|dir| dir.join("pyject"))
            .unwrap_or_else(std::env::temp_dir)
            .join("offsets.json")
    }

    fn key(library: &Path, symbol: &str) -> String {
        format!("{}::{}", library.display(), symbol)
    }

    pub fn get(&self, library: &Path, symbol: &str) -> Option<u32> {
        self.entries.get(&Self::key(library, symbol)).copied()
    }

    pub fn insert(&mut self, library: &Path, symbol: &str, rva: u32) -> io::Result<()> {
        self.entries.insert(Self::key(library, symbol), rva);
        self.flush()
    }

    pub fn remove(&mut self, library: &Path, symbol: &str) -> io::Result<()> {
        if self.entries.remove(&Self::key(library, symbol)).is_none() {
            return Ok(());
        }
        self.flush()
    }

    fn flush(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_vec_pretty(&self.entries)?;
        fs::write(&self.path, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = OffsetStore::open(dir.path().join("offsets.json")).unwrap();
        assert_eq!(store.get(Path::new("lib.dll"), "Foo"), None);
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.json");
        let library = Path::new(r"C:\py\python3.dll");

        let mut store = OffsetStore::open(&path).unwrap();
        store.insert(library, "Py_Initialize", 0x1a40).unwrap();
        drop(store);

        let store = OffsetStore::open(&path).unwrap();
        assert_eq!(store.get(library, "Py_Initialize"), Some(0x1a40));
        assert_eq!(store.get(library, "Py_Finalize"), None);
    }

    #[test]
    fn overwrite_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = OffsetStore::open(dir.path().join("offsets.json")).unwrap();
        let library = Path::new("python3.dll");

        store.insert(library, "Foo", 7).unwrap();
        store.insert(library, "Foo", 7).unwrap();
        assert_eq!(store.get(library, "Foo"), Some(7));
    }

    #[test]
    fn removal_drops_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.json");
        let library = Path::new("python3.dll");

        let mut store = OffsetStore::open(&path).unwrap();
        store.insert(library, "Foo", 7).unwrap();
        store.remove(library, "Foo").unwrap();
        assert_eq!(store.get(library, "Foo"), None);

        let store = OffsetStore::open(&path).unwrap();
        assert_eq!(store.get(library, "Foo"), None);
    }

    #[test]
    fn corrupt_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.json");
        fs::write(&path, b"not json").unwrap();

        let store = OffsetStore::open(&path).unwrap();
        assert_eq!(store.get(Path::new("python3.dll"), "Foo"), None);
    }
}
