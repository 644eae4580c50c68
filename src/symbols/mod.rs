mod exports;
mod store;

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, warn};

pub use exports::{ExportReader, PeExports};
pub use store::OffsetStore;

use crate::error::Result;
use crate::injector::RemoteModule;

/// A resolved export address, with provenance: addresses computed from a
/// cached offset get one evict-and-recompute retry if the target rejects
/// them at call time.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedSymbol {
    pub address: usize,
    pub from_cache: bool,
}

/// Resolves exported-function addresses inside an injected module.
///
/// Offsets are looked up in an in-process map first, then in the shared
/// persistent store, and only then computed by parsing the library's export
/// table. Absolute addresses are never cached; `base + rva` is recomputed
/// per module so a cache entry stays valid across ASLR re-bases.
pub struct SymbolResolver<R = PeExports> {
    reader: R,
    store: OffsetStore,
    resolved: HashMap<(PathBuf, String), u32>,
    parses: u64,
}

impl SymbolResolver<PeExports> {
    pub fn new(store: OffsetStore) -> Self {
        Self::with_reader(PeExports, store)
    }
}

impl<R: ExportReader> SymbolResolver<R> {
    pub fn with_reader(reader: R, store: OffsetStore) -> Self {
        Self { reader, store, resolved: HashMap::new(), parses: 0 }
    }

    pub fn resolve(&mut self, module: &RemoteModule, symbol: &str) -> Result<ResolvedSymbol> {
        let library = module.library_path();
        let key = (library.to_path_buf(), symbol.to_owned());

        if let Some(&rva) = self.resolved.get(&key) {
            return Ok(ResolvedSymbol {
                address: module.base_address().wrapping_add(rva as usize),
                from_cache: true,
            });
        }

        if let Some(rva) = self.store.get(library, symbol) {
            self.resolved.insert(key, rva);
            return Ok(ResolvedSymbol {
                address: module.base_address().wrapping_add(rva as usize),
                from_cache: true,
            });
        }

        let rva = self.reader.export_rva(library, symbol)?;
        self.parses += 1;
        debug!(symbol, rva = format_args!("{rva:#x}"), library = %library.display(), "export resolved");

        self.resolved.insert(key, rva);
        if let Err(e) = self.store.insert(library, symbol, rva) {
            warn!(symbol, error = %e, "failed to persist offset, continuing with in-process cache");
        }

        Ok(ResolvedSymbol {
            address: module.base_address().wrapping_add(rva as usize),
            from_cache: false,
        })
    }

    /// Drops a cached offset from both cache levels so the next `resolve`
    /// reparses the export table.
    pub fn evict(&mut self, module: &RemoteModule, symbol: &str) {
        let library = module.library_path();
        self.resolved.remove(&(library.to_path_buf(), symbol.to_owned()));
        if let Err(e) = self.store.remove(library, symbol) {
            warn!(symbol, error = %e, "failed to evict offset from persistent store");
        }
    }

    /// Number of export-table parses this resolver has performed.
    pub fn parse_count(&self) -> u64 {
        self.parses
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::error::Error;

    struct FakeReader {
        rva: u32,
    }

    impl ExportReader for FakeReader {
        fn export_rva(&self, library: &Path, symbol: &str) -> Result<u32> {
            if symbol == "Missing" {
                return Err(Error::symbol(library, symbol, "export not present"));
            }
            Ok(self.rva)
        }
    }

    fn module() -> RemoteModule {
        RemoteModule::new(0x7ff8_0000_0000, PathBuf::from(r"C:\py\python3.dll"))
    }

    fn resolver(dir: &tempfile::TempDir) -> SymbolResolver<FakeReader> {
        let store = OffsetStore::open(dir.path().join("offsets.json")).unwrap();
        SymbolResolver::with_reader(FakeReader { rva: 0x1a40 }, store)
    }

    #[test]
    fn second_resolution_hits_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = resolver(&dir);
        let module = module();

        let first = resolver.resolve(&module, "Py_Initialize").unwrap();
        let second = resolver.resolve(&module, "Py_Initialize").unwrap();

        assert_eq!(first.address, second.address);
        assert_eq!(first.address, 0x7ff8_0000_0000 + 0x1a40);
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(resolver.parse_count(), 1);
    }

    #[test]
    fn offsets_are_reused_across_resolvers() {
        let dir = tempfile::tempdir().unwrap();
        let module = module();

        let mut first = resolver(&dir);
        first.resolve(&module, "Py_Initialize").unwrap();
        drop(first);

        let mut second = resolver(&dir);
        let hit = second.resolve(&module, "Py_Initialize").unwrap();
        assert!(hit.from_cache);
        assert_eq!(second.parse_count(), 0);
    }

    #[test]
    fn cached_offsets_follow_the_module_base() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = resolver(&dir);

        resolver.resolve(&module(), "Py_Initialize").unwrap();

        // Same library build, different load address in a later session.
        let rebased = RemoteModule::new(0x0000_0200_0000, PathBuf::from(r"C:\py\python3.dll"));
        let hit = resolver.resolve(&rebased, "Py_Initialize").unwrap();
        assert!(hit.from_cache);
        assert_eq!(hit.address, 0x0000_0200_0000 + 0x1a40);
    }

    #[test]
    fn eviction_forces_one_reparse() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = resolver(&dir);
        let module = module();

        resolver.resolve(&module, "Py_Initialize").unwrap();
        resolver.evict(&module, "Py_Initialize");

        let fresh = resolver.resolve(&module, "Py_Initialize").unwrap();
        assert!(!fresh.from_cache);
        assert_eq!(resolver.parse_count(), 2);
    }

    #[test]
    fn missing_export_surfaces_symbol_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = resolver(&dir);

        let err = resolver.resolve(&module(), "Missing").unwrap_err();
        assert!(matches!(err, Error::SymbolNotFound { .. }));
        // A failed lookup must not poison the cache.
        assert!(resolver.resolve(&module(), "Missing").is_err());
    }

    #[test]
    fn distinct_libraries_use_disjoint_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = resolver(&dir);

        let a = RemoteModule::new(0x1000, PathBuf::from(r"C:\a\python3.dll"));
        let b = RemoteModule::new(0x1000, PathBuf::from(r"C:\b\python3.dll"));

        resolver.resolve(&a, "Py_Initialize").unwrap();
        let other = resolver.resolve(&b, "Py_Initialize").unwrap();
        assert!(!other.from_cache);
        assert_eq!(resolver.parse_count(), 2);
    }
}
