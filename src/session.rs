use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::injector::{self, RemoteModule};
use crate::invoker::RemoteInvoker;
use crate::symbols::{OffsetStore, SymbolResolver};
use crate::wrappers::RemoteProcess;

const DEFAULT_LIBRARY: &str = "python3.dll";

const INITIALIZE_EXPORT: &str = "Py_Initialize";
const IS_INITIALIZED_EXPORT: &str = "Py_IsInitialized";
const RUN_EXPORT: &str = "PyRun_SimpleString";
const SET_PATH_EXPORT: &str = "PySys_SetPath";
const FINALIZE_EXPORT: &str = "Py_Finalize";

const PATH_LIST_SEPARATOR: &str = ";";

/// Session lifecycle. `Closed` is terminal; `cleanup` is legal from every
/// state and a no-op once closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninjected,
    Injected,
    Initialized,
    Ready,
    Finalizing,
    Closed,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Uninjected => "Uninjected",
            SessionState::Injected => "Injected",
            SessionState::Initialized => "Initialized",
            SessionState::Ready => "Ready",
            SessionState::Finalizing => "Finalizing",
            SessionState::Closed => "Closed",
        }
    }

    fn may_run(self) -> bool {
        self == SessionState::Ready
    }

    fn may_set_path(self) -> bool {
        matches!(self, SessionState::Initialized | SessionState::Ready)
    }
}

/// How to attach to a target. Only `pid` is required.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub pid: u32,
    /// Python DLL to inject; `python3.dll` through the loader search order
    /// when unset.
    pub library_path: Option<PathBuf>,
    /// Offset-store file; a per-user default location when unset.
    pub cache_path: Option<PathBuf>,
    /// Upper bound on each remote wait; wait forever when unset.
    pub call_timeout: Option<Duration>,
}

impl SessionOptions {
    pub fn new(pid: u32) -> Self {
        Self { pid, library_path: None, cache_path: None, call_timeout: None }
    }
}

struct Inner {
    state: SessionState,
    process: RemoteProcess,
    module: Option<RemoteModule>,
    resolver: SymbolResolver,
    invoker: RemoteInvoker,
    finalize_address: Option<usize>,
}

/// A Python interpreter running inside another process.
///
/// Construction synchronously drives inject → initialize and returns a
/// `Ready` session or a single aggregated error with everything torn back
/// down. Dropping the session runs [`cleanup`](Self::cleanup) if the caller
/// never did.
///
/// One session exclusively owns its process handle. Whether one target can
/// host several concurrent sessions is undefined; nothing here defends
/// against a second controller.
pub struct RemotePython {
    inner: Mutex<Inner>,
}

impl RemotePython {
    pub fn new(options: SessionOptions) -> Result<Self> {
        let process = RemoteProcess::open(options.pid)
            .map_err(|source| Error::ProcessOpen { pid: options.pid, source })?;

        match process.executable_path() {
            Ok(path) => debug!(pid = options.pid, executable = %path.display(), "opened target process"),
            Err(e) => warn!(pid = options.pid, error = %e, "opened target process, executable path unavailable"),
        }

        let library_path = canonical_library_path(options.library_path);
        let store_path = options.cache_path.unwrap_or_else(OffsetStore::default_path);
        let store = OffsetStore::open(&store_path)
            .map_err(|e| Error::Initialization(format!("cannot open offset store: {e}")))?;

        let mut inner = Inner {
            state: SessionState::Uninjected,
            process,
            module: None,
            resolver: SymbolResolver::new(store),
            invoker: RemoteInvoker::new(options.call_timeout),
            finalize_address: None,
        };

        if let Err(e) = inner.bring_up(&library_path) {
            inner.cleanup();
            return Err(e);
        }

        Ok(Self { inner: Mutex::new(inner) })
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Executes Python source in the target and returns the exit code of
    /// `PyRun_SimpleString` (`0` on success). Failures leave the session
    /// `Ready` so the caller may retry or clean up.
    pub fn run(&self, code: &str) -> Result<u32> {
        let mut inner = self.inner.lock();
        if !inner.state.may_run() {
            return Err(Error::InvalidState { required: "Ready", actual: inner.state.name() });
        }

        inner
            .execute(RUN_EXPORT, Some(code))
            .map_err(|e| Error::Execution(Box::new(e)))
    }

    /// Replaces the remote interpreter's module search path with `paths`,
    /// joined with the platform path-list separator.
    pub fn set_python_path(&self, paths: &[PathBuf]) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.may_set_path() {
            return Err(Error::InvalidState {
                required: "Initialized or Ready",
                actual: inner.state.name(),
            });
        }

        let joined = join_paths(paths);
        inner
            .execute(SET_PATH_EXPORT, Some(&joined))
            .map(|_| ())
            .map_err(|e| Error::Execution(Box::new(e)))
    }

    /// Finalizes the remote interpreter, unloads the library and releases
    /// every owned resource. Never fails and may be called any number of
    /// times; teardown problems are logged and swallowed.
    pub fn cleanup(&self) {
        self.inner.lock().cleanup();
    }
}

impl Drop for RemotePython {
    fn drop(&mut self) {
        self.inner.get_mut().cleanup();
    }
}

impl Inner {
    /// Uninjected → Injected → Initialized → Ready, or an error describing
    /// the first step that failed. The caller tears down on error.
    fn bring_up(&mut self, library_path: &Path) -> Result<()> {
        let timeout = self.invoker.timeout();

        let module = injector::inject(&self.process, library_path, timeout)?;
        if !injector::is_injected(&self.process, library_path)? {
            return Err(Error::Injection(format!(
                "{} missing from target module list after load",
                library_path.display()
            )));
        }
        self.module = Some(module);
        self.state = SessionState::Injected;

        // Py_Initialize returns void; the interpreter is probed afterwards.
        self.execute(INITIALIZE_EXPORT, None)
            .map_err(|e| Error::Initialization(format!("{INITIALIZE_EXPORT} failed: {e}")))?;
        let initialized = self
            .execute(IS_INITIALIZED_EXPORT, None)
            .map_err(|e| Error::Initialization(format!("{IS_INITIALIZED_EXPORT} failed: {e}")))?;
        if initialized == 0 {
            return Err(Error::Initialization(
                "interpreter reports uninitialized after Py_Initialize".into(),
            ));
        }
        self.state = SessionState::Initialized;

        // Readiness requires the finalize address up front: cleanup must
        // never depend on a resolution that can fail.
        let module = self.module.as_ref().ok_or(Error::InvalidState {
            required: "Injected",
            actual: self.state.name(),
        })?;
        let finalize = self
            .resolver
            .resolve(module, FINALIZE_EXPORT)
            .map_err(|e| Error::Initialization(format!("cannot pre-resolve {FINALIZE_EXPORT}: {e}")))?;
        self.finalize_address = Some(finalize.address);
        self.state = SessionState::Ready;

        Ok(())
    }

    /// Resolves `symbol` and invokes it. An address computed from a cached
    /// offset that the target rejects is evicted and recomputed once; a
    /// second failure surfaces. Timeouts are never retried, since the first
    /// attempt may still be executing.
    fn execute(&mut self, symbol: &str, argument: Option<&str>) -> Result<u32> {
        let module = self.module.as_ref().ok_or(Error::InvalidState {
            required: "Injected",
            actual: self.state.name(),
        })?;

        let resolved = self.resolver.resolve(module, symbol)?;
        match self.invoker.call(&self.process, resolved.address, argument) {
            Err(first @ Error::RemoteCall(_)) if resolved.from_cache => {
                warn!(symbol, error = %first, "cached offset rejected, evicting and recomputing");
                self.resolver.evict(module, symbol);
                let fresh = self.resolver.resolve(module, symbol)?;
                self.invoker.call(&self.process, fresh.address, argument)
            }
            other => other,
        }
    }

    fn cleanup(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Finalizing;

        if let Some(module) = self.module.take() {
            // Best-effort from here: cleanup guarantees release, not success.
            match self.finalize_address.take() {
                Some(address) => {
                    if let Err(e) = self.invoker.call(&self.process, address, None) {
                        warn!(error = %e, "remote {FINALIZE_EXPORT} failed");
                    }
                }
                None => debug!("finalize export never resolved, skipping remote finalize"),
            }

            if let Err(e) = injector::unload(&self.process, &module, self.invoker.timeout()) {
                warn!(error = %e, "failed to unload library from target");
            }
        }

        self.process.close();
        self.state = SessionState::Closed;
        debug!(pid = self.process.pid(), "session closed");
    }
}

fn canonical_library_path(path: Option<PathBuf>) -> PathBuf {
    let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_LIBRARY));
    // Only the remote LoadLibraryW sees this; bare names go through the
    // loader search order. The offset store is keyed by the path the target
    // actually loaded, reported back by the module scan after injection.
    std::fs::canonicalize(&path).unwrap_or(path)
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(PATH_LIST_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_lists_join_with_semicolons() {
        let paths = [PathBuf::from(r"C:\a"), PathBuf::from(r"C:\b")];
        assert_eq!(join_paths(&paths), r"C:\a;C:\b");
        assert_eq!(join_paths(&[]), "");
        assert_eq!(join_paths(&[PathBuf::from(r"C:\only")]), r"C:\only");
    }

    #[test]
    fn only_ready_may_run() {
        let states = [
            SessionState::Uninjected,
            SessionState::Injected,
            SessionState::Initialized,
            SessionState::Ready,
            SessionState::Finalizing,
            SessionState::Closed,
        ];
        for state in states {
            assert_eq!(state.may_run(), state == SessionState::Ready, "{}", state.name());
        }
    }

    #[test]
    fn set_path_requires_an_initialized_interpreter() {
        assert!(SessionState::Initialized.may_set_path());
        assert!(SessionState::Ready.may_set_path());
        assert!(!SessionState::Uninjected.may_set_path());
        assert!(!SessionState::Injected.may_set_path());
        assert!(!SessionState::Finalizing.may_set_path());
        assert!(!SessionState::Closed.may_set_path());
    }

    #[test]
    fn unset_library_falls_back_to_the_stable_abi_dll() {
        assert_eq!(canonical_library_path(None), PathBuf::from("python3.dll"));
    }

    // System-level checks against a live pid. OpenProcess(0) fails with
    // ERROR_INVALID_PARAMETER on every Windows version, which makes the
    // no-injection-on-bad-pid property testable without a target.
    #[test]
    fn bad_pid_fails_before_any_injection() {
        let err = RemotePython::new(SessionOptions::new(0)).unwrap_err();
        match err {
            Error::ProcessOpen { pid, .. } => assert_eq!(pid, 0),
            other => panic!("expected ProcessOpen, got {other}"),
        }
    }

    // The test runner's own pid opens fine, so lifecycle wiring past the
    // injection step is checkable without a target: a Ready session with no
    // module behaves like any other for cleanup and state gating.
    fn ready_session(dir: &tempfile::TempDir) -> RemotePython {
        let process = RemoteProcess::open(std::process::id()).unwrap();
        let store = OffsetStore::open(dir.path().join("offsets.json")).unwrap();
        let inner = Inner {
            state: SessionState::Ready,
            process,
            module: None,
            resolver: SymbolResolver::new(store),
            invoker: RemoteInvoker::new(None),
            finalize_address: None,
        };
        RemotePython { inner: Mutex::new(inner) }
    }

    #[test]
    fn repeated_cleanups_match_a_single_one() {
        let dir = tempfile::tempdir().unwrap();
        let session = ready_session(&dir);
        assert_eq!(session.state(), SessionState::Ready);

        session.cleanup();
        assert_eq!(session.state(), SessionState::Closed);

        session.cleanup();
        session.cleanup();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn closed_sessions_reject_run_and_set_path() {
        let dir = tempfile::tempdir().unwrap();
        let session = ready_session(&dir);
        session.cleanup();

        match session.run("1 + 1") {
            Err(Error::InvalidState { required, actual }) => {
                assert_eq!(required, "Ready");
                assert_eq!(actual, "Closed");
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }

        assert!(matches!(
            session.set_python_path(&[PathBuf::from(r"C:\x")]),
            Err(Error::InvalidState { .. })
        ));
    }
}
