//! Inject the CPython runtime into a running Windows process and execute
//! Python source strings inside it.
//!
//! The pipeline: open the target with full access, load the Python DLL via
//! a remote `LoadLibraryW` thread, resolve the runtime's exports as
//! module-relative offsets (cached persistently across sessions), then run
//! code by spawning a remote thread at `PyRun_SimpleString` and joining it.
//!
//! ```no_run
//! use pyject::{RemotePython, SessionOptions};
//!
//! let session = RemotePython::new(SessionOptions::new(1234))?;
//! session.run("import sys; print(sys.version)")?;
//! session.cleanup();
//! # Ok::<(), pyject::Error>(())
//! ```

mod error;
mod injector;
mod invoker;
mod session;
mod symbols;
mod utils;
mod wrappers;

pub use error::{Error, Result};
pub use injector::{RemoteModule, inject, is_injected, unload};
pub use invoker::RemoteInvoker;
pub use session::{RemotePython, SessionOptions, SessionState};
pub use symbols::{ExportReader, OffsetStore, PeExports, ResolvedSymbol, SymbolResolver};
pub use wrappers::{
    AllocatedMemory, ModuleSnapshot, RemoteAllocator, RemoteProcess, RemoteThread, WaitOutcome,
};
