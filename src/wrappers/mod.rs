mod memory;
mod process;
mod snapshot;
mod thread;

pub use memory::{AllocatedMemory, RemoteAllocator};
pub use process::RemoteProcess;
pub use snapshot::{ModuleSnapshot, entry_name, entry_path};
pub use thread::{RemoteThread, WaitOutcome};
