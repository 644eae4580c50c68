use std::ffi::{CString, c_void};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;
use windows::core::{PCSTR, w};
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};

use crate::error::{Error, Result};
use crate::wrappers::{RemoteProcess, WaitOutcome, entry_name, entry_path};

/// A library loaded into the target's address space. Valid only while the
/// session that injected it is live.
#[derive(Debug, Clone)]
pub struct RemoteModule {
    base_address: usize,
    library_path: PathBuf,
}

impl RemoteModule {
    pub(crate) fn new(base_address: usize, library_path: PathBuf) -> Self {
        Self { base_address, library_path }
    }

    pub fn base_address(&self) -> usize {
        self.base_address
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }
}

/// Loads `library_path` into the target by writing the path into its address
/// space and running `LoadLibraryW` on a remote thread.
///
/// kernel32 is mapped at one address for every process within a boot
/// session, so the loader entry point resolved in our own address space is
/// valid in the target. The remote thread's exit code is `LoadLibraryW`'s
/// return value truncated to 32 bits, so it is only checked for null; the
/// authoritative base address comes from the target's module list.
pub fn inject(
    process: &RemoteProcess,
    library_path: &Path,
    timeout: Option<Duration>,
) -> Result<RemoteModule> {
    let path_str = library_path
        .to_str()
        .ok_or_else(|| Error::Injection("library path is not valid unicode".into()))?;

    let load_library = local_export_address("LoadLibraryW")?;

    // Freed when this function returns, on success and failure alike.
    let path_memory = process
        .write_wide_string(path_str)
        .map_err(|e| Error::Injection(format!("failed to write library path into target: {e}")))?;

    let thread = process
        .spawn_thread(load_library, path_memory.as_ptr())
        .map_err(|e| Error::Injection(format!("CreateRemoteThread failed: {e}")))?;

    match thread
        .wait(timeout)
        .map_err(|e| Error::Injection(format!("wait for remote loader failed: {e}")))?
    {
        WaitOutcome::Completed => {}
        WaitOutcome::TimedOut => {
            return Err(Error::Injection("timed out waiting for remote LoadLibraryW".into()));
        }
    }

    let pseudo_base = thread
        .exit_code()
        .map_err(|e| Error::Injection(format!("failed to read loader thread exit code: {e}")))?;
    if pseudo_base == 0 {
        return Err(Error::Injection(format!(
            "remote LoadLibraryW returned null for {}",
            library_path.display()
        )));
    }

    // The target-side path keys the offset store and feeds the export
    // parser: it is absolute and names the exact build the target mapped,
    // which the caller's path (possibly a bare name resolved through the
    // loader search order) is not.
    let (base_address, loaded_path) = find_module(process, library_path)?.ok_or_else(|| {
        Error::Injection(format!(
            "{} not present in target module list after load",
            library_path.display()
        ))
    })?;

    debug!(
        pid = process.pid(),
        base = format_args!("{base_address:#x}"),
        library = %loaded_path.display(),
        "library injected"
    );

    Ok(RemoteModule::new(base_address, loaded_path))
}

/// Cross-checks injection by scanning the target's loaded-module list.
pub fn is_injected(process: &RemoteProcess, library_path: &Path) -> Result<bool> {
    Ok(find_module(process, library_path)?.is_some())
}

/// Unloads the module by running `FreeLibrary` on a remote thread. The
/// runtime's finalize export must already have been invoked; this only
/// reverses the mapping.
pub fn unload(
    process: &RemoteProcess,
    module: &RemoteModule,
    timeout: Option<Duration>,
) -> Result<()> {
    let free_library = local_export_address("FreeLibrary")?;

    let thread = process
        .spawn_thread(free_library, module.base_address() as *mut c_void)
        .map_err(|e| Error::Injection(format!("CreateRemoteThread for FreeLibrary failed: {e}")))?;

    match thread
        .wait(timeout)
        .map_err(|e| Error::Injection(format!("wait for remote FreeLibrary failed: {e}")))?
    {
        WaitOutcome::Completed => {
            debug!(pid = process.pid(), library = %module.library_path().display(), "library unloaded");
            Ok(())
        }
        WaitOutcome::TimedOut => {
            Err(Error::Injection("timed out waiting for remote FreeLibrary".into()))
        }
    }
}

fn find_module(
    process: &RemoteProcess,
    library_path: &Path,
) -> Result<Option<(usize, PathBuf)>> {
    let name = library_path
        .file_name()
        .ok_or_else(|| Error::Injection("library path has no file name".into()))?
        .to_string_lossy();

    let modules = process
        .modules()
        .map_err(|e| Error::Injection(format!("module snapshot failed: {e}")))?;

    for entry in modules {
        if entry_name(&entry).eq_ignore_ascii_case(&name) {
            return Ok(Some((entry.modBaseAddr as usize, entry_path(&entry))));
        }
    }
    Ok(None)
}

/// Resolves a kernel32 export in our own address space. The system loader
/// maps kernel32 at the same base in every process, so the address transfers
/// to the target unchanged.
fn local_export_address(export: &str) -> Result<usize> {
    let kernel32 = unsafe { GetModuleHandleW(w!("kernel32.dll")) }
        .map_err(|e| Error::Injection(format!("kernel32 not found: {e}")))?;

    let export_cstr = CString::new(export)
        .map_err(|e| Error::Injection(format!("bad export name: {e}")))?;

    unsafe { GetProcAddress(kernel32, PCSTR(export_cstr.as_ptr() as _)) }
        .map(|p| p as usize)
        .ok_or_else(|| Error::Injection(format!("{export} not found in kernel32")))
}
