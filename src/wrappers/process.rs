use std::ffi::{OsString, c_void};
use std::os::windows::ffi::OsStringExt as _;
use std::path::PathBuf;

use windows::core::PWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE, VirtualAllocEx,
};
use windows::Win32::System::Threading::{
    CreateRemoteThread, OpenProcess, PROCESS_ALL_ACCESS, PROCESS_NAME_WIN32,
    QueryFullProcessImageNameW,
};

use crate::utils::{to_c_bytes, to_wide};
use crate::wrappers::{AllocatedMemory, ModuleSnapshot, RemoteAllocator, RemoteThread};

/// Exclusively-owned handle to the target process. The handle stays valid
/// from a successful `open` until `close` (or drop); `close` is idempotent.
pub struct RemoteProcess {
    handle: HANDLE,
    pid: u32,
}

// SAFETY: the handle is an opaque kernel token, usable from any thread;
// callers serialize mutation through the session lock.
unsafe impl Send for RemoteProcess {}
unsafe impl Sync for RemoteProcess {}

impl RemoteProcess {
    /// Full access rights: memory read/write, thread creation and handle
    /// inspection are all needed later in the pipeline.
    pub fn open(pid: u32) -> windows::core::Result<Self> {
        let handle = unsafe { OpenProcess(PROCESS_ALL_ACCESS, false, pid)? };
        Ok(Self { handle, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Path of the target's main executable, for diagnostics.
    pub fn executable_path(&self) -> windows::core::Result<PathBuf> {
        let mut buffer = vec![0u16; 1024];
        let mut len = buffer.len() as u32;
        unsafe {
            QueryFullProcessImageNameW(
                self.handle,
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut len,
            )?;
        }
        Ok(PathBuf::from(OsString::from_wide(&buffer[..len as usize])))
    }

    /// Copies `s` into the target as a NUL-terminated UTF-16 string.
    pub fn write_wide_string(&self, s: &str) -> windows::core::Result<AllocatedMemory> {
        let wide = to_wide(s);
        let bytes: &[u8] = unsafe {
            std::slice::from_raw_parts(wide.as_ptr() as *const u8, wide.len() * 2)
        };

        let memory = self.alloc(bytes.len())?;
        memory.write(bytes)?;
        Ok(memory)
    }

    /// Copies `s` into the target as a NUL-terminated UTF-8 C string.
    pub fn write_c_string(&self, s: &str) -> windows::core::Result<AllocatedMemory> {
        let bytes = to_c_bytes(s);
        let memory = self.alloc(bytes.len())?;
        memory.write(&bytes)?;
        Ok(memory)
    }

    /// Starts a thread in the target at `start_address` with `argument` as
    /// its single parameter.
    pub fn spawn_thread(
        &self,
        start_address: usize,
        argument: *mut c_void,
    ) -> windows::core::Result<RemoteThread> {
        let handle = unsafe {
            CreateRemoteThread(
                self.handle,
                None,
                0,
                Some(std::mem::transmute::<
                    usize,
                    unsafe extern "system" fn(*mut c_void) -> u32,
                >(start_address)),
                Some(argument as *const c_void),
                0,
                None,
            )?
        };
        Ok(RemoteThread::from(handle))
    }

    pub fn modules(&self) -> windows::core::Result<ModuleSnapshot> {
        ModuleSnapshot::create(self.pid)
    }

    /// Releases the process handle. Safe to call any number of times.
    pub fn close(&mut self) {
        let handle = std::mem::take(&mut self.handle);
        if !handle.is_invalid() {
            unsafe {
                let _ = CloseHandle(handle);
            }
        }
    }
}

impl RemoteAllocator for RemoteProcess {
    fn alloc(&self, size: usize) -> windows::core::Result<AllocatedMemory> {
        let addr = unsafe {
            VirtualAllocEx(self.handle, None, size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
        };
        if addr.is_null() {
            return Err(windows::core::Error::from_win32());
        }
        Ok(AllocatedMemory::new(addr, size, self.handle))
    }
}

impl Drop for RemoteProcess {
    fn drop(&mut self) {
        self.close();
    }
}
