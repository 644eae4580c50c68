use std::ffi::c_void;

use windows::Win32::Foundation::{E_INVALIDARG, HANDLE};
use windows::Win32::System::Diagnostics::Debug::WriteProcessMemory;
use windows::Win32::System::Memory::{MEM_RELEASE, VirtualFreeEx};

/// Memory committed in the target process. The region is released on drop,
/// so allocations are returned on every exit path, including timeouts and
/// abandoned waits.
pub struct AllocatedMemory {
    base_address: *mut c_void,
    size: usize,
    process_handle: HANDLE,
}

impl AllocatedMemory {
    pub(crate) fn new(base_address: *mut c_void, size: usize, process_handle: HANDLE) -> Self {
        Self { base_address, size, process_handle }
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.base_address
    }

    pub fn write(&self, data: &[u8]) -> windows::core::Result<()> {
        if data.len() > self.size {
            return Err(windows::core::Error::new(
                E_INVALIDARG,
                "data is larger than the allocated block",
            ));
        }
        unsafe {
            WriteProcessMemory(
                self.process_handle,
                self.base_address,
                data.as_ptr() as *const c_void,
                data.len(),
                None,
            )?;
        }
        Ok(())
    }
}

impl Drop for AllocatedMemory {
    fn drop(&mut self) {
        unsafe {
            let _ = VirtualFreeEx(self.process_handle, self.base_address, 0, MEM_RELEASE);
        }
    }
}

pub trait RemoteAllocator {
    fn alloc(&self, size: usize) -> windows::core::Result<AllocatedMemory>;
}
