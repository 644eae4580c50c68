use std::time::Duration;

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Threading::{GetExitCodeThread, INFINITE, WaitForSingleObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
}

/// A thread spawned in the target process. Dropping closes the controller's
/// handle to it, never the thread itself.
pub struct RemoteThread {
    handle: HANDLE,
}

impl From<HANDLE> for RemoteThread {
    fn from(handle: HANDLE) -> Self {
        Self { handle }
    }
}

impl RemoteThread {
    /// Blocks until the thread exits, or until `timeout` elapses when one is
    /// given. A timed-out wait leaves the thread running in the target.
    pub fn wait(&self, timeout: Option<Duration>) -> windows::core::Result<WaitOutcome> {
        let millis = timeout.map_or(INFINITE, |t| {
            t.as_millis().min(u128::from(INFINITE - 1)) as u32
        });

        match unsafe { WaitForSingleObject(self.handle, millis) } {
            WAIT_OBJECT_0 => Ok(WaitOutcome::Completed),
            WAIT_TIMEOUT => Ok(WaitOutcome::TimedOut),
            _ => Err(windows::core::Error::from_win32()),
        }
    }

    pub fn exit_code(&self) -> windows::core::Result<u32> {
        let mut code = 0u32;
        unsafe { GetExitCodeThread(self.handle, &mut code) }?;
        Ok(code)
    }
}

impl Drop for RemoteThread {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}
