use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::wrappers::{RemoteProcess, WaitOutcome};

/// Dispatches synchronous calls onto the target process.
///
/// The injected runtime keeps global interpreter state inside the target, so
/// at most one invocation may be in flight per session; concurrent callers
/// queue on the internal lock and execute in acquisition order. Cancellation
/// is best-effort only: a timeout abandons the wait but cannot terminate the
/// remote thread.
pub struct RemoteInvoker {
    in_flight: Mutex<()>,
    timeout: Option<Duration>,
}

impl RemoteInvoker {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { in_flight: Mutex::new(()), timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Runs the procedure at `address` in the target, passing `argument` as
    /// a NUL-terminated C string (or a null pointer), and returns the
    /// thread's exit code. The argument buffer is released on every exit
    /// path, including the timeout path where the remote thread may still
    /// be reading it.
    pub fn call(
        &self,
        process: &RemoteProcess,
        address: usize,
        argument: Option<&str>,
    ) -> Result<u32> {
        let _guard = self.in_flight.lock();

        let argument_memory = match argument {
            Some(s) => Some(
                process
                    .write_c_string(s)
                    .map_err(|e| Error::RemoteCall(format!("failed to write argument: {e}")))?,
            ),
            None => None,
        };
        let argument_ptr = argument_memory
            .as_ref()
            .map_or(std::ptr::null_mut(), |memory| memory.as_ptr());

        let thread = process
            .spawn_thread(address, argument_ptr)
            .map_err(|e| Error::RemoteCall(format!("CreateRemoteThread failed: {e}")))?;

        match thread
            .wait(self.timeout)
            .map_err(|e| Error::RemoteCall(format!("wait failed: {e}")))?
        {
            WaitOutcome::Completed => {}
            WaitOutcome::TimedOut => {
                return Err(Error::RemoteCallTimeout(self.timeout.unwrap_or_default()));
            }
        }

        let exit_code = thread
            .exit_code()
            .map_err(|e| Error::RemoteCall(format!("failed to read exit code: {e}")))?;

        debug!(
            address = format_args!("{address:#x}"),
            exit_code,
            "remote call completed"
        );
        Ok(exit_code)
    }
}
