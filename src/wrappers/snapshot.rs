use std::path::PathBuf;

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, MODULEENTRY32W, Module32FirstW, Module32NextW, TH32CS_SNAPMODULE,
    TH32CS_SNAPMODULE32,
};

/// Iterator over the modules loaded in one process, in load order.
pub struct ModuleSnapshot {
    handle: HANDLE,
    entry: MODULEENTRY32W,
    first: bool,
}

impl ModuleSnapshot {
    pub fn create(pid: u32) -> windows::core::Result<Self> {
        let handle =
            unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid)? };
        let entry = MODULEENTRY32W {
            dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
            ..Default::default()
        };

        Ok(ModuleSnapshot { handle, entry, first: true })
    }
}

impl Drop for ModuleSnapshot {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

impl Iterator for ModuleSnapshot {
    type Item = MODULEENTRY32W;

    fn next(&mut self) -> Option<Self::Item> {
        let success = if self.first {
            self.first = false;
            unsafe { Module32FirstW(self.handle, &mut self.entry) }.is_ok()
        } else {
            unsafe { Module32NextW(self.handle, &mut self.entry) }.is_ok()
        };

        if success { Some(self.entry) } else { None }
    }
}

/// Decodes the module name out of a snapshot entry.
pub fn entry_name(entry: &MODULEENTRY32W) -> String {
    decode_wide(&entry.szModule)
}

/// Decodes the module's full on-disk path out of a snapshot entry. This is
/// the path the target actually loaded, so it is absolute and names the
/// exact build mapped into the target.
pub fn entry_path(entry: &MODULEENTRY32W) -> PathBuf {
    PathBuf::from(decode_wide(&entry.szExePath))
}

fn decode_wide(raw: &[u16]) -> String {
    let len = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf16_lossy(&raw[..len])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with(module: &str, path: &str) -> MODULEENTRY32W {
        let mut entry = MODULEENTRY32W::default();
        for (slot, c) in entry.szModule.iter_mut().zip(module.encode_utf16()) {
            *slot = c;
        }
        for (slot, c) in entry.szExePath.iter_mut().zip(path.encode_utf16()) {
            *slot = c;
        }
        entry
    }

    #[test]
    fn entry_decoding_stops_at_the_terminator() {
        let entry = entry_with("python3.dll", r"C:\py\python3.dll");
        assert_eq!(entry_name(&entry), "python3.dll");
        assert_eq!(entry_path(&entry), PathBuf::from(r"C:\py\python3.dll"));
    }

    #[test]
    fn full_buffers_decode_whole() {
        let long = "x".repeat(1024);
        let entry = entry_with(&long, &long);
        // szModule is shorter than szExePath; both must clamp to their array.
        assert_eq!(entry_name(&entry).len(), entry.szModule.len());
        assert_eq!(
            entry_path(&entry).as_os_str().len(),
            entry.szExePath.len()
        );
    }
}
