use std::fs;
use std::path::Path;

use goblin::pe::PE;

use crate::error::{Error, Result};

/// Source of export RVAs for a library file. The production reader parses
/// the PE export table; tests substitute a canned one.
pub trait ExportReader {
    fn export_rva(&self, library: &Path, symbol: &str) -> Result<u32>;
}

/// Reads the library file from disk and walks its export table. Nothing is
/// mapped or initialized; this never runs code from the library.
pub struct PeExports;

impl ExportReader for PeExports {
    fn export_rva(&self, library: &Path, symbol: &str) -> Result<u32> {
        let raw = fs::read(library)
            .map_err(|e| Error::symbol(library, symbol, format!("cannot read library: {e}")))?;
        let pe = PE::parse(&raw)
            .map_err(|e| Error::symbol(library, symbol, format!("PE parse failed: {e}")))?;

        pe.exports
            .iter()
            .find(|export| export.name == Some(symbol))
            .map(|export| export.rva as u32)
            .ok_or_else(|| Error::symbol(library, symbol, "export not present"))
    }
}
