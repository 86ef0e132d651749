//! Source-file path resolution via the PDB's `/names` stream.
//!
//! Every source file referenced by a module's `FileChecksums` subsection is identified by a
//! [`NameIndex`] into this stream. We resolve each one exactly once and hand the emitter plain
//! `String` paths, keyed by the dense emission id assigned during module walking.

use crate::error::SymbolizeError;
use anyhow::{Context, Result};
use ms_pdb::names::NameIndex;
use ms_pdb::{Pdb, ReadAt};
use std::collections::HashMap;

/// Resolves `NameIndex` values from the `/names` stream, memoizing the lookups we've already
/// done (the same file is frequently referenced by many modules).
pub struct SourceNames<'p, F: ReadAt> {
    pdb: &'p Pdb<F>,
    cache: HashMap<u32, String>,
}

impl<'p, F: ReadAt> SourceNames<'p, F> {
    fn new(pdb: &'p Pdb<F>) -> Self {
        Self {
            pdb,
            cache: HashMap::new(),
        }
    }

    /// Resolves `index` to a UTF-8 path, losslessly replacing any invalid bytes.
    pub fn resolve(&mut self, index: NameIndex) -> Result<&str> {
        if !self.cache.contains_key(&index.0) {
            let name = self
                .pdb
                .get_name(index)
                .with_context(|| format!("failed to resolve name index {index}"))?;
            self.cache.insert(index.0, name.to_string());
        }
        Ok(self.cache.get(&index.0).expect("just inserted"))
    }
}

/// Opens the `/names` stream, for later per-file resolution.
///
/// This is one of the three independent loading steps (alongside [`ms_pdb::tpi::TypeStream`]
/// loading and [`crate::functions::collect_functions`]) that could run in parallel on a shared
/// task scope; this implementation runs them sequentially.
pub fn load_names<F: ReadAt>(pdb: &Pdb<F>) -> Result<SourceNames<'_, F>, SymbolizeError> {
    pdb.names()
        .map_err(|e| SymbolizeError::MissingName(format!("failed to read /names stream: {e}")))?;
    Ok(SourceNames::new(pdb))
}
