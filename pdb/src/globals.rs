//! Global Symbol Stream access.
//!
//! The DBI Stream Header names the stream that holds the Global Symbol Stream (GSS). The GSS has
//! no header of its own; it is simply a sequence of CodeView symbol records, exactly like a
//! module's private symbol stream, but scoped to the whole PDB rather than to one object file.
//!
//! The original format also defines a Global Symbol Index (GSI) and Public Symbol Index (PSI),
//! which are hash tables built over the GSS to support name lookup. Those indexes are not needed
//! here: every consumer of this module walks the GSS linearly to find `S_PUB32` records, so only
//! [`gss`] is provided.

pub mod gss;

use crate::Pdb;
use gss::GlobalSymbolStream;
use sync_file::ReadAt;

impl<F: ReadAt> Pdb<F> {
    /// Reads the Global Symbol Stream (GSS).
    ///
    /// The stream index for the GSS is found in the DBI Stream Header.
    pub fn read_gss(&self) -> anyhow::Result<GlobalSymbolStream> {
        let Ok(stream) = self.dbi_header().sym_record_stream() else {
            return Ok(GlobalSymbolStream::empty());
        };

        let stream_data = self.read_stream_to_vec(stream)?;
        Ok(GlobalSymbolStream::new(stream_data))
    }
}
