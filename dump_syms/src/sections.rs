//! Section table, used to convert `(segment, offset)` pairs into RVAs.
//!
//! The DBI's Optional Debug Header names a stream that holds a dump of the original image's
//! section headers (`IMAGE_SECTION_HEADER` array, no header of its own). `segment` in a CodeView
//! address is a 1-based index into this table.

use anyhow::{Context, Result};
use ms_coff::IMAGE_SECTION_HEADER;
use ms_pdb::{Pdb, ReadAt};
use zerocopy::FromBytes;

/// The section table decoded from the DBI's Section Header Optional Debug Substream.
pub struct Sections {
    headers: Vec<IMAGE_SECTION_HEADER>,
}

impl Sections {
    /// Reads the section table from `pdb`. Returns an empty table if the PDB has no section
    /// header stream (older PDBs, or PDBs produced without `/DEBUG:FULL`); callers then cannot
    /// resolve RVAs and functions are emitted with a segment-relative offset instead.
    pub fn read<F: ReadAt>(pdb: &Pdb<F>) -> Result<Self> {
        let Some(stream) = pdb
            .section_header_stream()
            .context("failed to read Optional Debug Header substream")?
        else {
            return Ok(Self { headers: Vec::new() });
        };

        let data = pdb
            .read_stream_to_vec(stream)
            .context("failed to read section header stream")?;

        let headers = <[IMAGE_SECTION_HEADER]>::ref_from_bytes(&data)
            .map(|s| s.to_vec())
            .unwrap_or_default();

        Ok(Self { headers })
    }

    /// Converts a 1-based `segment` and a byte `offset` within it into an RVA.
    ///
    /// Returns `None` if `segment` is 0, out of range, or the section table is empty.
    pub fn to_rva(&self, segment: u16, offset: u32) -> Option<u32> {
        let index = (segment as usize).checked_sub(1)?;
        let section = self.headers.get(index)?;
        Some(offset.wrapping_add(section.virtual_address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_resolves_nothing() {
        let sections = Sections { headers: Vec::new() };
        assert_eq!(sections.to_rva(1, 0x10), None);
    }

    #[test]
    fn segment_is_one_based() {
        let mut header = IMAGE_SECTION_HEADER::new_zeroed();
        header.virtual_address = 0x1000;
        let sections = Sections {
            headers: vec![header],
        };
        assert_eq!(sections.to_rva(1, 0x10), Some(0x1010));
        assert_eq!(sections.to_rva(0, 0x10), None);
        assert_eq!(sections.to_rva(2, 0x10), None);
    }
}
