//! Frame-Pointer-Omission (FPO) records.
//!
//! Two formats exist, named by the two Optional Debug Header slots that can hold them:
//! legacy `FPO_DATA` (`fpo_data`) and `FPO_DATA_V2` (`new_fpo_data`). Each stream is a dense
//! array of fixed-size records with no header.

use anyhow::{Context, Result};
use ms_pdb::{Pdb, ReadAt};
use std::collections::BTreeMap;
use tracing::debug;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, LE, U16, U32};

/// `FPO_DATA`, the legacy (pre-v2) record. See `WinStructs.h`/`PDBHeaders.h` in the original
/// Breakpad `dump_syms` sources.
#[derive(Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
pub struct FpoData {
    /// Offset, in bytes, of the start of the function relative to the section it is in.
    pub ul_off_start: U32<LE>,
    /// Number of bytes in the function.
    pub cb_proc_size: U32<LE>,
    /// Number of local variables, in dwords.
    pub cdw_locals: U32<LE>,
    /// Number of parameters, in dwords.
    pub cdw_params: U16<LE>,
    /// Packed: `cbProlog:8, cbRegs:3, fHasSEH:1, fUseBP:1, reserved:1, cbFrame:2`.
    pub attributes: U16<LE>,
}

bitfield::bitfield! {
    /// The packed 16-bit bitfield at the end of [`FpoData`].
    pub struct FpoAttributes(u16);
    impl Debug;

    /// Number of bytes in the function prolog code.
    pub cb_prolog, set_cb_prolog: 7, 0;
    /// Number of registers saved.
    pub cb_regs, set_cb_regs: 10, 8;
    /// `true` if the function uses structured exception handling.
    pub f_has_seh, set_f_has_seh: 11;
    /// `true` if `EBP` has been allocated as a frame pointer, even though this is a frame-pointer-omission record.
    pub f_use_bp, set_f_use_bp: 12;
    reserved, set_reserved: 13;
    /// Frame type: `0 = FPO`, `1 = Trap`, `2 = TSS`, `3 = nonstandard`.
    pub cb_frame, set_cb_frame: 15, 14;
}

impl FpoData {
    /// Unpacks the bitfield fields.
    pub fn attributes(&self) -> FpoAttributes {
        FpoAttributes(self.attributes.get())
    }
}

/// `FPO_DATA_V2`, the "new" (v2) record.
#[derive(Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
pub struct FpoDataV2 {
    pub rva_start: U32<LE>,
    pub cb_proc_size: U32<LE>,
    pub cb_locals: U32<LE>,
    pub cb_params: U32<LE>,
    pub max_stack: U32<LE>,
    pub program_string_offset: U32<LE>,
    pub cb_prolog: U16<LE>,
    pub cb_saved_regs: U16<LE>,
    pub flags: U32<LE>,
}

impl FpoDataV2 {
    /// `true` if `EBP` has been allocated as a frame pointer.
    pub fn has_seh(&self) -> bool {
        self.flags.get() & 0x1 != 0
    }

    /// `true` if a frame pointer (`EBP`) is used.
    pub fn uses_bp(&self) -> bool {
        self.flags.get() & 0x2 != 0
    }

    /// Frame type: `0 = FPO`, `1 = Trap`, `2 = TSS`, `3 = nonstandard`.
    pub fn frame_type(&self) -> u32 {
        (self.flags.get() >> 2) & 0x3
    }
}

/// Both FPO maps, keyed by `(startRVA, procSize)`.
#[derive(Default)]
pub struct FpoTables {
    /// Legacy `FPO_DATA` records.
    pub v1: BTreeMap<(u32, u32), FpoData>,
    /// `FPO_DATA_V2` records.
    pub v2: BTreeMap<(u32, u32), FpoDataV2>,
}

impl FpoTables {
    /// Reads both FPO streams named by the DBI's Optional Debug Header, if present.
    pub fn read<F: ReadAt>(pdb: &Pdb<F>) -> Result<Self> {
        let mut tables = FpoTables::default();

        if let Some(stream) = pdb
            .fpo_data_stream()
            .context("failed to read Optional Debug Header substream")?
        {
            let data = pdb
                .read_stream_to_vec(stream)
                .context("failed to read FPO_DATA stream")?;
            let records = <[FpoData]>::ref_from_bytes(&data).unwrap_or(&[]);
            for record in records {
                insert_v1(&mut tables.v1, *record);
            }
        }

        if let Some(stream) = pdb
            .new_fpo_data_stream()
            .context("failed to read Optional Debug Header substream")?
        {
            let data = pdb
                .read_stream_to_vec(stream)
                .context("failed to read FPO_DATA_V2 stream")?;
            let records = <[FpoDataV2]>::ref_from_bytes(&data).unwrap_or(&[]);
            for record in records {
                insert_v2(&mut tables.v2, *record);
            }
        }

        Ok(tables)
    }

    /// Looks up the parameter byte count for a function, trying FPO v2 first, then FPO v1.
    pub fn param_size(&self, start_rva: u32, proc_size: u32) -> Option<u32> {
        if let Some(v2) = self.v2.get(&(start_rva, proc_size)) {
            return Some(v2.cb_params.get());
        }
        if let Some(v1) = self.v1.get(&(start_rva, proc_size)) {
            return Some(v1.cdw_params.get() as u32 * 4);
        }
        None
    }
}

fn insert_v1(map: &mut BTreeMap<(u32, u32), FpoData>, record: FpoData) {
    let key = (record.ul_off_start.get(), record.cb_proc_size.get());
    let new_prolog = record.attributes().cb_prolog();
    if let Some(existing) = map.get(&key) {
        if existing.attributes().cb_prolog() == new_prolog {
            return;
        }
        debug!(?key, "duplicate FPO_DATA record with different cbProlog");
    }
    map.insert(key, record);
}

fn insert_v2(map: &mut BTreeMap<(u32, u32), FpoDataV2>, record: FpoDataV2) {
    let key = (record.rva_start.get(), record.cb_proc_size.get());
    let new_prolog = record.cb_prolog.get();
    if let Some(existing) = map.get(&key) {
        if existing.cb_prolog.get() == new_prolog {
            return;
        }
        debug!(?key, "duplicate FPO_DATA_V2 record with different cbProlog");
    }
    map.insert(key, record);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fpo_v1_attributes_unpack() {
        // cbProlog=3, cbRegs=2, fHasSEH=1, fUseBP=0, cbFrame=1
        let attrs = FpoAttributes(0b01_0_1_010_00000011);
        assert_eq!(attrs.cb_prolog(), 3);
        assert_eq!(attrs.cb_regs(), 2);
        assert!(attrs.f_has_seh());
        assert!(!attrs.f_use_bp());
        assert_eq!(attrs.cb_frame(), 1);
    }

    #[test]
    fn dedup_keeps_first_when_prolog_matches() {
        let mut map = BTreeMap::new();
        let a = FpoData {
            ul_off_start: U32::new(0x10),
            cb_proc_size: U32::new(0x20),
            cdw_locals: U32::new(0),
            cdw_params: U16::new(0),
            attributes: U16::new(5),
        };
        insert_v1(&mut map, a);
        insert_v1(&mut map, a);
        assert_eq!(map.len(), 1);
    }
}
