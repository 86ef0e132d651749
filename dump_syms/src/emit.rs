//! Renders the collected PDB data as a Breakpad-format `.sym` text stream.
//!
//! A plain `std::io::Write` sink, following the original Breakpad `dump_syms`
//! `PDBSourceLineWriter::WriteMap` layout: one `MODULE` line, an optional `INFO CODE_ID` line,
//! `FILE` lines, one block per function (`FUNC`/`PUBLIC` plus line records), then `STACK WIN`
//! lines. Grounded on the ancestor crate's preference for small free functions over a builder
//! object (see e.g. `pdbtool`'s dump routines), so each line kind gets its own `write_*` function
//! rather than a single monolithic method.

use crate::fpo::{FpoData, FpoDataV2};
use crate::functions::FunctionLine;
use std::io::{self, Write};
use uuid::Uuid;

/// Fields for the `MODULE` line.
pub struct ModuleHeader<'a> {
    /// Breakpad platform string (`x86`, `x86_64`, `arm`, `arm64`, `ppc64`, `unknown`).
    pub platform: &'a str,
    /// The PDB's unique id, from the PDB Info Stream.
    pub guid: Uuid,
    /// The PDB's age, from the PDB Info Stream.
    pub age: u32,
    /// File name of the PDB itself (e.g. `foo.pdb`).
    pub pdb_file_name: &'a str,
}

/// Fields for the optional `INFO CODE_ID` line.
pub struct CodeId<'a> {
    /// `FileHeader.TimeDateStamp` of the paired image.
    pub timestamp: u32,
    /// `OptionalHeader.SizeOfImage` of the paired image.
    pub size_of_image: u32,
    /// File name of the paired image (e.g. `foo.dll`).
    pub image_file_name: &'a str,
}

/// A fully resolved function, ready to emit as either `FUNC` or `PUBLIC`.
pub struct EmitFunction<'a> {
    /// RVA of the start of the function.
    pub rva: u32,
    /// Length in bytes. `0` selects the `PUBLIC` form.
    pub length: u32,
    /// Resolved parameter byte count; `0` if none could be determined.
    pub param_size: u32,
    /// Display name: for `FUNC` with a known type, the stringized signature has already been
    /// appended and `" __ptr64"`/`"__cdecl"` stripped.
    pub name: &'a str,
    /// `true` if the function's `typeIndex != 0`. A `FUNC` with no known type emits its name only,
    /// with no line table, even if one was collected (e.g. `_ID` procedures, whose type index is
    /// an unresolved `ItemId`).
    pub has_signature: bool,
    /// Source lines, with `offset` already rewritten to an RVA in the same space as `rva`.
    pub lines: &'a [FunctionLine],
}

/// Writes the `MODULE` line.
pub fn write_module_header<W: Write>(w: &mut W, header: &ModuleHeader) -> io::Result<()> {
    writeln!(
        w,
        "MODULE {} {}{:X} {}",
        header.platform,
        guid_hex(header.guid),
        header.age,
        header.pdb_file_name
    )
}

/// Writes the optional `INFO CODE_ID` line.
pub fn write_code_id<W: Write>(w: &mut W, code_id: &CodeId) -> io::Result<()> {
    writeln!(
        w,
        "INFO CODE_ID {:08X}{:x} {}",
        code_id.timestamp, code_id.size_of_image, code_id.image_file_name
    )
}

/// Writes one `FILE id path` line.
pub fn write_file<W: Write>(w: &mut W, id: u32, path: &str) -> io::Result<()> {
    writeln!(w, "FILE {id} {path}")
}

/// Writes a function as either a `FUNC` block (with its line table) or a `PUBLIC` line.
pub fn write_function<W: Write>(w: &mut W, f: &EmitFunction) -> io::Result<()> {
    if f.length == 0 {
        return writeln!(w, "PUBLIC {:x} {:x} {}", f.rva, f.param_size, f.name);
    }

    writeln!(w, "FUNC {:x} {:x} {:x} {}", f.rva, f.length, f.param_size, f.name)?;
    if !f.has_signature {
        return Ok(());
    }
    write_lines(w, f.rva, f.length, f.lines)
}

fn write_lines<W: Write>(w: &mut W, func_rva: u32, func_length: u32, lines: &[FunctionLine]) -> io::Result<()> {
    if lines.is_empty() {
        return Ok(());
    }

    let mut sorted: Vec<&FunctionLine> = lines.iter().collect();
    sorted.sort_by_key(|l| l.offset);

    for i in 0..sorted.len() {
        let rel = sorted[i].offset.saturating_sub(func_rva);
        let size = if let Some(next) = sorted.get(i + 1) {
            next.offset.saturating_sub(sorted[i].offset)
        } else if rel > func_length {
            let modifier = ceil_pow16(rel - func_length);
            func_length + modifier - rel
        } else {
            func_length - rel
        };

        writeln!(w, "{:x} {:x} {} {}", sorted[i].offset, size, sorted[i].line_no, sorted[i].file_id)?;
    }

    Ok(())
}

/// Rounds `x` up to the next multiple of 16, used to pad the final line record of a function
/// whose last recorded offset runs past the function's own length (compiler-generated stack
/// cookie epilogues are the common cause).
fn ceil_pow16(x: u32) -> u32 {
    x.checked_add(15).unwrap_or(u32::MAX) & !15
}

/// Writes one `STACK WIN 4` (FPO v2) line.
pub fn write_stack_win_v2<W: Write>(w: &mut W, start_rva: u32, fpo: &FpoDataV2, program_string: &str) -> io::Result<()> {
    writeln!(
        w,
        "STACK WIN 4 {:x} {:x} {:x} 0 {:x} {:x} {:x} {:x} 1 {}",
        start_rva,
        fpo.cb_proc_size.get(),
        fpo.cb_prolog.get(),
        fpo.cb_params.get(),
        fpo.cb_saved_regs.get(),
        fpo.cb_locals.get(),
        fpo.max_stack.get(),
        program_string,
    )
}

/// Writes one `STACK WIN 0` (legacy FPO) line.
pub fn write_stack_win_v1<W: Write>(w: &mut W, start_rva: u32, fpo: &FpoData) -> io::Result<()> {
    let attrs = fpo.attributes();
    writeln!(
        w,
        "STACK WIN 0 {:x} {:x} {:x} 0 {:x} {:x} {:x} 0 0 {}",
        start_rva,
        fpo.cb_proc_size.get(),
        attrs.cb_prolog(),
        fpo.cdw_params.get(),
        attrs.cb_regs(),
        fpo.cdw_locals.get(),
        attrs.f_use_bp() as u32,
    )
}

fn guid_hex(guid: Uuid) -> String {
    let (d1, d2, d3, d4) = guid.as_fields();
    let mut s = format!("{d1:08X}{d2:04X}{d3:04X}");
    for byte in d4 {
        s.push_str(&format!("{byte:02X}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_header_formats_guid_and_age() {
        let mut out = Vec::new();
        let header = ModuleHeader {
            platform: "x86_64",
            guid: Uuid::nil(),
            age: 1,
            pdb_file_name: "foo.pdb",
        };
        write_module_header(&mut out, &header).unwrap();
        let zeros = "0".repeat(32);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("MODULE x86_64 {zeros}1 foo.pdb\n")
        );
    }

    #[test]
    fn public_line_has_no_line_table() {
        let mut out = Vec::new();
        let f = EmitFunction {
            rva: 0x1010,
            length: 0,
            param_size: 4,
            name: "foo",
            has_signature: false,
            lines: &[],
        };
        write_function(&mut out, &f).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "PUBLIC 1010 4 foo\n");
    }

    #[test]
    fn func_with_no_type_index_emits_name_only_no_lines() {
        let mut out = Vec::new();
        let lines = [FunctionLine { offset: 0x1000, line_no: 10, file_id: 0 }];
        let f = EmitFunction {
            rva: 0x1000,
            length: 0x20,
            param_size: 0,
            name: "f",
            has_signature: false,
            lines: &lines,
        };
        write_function(&mut out, &f).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "FUNC 1000 20 0 f\n");
    }

    #[test]
    fn func_line_sizes_follow_next_offset_delta() {
        let mut out = Vec::new();
        let lines = [
            FunctionLine { offset: 0x1000, line_no: 10, file_id: 0 },
            FunctionLine { offset: 0x1010, line_no: 11, file_id: 0 },
        ];
        let f = EmitFunction {
            rva: 0x1000,
            length: 0x20,
            param_size: 0,
            name: "f()",
            has_signature: true,
            lines: &lines,
        };
        write_function(&mut out, &f).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "FUNC 1000 20 0 f()\n1000 10 10 0\n1010 10 11 0\n"
        );
    }

    #[test]
    fn final_line_past_func_length_is_padded_to_16() {
        let mut out = Vec::new();
        // func length 0x10, last line starts 3 bytes past it.
        let lines = [FunctionLine { offset: 0x1013, line_no: 5, file_id: 0 }];
        let f = EmitFunction {
            rva: 0x1000,
            length: 0x10,
            param_size: 0,
            name: "g()",
            has_signature: true,
            lines: &lines,
        };
        write_function(&mut out, &f).unwrap();
        // rel = 0x13, func_length = 0x10, modifier = ceil_pow16(3) = 16, size = 0x10+16-0x13 = 13 (0xd)
        assert_eq!(String::from_utf8(out).unwrap(), "FUNC 1000 10 0 g()\n1013 d 5 0\n");
    }
}
