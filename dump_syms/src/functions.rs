//! Per-module walk: collects functions (procedures and thunks) and attaches source line
//! tables to them.
//!
//! Grounded on `ms-pdb`'s own module-stream decoding (`modi::ModiStreamData`, `lines::LineData`)
//! and `ms-codeview`'s symbol records (`syms::{Proc, Thunk}`). The per-module loop itself follows
//! the shape of the original Breakpad `dump_syms` `PDBSourceLineWriter::WriteAllFunctions`, ported
//! onto the ancestor crate's iterator style instead of a hand-rolled cursor.

use anyhow::{Context, Result};
use ms_codeview::types::TypeIndex;
use ms_pdb::lines::{LinesSubsection, SubsectionKind};
use ms_pdb::names::NameIndex;
use ms_pdb::syms::{Proc as ProcSym, SymKind, Thunk as ThunkSym};
use ms_pdb::{Pdb, ReadAt};
use std::collections::HashMap;

/// Sentinel `segment` value marking a [`Function`] that lost a `(segment, offset)` collision to
/// another record with a populated line table. The emitter skips these.
pub const SEGMENT_SKIP: u32 = 0xFFFF_FFFF;

/// One source line mapped to a byte range within a function.
#[derive(Clone, Debug)]
pub struct FunctionLine {
    /// Byte offset of this line, relative to the start of the contribution (i.e. segment-relative,
    /// same space as [`Function::offset`] before RVA rewriting).
    pub offset: u32,
    /// 1-based source line number.
    pub line_no: u32,
    /// Dense emission id of the source file, as assigned by the [`FileTable`] shared across all
    /// modules.
    pub file_id: u32,
}

/// A procedure or thunk, collected from a module's private symbol stream.
#[derive(Clone, Debug)]
pub struct Function {
    /// 1-based section index this function lives in, or [`SEGMENT_SKIP`] if this record lost a
    /// `(segment, offset)` collision and must not be emitted.
    pub segment: u32,
    /// Byte offset within `segment`. Rewritten to an RVA once [`crate::sections::Sections`] is
    /// available.
    pub offset: u32,
    /// Length in bytes of the function's instruction stream.
    pub length: u32,
    /// Type index of the procedure type, used by the stringizer to render argument types.
    /// `TypeIndex(0)` for thunks, and for `_ID` symbol variants whose field is actually an
    /// `ItemId` into an IPI stream this reader does not decode (see `DESIGN.md`).
    pub type_index: TypeIndex,
    /// Undecorated or decorated symbol name, as stored in the module stream.
    pub name: String,
    /// Parameter byte count, filled in later by FPO/decorated-name resolution.
    pub param_size: Option<u32>,
    /// Source lines attached by the per-module `LINES` subsections covering this function.
    pub lines: Vec<FunctionLine>,
    /// Distance (in bytes) between the owning `LINES` contribution's start offset and this
    /// function's own start offset, at the time `lines` was last populated. Used only to decide
    /// whether a later, closer-matching contribution should replace the current attachment;
    /// meaningless once collection is complete.
    line_attach_distance: Option<u32>,
}

impl Function {
    fn key(&self) -> (u32, u32) {
        (self.segment, self.offset)
    }
}

/// Assigns dense, stable emission ids to source files, shared across every module in the PDB.
#[derive(Default)]
pub struct FileTable {
    ids: HashMap<u32, u32>,
    names: Vec<NameIndex>,
}

impl FileTable {
    fn id_for(&mut self, index: NameIndex) -> u32 {
        *self.ids.entry(index.0).or_insert_with(|| {
            let id = self.names.len() as u32;
            self.names.push(index);
            id
        })
    }

    /// Name indices in emission order: `names()[file_id as usize]` is the `NameIndex` for
    /// `file_id`.
    pub fn names(&self) -> &[NameIndex] {
        &self.names
    }
}

/// Walks every module's private symbol and line streams, collecting every procedure and thunk.
///
/// This is one of the three independent loading steps (alongside [`crate::names::load_names`] and
/// type-stream loading) that could run in parallel on a shared task scope; this implementation
/// runs them sequentially.
pub fn collect_functions<F: ReadAt>(pdb: &Pdb<F>) -> Result<(Vec<Function>, FileTable)> {
    let mut files = FileTable::default();
    let mut functions: Vec<Function> = Vec::new();

    for module in pdb.modules().context("failed to read DBI Modules Substream")?.iter() {
        let Some(stream) = pdb
            .read_module_stream(&module)
            .with_context(|| format!("failed to read module stream for {}", module.module_name()))?
        else {
            continue;
        };

        let module_start = functions.len();

        for sym in stream.iter_syms() {
            match sym.kind {
                SymKind::S_GPROC32 | SymKind::S_LPROC32 | SymKind::S_LPROC32_DPC => {
                    let proc = sym.parse_as::<ProcSym>()?;
                    functions.push(function_from_proc(&proc, proc.fixed.proc_type.get()));
                }
                SymKind::S_GPROC32_ID | SymKind::S_LPROC32_ID | SymKind::S_LPROC32_DPC_ID => {
                    let proc = sym.parse_as::<ProcSym>()?;
                    // `proc_type` is an `ItemId` into the IPI stream for `_ID` variants; this
                    // reader does not decode the IPI stream, so the type is left unresolved.
                    functions.push(function_from_proc(&proc, TypeIndex(0)));
                }
                SymKind::S_THUNK32 => {
                    let thunk = sym.parse_as::<ThunkSym>()?;
                    functions.push(function_from_thunk(&thunk));
                }
                _ => {}
            }
        }

        let module_functions = &mut functions[module_start..];
        module_functions.sort_by_key(|f| f.key());

        let c13 = stream.c13_line_data();
        let checksums = c13.find_checksums();

        for subsection in c13.subsections() {
            if subsection.kind != SubsectionKind::LINES {
                continue;
            }
            let Ok(lines_subsection) = LinesSubsection::parse(subsection.data) else {
                continue;
            };
            let contribution_segment = lines_subsection.contribution.contribution_segment.get();
            let contribution_offset = lines_subsection.contribution.contribution_offset.get();

            let Some(target_index) =
                find_owning_function(module_functions, contribution_segment, contribution_offset)
            else {
                continue;
            };

            let distance = lines_subsection.contribution.contribution_offset.get()
                .wrapping_sub(module_functions[target_index].offset);
            let should_attach = match module_functions[target_index].line_attach_distance {
                None => true,
                Some(existing) => distance < existing,
            };
            if !should_attach {
                continue;
            }

            let mut lines = Vec::new();
            for block in lines_subsection.blocks() {
                let file_id = match &checksums {
                    Some(checksums) => match checksums.get_file(block.header.file_index.get()) {
                        Ok(checksum) => files.id_for(checksum.name()),
                        Err(_) => 0,
                    },
                    None => 0,
                };
                for line in block.lines() {
                    lines.push(FunctionLine {
                        offset: contribution_offset.wrapping_add(line.offset.get()),
                        line_no: line.line_num_start(),
                        file_id,
                    });
                }
            }

            let target = &mut module_functions[target_index];
            target.lines = lines;
            target.line_attach_distance = Some(distance);
        }
    }

    dedup_by_segment_offset(&mut functions);
    functions.sort_by_key(|f| (f.segment, f.offset, f.type_index.0));

    Ok((functions, files))
}

fn function_from_proc(proc: &ProcSym, type_index: TypeIndex) -> Function {
    Function {
        segment: proc.fixed.offset_segment.segment() as u32,
        offset: proc.fixed.offset_segment.offset(),
        length: proc.fixed.proc_len.get(),
        type_index,
        name: proc.name.to_string(),
        param_size: None,
        lines: Vec::new(),
        line_attach_distance: None,
    }
}

fn function_from_thunk(thunk: &ThunkSym) -> Function {
    Function {
        segment: thunk.fixed.offset_segment.segment() as u32,
        offset: thunk.fixed.offset_segment.offset(),
        length: thunk.fixed.length.get() as u32,
        type_index: TypeIndex(0),
        name: thunk.name.to_string(),
        param_size: None,
        lines: Vec::new(),
        line_attach_distance: None,
    }
}

/// Finds the first function, by sorted `(segment, offset)` order, whose address is at or past
/// `(segment, offset)`. `functions` must already be sorted by [`Function::key`].
fn find_owning_function(functions: &[Function], segment: u16, offset: u32) -> Option<usize> {
    let key = (segment as u32, offset);
    let idx = functions.partition_point(|f| f.key() < key);
    if idx < functions.len() {
        Some(idx)
    } else if idx > 0 {
        Some(idx - 1)
    } else {
        None
    }
}

/// Resolves duplicate `(segment, offset)` pairs that can arise when the same address is described
/// by more than one module (e.g. COMDAT folding). The record with a populated line table wins;
/// the loser is marked with [`SEGMENT_SKIP`] so the emitter ignores it.
fn dedup_by_segment_offset(functions: &mut [Function]) {
    let mut by_key: HashMap<(u32, u32), usize> = HashMap::new();
    for i in 0..functions.len() {
        let key = functions[i].key();
        if key.0 == SEGMENT_SKIP {
            continue;
        }
        match by_key.get(&key) {
            None => {
                by_key.insert(key, i);
            }
            Some(&existing) => {
                let existing_has_lines = !functions[existing].lines.is_empty();
                let new_has_lines = !functions[i].lines.is_empty();
                let loser = if new_has_lines && !existing_has_lines {
                    by_key.insert(key, i);
                    existing
                } else {
                    i
                };
                functions[loser].segment = SEGMENT_SKIP;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(segment: u32, offset: u32) -> Function {
        Function {
            segment,
            offset,
            length: 0,
            type_index: TypeIndex(0),
            name: String::new(),
            param_size: None,
            lines: Vec::new(),
            line_attach_distance: None,
        }
    }

    #[test]
    fn find_owning_function_picks_exact_or_prior() {
        let functions = vec![func(1, 0x10), func(1, 0x20), func(1, 0x30)];
        assert_eq!(find_owning_function(&functions, 1, 0x20), Some(1));
        assert_eq!(find_owning_function(&functions, 1, 0x25), Some(2));
        assert_eq!(find_owning_function(&functions, 1, 0x40), Some(2));
        assert_eq!(find_owning_function(&functions, 1, 0x05), Some(0));
    }

    #[test]
    fn dedup_prefers_record_with_lines() {
        let mut functions = vec![func(1, 0x10), func(1, 0x10)];
        functions[1].lines.push(FunctionLine {
            offset: 0x10,
            line_no: 5,
            file_id: 0,
        });
        dedup_by_segment_offset(&mut functions);
        assert_eq!(functions[0].segment, SEGMENT_SKIP);
        assert_ne!(functions[1].segment, SEGMENT_SKIP);
    }

    #[test]
    fn file_table_assigns_dense_ids_in_first_seen_order() {
        let mut files = FileTable::default();
        assert_eq!(files.id_for(NameIndex(100)), 0);
        assert_eq!(files.id_for(NameIndex(200)), 1);
        assert_eq!(files.id_for(NameIndex(100)), 0);
        assert_eq!(files.names(), &[NameIndex(100), NameIndex(200)]);
    }
}
