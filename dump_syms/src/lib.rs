//! Reads a PDB 7.00 symbol file and its paired PE/PE+ image, and emits a Breakpad-format `.sym`
//! text stream describing every function, its parameter count, its source line table, and its
//! stack-unwind data.
//!
//! Grounded on the ancestor `ms-pdb` crate for all on-disk decoding; this crate supplies only the
//! Breakpad-specific data model (module/function/FPO collection) and text emitter on top of it.

pub mod emit;
pub mod error;
pub mod fpo;
pub mod functions;
pub mod names;
pub mod pe;
pub mod pubs;
pub mod sections;
pub mod stringizer;

use anyhow::{Context, Result};
use error::SymbolizeError;
use functions::{collect_functions, Function, SEGMENT_SKIP};
use fpo::FpoTables;
use ms_pdb::{Pdb, ReadAt};
use ms_pdb_msf::MappedFile;
use pubs::Publics;
use sections::Sections;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Parsed CLI/library options for one symbolization run.
///
/// Mirrors the ancestor's pattern of a `FooOptions` struct per subcommand (e.g. `DumpOptions`)
/// constructed by `clap::Parser` derive and passed into a `foo_command(options)` free function.
pub struct SymbolizeOptions {
    /// Path to the `.pdb` file to read.
    pub pdb_path: PathBuf,
    /// Overrides automatic `.exe`/`.dll` discovery for the paired image.
    pub image_path: Option<PathBuf>,
    /// Overrides the auto-detected Breakpad platform string.
    pub platform_override: Option<String>,
    /// Optional hook to rewrite source file paths at emit time.
    pub file_path_filter: Option<Box<dyn Fn(&str) -> String>>,
}

/// Reads the PDB and paired image named by `options` and writes a Breakpad `.sym` stream to `out`.
pub fn symbolize<W: Write>(options: &SymbolizeOptions, out: &mut W) -> Result<(), SymbolizeError> {
    let mapped = MappedFile::open(&options.pdb_path)
        .with_context(|| format!("failed to open {}", options.pdb_path.display()))?;
    let pdb = Pdb::open_from_random_file(mapped)
        .with_context(|| format!("{} is not a valid PDB", options.pdb_path.display()))?;

    check_unsupported(&pdb)?;

    let sections = Sections::read(&pdb)?;
    let mut source_names = names::load_names(&pdb)?;
    let types = pdb.read_type_stream().context("failed to read TPI stream")?;
    let (mut functions, files) = collect_functions(&pdb)?;
    let fpo = FpoTables::read(&pdb)?;
    let publics = Publics::read(&pdb, &sections)?;

    rva_rewrite(&mut functions, &sections);
    functions.retain(|f| f.segment != SEGMENT_SKIP);
    functions.sort_by_key(|f| f.offset);

    let code_identity = pe::find_paired_image(&options.pdb_path, options.image_path.as_deref())?;

    let platform = options
        .platform_override
        .clone()
        .unwrap_or_else(|| pe::platform_for_machine(code_identity.as_ref().map(|c| c.machine).unwrap_or(0)).to_string());

    let pdb_file_name = options
        .pdb_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown.pdb".to_string());

    emit::write_module_header(
        out,
        &emit::ModuleHeader {
            platform: &platform,
            guid: pdb.pdbi().binding_key().guid,
            age: pdb.pdbi().age(),
            pdb_file_name: &pdb_file_name,
        },
    )
    .map_err(SymbolizeError::Io)?;

    if let Some(code_identity) = &code_identity {
        emit::write_code_id(
            out,
            &emit::CodeId {
                timestamp: code_identity.timestamp,
                size_of_image: code_identity.size_of_image,
                image_file_name: &code_identity.file_name,
            },
        )
        .map_err(SymbolizeError::Io)?;
    }

    for (id, name_index) in files.names().iter().enumerate() {
        let resolved = source_names.resolve(*name_index)?;
        let path = match &options.file_path_filter {
            Some(filter) => filter(resolved),
            None => resolved.to_string(),
        };
        emit::write_file(out, id as u32, &path).map_err(SymbolizeError::Io)?;
    }

    for function in &functions {
        let param_size = fpo
            .param_size(function.offset, function.length)
            .or_else(|| publics.param_size(function.offset))
            .unwrap_or(0);

        let name = display_name(&types, function)?;

        emit::write_function(
            out,
            &emit::EmitFunction {
                rva: function.offset,
                length: function.length,
                param_size,
                name: &name,
                has_signature: function.type_index.0 != 0,
                lines: &function.lines,
            },
        )
        .map_err(SymbolizeError::Io)?;
    }

    for ((start_rva, _), record) in &fpo.v2 {
        let program_string = match pdb.get_name(ms_pdb::names::NameIndex(record.program_string_offset.get())) {
            Ok(s) => s.to_string(),
            Err(_) => String::new(),
        };
        emit::write_stack_win_v2(out, *start_rva, record, &program_string).map_err(SymbolizeError::Io)?;
    }
    for ((start_rva, _), record) in &fpo.v1 {
        emit::write_stack_win_v1(out, *start_rva, record).map_err(SymbolizeError::Io)?;
    }

    Ok(())
}

fn display_name(types: &ms_pdb::tpi::TypeStream<Vec<u8>>, function: &Function) -> Result<String, SymbolizeError> {
    let cleaned = function.name.replace(" __ptr64", "").replace("__cdecl", "");

    if function.type_index.0 == 0 {
        return Ok(cleaned);
    }

    let mut args = String::new();
    if let Err(e) = stringizer::stringize(types, function.type_index, &mut args, stringizer::StringizeFlags::empty()) {
        warn!(function = %cleaned, error = %e, "failed to stringize function type; emitting name without signature");
        return Ok(cleaned);
    }

    Ok(format!("{cleaned}{args}"))
}

fn rva_rewrite(functions: &mut [Function], sections: &Sections) {
    for function in functions.iter_mut() {
        if function.segment == SEGMENT_SKIP {
            continue;
        }
        let Some(rva) = sections.to_rva(function.segment as u16, function.offset) else {
            debug!(segment = function.segment, offset = function.offset, "function has unresolvable segment; skipping");
            function.segment = SEGMENT_SKIP;
            continue;
        };
        let segment = function.segment as u16;
        for line in function.lines.iter_mut() {
            if let Some(line_rva) = sections.to_rva(segment, line.offset) {
                line.offset = line_rva;
            }
        }
        function.offset = rva;
    }
}

/// Rejects PDBs this reader deliberately does not support: the DBI's Optional Debug Header names
/// a "token/RID map" stream only ever produced for managed-code (CLR) modules, which this reader
/// has no use for.
fn check_unsupported<F: ReadAt>(pdb: &Pdb<F>) -> Result<(), SymbolizeError> {
    use ms_pdb::dbi::optional_dbg::OptionalDebugStream;

    if pdb
        .optional_debug_header_stream(OptionalDebugStream::TOKEN_TO_RECORD_ID_MAP)
        .context("failed to read Optional Debug Header substream")?
        .is_some()
    {
        return Err(SymbolizeError::Unsupported(
            "PDB has a token/RID map, indicating managed (CLR) code; this is explicitly unsupported".to_string(),
        ));
    }
    Ok(())
}
