//! Paired PE/PE+ image discovery.
//!
//! The PDB itself does not store the timestamp or image size that Breakpad's `INFO CODE_ID` line
//! needs; those come from the executable the PDB describes. We find it by replacing the `.pdb`
//! extension with `.exe`, falling back to `.dll`, mapping it read-only (the same `MappedFile`
//! that backs the PDB reader), and reading just enough of the NT headers to recover the
//! timestamp, image size, and machine type.

use anyhow::{bail, Context, Result};
use ms_coff::IMAGE_FILE_MACHINE;
use ms_pdb_msf::MappedFile;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// `DataDirectory` slot that holds the CLR (COM+ 2.0) header, if present.
const IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR: usize = 14;

/// PPC64 images carry a non-zero CLR data directory entry even though they are not managed
/// images; the original `dump_syms` special-cases this machine type rather than rejecting it.
const IMAGE_FILE_MACHINE_PPC64: u16 = 0x01F2;

/// Code-identity fields pulled from a paired PE/PE+ image.
#[derive(Debug, Clone)]
pub struct CodeIdentity {
    /// `FileHeader.TimeDateStamp`, the linker timestamp.
    pub timestamp: u32,
    /// `OptionalHeader.SizeOfImage`.
    pub size_of_image: u32,
    /// `FileHeader.Machine`, used for the default platform string.
    pub machine: u16,
    /// Base file name of the image (e.g. `foo.dll`), used in the `INFO CODE_ID` line.
    pub file_name: String,
}

/// Returns the platform string Breakpad expects for a given PE machine type.
pub fn platform_for_machine(machine: u16) -> &'static str {
    match IMAGE_FILE_MACHINE(machine) {
        IMAGE_FILE_MACHINE::IMAGE_FILE_MACHINE_I386 => "x86",
        IMAGE_FILE_MACHINE::IMAGE_FILE_MACHINE_AMD64 => "x86_64",
        IMAGE_FILE_MACHINE::IMAGE_FILE_MACHINE_ARM
        | IMAGE_FILE_MACHINE::IMAGE_FILE_MACHINE_ARMNT
        | IMAGE_FILE_MACHINE::IMAGE_FILE_MACHINE_THUMB => "arm",
        IMAGE_FILE_MACHINE::IMAGE_FILE_MACHINE_ARM64 => "arm64",
        _ if machine == IMAGE_FILE_MACHINE_PPC64 => "ppc64",
        _ => "unknown",
    }
}

/// Finds the image paired with `pdb_path` (first `.exe`, then `.dll`), maps it, and reads its
/// code-identity fields.
///
/// Returns `Ok(None)` if no paired image exists, which is not fatal: the emitter simply omits
/// the `INFO CODE_ID` line. Returns `Err` only when a paired image was found but is malformed or
/// is a CLR assembly (explicitly unsupported).
pub fn find_paired_image(pdb_path: &Path, override_path: Option<&Path>) -> Result<Option<CodeIdentity>> {
    let image_path = if let Some(p) = override_path {
        if !p.exists() {
            bail!("specified image path does not exist: {}", p.display());
        }
        Some(p.to_path_buf())
    } else {
        candidate_image_paths(pdb_path)
            .into_iter()
            .find(|p| p.exists())
    };

    let Some(image_path) = image_path else {
        warn!(pdb = %pdb_path.display(), "no paired PE/PE+ image found; omitting INFO CODE_ID");
        return Ok(None);
    };

    debug!(image = %image_path.display(), "found paired image");

    let mapped = MappedFile::open(&image_path)
        .with_context(|| format!("failed to map image file {}", image_path.display()))?;

    let nt_headers = ms_coff::locate_nt_headers(mapped.as_slice())
        .with_context(|| format!("{} is not a recognized PE/PE+ image", image_path.display()))?;

    let machine = nt_headers.file_header().machine;
    let is_clr = nt_headers
        .data_directory(IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR)
        .map(|d| d.virtual_address != 0)
        .unwrap_or(false);

    if is_clr && machine != IMAGE_FILE_MACHINE_PPC64 {
        bail!(
            "{} is a managed (CLR) image; this is explicitly unsupported",
            image_path.display()
        );
    }

    let file_name = image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(Some(CodeIdentity {
        timestamp: nt_headers.file_header().time_date_stamp,
        size_of_image: nt_headers.size_of_image(),
        machine,
        file_name,
    }))
}

fn candidate_image_paths(pdb_path: &Path) -> Vec<PathBuf> {
    let mut out = Vec::with_capacity(2);
    for ext in ["exe", "dll"] {
        out.push(pdb_path.with_extension(ext));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_paths_try_exe_then_dll() {
        let paths = candidate_image_paths(Path::new("/tmp/foo.pdb"));
        assert_eq!(paths, vec![PathBuf::from("/tmp/foo.exe"), PathBuf::from("/tmp/foo.dll")]);
    }

    #[test]
    fn platform_strings_match_machine_types() {
        assert_eq!(platform_for_machine(0x014c), "x86");
        assert_eq!(platform_for_machine(0x8664), "x86_64");
        assert_eq!(platform_for_machine(IMAGE_FILE_MACHINE_PPC64), "ppc64");
        assert_eq!(platform_for_machine(0xffff), "unknown");
    }
}
