use zerocopy_derive::*;

use crate::IMAGE_DLLCHARACTERISTICS;

#[repr(C)]
#[derive(
    Clone,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
)]
pub struct IMAGE_FILE_HEADER {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

#[repr(C)]
#[derive(
    Clone,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
)]
pub struct IMAGE_DATA_DIRECTORY {
    pub virtual_address: u32,
    pub size: u32,
}

pub const IMAGE_NUMBEROF_DIRECTORY_ENTRIES: usize = 16;

#[repr(C)]
#[derive(
    Clone,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
)]
pub struct IMAGE_OPTIONAL_HEADER32 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub base_of_data: u32,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: IMAGE_DLLCHARACTERISTICS,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directory: [IMAGE_DATA_DIRECTORY; IMAGE_NUMBEROF_DIRECTORY_ENTRIES],
}

#[repr(C)]
#[derive(
    Clone,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
)]
pub struct IMAGE_OPTIONAL_HEADER64 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: IMAGE_DLLCHARACTERISTICS,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directory: [IMAGE_DATA_DIRECTORY; IMAGE_NUMBEROF_DIRECTORY_ENTRIES],
}

pub const IMAGE_NT_OPTIONAL_HDR32_MAGIC: u16 = 0x10b;
pub const IMAGE_NT_OPTIONAL_HDR64_MAGIC: u16 = 0x20b;
pub const IMAGE_ROM_OPTIONAL_HDR_MAGIC: u16 = 0x107;

pub struct IMAGE_NT_HEADERS64 {
    pub signature: u32,
    pub file_header: IMAGE_FILE_HEADER,
    pub optional_header: IMAGE_OPTIONAL_HEADER64,
}

pub struct IMAGE_NT_HEADERS32 {
    pub signature: u32,
    pub file_header: IMAGE_FILE_HEADER,
    pub optional_header: IMAGE_OPTIONAL_HEADER32,
}

pub struct IMAGE_ROM_OPTIONAL_HEADER {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub base_of_data: u32,
    pub base_of_bss: u32,
    pub gpr_mask: u32,
    pub cpr_mask: [u32; 4],
    pub gp_value: u32,
}

pub struct IMAGE_ROM_HEADERS {
    pub file_header: IMAGE_FILE_HEADER,
    pub optional_header: IMAGE_ROM_OPTIONAL_HEADER,
}

/// The MS-DOS stub header that begins every PE/COFF image (and every MS-DOS `.exe`).
///
/// The only fields a PE loader (or a symbol tool pairing a PDB with its image) actually cares
/// about are `e_magic` (must be `"MZ"`) and `e_lfanew`, which is the file offset of
/// [`IMAGE_NT_HEADERS32`]/[`IMAGE_NT_HEADERS64`].
#[repr(C)]
#[derive(
    Clone,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
)]
pub struct IMAGE_DOS_HEADER {
    pub e_magic: u16,
    pub e_cblp: u16,
    pub e_cp: u16,
    pub e_crlc: u16,
    pub e_cparhdr: u16,
    pub e_minalloc: u16,
    pub e_maxalloc: u16,
    pub e_ss: u16,
    pub e_sp: u16,
    pub e_csum: u16,
    pub e_ip: u16,
    pub e_cs: u16,
    pub e_lfarlc: u16,
    pub e_ovno: u16,
    pub e_res: [u16; 4],
    pub e_oemid: u16,
    pub e_oeminfo: u16,
    pub e_res2: [u16; 10],
    pub e_lfanew: u32,
}

/// Value of `e_magic` for a valid MS-DOS header: the ASCII bytes `"MZ"`, read as a little-endian `u16`.
pub const IMAGE_DOS_SIGNATURE: u16 = 0x5a4d;

/// The `"PE\0\0"` signature that begins [`IMAGE_NT_HEADERS32`]/[`IMAGE_NT_HEADERS64`].
pub const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550;

/// The file header and optional header of a PE image, found after walking past the DOS stub.
///
/// This only distinguishes PE32 from PE32+ (PE64); it has no representation for the ROM-only
/// header shape, since linked/loaded images (the only kind that are ever paired with a PDB)
/// never use it.
pub enum NtHeaders {
    /// A 32-bit image (`IMAGE_NT_OPTIONAL_HDR32_MAGIC`).
    Pe32(IMAGE_NT_HEADERS32),
    /// A 64-bit image (`IMAGE_NT_OPTIONAL_HDR64_MAGIC`).
    Pe32Plus(IMAGE_NT_HEADERS64),
}

impl NtHeaders {
    /// The COFF file header, common to both PE32 and PE32+.
    pub fn file_header(&self) -> &IMAGE_FILE_HEADER {
        match self {
            NtHeaders::Pe32(h) => &h.file_header,
            NtHeaders::Pe32Plus(h) => &h.file_header,
        }
    }

    /// `SizeOfImage` from the optional header. This is the value that Breakpad's `CODE_ID`
    /// encodes alongside the linker timestamp.
    pub fn size_of_image(&self) -> u32 {
        match self {
            NtHeaders::Pe32(h) => h.optional_header.size_of_image,
            NtHeaders::Pe32Plus(h) => h.optional_header.size_of_image,
        }
    }

    /// One entry of the optional header's data directory array, or `None` if `index` is beyond
    /// `IMAGE_NUMBEROF_DIRECTORY_ENTRIES`.
    pub fn data_directory(&self, index: usize) -> Option<&IMAGE_DATA_DIRECTORY> {
        match self {
            NtHeaders::Pe32(h) => h.optional_header.data_directory.get(index),
            NtHeaders::Pe32Plus(h) => h.optional_header.data_directory.get(index),
        }
    }
}

/// Locates and parses the NT headers of a PE/COFF image, given the full contents of the image
/// file.
///
/// Returns `None` if `image` is too small, does not begin with the MS-DOS `"MZ"` signature, has an
/// `e_lfanew` that points outside the file, does not have the `"PE\0\0"` signature at that offset,
/// or has an optional-header magic number that is neither `IMAGE_NT_OPTIONAL_HDR32_MAGIC` nor
/// `IMAGE_NT_OPTIONAL_HDR64_MAGIC`.
pub fn locate_nt_headers(image: &[u8]) -> Option<NtHeaders> {
    let (dos_header, _) = IMAGE_DOS_HEADER::read_from_prefix(image).ok()?;
    if dos_header.e_magic != IMAGE_DOS_SIGNATURE {
        return None;
    }

    let nt_headers_offset = dos_header.e_lfanew as usize;
    let rest = image.get(nt_headers_offset..)?;

    let (signature, after_signature) = u32::read_from_prefix(rest).ok()?;
    if signature != IMAGE_NT_SIGNATURE {
        return None;
    }

    let (file_header, after_file_header) =
        IMAGE_FILE_HEADER::read_from_prefix(after_signature).ok()?;

    let (&magic, _) = u16::ref_from_prefix(after_file_header).ok()?;

    match magic {
        IMAGE_NT_OPTIONAL_HDR32_MAGIC => {
            let (optional_header, _) =
                IMAGE_OPTIONAL_HEADER32::read_from_prefix(after_file_header).ok()?;
            Some(NtHeaders::Pe32(IMAGE_NT_HEADERS32 {
                signature,
                file_header,
                optional_header,
            }))
        }
        IMAGE_NT_OPTIONAL_HDR64_MAGIC => {
            let (optional_header, _) =
                IMAGE_OPTIONAL_HEADER64::read_from_prefix(after_file_header).ok()?;
            Some(NtHeaders::Pe32Plus(IMAGE_NT_HEADERS64 {
                signature,
                file_header,
                optional_header,
            }))
        }
        _ => None,
    }
}
