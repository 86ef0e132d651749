//! A read-only, memory-mapped file handle that implements [`ReadAt`].
//!
//! [`Msf::open`] uses [`sync_file::RandomAccessFile`] by default, which issues a `pread`-style
//! syscall for every access. For tools that scan a PDB once from front to back (rather than
//! holding it open across many small edits), mapping the whole file into the address space and
//! letting the kernel manage paging is usually faster and avoids a syscall per stream record.
//! [`MappedFile`] provides that as an alternative to `RandomAccessFile`, while still satisfying
//! the same [`ReadAt`] interface that every reader in this crate (and in `ms-pdb`) is generic
//! over.

use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use sync_file::ReadAt;

/// A whole file mapped read-only into memory.
///
/// `MappedFile` can be used anywhere an `F: ReadAt` is expected, such as [`crate::Msf::open_with_file`].
pub struct MappedFile {
    mmap: Mmap,
}

impl MappedFile {
    /// Opens a file and maps its entire contents into memory for read access.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    /// Maps an already-open file into memory.
    ///
    /// The file is not retained; the mapping stays valid after this function returns, but the
    /// caller's `File` can be dropped immediately afterward.
    pub fn from_file(file: &File) -> std::io::Result<Self> {
        // Safety: the file contents could change underneath the mapping if another process
        // writes to it concurrently. We rely on the caller opening the file read-only and not
        // racing with writers, which is the same assumption every mmap-based PDB/PE reader makes.
        let mmap = unsafe { Mmap::map(file)? };
        Ok(Self { mmap })
    }

    /// Returns the full contents of the file as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Length of the mapped file, in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns `true` if the mapped file is empty.
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl ReadAt for MappedFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        let offset = offset as usize;
        if offset >= self.mmap.len() {
            return Ok(0);
        }
        let available = &self.mmap[offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        let n = self.read_at(buf, offset)?;
        if n != buf.len() {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        Ok(())
    }
}
