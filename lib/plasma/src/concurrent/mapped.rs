use crate::concurrent::AtomicBuffer;
use memmap2::MmapMut;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// A file-backed shared memory region. The driver creates these under its
/// data and admin directories; clients map the same files read-write and
/// coordinate through the atomic word protocols layered on top.
pub struct MappedFile {
    path: PathBuf,
    ptr: *mut u8,
    len: usize,
    // Held for the lifetime of the mapping.
    _mmap: MmapMut,
    delete_on_drop: bool,
}

unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Creates (or truncates) a file of `len` bytes and maps it. New regions
    /// are zero-filled by the OS.
    pub fn create<P: AsRef<Path>>(path: P, len: usize) -> io::Result<MappedFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(len as u64)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let ptr = mmap.as_mut_ptr();

        Ok(MappedFile {
            path: path.as_ref().to_path_buf(),
            ptr,
            len,
            _mmap: mmap,
            delete_on_drop: false,
        })
    }

    /// Maps an existing file at its current length.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<MappedFile> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let len = file.metadata()?.len() as usize;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let ptr = mmap.as_mut_ptr();

        Ok(MappedFile {
            path: path.as_ref().to_path_buf(),
            ptr,
            len,
            _mmap: mmap,
            delete_on_drop: false,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole mapping as an atomic buffer. Views are valid only while this
    /// file is alive.
    #[inline]
    pub fn buffer(&self) -> AtomicBuffer {
        AtomicBuffer::new(self.ptr, self.len)
    }

    /// Arms unlink-on-drop; the owning driver sets this when
    /// `dirs_delete_on_exit` is configured.
    #[inline]
    pub fn set_delete_on_drop(&mut self, delete: bool) {
        self.delete_on_drop = delete;
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if self.delete_on_drop {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");

        {
            let mapped = MappedFile::create(&path, 4096).unwrap();
            assert_eq!(mapped.len(), 4096);
            mapped.buffer().put_u64(128, 0xfeed);
        }

        let reopened = MappedFile::open(&path).unwrap();
        assert_eq!(reopened.len(), 4096);
        assert_eq!(reopened.buffer().get_u64(128), 0xfeed);
    }

    #[test]
    fn test_created_region_is_zeroed() {
        let dir = tempfile::tempdir().unwrap();
        let mapped = MappedFile::create(dir.path().join("zeroed"), 1024).unwrap();
        assert_eq!(mapped.buffer().get_u64(0), 0);
        assert_eq!(mapped.buffer().get_u64(1016), 0);
    }

    #[test]
    fn test_delete_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ephemeral");

        let mut mapped = MappedFile::create(&path, 1024).unwrap();
        mapped.set_delete_on_drop(true);
        drop(mapped);

        assert!(!path.exists());
    }
}
