pub mod appender;
pub mod descriptor;
pub mod frames;
pub mod gaps;
pub mod rebuilder;
pub mod scanner;

use crate::concurrent::{AtomicBuffer, MappedFile};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub use self::appender::{Appended, LogAppender};
pub use self::descriptor::LogMeta;

/// One publication's (or image's) file set: three term files plus the meta
/// file holding the partition states. Created by the driver Conductor and
/// mapped by clients on the strength of a directory path carried in the
/// control protocol.
pub struct LogBuffers {
    dir: PathBuf,
    terms: [MappedFile; descriptor::PARTITION_COUNT],
    meta: MappedFile,
    delete_on_drop: bool,
}

impl LogBuffers {
    /// Creates the directory and file set for a fresh log. Term files come
    /// back zeroed from the OS, which doubles as their CLEAN state.
    pub fn create<P: AsRef<Path>>(
        dir: P,
        term_length: u32,
        initial_term_id: u32,
        mtu: u32,
    ) -> io::Result<LogBuffers> {
        descriptor::check_term_length(term_length)
            .map_err(|msg| io::Error::new(io::ErrorKind::InvalidInput, msg))?;

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let terms = [
            MappedFile::create(dir.join("term-0"), term_length as usize)?,
            MappedFile::create(dir.join("term-1"), term_length as usize)?,
            MappedFile::create(dir.join("term-2"), term_length as usize)?,
        ];
        let meta = MappedFile::create(dir.join("meta"), descriptor::META_FILE_LENGTH)?;

        LogMeta::new(meta.buffer()).init(initial_term_id, term_length, mtu);

        Ok(LogBuffers {
            dir,
            terms,
            meta,
            delete_on_drop: false,
        })
    }

    /// Maps an existing log file set.
    pub fn map<P: AsRef<Path>>(dir: P) -> io::Result<LogBuffers> {
        let dir = dir.as_ref().to_path_buf();

        let terms = [
            MappedFile::open(dir.join("term-0"))?,
            MappedFile::open(dir.join("term-1"))?,
            MappedFile::open(dir.join("term-2"))?,
        ];
        let meta = MappedFile::open(dir.join("meta"))?;

        Ok(LogBuffers {
            dir,
            terms,
            meta,
            delete_on_drop: false,
        })
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    pub fn term(&self, index: usize) -> AtomicBuffer {
        self.terms[index].buffer()
    }

    #[inline]
    pub fn meta(&self) -> LogMeta {
        LogMeta::new(self.meta.buffer())
    }

    #[inline]
    pub fn term_length(&self) -> u32 {
        self.terms[0].len() as u32
    }

    /// Arms removal of the whole file set (and its directory) on drop.
    pub fn set_delete_on_drop(&mut self, delete: bool) {
        self.delete_on_drop = delete;
    }
}

impl Drop for LogBuffers {
    fn drop(&mut self) {
        if self.delete_on_drop {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_map() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("1-10");

        let log = LogBuffers::create(&log_dir, 64 * 1024, 7, 4096).unwrap();
        assert_eq!(log.term_length(), 64 * 1024);
        assert_eq!(log.meta().initial_term_id(), 7);
        assert_eq!(log.meta().mtu(), 4096);
        assert_eq!(log.meta().active_index(), 0);

        let mapped = LogBuffers::map(&log_dir).unwrap();
        assert_eq!(mapped.term_length(), 64 * 1024);
        assert_eq!(mapped.meta().initial_term_id(), 7);
    }

    #[test]
    fn test_create_err_bad_term_length() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LogBuffers::create(dir.path().join("bad"), 1000, 0, 4096).is_err());
    }

    #[test]
    fn test_delete_on_drop_removes_file_set() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("ephemeral");

        let mut log = LogBuffers::create(&log_dir, 64 * 1024, 0, 4096).unwrap();
        log.set_delete_on_drop(true);
        drop(log);

        assert!(!log_dir.exists());
    }
}
