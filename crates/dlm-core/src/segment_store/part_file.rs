//! Per-segment part file I/O: preallocate, append-from-offset write,
//! fsync. Adapted from the single-preallocated-file storage writer this
//! crate started with — here each segment gets its own file instead of one
//! shared file, matching the `part-NNNNNN` layout §4.2 requires.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
fn preallocate(file: &File, size: u64) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, size as libc::off_t) };
    if rc == 0 {
        Ok(())
    } else {
        file.set_len(size)
    }
}

#[cfg(not(unix))]
fn preallocate(file: &File, size: u64) -> io::Result<()> {
    file.set_len(size)
}

/// A single part file, opened for random-offset writes.
pub struct PartFile {
    file: File,
    path: PathBuf,
}

impl PartFile {
    /// Open (creating if needed) the part file for segment `index` under
    /// `temp_dir`, preallocated to `range_len` bytes when known (> 0).
    pub fn open(temp_dir: &Path, index: usize, range_len: u64) -> io::Result<Self> {
        std::fs::create_dir_all(temp_dir)?;
        let path = temp_dir.join(format!("part-{index:06}"));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        if range_len > 0 {
            preallocate(&file, range_len)?;
        }
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_at(data, offset)
    }

    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        // Not safe for concurrent writers on non-unix targets; the engine
        // only ever has one writer per segment so this is fine in practice.
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_at_offset_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let part = PartFile::open(dir.path(), 0, 10).unwrap();
        part.write_at(0, b"hello").unwrap();
        part.write_at(5, b"world").unwrap();
        part.sync().unwrap();
        let data = std::fs::read(part.path()).unwrap();
        assert_eq!(&data, b"helloworld");
    }

    #[test]
    fn part_filename_is_zero_padded() {
        let dir = tempfile::tempdir().unwrap();
        let part = PartFile::open(dir.path(), 42, 1).unwrap();
        assert_eq!(part.path().file_name().unwrap(), "part-000042");
    }
}
