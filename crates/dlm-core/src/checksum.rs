//! Streaming checksum computation (SHA-256, optional MD5), used by the
//! [`crate::assembler`] after concatenation and available standalone via the
//! CLI's `checksum` command.

use anyhow::{Context, Result};
use md5::Md5;
use sha2::{Digest as Sha2Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BUF_SIZE: usize = 64 * 1024;

/// Which digest the assembler should maintain while concatenating part files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Sha256,
    Md5,
}

/// An incremental digest, fed chunks as they're streamed through the
/// assembler's copy loop so the whole file is never held twice in memory.
pub enum RunningDigest {
    Sha256(Sha256),
    Md5(Md5),
}

impl RunningDigest {
    pub fn new(kind: DigestKind) -> Self {
        match kind {
            DigestKind::Sha256 => RunningDigest::Sha256(Sha256::new()),
            DigestKind::Md5 => RunningDigest::Md5(Md5::new()),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            RunningDigest::Sha256(h) => h.update(chunk),
            RunningDigest::Md5(h) => h.update(chunk),
        }
    }

    pub fn finalize_hex(self) -> String {
        match self {
            RunningDigest::Sha256(h) => hex::encode(h.finalize()),
            RunningDigest::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

/// Compute SHA-256 of a file and return the digest as lowercase hex.
/// Reads in chunks to keep memory use bounded; suitable for large files.
pub fn sha256_path(path: &Path) -> Result<String> {
    digest_path(path, DigestKind::Sha256)
}

pub fn md5_path(path: &Path) -> Result<String> {
    digest_path(path, DigestKind::Md5)
}

pub fn digest_path(path: &Path, kind: DigestKind) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut digest = RunningDigest::new(kind);
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(digest.finalize_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sha256_path_empty_file() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let path = f.path();
        let digest = sha256_path(path).unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"[..64]
        );
    }

    #[test]
    fn sha256_path_known_content() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        let path = f.path();
        let digest = sha256_path(path).unwrap();
        assert_eq!(
            digest,
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be0"
        );
    }

    #[test]
    fn md5_path_known_content() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        let digest = md5_path(f.path()).unwrap();
        assert_eq!(digest.len(), 32);
    }

    #[test]
    fn running_digest_matches_path_digest() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
        let via_path = sha256_path(f.path()).unwrap();

        let mut running = RunningDigest::new(DigestKind::Sha256);
        for chunk in data.chunks(7) {
            running.update(chunk);
        }
        assert_eq!(running.finalize_hex(), via_path);
    }
}
