//! Content fingerprinting.
//!
//! A fingerprint is the lower-case hex SHA-256 of a file's bytes. It depends
//! on content only: modification time and path never enter the digest, so a
//! copied or renamed file keeps its fingerprint.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

/// Streams the file through SHA-256 and returns the hex digest.
pub fn fingerprint(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn same_bytes_same_hash_regardless_of_path() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("nested-copy.md");
        fs::write(&a, "scope: login, billing\n").unwrap();
        fs::copy(&a, &b).unwrap();

        let ha = fingerprint(&a).unwrap();
        assert_eq!(ha, fingerprint(&a).unwrap());
        assert_eq!(ha, fingerprint(&b).unwrap());
        assert_eq!(ha, fingerprint_bytes(b"scope: login, billing\n"));
        assert_eq!(ha.len(), 64);
    }

    #[test]
    fn one_byte_difference_changes_hash() {
        assert_ne!(fingerprint_bytes(b"version 1"), fingerprint_bytes(b"version 2"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = fingerprint(&tmp.path().join("gone.pdf")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
