//! Content hashing for committed binaries using blake3.
//!
//! Committed binaries are named after their content, so storing the same
//! payload twice in one resource yields a single file and an unchanged
//! binary keeps its name across commits.
//!
//! # Naming
//!
//! `_pv_<first 16 hex digits of the blake3 hash>.bin`

use std::fs::File;
use std::path::Path;

use propvault_core::binary::{BINARY_EXTENSION, INTERNAL_PREFIX};

use crate::error::StorageError;

/// Number of hex digits of the hash kept in a binary file name.
const NAME_HASH_DIGITS: usize = 16;

/// Computes the blake3 hash of a file's content, streaming it.
pub fn hash_file(path: &Path) -> Result<blake3::Hash, StorageError> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(File::open(path)?)?;
    Ok(hasher.finalize())
}

/// The permanent file name for content with the given hash.
pub fn permanent_binary_name(hash: &blake3::Hash) -> String {
    let hex = hash.to_hex();
    format!("{INTERNAL_PREFIX}{}{BINARY_EXTENSION}", &hex[..NAME_HASH_DIGITS])
}

/// Returns `true` if `name` has the shape produced by [`permanent_binary_name`].
pub fn is_permanent_binary_name(name: &str) -> bool {
    name.strip_prefix(INTERNAL_PREFIX)
        .and_then(|rest| rest.strip_suffix(BINARY_EXTENSION))
        .is_some_and(|hex| hex.len() == NAME_HASH_DIGITS && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_content_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"payload").unwrap();
        std::fs::write(&b, b"payload").unwrap();
        let name_a = permanent_binary_name(&hash_file(&a).unwrap());
        let name_b = permanent_binary_name(&hash_file(&b).unwrap());
        assert_eq!(name_a, name_b);
        assert!(is_permanent_binary_name(&name_a));
    }

    #[test]
    fn test_content_change_changes_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"one").unwrap();
        let first = permanent_binary_name(&hash_file(&path).unwrap());
        std::fs::write(&path, b"two").unwrap();
        let second = permanent_binary_name(&hash_file(&path).unwrap());
        assert_ne!(first, second);
    }

    #[test]
    fn test_name_matches_blake3_of_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(hash_file(&path).unwrap(), blake3::hash(b"abc"));
    }

    #[test]
    fn test_permanent_name_shape() {
        assert!(!is_permanent_binary_name("_pv_abc.bin"));
        assert!(!is_permanent_binary_name("_pv_0123456789abcdef.temporary.bin"));
        assert!(is_permanent_binary_name("_pv_0123456789abcdef.bin"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = hash_file(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }
}
