//! SHA-256 digests for blob content.

use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use strata_types::BlobHash;

#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> BlobHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    BlobHash::from_bytes(hasher.finalize().into())
}

/// Hash a file's content without loading it into memory.
pub fn hash_file(path: &Path) -> io::Result<BlobHash> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(BlobHash::from_bytes(hasher.finalize().into()))
}
