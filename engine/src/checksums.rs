//! SHA-256 checksums used for post-copy verification.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Streaming SHA-256 over anything readable.
pub fn sha256_reader<R: Read>(mut reader: R, buffer_size: usize) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; buffer_size.max(4096)];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path, buffer_size: usize) -> io::Result<String> {
    sha256_reader(File::open(path)?, buffer_size)
}

/// Incremental hasher fed while a file is being copied, so the source does not
/// have to be read a second time.
#[derive(Default)]
pub struct StreamingSha256 {
    hasher: Sha256,
}

impl StreamingSha256 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}
