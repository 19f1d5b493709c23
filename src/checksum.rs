//! Streaming content hashes.
//!
//! Files are read once through a fixed buffer and every requested digest
//! is fed from the same pass, so multi-gigabyte assets never sit in memory.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use crate::error::UploadError;

const READ_BUFFER: usize = 1024 * 1024;

/// Hash algorithms an asset mapping may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    Md5,
    Sha256,
}

impl ChecksumType {
    /// Header the object store uses to carry this digest (base64 encoded).
    pub fn header(&self) -> &'static str {
        match self {
            ChecksumType::Md5 => "content-md5",
            ChecksumType::Sha256 => "content-sha256",
        }
    }
}

impl std::fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumType::Md5 => write!(f, "md5"),
            ChecksumType::Sha256 => write!(f, "sha256"),
        }
    }
}

/// A computed digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub kind: ChecksumType,
    pub bytes: Vec<u8>,
}

impl Checksum {
    pub fn hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }
}

enum Hasher {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl Hasher {
    fn new(kind: ChecksumType) -> Self {
        match kind {
            ChecksumType::Md5 => Hasher::Md5(md5::Context::new()),
            ChecksumType::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    fn finish(self) -> Vec<u8> {
        match self {
            Hasher::Md5(ctx) => ctx.compute().0.to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

/// Hash `reader` with every algorithm in `kinds`, in the same order.
pub fn checksum_reader<R: Read>(
    mut reader: R,
    kinds: &[ChecksumType],
) -> std::io::Result<Vec<Checksum>> {
    let mut hashers: Vec<(ChecksumType, Hasher)> =
        kinds.iter().map(|k| (*k, Hasher::new(*k))).collect();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        for (_, h) in hashers.iter_mut() {
            h.update(&buf[..n]);
        }
    }
    Ok(hashers
        .into_iter()
        .map(|(kind, h)| Checksum {
            kind,
            bytes: h.finish(),
        })
        .collect())
}

/// Hash a file on the blocking pool so large assets do not stall the runtime.
pub async fn checksum_file(
    path: &Path,
    kinds: &[ChecksumType],
) -> Result<Vec<Checksum>, UploadError> {
    let owned = path.to_path_buf();
    let kinds = kinds.to_vec();
    let hashed = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&owned)?;
        checksum_reader(file, &kinds)
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));

    hashed.and_then(|r| r).map_err(|source| UploadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digests_of_abc() {
        let sums = checksum_reader(&b"abc"[..], &[ChecksumType::Md5, ChecksumType::Sha256]).unwrap();
        assert_eq!(sums[0].kind, ChecksumType::Md5);
        assert_eq!(sums[0].hex(), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(sums[0].base64(), "kAFQmDzST7DWlj99KOF/cg==");
        assert_eq!(
            sums[1].hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn reads_across_buffer_boundaries() {
        let data = vec![7u8; READ_BUFFER * 2 + 13];
        let streamed = checksum_reader(&data[..], &[ChecksumType::Sha256]).unwrap();
        let direct = Sha256::digest(&data).to_vec();
        assert_eq!(streamed[0].bytes, direct);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = checksum_file(Path::new("/definitely/not/here.m4v"), &[ChecksumType::Md5])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[tokio::test]
    async fn file_digest_matches_reader_digest() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("Bhv001.m4v");
        let data = vec![3u8; READ_BUFFER + 17];
        std::fs::write(&path, &data).unwrap();

        let from_file = checksum_file(&path, &[ChecksumType::Md5, ChecksumType::Sha256])
            .await
            .unwrap();
        let from_reader =
            checksum_reader(&data[..], &[ChecksumType::Md5, ChecksumType::Sha256]).unwrap();
        assert_eq!(from_file, from_reader);
    }
}
