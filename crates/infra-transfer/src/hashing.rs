// Content hashing for integrity verification and snapshot checks
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tidesync_core::domain::HashAlgorithm;

const HASH_BUFFER_SIZE: usize = 256 * 1024;

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
            HashAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Hex digest of everything the reader yields
pub fn hash_reader(reader: &mut dyn Read, algorithm: HashAlgorithm) -> io::Result<String> {
    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}

/// Hex digest of a local file
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
    let mut file = File::open(path)?;
    hash_reader(&mut file, algorithm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let digest = hash_reader(&mut &b"abc"[..], HashAlgorithm::Sha256).unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha512_length() {
        let digest = hash_reader(&mut &b"abc"[..], HashAlgorithm::Sha512).unwrap();
        assert_eq!(digest.len(), 128);
    }

    #[test]
    fn test_blake3_multichunk_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data = vec![7u8; HASH_BUFFER_SIZE * 2 + 17];
        std::fs::write(&path, &data).unwrap();

        let digest = hash_file(&path, HashAlgorithm::Blake3).unwrap();
        assert_eq!(digest, blake3::hash(&data).to_hex().to_string());
    }

    #[test]
    fn test_missing_file() {
        let err = hash_file(Path::new("/no/such/file"), HashAlgorithm::Sha256).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
