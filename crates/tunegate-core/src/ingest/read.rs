use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::{fs, path::Path};

use crate::report::model::FileInfo;

/// An uploaded tune file as seen by one pipeline invocation.
///
/// Holds the exact bytes analyzed and a cryptographic fingerprint
/// used for deduplication and idempotence checks.
#[derive(Debug, Clone)]
pub struct TuneFile {
    /// Declared file name (informational, also screened by the security scanner).
    pub name: String,

    /// Lower-cased extension derived from `name`, without the dot.
    pub extension: String,

    /// Exact bytes as uploaded.
    pub bytes: Vec<u8>,

    /// Size of the upload in bytes.
    pub size_bytes: u64,

    /// Hash algorithm used for fingerprinting.
    pub hash_alg: String,

    /// Hex-encoded hash of the upload bytes.
    pub hash_hex: String,
}

impl TuneFile {
    /// Ingest an in-memory upload.
    ///
    /// The identity depends **only** on the bytes; the name is carried
    /// for extension hints and filename screening.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let extension = extension_of(&name);

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hasher.finalize();

        Self {
            name,
            extension,
            size_bytes: bytes.len() as u64,
            bytes,
            hash_alg: "sha256".to_string(),
            hash_hex: hex::encode(digest),
        }
    }

    /// Convert into report-facing file metadata.
    ///
    /// Raw bytes are dropped; only derived artifacts outlive the invocation.
    pub fn file_info(&self, format: Option<String>) -> FileInfo {
        FileInfo {
            name: self.name.clone(),
            size_bytes: self.size_bytes,
            hash_algorithm: self.hash_alg.clone(),
            hash: self.hash_hex.clone(),
            format,
        }
    }
}

/// Read a tune file from disk.
///
/// Filesystem metadata (timestamps, permissions, etc.) is ignored
/// to keep the analysis a function of the bytes alone.
pub fn read_tune_file(path: &Path) -> Result<TuneFile> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read tune file: {}", path.display()))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(TuneFile::from_bytes(name, bytes))
}

fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}
