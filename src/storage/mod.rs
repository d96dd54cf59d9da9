//! Storage Layer
//!
//! Application directories and model file integrity checks.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "inkread", "inkread")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the application data directory (default model location)
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Lowercase hex SHA-256 of a file
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).with_context(|| format!("Failed to read {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Fail unless the file hashes to `expected` (hex, case-insensitive)
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let hash = file_sha256(path)?;
    if !hash.eq_ignore_ascii_case(expected.trim()) {
        anyhow::bail!(
            "Checksum mismatch for {}: expected {}, got {}",
            path.display(),
            expected,
            hash
        );
    }
    info!("Checksum verified for {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // sha256("abc")
    const ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    fn abc_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_file_sha256() {
        let file = abc_file();
        assert_eq!(file_sha256(file.path()).unwrap(), ABC);
    }

    #[test]
    fn test_verify_sha256_accepts_uppercase() {
        let file = abc_file();
        assert!(verify_sha256(file.path(), &ABC.to_uppercase()).is_ok());
    }

    #[test]
    fn test_verify_sha256_mismatch() {
        let file = abc_file();
        let err = verify_sha256(file.path(), &"0".repeat(64)).unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
    }

    #[test]
    fn test_missing_file() {
        assert!(file_sha256(Path::new("/nonexistent/model.onnx")).is_err());
    }
}
