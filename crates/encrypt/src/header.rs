//! Encrypted-artifact header validation.

use std::path::Path;
use tokio::io::AsyncReadExt;

/// The fixed signature at byte 0 of every valid encrypted datapack.
pub const ENCRYPTED_HEADER: &[u8] = b"TSCreator Encrypted Datafile";

/// Returns whether `bytes` begin with the encrypted-datafile signature.
pub fn has_encrypted_header(bytes: &[u8]) -> bool {
    bytes.len() >= ENCRYPTED_HEADER.len() && &bytes[..ENCRYPTED_HEADER.len()] == ENCRYPTED_HEADER
}

/// Reads the first bytes of a file and checks them against the signature.
///
/// # Errors
///
/// Returns the underlying I/O error if the file cannot be opened or read
/// (a missing file is an error here, not a `false`).
pub async fn check_header(path: &Path) -> std::io::Result<bool> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = [0u8; ENCRYPTED_HEADER.len()];
    let mut read = 0;
    while read < buf.len() {
        let n = file.read(&mut buf[read..]).await?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read == buf.len() && &buf[..] == ENCRYPTED_HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_has_encrypted_header() {
        assert!(has_encrypted_header(b"TSCreator Encrypted Datafile\x00\x01"));
        assert!(has_encrypted_header(ENCRYPTED_HEADER));
        assert!(!has_encrypted_header(b"TSCreator Encrypted"));
        assert!(!has_encrypted_header(b"1.0 chart data"));
        assert!(!has_encrypted_header(b""));
    }

    #[tokio::test]
    async fn test_check_header_on_files() {
        let temp = TempDir::new().unwrap();

        let valid = temp.path().join("valid.dpk");
        tokio::fs::write(&valid, [ENCRYPTED_HEADER, b" payload"].concat())
            .await
            .unwrap();
        assert!(check_header(&valid).await.unwrap());

        let invalid = temp.path().join("invalid.dpk");
        tokio::fs::write(&invalid, b"plain text datapack").await.unwrap();
        assert!(!check_header(&invalid).await.unwrap());

        // shorter than the signature
        let short = temp.path().join("short.dpk");
        tokio::fs::write(&short, b"TSC").await.unwrap();
        assert!(!check_header(&short).await.unwrap());

        assert!(check_header(&temp.path().join("missing.dpk")).await.is_err());
    }
}
