//! Content-type detection from file contents.

use std::io::Read;
use std::path::Path;

/// Fallback when the contents match no known signature.
pub const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

/// Content type for UTF-8 text that carries no magic bytes.
const TEXT_CONTENT_TYPE: &str = "text/plain";

/// Bytes inspected when sniffing.
const SNIFF_LEN: u64 = 8192;

/// Detect the content type of a file from its leading bytes.
///
/// Never fails: unreadable files and unknown formats yield
/// [`DEFAULT_CONTENT_TYPE`].
pub fn detect_file(path: &Path) -> String {
    match read_head(path) {
        Ok(head) => detect_bytes(&head),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unable to determine content type");
            DEFAULT_CONTENT_TYPE.to_string()
        }
    }
}

/// Detect the content type of an in-memory prefix of an object.
pub fn detect_bytes(head: &[u8]) -> String {
    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }
    if !head.is_empty() && looks_like_text(head) {
        return TEXT_CONTENT_TYPE.to_string();
    }
    DEFAULT_CONTENT_TYPE.to_string()
}

fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    file.take(SNIFF_LEN).read_to_end(&mut head)?;
    Ok(head)
}

/// UTF-8 without control characters, tolerating a code point cut at the end.
fn looks_like_text(head: &[u8]) -> bool {
    let valid = match std::str::from_utf8(head) {
        Ok(s) => s,
        Err(e) if e.error_len().is_none() => {
            // Truncated multi-byte sequence at the sniff boundary
            match std::str::from_utf8(&head[..e.valid_up_to()]) {
                Ok(s) => s,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };
    !valid
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\u{0c}'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_detects_gif_by_magic_bytes() {
        assert_eq!(detect_bytes(b"GIF89a\x01\x00\x01\x00"), "image/gif");
    }

    #[test]
    fn test_extension_is_ignored() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(b"just some words").unwrap();
        assert_eq!(detect_file(file.path()), "text/plain");
    }

    #[test]
    fn test_binary_falls_back_to_octet_stream() {
        assert_eq!(detect_bytes(&[0x00, 0x01, 0x02, 0xff]), DEFAULT_CONTENT_TYPE);
        assert_eq!(detect_bytes(&[]), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_missing_file_does_not_fail() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("nope.bin");
        assert_eq!(detect_file(&missing), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_truncated_utf8_is_still_text() {
        let mut bytes = "caffè".as_bytes().to_vec();
        bytes.pop();
        assert_eq!(detect_bytes(&bytes), "text/plain");
    }
}
