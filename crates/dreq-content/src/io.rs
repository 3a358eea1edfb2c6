//! JSON file I/O and content digests.
//!
//! DR/VS files are tracked in version control and referenced by checksum, so
//! they are always written the same way: 4-space indentation, keys in sorted
//! order, trailing newline.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{ContentError, Result};

pub fn read_json_file(path: impl AsRef<Path>) -> Result<Value> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ContentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ContentError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize `value` in the canonical on-disk layout.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    let mut text = String::from_utf8_lossy(&buf).into_owned();
    text.push('\n');
    Ok(text)
}

pub fn write_json_file<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    let text = to_canonical_json(value)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ContentError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, text).map_err(|source| ContentError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Lower-case hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

pub fn file_sha256(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| ContentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_layout_is_stable() {
        let value = json!({"b": [1, 2], "a": {"z": null, "y": "x"}});
        let text = to_canonical_json(&value).unwrap();
        assert_eq!(
            text,
            "{\n    \"a\": {\n        \"y\": \"x\",\n        \"z\": null\n    },\n    \"b\": [\n        1,\n        2\n    ]\n}\n"
        );
    }

    #[test]
    fn write_then_read_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("DR_test.json");
        let value = json!({"version": "v1", "opportunities": {}});
        write_json_file(&path, &value).unwrap();
        assert_eq!(read_json_file(&path).unwrap(), value);

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(file_sha256(&path).unwrap(), sha256_hex(text.as_bytes()));
        assert_eq!(file_sha256(&path).unwrap().len(), 64);
    }

    #[test]
    fn missing_and_malformed_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(read_json_file(&missing), Err(ContentError::Read { .. })));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{not json").unwrap();
        assert!(matches!(read_json_file(&broken), Err(ContentError::Parse { .. })));
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
