//! Atomic file replacement (temp file + rename) shared by the on-disk stores.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

/// Replace `path` with `contents` so readers never observe a partial write.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Serialize `value` to pretty JSON with a trailing newline and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_parent_and_leaves_no_temp_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/dir/state.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).expect("write");

        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "{\n  \"a\": 1\n}\n"
        );
        assert!(!temp.path().join("nested/dir/state.json.tmp").exists());
    }
}
