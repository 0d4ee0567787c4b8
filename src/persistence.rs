//! Atomic file persistence, grounded in `andrey-moor-plan-forge`'s
//! `orchestrator/orchestration_state.rs::save` (write to a sibling `.tmp`
//! file, then rename over the real path), adapted to async `tokio::fs` for
//! use by the session store and history store.

use tokio::fs;

use crate::prelude::*;

/// Write `contents` to `path` atomically: write to a sibling `.tmp` file in
/// the same directory, then rename over `path`. A crash mid-write leaves
/// the original file (or nothing, on first write) intact, never a
/// half-written one.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory {:?}", parent))?;
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("path has no file name: {:?}", path))?;
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    fs::write(&temp_path, contents)
        .await
        .with_context(|| format!("failed to write temp file {:?}", temp_path))?;

    fs::rename(&temp_path, path)
        .await
        .with_context(|| format!("failed to rename {:?} to {:?}", temp_path, path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_creates_file_and_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        write_atomic(&path, "{}").await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "{}");
    }

    #[tokio::test]
    async fn test_write_atomic_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, "first").await.unwrap();
        write_atomic(&path, "second").await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "second");
    }

    #[tokio::test]
    async fn test_no_leftover_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, "data").await.unwrap();
        let temp_path = dir.path().join(".state.json.tmp");
        assert!(!temp_path.exists());
    }
}
