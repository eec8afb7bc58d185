//! Loading the compiled program

use anyhow::{Context, Result};
use brickdeploy_core::CompileResult;
use std::path::Path;

/// Load a compile result from `path`
///
/// `.json` files hold a serialized compile result; anything else is taken
/// as a raw UF2 executable image named after the file stem.
pub async fn load(path: &Path, name: Option<&str>) -> Result<CompileResult> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut compiled = if is_json(path) {
        serde_json::from_slice::<CompileResult>(&bytes)
            .with_context(|| format!("Invalid compile result in {}", path.display()))?
    } else {
        let stem = path.file_stem().and_then(|s| s.to_str());
        CompileResult::from_image(&bytes, stem)
    };

    if let Some(name) = name {
        compiled.download_file_base_name = Some(name.to_string());
    }

    tracing::debug!(
        "Loaded {} ({} outputs, base name {:?})",
        path.display(),
        compiled.outfiles.len(),
        compiled.download_file_base_name
    );
    Ok(compiled)
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use brickdeploy_core::types::IMAGE_OUTPUT_KEY;

    #[tokio::test]
    async fn test_load_raw_image_uses_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lego-rover.uf2");
        tokio::fs::write(&path, [1u8, 2, 3]).await.unwrap();

        let compiled = load(&path, None).await.unwrap();
        assert_eq!(compiled.download_file_base_name.as_deref(), Some("lego-rover"));
        assert_eq!(compiled.image().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_load_json_with_name_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let json = format!(
            r#"{{"outfiles":{{"{}":"{}"}},"downloadFileBaseName":"lego-arm"}}"#,
            IMAGE_OUTPUT_KEY,
            STANDARD.encode([7u8, 8])
        );
        tokio::fs::write(&path, json).await.unwrap();

        let compiled = load(&path, Some("gripper")).await.unwrap();
        assert_eq!(compiled.download_file_base_name.as_deref(), Some("gripper"));
        assert_eq!(compiled.image().unwrap(), vec![7, 8]);
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let err = load(&path, None).await.unwrap_err();
        assert!(err.to_string().contains("Invalid compile result"));
    }

    #[tokio::test]
    async fn test_missing_file() {
        assert!(load(Path::new("/nonexistent/brickdeploy.uf2"), None).await.is_err());
    }

    #[test]
    fn test_is_json() {
        assert!(is_json(Path::new("a/b.JSON")));
        assert!(!is_json(Path::new("a/b.uf2")));
        assert!(!is_json(Path::new("noext")));
    }
}
