//! Compiled-program input and deployment artifact

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{DeployError, Result};

/// Output key holding the base64 executable image container
pub const IMAGE_OUTPUT_KEY: &str = "binary.elf";

/// Output key receiving the base64 deployment artifact
pub const ARTIFACT_OUTPUT_KEY: &str = "binary.uf2";

/// Result of compiling a program, as handed over by the compiler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    /// Output files, base64 encoded, by key
    #[serde(default)]
    pub outfiles: BTreeMap<String, String>,

    /// Suggested base filename for downloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_file_base_name: Option<String>,
}

impl CompileResult {
    /// Compile result carrying a raw image container
    pub fn from_image(image: &[u8], base_name: Option<&str>) -> Self {
        let mut outfiles = BTreeMap::new();
        outfiles.insert(IMAGE_OUTPUT_KEY.to_string(), STANDARD.encode(image));
        Self {
            outfiles,
            download_file_base_name: base_name.map(str::to_string),
        }
    }

    /// Decoded executable image container
    pub fn image(&self) -> Result<Vec<u8>> {
        let encoded = self.outfiles.get(IMAGE_OUTPUT_KEY).ok_or_else(|| {
            DeployError::InvalidInput(format!("compile result has no {} output", IMAGE_OUTPUT_KEY))
        })?;
        Ok(STANDARD.decode(encoded.trim())?)
    }

    /// Store the deployment artifact under its output key
    pub fn set_artifact(&mut self, artifact: &Artifact) {
        self.outfiles
            .insert(ARTIFACT_OUTPUT_KEY.to_string(), artifact.to_base64());
    }
}

/// Serialized combined container ready for download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Suggested file name, e.g. `rover.uf2`
    pub filename: String,
    pub data: Bytes,
}

impl Artifact {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_field_names() {
        let json = r#"{"outfiles":{"binary.elf":"AQID"},"downloadFileBaseName":"lego-rover"}"#;
        let result: CompileResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.download_file_base_name.as_deref(), Some("lego-rover"));
        assert_eq!(result.image().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_image_is_invalid_input() {
        let result = CompileResult::default();
        assert!(matches!(result.image(), Err(DeployError::InvalidInput(_))));
    }

    #[test]
    fn test_bad_base64() {
        let mut result = CompileResult::default();
        result.outfiles.insert(IMAGE_OUTPUT_KEY.into(), "!!!".into());
        assert!(matches!(result.image(), Err(DeployError::Base64(_))));
    }

    #[test]
    fn test_set_artifact() {
        let mut result = CompileResult::from_image(&[9, 9], None);
        let artifact = Artifact {
            filename: "pxt.uf2".into(),
            data: Bytes::from_static(&[1, 2, 3]),
        };
        result.set_artifact(&artifact);
        assert_eq!(result.outfiles.get(ARTIFACT_OUTPUT_KEY).map(String::as_str), Some("AQID"));

        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("downloadFileBaseName"));
    }
}
