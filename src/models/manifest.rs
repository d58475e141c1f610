use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discriminator value the package host uses to recognise project templates.
pub const TEMPLATE_KIND: &str = "template";

/// Errors raised while encoding, decoding, or checking a manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to parse manifest: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Manifest field '{0}' must not be empty")]
    MissingField(&'static str),
}

/// Package metadata written to `package.json` at the package root.
///
/// The JSON keys follow the layout the package host expects (`type` and
/// `unity` rather than the Rust field names). Every field except
/// `description` defaults to a non-empty placeholder, and missing keys fall
/// back to those placeholders when a manifest is read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageManifest {
    /// Package identifier, conventionally `com.<org>.template.<project>`
    pub name: String,

    #[serde(rename = "displayName")]
    pub display_name: String,

    pub version: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(rename = "unity")]
    pub target_platform_version: String,

    pub description: String,
}

impl Default for PackageManifest {
    fn default() -> Self {
        Self {
            name: "com.COMPANYNAME.template.PROJECTNAME".to_string(),
            display_name: "Starter Template Project".to_string(),
            version: "1.0.0".to_string(),
            kind: TEMPLATE_KIND.to_string(),
            target_platform_version: "2021.3".to_string(),
            description: "A template project bundling commonly used assets.".to_string(),
        }
    }
}

impl PackageManifest {
    /// Encode the manifest as compact JSON.
    ///
    /// Field order is fixed by the struct declaration, so the output is
    /// deterministic for a given manifest.
    pub fn to_json(&self) -> Result<String, ManifestError> {
        serde_json::to_string(self).map_err(ManifestError::Serialize)
    }

    /// Decode a manifest previously produced by [`to_json`](Self::to_json).
    pub fn from_json(text: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(text).map_err(ManifestError::Parse)
    }

    /// Check that every required field is present.
    ///
    /// Only presence is checked; `description` may be empty.
    pub fn ensure_present(&self) -> Result<(), ManifestError> {
        let required = [
            ("name", &self.name),
            ("displayName", &self.display_name),
            ("version", &self.version),
            ("type", &self.kind),
            ("unity", &self.target_platform_version),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ManifestError::MissingField(field));
            }
        }

        Ok(())
    }

    /// File name of the archive artifact for this manifest
    pub fn artifact_file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.name, extension)
    }
}
