use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Top-level folder every archive entry lives under
pub const PACKAGE_ROOT_FOLDER_NAME: &str = "package";

/// Folder inside the package root holding the replicated project data
pub const PROJECT_DATA_FOLDER_NAME: &str = "ProjectData~";

/// Manifest file written at the package root
pub const MANIFEST_FILE_NAME: &str = "package.json";

/// Extension of the produced artifact
pub const ARCHIVE_EXTENSION: &str = "tgz";

/// Where the editor keeps installed project templates, relative to its install root
pub const EDITOR_TEMPLATES_RELATIVE_PATH: &str = "Data/Resources/PackageManager/ProjectTemplates";

/// Packager configuration from `packer.yaml` and `TEMPLATE_PACKER_*` environment variables
///
/// Every key is optional; anything not set falls back to [`PackerConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackerConfig {
    /// Root of the project whose folders are packaged
    pub project_root: Utf8PathBuf,

    /// Top-level folders under `project_root`, each replicated concurrently
    pub source_folders: Vec<String>,

    /// Directory the temporary workspace is created in (system temp dir when unset)
    pub workspace_base: Option<Utf8PathBuf>,

    /// Gzip level, 0-9
    pub compression_level: u32,

    pub debug_mode: bool,

    pub log_dir: Utf8PathBuf,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            project_root: Utf8PathBuf::from("."),
            source_folders: vec![
                "Assets".to_string(),
                "Packages".to_string(),
                "ProjectSettings".to_string(),
            ],
            workspace_base: None,
            compression_level: 1,
            debug_mode: false,
            log_dir: Utf8PathBuf::from("logs"),
        }
    }
}

impl PackerConfig {
    /// Resolve the workspace base directory, falling back to the system temp dir.
    pub fn resolved_workspace_base(&self) -> Utf8PathBuf {
        match &self.workspace_base {
            Some(base) => base.clone(),
            None => Utf8PathBuf::try_from(std::env::temp_dir())
                .unwrap_or_else(|_| Utf8PathBuf::from(".")),
        }
    }

    /// Gzip level clamped to the valid range
    pub fn effective_compression_level(&self) -> u32 {
        self.compression_level.min(9)
    }
}

/// Values restored on the next run, stored in `last-used.yaml`
///
/// The manifest is kept as its JSON encoding so the settings file holds
/// exactly what the pipeline writes into `package.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastUsedSettings {
    #[serde(rename = "Previous Manifest", default)]
    pub manifest_json: Option<String>,

    #[serde(rename = "Previous Destination", default)]
    pub destination: Option<Utf8PathBuf>,
}

/// How the produced package is delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowType {
    /// Write the archive to a caller-chosen directory
    PackageOnly { destination: Utf8PathBuf },

    /// Write the archive straight into the editor's template folder
    RegisterWithEditor { editor_root: Utf8PathBuf },
}

impl WorkflowType {
    /// Directory the archive artifact is written to
    pub fn destination(&self) -> Utf8PathBuf {
        match self {
            WorkflowType::PackageOnly { destination } => destination.clone(),
            WorkflowType::RegisterWithEditor { editor_root } => editor_templates_dir(editor_root),
        }
    }
}

/// Resolve the editor's project-template directory from its install root.
pub fn editor_templates_dir(editor_root: &Utf8Path) -> Utf8PathBuf {
    EDITOR_TEMPLATES_RELATIVE_PATH
        .split('/')
        .fold(editor_root.to_path_buf(), |path, part| path.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packer_config_defaults() {
        let config = PackerConfig::default();
        assert_eq!(config.source_folders, vec!["Assets", "Packages", "ProjectSettings"]);
        assert_eq!(config.compression_level, 1);
        assert!(config.workspace_base.is_none());
    }

    #[test]
    fn test_compression_level_is_clamped() {
        let config = PackerConfig {
            compression_level: 42,
            ..PackerConfig::default()
        };
        assert_eq!(config.effective_compression_level(), 9);
    }

    #[test]
    fn test_editor_templates_dir() {
        let dir = editor_templates_dir(Utf8Path::new("/opt/editor"));
        assert!(dir.ends_with("Data/Resources/PackageManager/ProjectTemplates"));
        assert!(dir.starts_with("/opt/editor"));
    }

    #[test]
    fn test_workflow_destination() {
        let package_only = WorkflowType::PackageOnly {
            destination: Utf8PathBuf::from("/out"),
        };
        assert_eq!(package_only.destination(), Utf8PathBuf::from("/out"));

        let register = WorkflowType::RegisterWithEditor {
            editor_root: Utf8PathBuf::from("/opt/editor"),
        };
        assert!(register.destination().ends_with("ProjectTemplates"));
    }

    #[test]
    fn test_last_used_default_is_empty() {
        let settings = LastUsedSettings::default();
        assert!(settings.manifest_json.is_none());
        assert!(settings.destination.is_none());
    }
}
