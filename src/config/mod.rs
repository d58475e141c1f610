use crate::models::{LastUsedSettings, PackageManifest, PackerConfig};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Prefix of environment variables overriding `packer.yaml`
/// (`TEMPLATE_PACKER_COMPRESSION_LEVEL=9`, `TEMPLATE_PACKER_SOURCE_FOLDERS=Assets,Packages`)
pub const ENV_PREFIX: &str = "TEMPLATE_PACKER";

/// Configuration manager for loading and saving YAML configuration files.
///
/// Manages two files:
/// - Packer config (`packer.yaml`): project root, source folders, workspace base
/// - Last-used settings (`last-used.yaml`): manifest and destination of the previous run
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    packer_config_path: Utf8PathBuf,
    last_used_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            packer_config_path: config_dir.join("packer.yaml"),
            last_used_path: config_dir.join("last-used.yaml"),
            config_dir,
        })
    }

    /// Load the packer configuration.
    ///
    /// Layers `packer.yaml` (optional) under `TEMPLATE_PACKER_*` environment
    /// variables; anything unset keeps its default.
    pub fn load_packer_config(&self) -> Result<PackerConfig> {
        self.build_packer_config(Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("source_folders")
    }

    fn build_packer_config(&self, environment: config::Environment) -> Result<PackerConfig> {
        if !self.packer_config_path.exists() {
            tracing::warn!(
                "Packer config file not found at {}, using defaults",
                self.packer_config_path
            );
        }

        let settings = config::Config::builder()
            .add_source(
                config::File::from(self.packer_config_path.as_std_path())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to read packer config: {}", self.packer_config_path))?;

        let config: PackerConfig = settings.try_deserialize().with_context(|| {
            format!("Failed to parse packer config: {}", self.packer_config_path)
        })?;

        tracing::info!(
            "Loaded packer config: project={}, folders={:?}",
            config.project_root,
            config.source_folders
        );
        Ok(config)
    }

    /// Save the packer configuration file.
    pub fn save_packer_config(&self, config: &PackerConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize packer config to YAML")?;

        fs::write(&self.packer_config_path, yaml_string).with_context(|| {
            format!("Failed to write packer config: {}", self.packer_config_path)
        })?;

        tracing::info!("Saved packer config to {}", self.packer_config_path);
        Ok(())
    }

    /// Load the last-used settings, or defaults if the file doesn't exist.
    pub fn load_last_used(&self) -> Result<LastUsedSettings> {
        if !self.last_used_path.exists() {
            tracing::debug!("No last-used settings at {}", self.last_used_path);
            return Ok(LastUsedSettings::default());
        }

        let file_contents = fs::read_to_string(&self.last_used_path).with_context(|| {
            format!("Failed to read last-used settings: {}", self.last_used_path)
        })?;

        let settings: LastUsedSettings =
            serde_yaml_ng::from_str(&file_contents).with_context(|| {
                format!("Failed to parse last-used settings: {}", self.last_used_path)
            })?;

        Ok(settings)
    }

    pub fn save_last_used(&self, settings: &LastUsedSettings) -> Result<()> {
        let yaml_string = serde_yaml_ng::to_string(settings)
            .context("Failed to serialize last-used settings to YAML")?;

        fs::write(&self.last_used_path, yaml_string).with_context(|| {
            format!("Failed to write last-used settings: {}", self.last_used_path)
        })?;

        tracing::info!("Saved last-used settings to {}", self.last_used_path);
        Ok(())
    }

    /// Manifest of the previous run, or the placeholder manifest.
    ///
    /// An unreadable settings file or a malformed manifest string is logged
    /// and replaced by defaults rather than failing.
    pub fn load_last_manifest(&self) -> PackageManifest {
        let settings = match self.load_last_used() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring last-used settings: {:#}", e);
                return PackageManifest::default();
            }
        };

        match settings.manifest_json.as_deref() {
            Some(json) => PackageManifest::from_json(json).unwrap_or_else(|e| {
                tracing::warn!("Stored manifest is malformed, using defaults: {}", e);
                PackageManifest::default()
            }),
            None => PackageManifest::default(),
        }
    }

    /// Store the manifest for the next run, keeping the remembered destination.
    pub fn save_last_manifest(&self, manifest: &PackageManifest) -> Result<()> {
        let mut settings = self.load_last_used().unwrap_or_else(|e| {
            tracing::warn!("Replacing unreadable last-used settings: {:#}", e);
            LastUsedSettings::default()
        });
        settings.manifest_json = Some(manifest.to_json()?);
        self.save_last_used(&settings)
    }

    /// Remember the manifest and destination of a run for next time.
    pub fn remember_run(&self, manifest: &PackageManifest, destination: &Utf8Path) -> Result<()> {
        let settings = LastUsedSettings {
            manifest_json: Some(manifest.to_json()?),
            destination: Some(destination.to_path_buf()),
        };
        self.save_last_used(&settings)
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}
