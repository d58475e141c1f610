use crate::models::{PACKAGE_ROOT_FOLDER_NAME, PROJECT_DATA_FOLDER_NAME};
use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Prefix of every workspace directory name
pub const WORKSPACE_PREFIX: &str = "template-packer";

/// Errors raised while creating or removing a workspace
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Workspace base directory does not exist: {0}")]
    BaseNotFound(Utf8PathBuf),

    #[error("Failed to create workspace {path}: {source}")]
    Create {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove workspace {path}: {source}")]
    Teardown {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Temporary build directory for one packaging run.
///
/// Layout:
///
/// ```text
/// <base>/template-packer-<uuid>/     root, removed by teardown
///     package/                      archived under the entry name "package"
///         package.json
///         ProjectData~/             replicated source folders
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: Utf8PathBuf,
    package_dir: Utf8PathBuf,
    data_dir: Utf8PathBuf,
}

impl Workspace {
    /// Allocate a fresh, uniquely named workspace under `base`.
    pub async fn create(base: &Utf8Path) -> Result<Self, WorkspaceError> {
        if !tokio::fs::try_exists(base).await.unwrap_or(false) {
            return Err(WorkspaceError::BaseNotFound(base.to_path_buf()));
        }

        let root = base.join(format!("{}-{}", WORKSPACE_PREFIX, Uuid::new_v4()));
        let package_dir = root.join(PACKAGE_ROOT_FOLDER_NAME);
        let data_dir = package_dir.join(PROJECT_DATA_FOLDER_NAME);

        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: root.clone(),
                source,
            })?;

        tracing::debug!("Created workspace at {}", root);

        Ok(Self {
            root,
            package_dir,
            data_dir,
        })
    }

    /// Directory removed by [`teardown`]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory archived as the top-level entry
    pub fn package_dir(&self) -> &Utf8Path {
        &self.package_dir
    }

    /// Directory receiving the replicated source folders
    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }
}

/// Recursively delete a workspace tree.
///
/// A missing directory is not an error, so this is safe to call repeatedly
/// and on a workspace that was never fully populated.
pub async fn teardown(root: &Utf8Path) -> Result<(), WorkspaceError> {
    match tokio::fs::remove_dir_all(root).await {
        Ok(()) => {
            tracing::info!("Removed workspace {}", root);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("Workspace {} already removed", root);
            Ok(())
        }
        Err(source) => Err(WorkspaceError::Teardown {
            path: root.to_path_buf(),
            source,
        }),
    }
}
