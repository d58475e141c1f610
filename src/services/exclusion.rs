use camino::{Utf8Path, Utf8PathBuf};

/// Paths removed from every package unless the packager is built with another list
pub const BUILTIN_EXCLUSIONS: &[&str] = &["ProjectSettings/ProjectVersion.txt"];

/// Ordered relative paths (forward-slash separated) removed after replication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionList {
    paths: Vec<String>,
}

impl ExclusionList {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_EXCLUSIONS.iter().copied())
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Default for ExclusionList {
    fn default() -> Self {
        Self::builtin()
    }
}

/// What happened to one excluded path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionStatus {
    Removed,
    NotFound,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionResult {
    pub relative: String,
    pub path: Utf8PathBuf,
    pub status: ExclusionStatus,
}

/// Per-path results of one filter pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionReport {
    pub results: Vec<ExclusionResult>,
}

impl ExclusionReport {
    pub fn removed(&self) -> usize {
        self.count(|s| matches!(s, ExclusionStatus::Removed))
    }

    pub fn not_found(&self) -> usize {
        self.count(|s| matches!(s, ExclusionStatus::NotFound))
    }

    /// Human-readable warnings for everything that was not removed
    pub fn warnings(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| match &r.status {
                ExclusionStatus::Removed => None,
                ExclusionStatus::NotFound => {
                    Some(format!("Excluded path not found in project data: {}", r.relative))
                }
                ExclusionStatus::Failed(reason) => {
                    Some(format!("Failed to remove excluded path {}: {}", r.relative, reason))
                }
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&ExclusionStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }
}

/// Delete every listed file that exists under `root`.
///
/// Best effort: a missing path or a failed delete is reported as a warning
/// and never stops the pass.
pub fn apply_exclusions(root: &Utf8Path, exclusions: &ExclusionList) -> ExclusionReport {
    let mut report = ExclusionReport::default();

    for relative in exclusions.paths() {
        let path = relative
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(root.to_path_buf(), |path, part| path.join(part));

        let status = if path.is_file() {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!("Removed excluded file: {}", relative);
                    ExclusionStatus::Removed
                }
                Err(e) => {
                    tracing::warn!("Failed to remove excluded file {}: {}", path, e);
                    ExclusionStatus::Failed(e.to_string())
                }
            }
        } else {
            tracing::warn!("Excluded path was not found in project data: {}", path);
            ExclusionStatus::NotFound
        };

        report.results.push(ExclusionResult {
            relative: relative.clone(),
            path,
            status,
        });
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_tree() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(root.join("ProjectSettings")).unwrap();
        std::fs::write(root.join("ProjectSettings/ProjectVersion.txt"), "v").unwrap();
        std::fs::write(root.join("ProjectSettings/Other.asset"), "o").unwrap();
        (temp_dir, root)
    }

    #[test]
    fn test_builtin_list() {
        let list = ExclusionList::builtin();
        assert_eq!(list.paths(), ["ProjectSettings/ProjectVersion.txt"]);
        assert_eq!(ExclusionList::default(), list);
    }

    #[test]
    fn test_removes_existing_file_only() {
        let (_temp_dir, root) = setup_tree();

        let report = apply_exclusions(&root, &ExclusionList::builtin());

        assert_eq!(report.removed(), 1);
        assert!(report.warnings().is_empty());
        assert!(!root.join("ProjectSettings/ProjectVersion.txt").exists());
        assert!(root.join("ProjectSettings/Other.asset").exists());
    }

    #[test]
    fn test_missing_path_is_a_warning() {
        let (_temp_dir, root) = setup_tree();
        let list = ExclusionList::new(["Assets/Nope.txt"]);

        let report = apply_exclusions(&root, &list);

        assert_eq!(report.not_found(), 1);
        assert_eq!(report.warnings().len(), 1);
        assert!(report.warnings()[0].contains("Assets/Nope.txt"));
    }

    #[test]
    fn test_second_pass_only_reports_not_found() {
        let (_temp_dir, root) = setup_tree();
        let list = ExclusionList::builtin();

        apply_exclusions(&root, &list);
        let second = apply_exclusions(&root, &list);

        assert_eq!(second.removed(), 0);
        assert_eq!(second.not_found(), 1);
        assert!(root.join("ProjectSettings/Other.asset").exists());
    }

    #[test]
    fn test_directories_are_not_removed() {
        let (_temp_dir, root) = setup_tree();
        let list = ExclusionList::new(["ProjectSettings"]);

        let report = apply_exclusions(&root, &list);

        assert_eq!(report.not_found(), 1);
        assert!(root.join("ProjectSettings").is_dir());
    }
}
