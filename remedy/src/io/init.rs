//! Initialization helpers for `.remedy/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use sha2::{Digest, Sha256};

use crate::io::config::{RemedyConfig, write_config};

/// All canonical paths within `.remedy/` for a project root.
#[derive(Debug, Clone)]
pub struct RemedyPaths {
    pub root: PathBuf,
    pub remedy_dir: PathBuf,
    pub config_path: PathBuf,
    pub issues_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub example_issue_path: PathBuf,
}

impl RemedyPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let remedy_dir = root.join(".remedy");
        Self {
            root: root.clone(),
            config_path: remedy_dir.join("config.toml"),
            issues_dir: remedy_dir.join("issues"),
            gitignore_path: remedy_dir.join(".gitignore"),
            example_issue_path: remedy_dir.join("issue.example.toml"),
            remedy_dir,
        }
    }

    /// Transcript directory of one issue.
    pub fn issue_dir(&self, issue_name: &str) -> PathBuf {
        self.issues_dir.join(slug(issue_name))
    }
}

/// Filesystem-safe form of an issue name, suffixed with a short hash of the
/// raw name so names that sanitize alike keep separate directories.
pub fn slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-');
    let stem = if slug.is_empty() { "issue" } else { slug };
    let digest = Sha256::digest(name.as_bytes());
    format!("{stem}-{}", hex::encode(&digest[..4]))
}

/// Options for `init_remedy`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing remedy-owned files.
    pub force: bool,
}

/// Create `.remedy/` scaffolding in `root`.
///
/// Fails if `.remedy/` already exists unless `options.force` is set.
pub fn init_remedy(root: &Path, options: &InitOptions) -> Result<RemedyPaths> {
    let paths = RemedyPaths::new(root);
    if paths.remedy_dir.exists() && !paths.remedy_dir.is_dir() {
        return Err(anyhow!("remedy init: .remedy exists but is not a directory"));
    }
    if paths.remedy_dir.exists() && !options.force {
        return Err(anyhow!(
            "remedy init: .remedy already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.remedy_dir)?;
    create_dir(&paths.issues_dir)?;
    write_config(&paths.config_path, &RemedyConfig::default())?;
    write_file(&paths.gitignore_path, REMEDY_GITIGNORE)?;
    write_file(&paths.example_issue_path, EXAMPLE_ISSUE)?;
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const REMEDY_GITIGNORE: &str = "issues/\n";
const EXAMPLE_ISSUE: &str = r#"issue_name = "checkout-oom"
namespace = "shop"
resource_kind = "Deployment"
resource_name = "checkout"
signal_type = "PodRestarts"
severity = "high"
description = "checkout pods are OOMKilled every few minutes since 14:05"
risk_score = 40
# cluster_context = "kubectl describe output, used when [context].command is unset"
# previous_failure_context = "a rolling restart at 14:20 did not help"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;
    use crate::io::issue_file::load_issue;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_remedy(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.remedy_dir.is_dir());
        assert!(paths.issues_dir.is_dir());
        assert_eq!(
            load_config(&paths.config_path).expect("config"),
            RemedyConfig::default()
        );
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("gitignore"),
            REMEDY_GITIGNORE
        );
        let issue = load_issue(&paths.example_issue_path).expect("example issue");
        assert_eq!(issue.issue_name, "checkout-oom");
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_remedy(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_remedy(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_rewrites_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_remedy(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "max_steps = 2\n").expect("customize");

        init_remedy(temp.path(), &InitOptions { force: true }).expect("re-init");
        let cfg = load_config(&paths.config_path).expect("config");
        assert_eq!(cfg.max_steps, RemedyConfig::default().max_steps);
    }

    #[test]
    fn slug_is_filesystem_safe() {
        let prod = slug("Checkout OOM / prod");
        assert!(prod.starts_with("checkout-oom---prod-"), "{prod}");
        assert_eq!(prod.len(), "checkout-oom---prod-".len() + 8);
        assert!(slug("../etc").starts_with("etc-"));
        assert!(slug("  ").starts_with("issue-"));
        assert!(!slug("../etc").contains(['.', '/']));
    }

    #[test]
    fn slug_keeps_distinct_names_apart() {
        assert_ne!(slug("a/b"), slug("a-b"));
        assert_ne!(slug("Checkout"), slug("checkout"));
        assert_eq!(slug("a/b"), slug("a/b"));

        let paths = RemedyPaths::new(Path::new("/repo"));
        assert_ne!(paths.issue_dir("a/b"), paths.issue_dir("a-b"));
    }
}
