//! Project configuration: `simgraph.yaml`, command-line overrides and the CI signal.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::budget::DEFAULT_TASK_SIZE_MB;
use crate::error::{Error, Result};
use crate::graph::GraphSettings;
use crate::platform::HostInfo;
use crate::provision::ProvisionLayout;

pub const CONFIG_FILE: &str = "simgraph.yaml";

/// External executable that runs one experiment definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherConfig {
    pub program: String,
    /// Placed between the JVM options and the `run <path>` arguments.
    pub args: Vec<String>,
    pub heap_flag_prefix: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            program: "java".to_string(),
            args: Vec::new(),
            heap_flag_prefix: "-Xmx".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub experiments_dir: PathBuf,
    pub extension: String,
    pub effects_dir: String,
    pub data_dir: PathBuf,
    pub venv_dir: String,
    pub artifact_dir: String,
    pub requirements: String,
    pub package_dir: String,
    pub max_heap_mb: Option<u64>,
    pub task_size_mb: u64,
    pub launcher: LauncherConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        let layout = ProvisionLayout::default();
        Self {
            experiments_dir: PathBuf::from("src/main/yaml"),
            extension: "yml".to_string(),
            effects_dir: "effects".to_string(),
            data_dir: PathBuf::from("data"),
            venv_dir: layout.venv_dir,
            artifact_dir: layout.artifact_dir,
            requirements: layout.requirements,
            package_dir: layout.package_dir,
            max_heap_mb: None,
            task_size_mb: DEFAULT_TASK_SIZE_MB,
            launcher: LauncherConfig::default(),
        }
    }
}

impl ProjectConfig {
    /// Reads `simgraph.yaml` from the project root, or the defaults if there is none.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))
    }

    pub fn layout(&self) -> ProvisionLayout {
        ProvisionLayout {
            venv_dir: self.venv_dir.clone(),
            artifact_dir: self.artifact_dir.clone(),
            requirements: self.requirements.clone(),
            package_dir: self.package_dir.clone(),
        }
    }
}

/// Values given on the command line; `None` leaves the file value in place.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_heap_mb: Option<u64>,
    pub task_size_mb: Option<u64>,
    pub ci: Option<bool>,
}

/// Everything one invocation needs, resolved once up front.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub project_root: PathBuf,
    pub project: ProjectConfig,
    pub ci: bool,
    pub host: HostInfo,
}

impl BuildConfig {
    pub fn resolve(project_root: &Path, overrides: ConfigOverrides) -> Result<Self> {
        let mut project = ProjectConfig::load(project_root)?;
        if let Some(mb) = overrides.max_heap_mb {
            project.max_heap_mb = Some(mb);
        }
        if let Some(size) = overrides.task_size_mb {
            project.task_size_mb = size;
        }
        let ci = overrides.ci.unwrap_or_else(ci_from_env);
        Ok(Self {
            project_root: project_root.to_path_buf(),
            project,
            ci,
            host: HostInfo::detect(),
        })
    }

    pub fn experiments_dir(&self) -> PathBuf {
        self.project_root.join(&self.project.experiments_dir)
    }

    pub fn graph_settings(&self) -> GraphSettings {
        GraphSettings {
            ci: self.ci,
            platform: self.host.platform,
            layout: self.project.layout(),
            effects_dir: self.project.effects_dir.clone(),
            data_dir: self.project.data_dir.clone(),
        }
    }
}

/// The process-wide CI signal. Only the literal `true` enables it.
pub fn ci_from_env() -> bool {
    parse_ci(std::env::var("CI").ok().as_deref())
}

fn parse_ci(value: Option<&str>) -> bool {
    value == Some("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ProjectConfig::load(dir.path()).expect("load");
        assert_eq!(config, ProjectConfig::default());
        assert_eq!(config.task_size_mb, 512);
        assert_eq!(config.experiments_dir, PathBuf::from("src/main/yaml"));
        assert_eq!(config.launcher.program, "java");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(CONFIG_FILE),
            "task_size_mb: 1024\nlauncher:\n  program: ./gradlew-sim\n  args: [-cp, build/libs/all.jar, it.example.Main]\n",
        )
        .expect("write config");
        let config = ProjectConfig::load(dir.path()).expect("load");
        assert_eq!(config.task_size_mb, 1024);
        assert_eq!(config.launcher.program, "./gradlew-sim");
        assert_eq!(config.launcher.args.len(), 3);
        assert_eq!(config.launcher.heap_flag_prefix, "-Xmx");
        assert_eq!(config.extension, "yml");
    }

    #[test]
    fn unknown_keys_are_configuration_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(CONFIG_FILE), "task_sise_mb: 3\n").expect("write config");
        let err = ProjectConfig::load(dir.path()).expect_err("typo must fail");
        assert!(matches!(err, Error::Config(_)), "unexpected error: {}", err);
    }

    #[test]
    fn overrides_win_over_file_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(CONFIG_FILE), "max_heap_mb: 4096\n").expect("write config");
        let config = BuildConfig::resolve(
            dir.path(),
            ConfigOverrides {
                max_heap_mb: Some(2048),
                task_size_mb: Some(256),
                ci: Some(true),
            },
        )
        .expect("resolve");
        assert_eq!(config.project.max_heap_mb, Some(2048));
        assert_eq!(config.project.task_size_mb, 256);
        assert!(config.ci);
        assert!(config.graph_settings().ci);
    }

    #[test]
    fn only_literal_true_enables_ci() {
        assert!(parse_ci(Some("true")));
        assert!(!parse_ci(Some("1")));
        assert!(!parse_ci(Some("TRUE")));
        assert!(!parse_ci(None));
    }
}
