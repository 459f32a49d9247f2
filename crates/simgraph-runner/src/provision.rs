//! The Python toolchain chain that batch launches depend on.

use std::path::Path;

use serde::Serialize;

use crate::platform::{path_depth, CommandSpec, Platform};

/// Project-relative locations used by the provisioning commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionLayout {
    pub venv_dir: String,
    pub artifact_dir: String,
    pub requirements: String,
    pub package_dir: String,
}

impl Default for ProvisionLayout {
    fn default() -> Self {
        Self {
            venv_dir: "env".to_string(),
            artifact_dir: "networks".to_string(),
            requirements: "requirements.txt".to_string(),
            package_dir: "python".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStep {
    CreateVirtualEnv,
    CreateArtifactFolder,
    InstallPythonDependencies,
    BuildCustomDependency,
    InstallCustomDependency,
}

impl ProvisionStep {
    /// Declaration order, which is also a valid execution order.
    pub const ALL: [ProvisionStep; 5] = [
        ProvisionStep::CreateVirtualEnv,
        ProvisionStep::CreateArtifactFolder,
        ProvisionStep::InstallPythonDependencies,
        ProvisionStep::BuildCustomDependency,
        ProvisionStep::InstallCustomDependency,
    ];

    /// The step every batch launch waits on.
    pub const LAST: ProvisionStep = ProvisionStep::InstallCustomDependency;

    pub fn task_name(&self) -> &'static str {
        match self {
            ProvisionStep::CreateVirtualEnv => "createVirtualEnv",
            ProvisionStep::CreateArtifactFolder => "createArtifactFolder",
            ProvisionStep::InstallPythonDependencies => "installPythonDependencies",
            ProvisionStep::BuildCustomDependency => "buildCustomDependency",
            ProvisionStep::InstallCustomDependency => "installCustomDependency",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ProvisionStep::CreateVirtualEnv => "Creates a virtual environment for Python",
            ProvisionStep::CreateArtifactFolder => "Creates a folder for trained network artifacts",
            ProvisionStep::InstallPythonDependencies => "Installs Python dependencies",
            ProvisionStep::BuildCustomDependency => "Builds custom Python dependencies",
            ProvisionStep::InstallCustomDependency => "Installs custom Python dependencies",
        }
    }

    pub fn predecessors(&self) -> &'static [ProvisionStep] {
        match self {
            ProvisionStep::CreateVirtualEnv | ProvisionStep::CreateArtifactFolder => &[],
            ProvisionStep::InstallPythonDependencies => &[
                ProvisionStep::CreateVirtualEnv,
                ProvisionStep::CreateArtifactFolder,
            ],
            ProvisionStep::BuildCustomDependency => &[ProvisionStep::InstallPythonDependencies],
            ProvisionStep::InstallCustomDependency => &[ProvisionStep::BuildCustomDependency],
        }
    }

    pub fn command(&self, platform: Platform, layout: &ProvisionLayout) -> CommandSpec {
        match self {
            ProvisionStep::CreateVirtualEnv => {
                CommandSpec::new(platform.python(), ["-m", "venv", layout.venv_dir.as_str()])
            }
            ProvisionStep::CreateArtifactFolder => platform.make_dir(&layout.artifact_dir),
            ProvisionStep::InstallPythonDependencies => CommandSpec::new(
                platform.venv_tool(&layout.venv_dir, "pip", 0),
                ["install", "-r", layout.requirements.as_str()],
            ),
            ProvisionStep::BuildCustomDependency => {
                let depth = path_depth(Path::new(&layout.package_dir));
                CommandSpec::new(
                    platform.venv_tool(&layout.venv_dir, platform.python(), depth),
                    ["setup.py", "sdist", "bdist_wheel"],
                )
                .in_dir(&layout.package_dir)
            }
            ProvisionStep::InstallCustomDependency => CommandSpec::new(
                platform.venv_tool(&layout.venv_dir, "pip", 0),
                ["install", "-e", layout.package_dir.as_str()],
            ),
        }
    }
}

/// One declared provisioning step with its concrete command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningTask {
    pub step: ProvisionStep,
    pub command: CommandSpec,
}

/// The full chain, always declared in full and in order.
pub fn setup_chain(platform: Platform, layout: &ProvisionLayout) -> Vec<ProvisioningTask> {
    ProvisionStep::ALL
        .iter()
        .map(|step| ProvisioningTask {
            step: *step,
            command: step.command(platform, layout),
        })
        .collect()
}
