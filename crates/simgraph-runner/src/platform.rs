//! Host platform selection and external command descriptions.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

/// One external process invocation. Paths are relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Shell-quoted rendering, used for dry runs and logs.
    pub fn display(&self) -> String {
        let line = shell_join(&self.argv());
        match &self.working_dir {
            Some(dir) => format!("(cd {} && {})", shell_quote(&dir.to_string_lossy()), line),
            None => line,
        }
    }
}

/// Command dialect of the host. Selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Posix,
    Windows,
}

impl Platform {
    pub fn detect() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }

    pub fn python(&self) -> &'static str {
        match self {
            Platform::Posix => "python3",
            Platform::Windows => "python",
        }
    }

    /// Path of an executable inside a virtual environment.
    ///
    /// `depth` is how many directories below the project root the command runs in.
    pub fn venv_tool(&self, venv_dir: &str, tool: &str, depth: usize) -> String {
        match self {
            Platform::Posix => {
                format!("{}{}/bin/{}", "../".repeat(depth), venv_dir, tool)
            }
            Platform::Windows => {
                let venv_dir = venv_dir.replace('/', "\\");
                format!("{}{}\\Scripts\\{}", "..\\".repeat(depth), venv_dir, tool)
            }
        }
    }

    pub fn make_dir(&self, dir: &str) -> CommandSpec {
        match self {
            Platform::Posix => CommandSpec::new("mkdir", ["-p", dir]),
            Platform::Windows => {
                let dir = dir.replace('/', "\\");
                CommandSpec::new(
                    "cmd",
                    [
                        "/C".to_string(),
                        format!("if not exist {} mkdir {}", dir, dir),
                    ],
                )
            }
        }
    }
}

/// Host facts resolved once per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostInfo {
    pub platform: Platform,
    pub is_linux: bool,
    pub cpu_count: u64,
}

impl HostInfo {
    pub fn detect() -> Self {
        Self {
            platform: Platform::detect(),
            is_linux: cfg!(target_os = "linux"),
            cpu_count: crate::budget::host_cpu_count(),
        }
    }
}

/// Number of normal path components, used to climb back to the project root.
pub fn path_depth(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}

pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venv_tool_paths_follow_platform_layout() {
        assert_eq!(Platform::Posix.venv_tool("env", "pip", 0), "env/bin/pip");
        assert_eq!(
            Platform::Posix.venv_tool("env", "python3", 1),
            "../env/bin/python3"
        );
        assert_eq!(
            Platform::Windows.venv_tool("env", "pip", 0),
            "env\\Scripts\\pip"
        );
        assert_eq!(
            Platform::Windows.venv_tool("env", "python", 1),
            "..\\env\\Scripts\\python"
        );
    }

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let cmd = CommandSpec::new("java", ["--override", "terminate: { x }"]);
        assert_eq!(cmd.display(), "java --override 'terminate: { x }'");
        let cmd = CommandSpec::new("python3", ["setup.py"]).in_dir("python");
        assert_eq!(cmd.display(), "(cd python && python3 setup.py)");
    }

    #[test]
    fn display_quotes_backslashes() {
        assert_eq!(shell_quote("a\\b"), "'a\\b'");
        let cmd = CommandSpec::new("env\\Scripts\\pip", ["install", "-r", "requirements.txt"]);
        assert_eq!(
            cmd.display(),
            "'env\\Scripts\\pip' install -r requirements.txt"
        );
    }

    #[test]
    fn path_depth_counts_normal_components() {
        assert_eq!(path_depth(Path::new("python")), 1);
        assert_eq!(path_depth(Path::new("./tools/python")), 2);
        assert_eq!(path_depth(Path::new("")), 0);
    }

    #[test]
    fn normalize_path_drops_dot_segments() {
        assert_eq!(
            normalize_path(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
    }
}
