use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(
        "experiment name collision: task '{task}' would be registered by both {} and {}",
        first.display(),
        second.display()
    )]
    NameCollision {
        task: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error(
        "experiment {} would register task '{task}', which is reserved for an aggregate",
        path.display()
    )]
    ReservedName { task: String, path: PathBuf },

    #[error("cannot scan experiment directory {}: {message}", path.display())]
    Discovery { path: PathBuf, message: String },

    #[error("provisioning step '{task}' failed: {message}")]
    Provisioning { task: String, message: String },

    #[error("task '{task}' failed: {message}")]
    Execution { task: String, message: String },

    #[error("task '{0}' not found in graph")]
    UnknownTask(String),

    #[error("task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("task '{task}' depends on unregistered task '{dependency}'")]
    MissingDependency { task: String, dependency: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
