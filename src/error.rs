//! Build error types.
//!
//! Everything the engine can fail with is a [`BuildError`]. Conditions that
//! only force a rebuild (a stale or malformed `.d` file) and ambiguous library
//! resolution are not errors and never show up here.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{recipe} pattern is missing")]
    MissingRecipe { recipe: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to execute '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command failed: {command}\n{output}")]
    CompilationFailed { command: String, output: String },

    #[error("{}: fatal error: {header}: No such file or directory (no library provides it)", source_file.display())]
    LibraryNotFound { source_file: PathBuf, header: String },

    #[error("Invalid library in {}: {reason}", folder.display())]
    InvalidLibrary { folder: PathBuf, reason: String },

    #[error("Invalid line {line:?} in {origin}")]
    InvalidProperties { line: String, origin: String },

    #[error("Invalid command line: {0}")]
    InvalidCommandLine(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Build cancelled after an earlier failure")]
    Cancelled,

    #[error("Could not start compile workers: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Build options error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BuildError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// A directory walk failure, attributed to the entry that failed
    pub fn walk(root: &Path, err: walkdir::Error) -> Self {
        let path = err.path().unwrap_or(root).to_path_buf();
        Self::io(path, err.into())
    }

    /// Create a missing recipe error
    pub fn missing_recipe(recipe: impl Into<String>) -> Self {
        Self::MissingRecipe {
            recipe: recipe.into(),
        }
    }

    pub fn invalid_library(folder: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::InvalidLibrary {
            folder: folder.into(),
            reason: reason.to_string(),
        }
    }
}

/// Attach a path to a raw `io::Result`.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> BuildResult<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> BuildResult<T> {
        self.map_err(|e| BuildError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_recipe_message() {
        let err = BuildError::missing_recipe("recipe.ar.pattern");
        assert_eq!(err.to_string(), "recipe.ar.pattern pattern is missing");
    }

    #[test]
    fn test_library_not_found_names_header() {
        let err = BuildError::LibraryNotFound {
            source_file: PathBuf::from("Blink.ino.cpp"),
            header: "Servo.h".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Blink.ino.cpp"));
        assert!(msg.contains("Servo.h"));
    }

    #[test]
    fn test_walk_error_names_failing_path() {
        let missing = PathBuf::from("/definitely/not/here");
        let err = walkdir::WalkDir::new(&missing)
            .into_iter()
            .next()
            .unwrap()
            .unwrap_err();
        match BuildError::walk(Path::new("/"), err) {
            BuildError::Io { path, source } => {
                assert_eq!(path, missing);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_io_context_keeps_path() {
        let res: std::io::Result<()> = Err(std::io::Error::other("boom"));
        let err = res.at("/tmp/x.o").unwrap_err();
        assert!(err.to_string().contains("/tmp/x.o"));
    }
}
