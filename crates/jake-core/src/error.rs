//! Error taxonomy for the engine
//!
//! Structural errors are detected before anything runs. Command and
//! validation errors belong to a single recipe and are reported through the
//! run report. Cache I/O problems never show up here: the cache degrades to
//! "stale" on its own.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = JakeError> = std::result::Result<T, E>;

/// Broad classification used by the CLI for exit codes and rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Structural,
    Command,
    Validation,
    Io,
}

#[derive(Debug, Error)]
pub enum JakeError {
    #[error("unknown recipe '{name}'{}{}", referenced_by_suffix(.referenced_by), suggestion_suffix(.suggestion))]
    UnknownRecipe {
        name: String,
        referenced_by: Option<String>,
        suggestion: Option<String>,
    },

    #[error("dependency cycle detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("recipes '{first}' and '{second}' both produce '{output}'")]
    DuplicateOutput {
        output: String,
        first: String,
        second: String,
    },

    #[error("recipe '{recipe}': {reason} (command #{index})")]
    MalformedBlock {
        recipe: String,
        index: usize,
        reason: String,
    },

    #[error("recipe '{recipe}': command failed with {}: {command}", exit_code_label(*.code))]
    CommandFailed {
        recipe: String,
        command: String,
        code: Option<i32>,
    },

    #[error("recipe '{recipe}': command timed out after {seconds}s: {command}")]
    TimedOut {
        recipe: String,
        command: String,
        seconds: u64,
    },

    #[error("recipe '{recipe}': {message}")]
    Expansion { recipe: String, message: String },

    #[error("recipe '{recipe}': cancelled at confirmation prompt")]
    Declined { recipe: String },

    #[error("recipe '{recipe}' needs '{command}' but it is not installed{}", hint_suffix(.hint))]
    MissingCommand {
        recipe: String,
        command: String,
        hint: Option<String>,
    },

    #[error("recipe '{recipe}' requires variable '{variable}' to be set")]
    MissingVariable { recipe: String, variable: String },

    #[error("recipe '{recipe}' is missing required parameter '{param}'")]
    MissingParam { recipe: String, param: String },

    #[error("failed to load {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl JakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JakeError::UnknownRecipe { .. }
            | JakeError::Cycle { .. }
            | JakeError::DuplicateOutput { .. }
            | JakeError::MalformedBlock { .. } => ErrorKind::Structural,
            JakeError::CommandFailed { .. }
            | JakeError::TimedOut { .. }
            | JakeError::Expansion { .. }
            | JakeError::Declined { .. } => ErrorKind::Command,
            JakeError::MissingCommand { .. }
            | JakeError::MissingVariable { .. }
            | JakeError::MissingParam { .. } => ErrorKind::Validation,
            JakeError::Load { .. } | JakeError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_structural(&self) -> bool {
        self.kind() == ErrorKind::Structural
    }
}

fn referenced_by_suffix(referenced_by: &Option<String>) -> String {
    match referenced_by {
        Some(parent) => format!(" (dependency of '{}')", parent),
        None => String::new(),
    }
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(", did you mean '{}'?", name),
        None => String::new(),
    }
}

fn hint_suffix(hint: &Option<String>) -> String {
    match hint {
        Some(hint) => format!(" (install: {})", hint),
        None => String::new(),
    }
}

fn exit_code_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}
