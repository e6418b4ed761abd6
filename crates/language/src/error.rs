//! Error types for parsing and evaluating manifests

use catalog::Location;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a parse or a compile
#[derive(Debug, Error)]
pub enum Error {
    /// The source text is not valid Puppet
    #[error("Syntax error: {message} {}", at(.file, .line))]
    Parse {
        file: Option<String>,
        line: usize,
        message: String,
    },

    /// The source parsed but could not be evaluated
    #[error("Evaluation Error: {message} {}", at(.file, .line))]
    Evaluation {
        file: Option<String>,
        line: usize,
        message: String,
    },

    #[error("Evaluation Error: Unknown variable: '{name}' {}", at(.file, .line))]
    UnknownVariable {
        name: String,
        file: Option<String>,
        line: usize,
    },

    #[error("Evaluation Error: Unknown function: '{name}' {}", at(.file, .line))]
    UnknownFunction {
        name: String,
        file: Option<String>,
        line: usize,
    },

    /// A statement function used as a value, or the reverse
    #[error("Evaluation Error: {message} {}", at(.file, .line))]
    FunctionContext {
        name: String,
        message: String,
        file: Option<String>,
        line: usize,
    },

    #[error(transparent)]
    Catalog(#[from] catalog::Error),

    #[error("Could not read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn parse(file: Option<&str>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.map(str::to_string),
            line,
            message: message.into(),
        }
    }

    pub fn evaluation(file: Option<&str>, line: usize, message: impl Into<String>) -> Self {
        Self::Evaluation {
            file: file.map(str::to_string),
            line,
            message: message.into(),
        }
    }

    /// Where the error was raised, when it points into a manifest
    pub fn location(&self) -> Option<Location> {
        match self {
            Self::Parse { file, line, .. }
            | Self::Evaluation { file, line, .. }
            | Self::UnknownVariable { file, line, .. }
            | Self::UnknownFunction { file, line, .. }
            | Self::FunctionContext { file, line, .. } => Some(at(file, line)),
            Self::Catalog(_) | Self::Io { .. } => None,
        }
    }
}

fn at(file: &Option<String>, line: &usize) -> Location {
    Location::new(file.clone(), *line)
}

/// Result type for language operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_names_file_and_line() {
        let err = Error::parse(Some("site.pp"), 3, "unexpected '}'");
        assert_eq!(
            err.to_string(),
            "Syntax error: unexpected '}' (file: site.pp, line: 3)"
        );
    }

    #[test]
    fn test_unknown_function_message() {
        let err = Error::UnknownFunction {
            name: "frobnicate".to_string(),
            file: None,
            line: 7,
        };
        assert_eq!(
            err.to_string(),
            "Evaluation Error: Unknown function: 'frobnicate' (line: 7)"
        );
        assert_eq!(err.location().and_then(|l| l.line), Some(7));
    }
}
