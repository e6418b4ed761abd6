//! Provider selection errors

use thiserror::Error;

/// Errors raised while picking a provider for a resource type
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No registered provider for the type passes its confinement
    #[error("Could not find a suitable provider for {type_name}{}", render_diagnostics(.diagnostics))]
    NoSuitableProvider {
        type_name: String,
        /// One line per rejected provider, naming the confines that failed
        diagnostics: Vec<String>,
    },

    /// A resource asked for a provider that does not exist for its type
    #[error("Invalid provider '{provider}' for {type_name}")]
    UnknownProvider { type_name: String, provider: String },

    /// A resource asked for a provider that exists but is not suitable here
    #[error("Provider '{provider}' is not functional on this host for {type_name}: {}", .reasons.join("; "))]
    UnsuitableProvider {
        type_name: String,
        provider: String,
        reasons: Vec<String>,
    },
}

impl Error {
    /// The resource type the failed lookup was for
    pub fn type_name(&self) -> &str {
        match self {
            Self::NoSuitableProvider { type_name, .. }
            | Self::UnknownProvider { type_name, .. }
            | Self::UnsuitableProvider { type_name, .. } => type_name,
        }
    }
}

fn render_diagnostics(diagnostics: &[String]) -> String {
    if diagnostics.is_empty() {
        return String::new();
    }
    let mut out = String::from(":");
    for line in diagnostics {
        out.push_str("\n  ");
        out.push_str(line);
    }
    out
}

/// Result type for provider selection
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_suitable_provider_lists_diagnostics() {
        let err = Error::NoSuitableProvider {
            type_name: "service".into(),
            diagnostics: vec!["systemd: file systemctl does not exist".into()],
        };
        assert_eq!(
            err.to_string(),
            "Could not find a suitable provider for service:\n  systemd: file systemctl does not exist"
        );
        assert_eq!(err.type_name(), "service");
    }

    #[test]
    fn test_no_suitable_provider_without_diagnostics() {
        let err = Error::NoSuitableProvider {
            type_name: "package".into(),
            diagnostics: Vec::new(),
        };
        assert_eq!(err.to_string(), "Could not find a suitable provider for package");
    }
}
