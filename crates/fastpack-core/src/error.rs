use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Stable error codes, one per [`BuilderError`] variant.
///
/// All codes are SCREAMING_SNAKE_CASE and stable across versions.
pub mod codes {
    /// A module name could not be resolved.
    pub const RESOLUTION_ERROR: &str = "RESOLUTION_ERROR";
    /// A resolved module could not be read or translated.
    pub const LOAD_ERROR: &str = "LOAD_ERROR";
    /// Configuration is invalid or unreadable.
    pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
    /// A tree expression could not be parsed or evaluated.
    pub const EXPRESSION_ERROR: &str = "EXPRESSION_ERROR";
    /// The bundle could not be assembled in the requested format.
    pub const ASSEMBLY_ERROR: &str = "ASSEMBLY_ERROR";
    /// Output could not be written.
    pub const WRITE_ERROR: &str = "WRITE_ERROR";
}

/// Error type for every builder operation.
#[derive(Error, Debug)]
pub enum BuilderError {
    #[error("cannot resolve '{name}' from {}{}: {reason}", parent_label(.parent), chain_label(.chain))]
    Resolution {
        name: String,
        parent: Option<String>,
        chain: Vec<String>,
        reason: String,
    },

    #[error("failed to load '{name}' ({}) from {}{}: {source}", .path.display(), parent_label(.parent), chain_label(.chain))]
    Load {
        name: String,
        path: PathBuf,
        parent: Option<String>,
        chain: Vec<String>,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration{}: {message}", .path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("invalid tree expression '{expr}': {message}")]
    Expression { expr: String, message: String },

    #[error("cannot assemble bundle{}: {message}", .module.as_ref().map(|m| format!(" at '{m}'")).unwrap_or_default())]
    Assembly {
        module: Option<String>,
        message: String,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn parent_label(parent: &Option<String>) -> String {
    match parent {
        Some(p) => format!("'{p}'"),
        None => "<entry>".to_string(),
    }
}

fn chain_label(chain: &[String]) -> String {
    if chain.is_empty() {
        String::new()
    } else {
        format!(" (import chain: {})", chain.join(" -> "))
    }
}

impl BuilderError {
    pub fn resolution(
        name: impl Into<String>,
        parent: Option<&str>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Resolution {
            name: name.into(),
            parent: parent.map(str::to_string),
            chain: Vec::new(),
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    pub fn expression(expr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Expression {
            expr: expr.into(),
            message: message.into(),
        }
    }

    pub fn assembly(module: Option<&str>, message: impl Into<String>) -> Self {
        Self::Assembly {
            module: module.map(str::to_string),
            message: message.into(),
        }
    }

    /// Attach the import chain (entry first) to resolution and load errors.
    #[must_use]
    pub fn with_chain(mut self, new_chain: Vec<String>) -> Self {
        if let Self::Resolution { chain, .. } | Self::Load { chain, .. } = &mut self {
            *chain = new_chain;
        }
        self
    }

    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => codes::RESOLUTION_ERROR,
            Self::Load { .. } => codes::LOAD_ERROR,
            Self::Config { .. } => codes::CONFIG_ERROR,
            Self::Expression { .. } => codes::EXPRESSION_ERROR,
            Self::Assembly { .. } => codes::ASSEMBLY_ERROR,
            Self::Write { .. } => codes::WRITE_ERROR,
        }
    }

    /// The module the error is about, when there is one.
    #[must_use]
    pub fn module(&self) -> Option<&str> {
        match self {
            Self::Resolution { name, .. } | Self::Load { name, .. } => Some(name),
            Self::Assembly { module, .. } => module.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T, E = BuilderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_codes_are_screaming_snake_case() {
        let codes = [
            codes::RESOLUTION_ERROR,
            codes::LOAD_ERROR,
            codes::CONFIG_ERROR,
            codes::EXPRESSION_ERROR,
            codes::ASSEMBLY_ERROR,
            codes::WRITE_ERROR,
        ];

        for code in codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }

    #[test]
    fn test_resolution_message_names_parent_and_chain() {
        let err = BuilderError::resolution("./missing.js", Some("app/b.js"), "not found")
            .with_chain(vec!["app/a.js".to_string(), "app/b.js".to_string()]);
        let msg = err.to_string();
        assert!(msg.contains("'./missing.js'"));
        assert!(msg.contains("'app/b.js'"));
        assert!(msg.contains("app/a.js -> app/b.js"));
        assert_eq!(err.code(), codes::RESOLUTION_ERROR);
        assert_eq!(err.module(), Some("./missing.js"));
    }

    #[test]
    fn test_entry_resolution_has_no_parent() {
        let err = BuilderError::resolution("app/main.js", None, "not found");
        assert!(err.to_string().contains("<entry>"));
    }

    #[test]
    fn test_with_chain_ignores_other_variants() {
        let err = BuilderError::config("bad").with_chain(vec!["a".to_string()]);
        assert_eq!(err.to_string(), "invalid configuration: bad");
    }
}
