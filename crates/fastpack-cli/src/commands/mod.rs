//! Subcommand implementations.

pub mod bundle;
pub mod deferred;
pub mod trace;

use fastpack_core::{Builder, BuilderError};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::PathBuf;

/// Global options shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub cwd: PathBuf,
    pub config: Option<PathBuf>,
    pub json: bool,
}

impl Context {
    /// A builder rooted at the working directory, configured from `--config`.
    pub fn builder(&self) -> std::result::Result<Builder, BuilderError> {
        let builder = Builder::new(&self.cwd);
        if let Some(config) = &self.config {
            builder.load_config_sync(self.cwd.join(config))?;
        }
        Ok(builder)
    }
}

/// Error object in JSON output.
#[derive(Debug, Serialize)]
pub struct ErrorJson {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl From<&BuilderError> for ErrorJson {
    fn from(e: &BuilderError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
            module: e.module().map(str::to_string),
        }
    }
}

/// Runtime for one command.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()
}

/// Print `value` as one line of JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value).into_diagnostic()?);
    Ok(())
}

/// Report a failed command and exit with status 1.
pub fn fail<T: Serialize>(json: bool, report: &T, error: &BuilderError) -> ! {
    if json {
        if let Ok(line) = serde_json::to_string(report) {
            println!("{line}");
        }
    } else {
        eprintln!("error: {error}");
    }
    std::process::exit(1);
}
