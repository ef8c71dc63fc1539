#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fastpack")]
#[command(author, version, about = "Trace and bundle JavaScript module graphs", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Loader configuration file (JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Bundle a tree expression for a module loader
    Bundle(commands::bundle::BundleArgs),

    /// Build a self-executing bundle that needs no loader
    Build(commands::bundle::BundleArgs),

    /// Print the modules of a tree expression
    Trace {
        /// Tree expression, e.g. "app/main.js - app/vendor.js"
        expression: String,
    },

    /// List dynamic imports of a tree expression
    Deferred {
        /// Tree expression
        expression: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    logging::init(cli.verbose, cli.json);

    let ctx = commands::Context {
        cwd,
        config: cli.config,
        json: cli.json,
    };
    match cli.command {
        Commands::Bundle(args) => commands::bundle::run(&ctx, args, false),
        Commands::Build(args) => commands::bundle::run(&ctx, args, true),
        Commands::Trace { expression } => commands::trace::run(&ctx, &expression),
        Commands::Deferred { expression } => commands::deferred::run(&ctx, &expression),
    }
}
