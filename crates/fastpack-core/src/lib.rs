#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]

//! fastpack core: trace module graphs, combine them as trees and assemble
//! bundles.
//!
//! The entry point is [`Builder`]. Loading, resolution, minification,
//! source map encoding and output are traits so hosts can swap them.

pub mod assemble;
pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod expr;
pub mod loader;
pub mod minify;
pub mod output;
pub mod resolve;
pub mod scan;
pub mod sourcemap;
pub mod trace;
pub mod tree;

pub use assemble::OutputFormat;
pub use builder::{Builder, BundleOptions, BundleOutput, BundleSource};
pub use cache::{CacheStats, LoadCache};
pub use config::{BuilderConfig, MetaConfig, PackageConfig};
pub use error::{codes, BuilderError, Result};
pub use expr::TreeExpr;
pub use loader::{
    FetchHook, FsLoader, LoadRequest, LoaderPlugin, MemoryLoader, PluginOutput, PluginRegistry,
    SourceLoader,
};
pub use minify::{LineMinifier, Minifier, MinifyOptions, MinifyOutput};
pub use output::{FileWriter, FsWriter, MemoryWriter};
pub use resolve::{ConfigResolver, Resolve, ResolvedModule};
pub use sourcemap::{SourceMapEncoder, VlqEncoder};
pub use trace::{TraceEntry, Tracer};
pub use tree::{
    add_trees, intersect_trees, subtract_trees, DeferredImport, ModuleFormat, ModuleTree,
    TreeMetadata, TreeNode,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
