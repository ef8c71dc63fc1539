#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for fastpack.
//!
//! Pure helpers with no logging dependency. Logging is initialized by the CLI.

pub mod fs;
pub mod hash;
