//! Flutter Version Switcher library
//!
//! Fetches the Flutter release manifest, downloads and unpacks SDK archives
//! into a local download directory, and points the user's shell at one of
//! them. This library backs the `fvs` CLI.

pub mod commands;
pub mod core;
pub mod error;
pub mod utils;
