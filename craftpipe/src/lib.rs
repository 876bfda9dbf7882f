//! Craftpipe resolves, downloads and installs everything a moddable game client needs
//! to be launched: version manifests with platform rules, assets, libraries, natives
//! and mod loader post-processing steps.
//!
//! The [`install::Installer`] is the entry point that wires all the stages together,
//! but each stage is usable on its own:
//!
//! - [`manifest`] parses version manifests and evaluates their rules;
//! - [`artifact`] turns a resolved manifest into a flat list of download items;
//! - [`download`] fetches items with integrity checks and bounded concurrency;
//! - [`progress`] aggregates weighted progress streams into a single total;
//! - [`natives`] remaps native libraries to architecture-specific builds;
//! - [`task`] runs ordinal-staged tasks with cooperative cancellation;
//! - [`processor`] runs the post-processing steps of a mod loader installer.

#![deny(unsafe_op_in_unsafe_fn)]

mod path;
mod http;
mod tokio;
mod serde;

pub mod maven;

pub mod manifest;
pub mod artifact;
pub mod download;
pub mod progress;
pub mod natives;
pub mod task;
pub mod processor;

pub mod install;
