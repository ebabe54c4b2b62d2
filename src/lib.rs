//
// lib.rs
// Dicom-Editor-rs
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//
// Thales Matheus Mendonça Santos - November 2025

// Public surface of the library: each module mirrors a CLI verb or shared utility.
pub mod anonymize;
pub mod atomic;
pub mod batch;
pub mod cli;
pub mod config;
pub mod dicom_access;
pub mod elements;
pub mod error;
pub mod fix_vr;
pub mod integer_table;
pub mod lookup;
pub mod models;
pub mod patient_id;
pub mod preamble;
pub mod properties;
pub mod script;
pub mod transcode;

pub use cli::{run as run_cli, Cli, Commands};
pub use error::{EditorError, Result};
