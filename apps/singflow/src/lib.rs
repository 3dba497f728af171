//! # singflow
//!
//! Command-line front-end of the singflow recipe runner.
//!
//! The binary in `main.rs` only sets up logging and maps errors to exit codes;
//! everything else lives in [`cli`] so it can be tested without a process.

pub mod cli;
