//! # sorng-sftp-cli
//!
//! Remote file access for SortOfRemoteNG by driving the interactive
//! OpenSSH `sftp` client on a pseudo-terminal.
//!
//! The remote side answers in free-form terminal text, so the crate
//! serializes commands one at a time, delimits replies by the `sftp>`
//! prompt, and decodes listings, `pwd` and error lines into typed results.

pub mod sftp_cli;

pub use sftp_cli::*;
