//! Thin `run()` wrappers the binary's subcommands dispatch to. Each one
//! parses its own `clap::Args` and calls straight into the library.

pub mod check;
pub mod fetch;
pub mod init;
pub mod limits;
pub mod publish;
