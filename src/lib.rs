#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod bundle;
pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod process;
pub mod shell;
pub mod soap;
pub mod transfer;
pub mod vim;

#[cfg(test)]
pub(crate) mod testutil;
