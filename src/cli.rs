use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::GomError;

#[derive(Parser, Debug)]
#[command(
    name = "gom",
    about = "Run commands and transfer files in VMware guests via vSphere guest operations"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "gom.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command inside the guest and print its output
    Exec {
        /// Shell to use: auto, linux, cmd or powershell (overrides config)
        #[arg(long)]
        shell: Option<String>,

        /// Timeout in seconds (overrides config)
        #[arg(long)]
        timeout: Option<u64>,

        /// Command to run, joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Copy a file to or from the guest (prefix the guest path with ':')
    Cp { src: String, dst: String },

    /// Check whether a path exists in the guest
    Exists { path: String },

    /// Delete a file in the guest
    Rm { path: String },

    /// Delete a directory in the guest
    Rmdir {
        path: String,

        /// Delete only if empty
        #[arg(long)]
        no_recursive: bool,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub enum CopyDirection {
    Upload { local: PathBuf, guest: String },
    Download { guest: String, local: PathBuf },
}

/// Classify `cp` arguments: exactly one side must carry the `:` guest prefix.
pub fn parse_copy_args(src: &str, dst: &str) -> Result<CopyDirection, GomError> {
    match (src.strip_prefix(':'), dst.strip_prefix(':')) {
        (None, Some(guest)) => Ok(CopyDirection::Upload {
            local: PathBuf::from(src),
            guest: guest.to_string(),
        }),
        (Some(guest), None) => Ok(CopyDirection::Download {
            guest: guest.to_string(),
            local: PathBuf::from(dst),
        }),
        _ => Err(GomError::Validation {
            message: "exactly one of src/dst must be a guest path (prefix it with ':')".into(),
        }),
    }
}
