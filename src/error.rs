use miette::Diagnostic;
use thiserror::Error;

use crate::vim::VimFault;

#[derive(Debug, Error, Diagnostic)]
pub enum GomError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("could not find VM for '{host}' (check power status if searched via IP)")]
    VmNotFound { host: String },

    #[error("unsupported shell type '{shell}'")]
    UnsupportedShell { shell: String },

    #[error("error executing command '{command}': exit code {exit_code}, stderr: {stderr}")]
    CommandExecution {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("timeout waiting for guest process {pid} to exit after {elapsed_s:.1} seconds")]
    ProcessTimeout { pid: i64, elapsed_s: f64 },

    #[error(
        "downloaded file {path} has different size than reported ({actual} bytes instead of {expected})"
    )]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("guest operations fault")]
    Fault {
        #[from]
        #[source]
        fault: VimFault,
    },

    #[error("HTTP error during {context}")]
    Http {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}
