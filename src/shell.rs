//! OS family detection and shell invocation profiles.

use std::fmt;
use std::str::FromStr;

use crate::error::GomError;
use crate::vim::GuestInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Linux,
    Windows,
}

/// Classify the guest OS family from tools-reported metadata.
///
/// Prefers the tools-reported family string; when tools are not initialized
/// or missing, falls back to a `win` prefix match on the configured guest id.
/// The result is treated as constant for the session's lifetime — a guest
/// whose tools state changes mid-session is not re-detected.
pub fn detect_family(info: &GuestInfo) -> OsFamily {
    if let Some(family) = &info.guest_family {
        return if family.contains("windows") {
            OsFamily::Windows
        } else {
            OsFamily::Linux
        };
    }

    match &info.guest_id {
        Some(id) if id.to_ascii_lowercase().starts_with("win") => OsFamily::Windows,
        _ => OsFamily::Linux,
    }
}

/// Invocation recipe for one shell: the program to start, the suffix for the
/// staged script file, and an argument template with `{script}`, `{out}` and
/// `{err}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct ShellProfile {
    pub program: &'static str,
    pub suffix: &'static str,
    pub args: &'static str,
}

impl ShellProfile {
    /// Substitute the three bundle paths into the argument template.
    pub fn compose_args(&self, script: &str, out: &str, err: &str) -> String {
        self.args
            .replace("{script}", script)
            .replace("{out}", out)
            .replace("{err}", err)
    }
}

const LINUX: ShellProfile = ShellProfile {
    program: "/bin/sh",
    suffix: ".sh",
    args: r#"-c ". {script}" > {out} 2> {err}"#,
};

const CMD: ShellProfile = ShellProfile {
    program: "cmd.exe",
    suffix: ".cmd",
    args: r#"/c "{script}" > {out} 2> {err}"#,
};

// Out-File -Encoding ASCII still emits UTF-16LE with a BOM in practice; the
// executor repairs that downstream (exec.rs).
const POWERSHELL: ShellProfile = ShellProfile {
    program: r"C:\Windows\System32\WindowsPowershell\v1.0\powershell.exe",
    suffix: ".ps1",
    args: r"-ExecutionPolicy Bypass -File {script} 2> {err} | Out-File -FilePath {out} -Encoding ASCII",
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShellType {
    #[default]
    Auto,
    Linux,
    Cmd,
    Powershell,
}

impl ShellType {
    /// Resolve the auto sentinel against the detected OS family.
    pub fn resolve(self, family: OsFamily) -> ShellType {
        match self {
            ShellType::Auto => match family {
                OsFamily::Linux => ShellType::Linux,
                OsFamily::Windows => ShellType::Powershell,
            },
            concrete => concrete,
        }
    }

    /// Invocation recipe for a concrete shell. `Auto` must be resolved first.
    pub fn profile(self) -> ShellProfile {
        match self {
            ShellType::Linux => LINUX,
            ShellType::Cmd => CMD,
            ShellType::Powershell => POWERSHELL,
            ShellType::Auto => unreachable!("auto shell must be resolved before use"),
        }
    }
}

impl FromStr for ShellType {
    type Err = GomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ShellType::Auto),
            "linux" => Ok(ShellType::Linux),
            "cmd" => Ok(ShellType::Cmd),
            "powershell" => Ok(ShellType::Powershell),
            other => Err(GomError::UnsupportedShell {
                shell: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ShellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShellType::Auto => "auto",
            ShellType::Linux => "linux",
            ShellType::Cmd => "cmd",
            ShellType::Powershell => "powershell",
        };
        f.write_str(name)
    }
}
