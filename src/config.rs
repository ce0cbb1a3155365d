use std::path::Path;
use std::str::FromStr;

use facet::Facet;

use crate::error::GomError;
use crate::shell::ShellType;

#[derive(Debug, Clone, Facet)]
pub struct Config {
    #[facet(default)]
    pub vcenter: VcenterConfig,
    #[facet(default)]
    pub guest: GuestConfig,
    #[facet(default)]
    pub exec: ExecConfig,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct VcenterConfig {
    /// vCenter endpoint host, e.g. "vcenter.example.com".
    #[facet(default)]
    pub server: String,
    #[facet(default)]
    pub username: String,
    #[facet(default)]
    pub password: String,
    /// Disable TLS certificate verification. Never a silent default:
    /// enabling this is logged loudly at connect time.
    #[facet(default)]
    pub insecure: bool,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct GuestConfig {
    /// VM identifier: IPv4 address, instance UUID, inventory path, or DNS name.
    #[facet(default)]
    pub host: String,
    /// In-guest username.
    #[facet(default)]
    pub username: String,
    /// In-guest password.
    #[facet(default)]
    pub password: String,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct ExecConfig {
    #[facet(default = "auto")]
    pub shell: String,
    #[facet(default = 60)]
    pub timeout_s: u64,
    #[facet(default = true)]
    pub cleanup: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            shell: "auto".into(),
            timeout_s: 60,
            cleanup: true,
        }
    }
}

impl Config {
    /// Parsed `exec.shell`, validated against the closed shell table.
    pub fn shell_type(&self) -> Result<ShellType, GomError> {
        ShellType::from_str(&self.exec.shell)
    }
}

// ── env fallbacks ─────────────────────────────────────────
//
// The standard vSphere client environment variables fill in vcenter fields
// the TOML leaves empty, so credentials can stay out of the file.

fn env_fallback(field: &mut String, var: &str) {
    if field.is_empty()
        && let Ok(value) = std::env::var(var)
    {
        *field = value;
    }
}

fn apply_env_defaults(config: &mut Config) {
    env_fallback(&mut config.vcenter.server, "VI_SERVER");
    env_fallback(&mut config.vcenter.username, "VI_USERNAME");
    env_fallback(&mut config.vcenter.password, "VI_PASSWORD");
    env_fallback(&mut config.guest.host, "VI_VM");
}

// ── validation ────────────────────────────────────────────

fn validate_config(config: &Config) -> Result<(), GomError> {
    let required = [
        (&config.vcenter.server, "vcenter.server"),
        (&config.vcenter.username, "vcenter.username"),
        (&config.vcenter.password, "vcenter.password"),
        (&config.guest.host, "guest.host"),
        (&config.guest.username, "guest.username"),
        (&config.guest.password, "guest.password"),
    ];
    for (value, name) in required {
        if value.is_empty() {
            return Err(GomError::Validation {
                message: format!("{name} must not be empty"),
            });
        }
    }

    if config.exec.timeout_s == 0 {
        return Err(GomError::Validation {
            message: "exec.timeout_s must be at least 1".into(),
        });
    }

    // Unknown shell identifiers fail here rather than mid-run.
    config.shell_type()?;

    Ok(())
}

// ── public API ────────────────────────────────────────────

pub fn load_config(path: &Path) -> Result<Config, GomError> {
    let contents = std::fs::read_to_string(path).map_err(|source| GomError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    let mut config: Config = facet_toml::from_str(&contents).map_err(|e| GomError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    apply_env_defaults(&mut config);
    validate_config(&config)?;

    Ok(config)
}
