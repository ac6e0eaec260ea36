use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Argon2id cost and pepper settings for stored credentials.
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    pub pepper: Option<String>,
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            pepper: None,
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub busy_timeout: Duration,
    pub log_level: String,
    pub password: PasswordConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            log_level: "info".to_string(),
            password: PasswordConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment. Call
    /// `dotenv::dotenv()` first if a `.env` file should be honoured.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let workspace = lookup("SRMS_WORKSPACE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let log_level = lookup("SRMS_LOG_LEVEL")
            .or_else(|| lookup("LOG_LEVEL"))
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.log_level);

        let busy_timeout = parse_or(&lookup, "SRMS_BUSY_TIMEOUT_MS", DEFAULT_BUSY_TIMEOUT_MS);

        let password = PasswordConfig {
            pepper: lookup("SRMS_PASSWORD_PEPPER").filter(|v| !v.is_empty()),
            memory_kib: parse_or(
                &lookup,
                "SRMS_PASSWORD_MEMORY_KIB",
                defaults.password.memory_kib,
            ),
            iterations: parse_or(
                &lookup,
                "SRMS_PASSWORD_ITERATIONS",
                defaults.password.iterations,
            ),
        };

        Self {
            workspace,
            busy_timeout: Duration::from_millis(busy_timeout),
            log_level,
            password,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, fallback = %default, "ignoring invalid setting");
                default
            }
        },
        None => default,
    }
}
