use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::inference::validation::UploadLimits;

const DEFAULT_MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;
const DEFAULT_MODEL_PATH: &str = "models/vegetable_classifier.pt";
const DEFAULT_ALLOWED_EXTENSIONS: &str = "jpg,jpeg,png,gif";
const DEFAULT_DEV_CORS_ORIGINS: &str =
    "http://localhost:3000,http://127.0.0.1:3000,https://mcd-scanveg-ai.pages.dev";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("Unknown APP_ENV: {0:?} (expected \"development\" or \"production\")")]
    UnknownEnvironment(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub secret_key: Option<String>,
    pub max_image_size: usize,
    pub model_path: PathBuf,
    pub model_url: Option<String>,
    pub model_outputs_logits: bool,
    pub allowed_extensions: BTreeSet<String>,
    pub host: String,
    pub port: u16,
    pub cors_origins: CorsOrigins,
    pub workers: usize,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let environment = match get("APP_ENV").as_deref() {
            None | Some("development") | Some("default") => Environment::Development,
            Some("production") => Environment::Production,
            Some(other) => return Err(ConfigError::UnknownEnvironment(other.to_string())),
        };

        let (default_host, default_port, default_cors) = match environment {
            Environment::Development => ("127.0.0.1", 5000, DEFAULT_DEV_CORS_ORIGINS),
            Environment::Production => ("0.0.0.0", 10000, "*"),
        };

        let max_image_size =
            parse_or("MAX_IMAGE_SIZE", get("MAX_IMAGE_SIZE"), DEFAULT_MAX_IMAGE_SIZE)?;
        let port = parse_or("PORT", get("PORT"), default_port)?;
        let workers: usize = parse_or("WEB_CONCURRENCY", get("WEB_CONCURRENCY"), 2)?;
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WEB_CONCURRENCY",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        let timeout_secs: u64 =
            parse_or("REQUEST_TIMEOUT_SECS", get("REQUEST_TIMEOUT_SECS"), 120)?;
        let model_outputs_logits =
            parse_bool("MODEL_OUTPUTS_LOGITS", get("MODEL_OUTPUTS_LOGITS"), true)?;

        let allowed_extensions = parse_list(
            get("ALLOWED_EXTENSIONS")
                .as_deref()
                .unwrap_or(DEFAULT_ALLOWED_EXTENSIONS),
        )
        .into_iter()
        .map(|ext| ext.trim_start_matches('.').to_lowercase())
        .collect();

        let cors_raw = get("CORS_ORIGINS").unwrap_or_else(|| default_cors.to_string());
        let cors_list = parse_list(&cors_raw);
        let cors_origins = if cors_list.iter().any(|o| o == "*") {
            CorsOrigins::Any
        } else {
            for origin in &cors_list {
                if let Err(e) = origin.parse::<actix_web::http::Uri>() {
                    return Err(ConfigError::InvalidValue {
                        key: "CORS_ORIGINS",
                        value: origin.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            CorsOrigins::List(cors_list)
        };

        Ok(Self {
            environment,
            secret_key: get("SECRET_KEY"),
            max_image_size,
            model_path: PathBuf::from(
                get("MODEL_PATH").unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
            ),
            model_url: get("MODEL_URL"),
            model_outputs_logits,
            allowed_extensions,
            host: get("HOST").unwrap_or_else(|| default_host.to_string()),
            port,
            cors_origins,
            workers,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits::new(self.allowed_extensions.iter().cloned(), self.max_image_size)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_bool(key: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(str::to_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(_) => Err(ConfigError::InvalidValue {
            key,
            value: raw.unwrap_or_default(),
            reason: "expected a boolean".into(),
        }),
    }
}
