use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const BACKEND_JSON: &str = "backend.json";

const DEFAULT_AUTH_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_AUTH_MAX_RETRIES: u8 = 3;
const DEFAULT_AUTH_RETRY_BACKOFF_MS: u64 = 1_000;
const DEFAULT_NOTICE_SECONDS: u64 = 5;

const API_KEY_ENV: &[&str] = &["MISSION_CONTROL_API_KEY", "FIREBASE_API_KEY"];
const DATABASE_URL_ENV: &[&str] = &["MISSION_CONTROL_DATABASE_URL", "FIREBASE_DATABASE_URL"];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub timezone: Tz,
    pub log_level: String,
    pub notice_duration: Duration,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub api_key: Option<String>,
    pub database_url: Option<String>,
    pub auth_timeout: Duration,
    pub auth_max_retries: u8,
    pub auth_retry_backoff: Duration,
}

impl BackendConfig {
    /// Returns `(api_key, database_url)` or explains which setting is missing.
    pub fn require_endpoints(&self) -> Result<(String, String), InfraError> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            InfraError::InvalidConfig(format!(
                "missing backend api key (set apiKey in {BACKEND_JSON} or one of: {})",
                API_KEY_ENV.join(", ")
            ))
        })?;
        let database_url = self.database_url.clone().ok_or_else(|| {
            InfraError::InvalidConfig(format!(
                "missing realtime database url (set databaseUrl in {BACKEND_JSON} or one of: {})",
                DATABASE_URL_ENV.join(", ")
            ))
        })?;
        Ok((api_key, database_url))
    }
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub app: AppConfig,
    pub backend: BackendConfig,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "Mission Control",
                "timezone": "UTC",
                "logLevel": "info",
                "noticeSeconds": DEFAULT_NOTICE_SECONDS
            }),
        ),
        (
            BACKEND_JSON,
            serde_json::json!({
                "schema": 1,
                "apiKey": null,
                "databaseUrl": null,
                "authTimeoutSeconds": DEFAULT_AUTH_TIMEOUT_SECONDS,
                "authMaxRetries": DEFAULT_AUTH_MAX_RETRIES,
                "authRetryBackoffMs": DEFAULT_AUTH_RETRY_BACKOFF_MS
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    load_configs_with_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_configs_with_lookup<F>(config_dir: &Path, lookup: F) -> Result<ConfigBundle, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let app = read_config(&config_dir.join(APP_JSON))?;
    let backend = read_config(&config_dir.join(BACKEND_JSON))?;
    Ok(ConfigBundle {
        app: parse_app_config(&app)?,
        backend: parse_backend_config(&backend, &lookup)?,
    })
}

fn parse_app_config(app: &serde_json::Value) -> Result<AppConfig, InfraError> {
    let timezone_name = read_str(app, "timezone").unwrap_or_else(|| "UTC".to_string());
    let timezone = timezone_name.parse::<Tz>().map_err(|error| {
        InfraError::InvalidConfig(format!("invalid timezone '{timezone_name}': {error}"))
    })?;

    Ok(AppConfig {
        app_name: read_str(app, "appName").unwrap_or_else(|| "Mission Control".to_string()),
        timezone,
        log_level: read_str(app, "logLevel").unwrap_or_else(|| "info".to_string()),
        notice_duration: Duration::from_secs(
            read_u64(app, "noticeSeconds").unwrap_or(DEFAULT_NOTICE_SECONDS),
        ),
    })
}

fn parse_backend_config<F>(backend: &serde_json::Value, lookup: &F) -> Result<BackendConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let auth_max_retries = read_u64(backend, "authMaxRetries")
        .unwrap_or(u64::from(DEFAULT_AUTH_MAX_RETRIES));
    let auth_max_retries = u8::try_from(auth_max_retries).map_err(|_| {
        InfraError::InvalidConfig(format!("authMaxRetries out of range: {auth_max_retries}"))
    })?;
    let auth_timeout_seconds =
        read_u64(backend, "authTimeoutSeconds").unwrap_or(DEFAULT_AUTH_TIMEOUT_SECONDS);
    if auth_timeout_seconds == 0 {
        return Err(InfraError::InvalidConfig(
            "authTimeoutSeconds must be > 0".to_string(),
        ));
    }

    Ok(BackendConfig {
        api_key: optional_lookup_value(lookup, API_KEY_ENV).or_else(|| read_str(backend, "apiKey")),
        database_url: optional_lookup_value(lookup, DATABASE_URL_ENV)
            .or_else(|| read_str(backend, "databaseUrl"))
            .map(|url| url.trim_end_matches('/').to_string()),
        auth_timeout: Duration::from_secs(auth_timeout_seconds),
        auth_max_retries,
        auth_retry_backoff: Duration::from_millis(
            read_u64(backend, "authRetryBackoffMs").unwrap_or(DEFAULT_AUTH_RETRY_BACKOFF_MS),
        ),
    })
}

fn read_str(config: &serde_json::Value, key: &str) -> Option<String> {
    config
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn read_u64(config: &serde_json::Value, key: &str) -> Option<u64> {
    config.get(key).and_then(serde_json::Value::as_u64)
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
