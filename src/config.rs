//! Environment configuration for the employee service.

use crate::client::{ClientOptions, DEFAULT_OPERATION_TIMEOUT_MS};
use crate::error::{Result, StoreError};

pub const DEFAULT_MONGO_URI: &str = "mongodb://localhost:27017/learn";
pub const DEFAULT_DATABASE: &str = "learn";
pub const DEFAULT_COLLECTION: &str = "learn";
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Runtime settings for the service binary.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub mongo_uri: String,
    /// Overrides the URI's `maxPoolSize` when set.
    pub max_pool_size: Option<u32>,
    /// `0` disables the per-operation deadline.
    pub operation_timeout_ms: u64,
    /// Overrides the database named in the URI path when set.
    pub database: Option<String>,
    pub collection: String,
    pub http_host: String,
    pub http_port: u16,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mongo_uri: DEFAULT_MONGO_URI.to_string(),
            max_pool_size: None,
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            database: None,
            collection: DEFAULT_COLLECTION.to_string(),
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Settings::default();

        Ok(Self {
            mongo_uri: get("MONGO_URI").unwrap_or(defaults.mongo_uri),
            max_pool_size: parse_var("MONGO_MAX_POOL_SIZE", get("MONGO_MAX_POOL_SIZE"))?,
            operation_timeout_ms: parse_var(
                "STORE_OPERATION_TIMEOUT_MS",
                get("STORE_OPERATION_TIMEOUT_MS"),
            )?
            .unwrap_or(defaults.operation_timeout_ms),
            collection: get("EMPLOYEE_COLLECTION").unwrap_or(defaults.collection),
            http_host: get("HTTP_HOST").unwrap_or(defaults.http_host),
            http_port: match get("HTTP_PORT") {
                Some(port) => parse_var("HTTP_PORT", Some(port))?,
                None => parse_var("GOLANG_PORT", get("GOLANG_PORT"))?,
            }
            .unwrap_or(defaults.http_port),
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
            database: get("EMPLOYEE_DATABASE"),
        })
    }

    /// Whether the URI selects the in-process backend.
    pub fn uses_memory_backend(&self) -> bool {
        self.mongo_uri.starts_with("memory://")
    }

    /// Overrides to apply on top of what the URI configures.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            max_pool_size: self.max_pool_size,
            operation_timeout_ms: Some(self.operation_timeout_ms),
            ..ClientOptions::default()
        }
    }

    /// Database the service works in: `EMPLOYEE_DATABASE`, else the one
    /// named by the connection string, else [`DEFAULT_DATABASE`].
    pub fn database_name(&self, uri_default: Option<&str>) -> String {
        self.database
            .as_deref()
            .or(uri_default)
            .unwrap_or(DEFAULT_DATABASE)
            .to_string()
    }

    /// `host:port` to bind the HTTP listener to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
    match value {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            StoreError::invalid_argument(format!("{} has an invalid value: {:?}", key, raw))
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(settings(&[]).unwrap(), Settings::default());
    }

    #[test]
    fn test_database_name_precedence() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.database_name(Some("hr")), "hr");
        assert_eq!(s.database_name(None), "learn");

        let s = settings(&[("EMPLOYEE_DATABASE", "payroll")]).unwrap();
        assert_eq!(s.database_name(Some("hr")), "payroll");
    }

    #[test]
    fn test_port_precedence() {
        let s = settings(&[("GOLANG_PORT", "9000")]).unwrap();
        assert_eq!(s.http_port, 9000);

        let s = settings(&[("GOLANG_PORT", "9000"), ("HTTP_PORT", "9100")]).unwrap();
        assert_eq!(s.http_port, 9100);
        assert_eq!(s.bind_address(), "127.0.0.1:9100");
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = settings(&[("MONGO_MAX_POOL_SIZE", "ten")]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        let err = settings(&[("HTTP_PORT", "70000")]).unwrap_err();
        assert!(err.to_string().contains("HTTP_PORT"));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let s = settings(&[("EMPLOYEE_COLLECTION", "  "), ("LOG_LEVEL", "")]).unwrap();
        assert_eq!(s.collection, "learn");
        assert_eq!(s.log_level, "info");
    }

    #[test]
    fn test_client_options() {
        let s = settings(&[
            ("MONGO_URI", "mongodb://localhost:27017/learn?connectTimeoutMS=500"),
            ("MONGO_MAX_POOL_SIZE", "4"),
            ("STORE_OPERATION_TIMEOUT_MS", "0"),
        ])
        .unwrap();
        let options = s.client_options();
        assert_eq!(options.max_pool_size, Some(4));
        assert_eq!(options.operation_timeout(), None);
        // URI options are left to the driver.
        assert_eq!(options.connect_timeout_ms, None);
        assert_eq!(options.app_name, None);
    }

    #[test]
    fn test_pool_size_unset_without_variable() {
        let options = settings(&[]).unwrap().client_options();
        assert_eq!(options.max_pool_size, None);
        assert_eq!(options.operation_timeout_ms, Some(DEFAULT_OPERATION_TIMEOUT_MS));
    }

    #[test]
    fn test_memory_uri() {
        let s = settings(&[("MONGO_URI", "memory://local/staff")]).unwrap();
        assert!(s.uses_memory_backend());
        assert_eq!(s.database_name(None), "learn");
    }
}
