use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub telemetry: TelemetryConfig,
    pub mqtt: MqttConfig,
    pub scheduler: SchedulerConfig,
    pub trash: TrashConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// From `APP_ENV`; anything unrecognised is development
    pub fn from_env() -> Self {
        match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        }
    }

    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub fn default_log_filter(self) -> &'static str {
        match self {
            Environment::Development => "info,indcloud_api=debug",
            Environment::Staging | Environment::Production => "info",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database name swapped into the DATABASE_URL path
    pub name: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_rate_limiting: bool,
    pub rate_limit_requests: u32,
    pub strict_rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub max_request_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Create unknown devices on first telemetry instead of rejecting it
    pub auto_provision: bool,
    pub default_organization: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub device_auth_required: bool,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub global_rules_secs: u64,
    pub device_health_secs: u64,
    pub trash_purge_secs: u64,
    pub data_retention_secs: u64,
    pub rate_limit_cleanup_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashConfig {
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Root directory for archives when a policy has no explicit path
    pub archive_dir: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = Environment::from_env();

        let preset = match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        };

        let merged = match env::var("INDCLOUD_CONFIG") {
            Ok(path) => match std::fs::read_to_string(&path) {
                Ok(contents) => match preset.clone().merge_yaml(&contents) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring config file {}: {}", path, e);
                        preset
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read config file {}: {}", path, e);
                    preset
                }
            },
            Err(_) => preset,
        };

        merged.with_env_overrides()
    }

    /// Overlay a (possibly partial) YAML document on top of this config.
    pub fn merge_yaml(self, contents: &str) -> Result<Self, serde_yaml::Error> {
        let mut base = serde_yaml::to_value(&self)?;
        let overlay: serde_yaml::Value = serde_yaml::from_str(contents)?;
        merge_values(&mut base, overlay);
        serde_yaml::from_value(base)
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_NAME") {
            self.database.name = v;
        }
        override_from_env("DATABASE_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_from_env("DATABASE_CONNECTION_TIMEOUT", &mut self.database.connection_timeout);
        override_from_env("DATABASE_RUN_MIGRATIONS", &mut self.database.run_migrations);

        // API overrides
        if let Some(port) = env::var("API_PORT")
            .ok()
            .or_else(|| env::var("PORT").ok())
            .and_then(|s| s.parse::<u16>().ok())
        {
            self.api.port = port;
        }
        override_from_env("API_ENABLE_RATE_LIMITING", &mut self.api.enable_rate_limiting);
        override_from_env("API_RATE_LIMIT_REQUESTS", &mut self.api.rate_limit_requests);
        override_from_env("API_STRICT_RATE_LIMIT_REQUESTS", &mut self.api.strict_rate_limit_requests);
        override_from_env("API_RATE_LIMIT_WINDOW_SECS", &mut self.api.rate_limit_window_secs);
        override_from_env("API_MAX_REQUEST_SIZE_BYTES", &mut self.api.max_request_size_bytes);

        // Security overrides
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        override_from_env("SECURITY_JWT_EXPIRY_HOURS", &mut self.security.jwt_expiry_hours);
        override_from_env("SECURITY_ENABLE_CORS", &mut self.security.enable_cors);
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        // Telemetry overrides
        override_from_env("TELEMETRY_AUTO_PROVISION", &mut self.telemetry.auto_provision);
        if let Ok(v) = env::var("TELEMETRY_DEFAULT_ORGANIZATION") {
            self.telemetry.default_organization = v;
        }

        // MQTT overrides
        override_from_env("MQTT_ENABLED", &mut self.mqtt.enabled);
        if let Ok(v) = env::var("MQTT_HOST") {
            self.mqtt.host = v;
        }
        override_from_env("MQTT_PORT", &mut self.mqtt.port);
        if let Ok(v) = env::var("MQTT_CLIENT_ID") {
            self.mqtt.client_id = v;
        }
        if let Ok(v) = env::var("MQTT_TOPIC") {
            self.mqtt.topic = v;
        }
        override_from_env("MQTT_DEVICE_AUTH_REQUIRED", &mut self.mqtt.device_auth_required);
        override_from_env("MQTT_KEEP_ALIVE_SECS", &mut self.mqtt.keep_alive_secs);

        // Scheduler overrides
        override_from_env("SCHEDULER_ENABLED", &mut self.scheduler.enabled);
        override_from_env("SCHEDULER_GLOBAL_RULES_SECS", &mut self.scheduler.global_rules_secs);
        override_from_env("SCHEDULER_DEVICE_HEALTH_SECS", &mut self.scheduler.device_health_secs);
        override_from_env("SCHEDULER_TRASH_PURGE_SECS", &mut self.scheduler.trash_purge_secs);
        override_from_env("SCHEDULER_DATA_RETENTION_SECS", &mut self.scheduler.data_retention_secs);
        override_from_env("SCHEDULER_RATE_LIMIT_CLEANUP_SECS", &mut self.scheduler.rate_limit_cleanup_secs);

        // Trash and retention overrides
        override_from_env("TRASH_RETENTION_DAYS", &mut self.trash.retention_days);
        if let Ok(v) = env::var("RETENTION_ARCHIVE_DIR") {
            self.retention.archive_dir = v;
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                name: "indcloud".to_string(),
                max_connections: 10,
                connection_timeout: 30,
                run_migrations: true,
            },
            api: ApiConfig {
                port: 8080,
                enable_rate_limiting: false,
                rate_limit_requests: 60,
                strict_rate_limit_requests: 20,
                rate_limit_window_secs: 60,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
            },
            security: SecurityConfig {
                jwt_secret: "indcloud-development-secret".to_string(),
                jwt_expiry_hours: 24 * 7,
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
            },
            telemetry: TelemetryConfig {
                auto_provision: true,
                default_organization: "Default Organization".to_string(),
            },
            mqtt: MqttConfig {
                enabled: false,
                host: "localhost".to_string(),
                port: 1883,
                client_id: "indcloud-api-dev".to_string(),
                topic: "indcloud/devices/+/telemetry".to_string(),
                device_auth_required: false,
                keep_alive_secs: 30,
            },
            scheduler: SchedulerConfig::standard(),
            trash: TrashConfig { retention_days: 30 },
            retention: RetentionConfig {
                archive_dir: "./archives".to_string(),
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                name: "indcloud".to_string(),
                max_connections: 20,
                connection_timeout: 10,
                run_migrations: true,
            },
            api: ApiConfig {
                port: 8080,
                enable_rate_limiting: true,
                rate_limit_requests: 60,
                strict_rate_limit_requests: 20,
                rate_limit_window_secs: 60,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
                enable_cors: true,
                cors_origins: vec!["https://staging.indcloud.io".to_string()],
            },
            telemetry: TelemetryConfig {
                auto_provision: true,
                default_organization: "Default Organization".to_string(),
            },
            mqtt: MqttConfig {
                enabled: true,
                host: "mqtt".to_string(),
                port: 1883,
                client_id: "indcloud-api-staging".to_string(),
                topic: "indcloud/devices/+/telemetry".to_string(),
                device_auth_required: true,
                keep_alive_secs: 30,
            },
            scheduler: SchedulerConfig::standard(),
            trash: TrashConfig { retention_days: 30 },
            retention: RetentionConfig {
                archive_dir: "/var/lib/indcloud/archives".to_string(),
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                name: "indcloud".to_string(),
                max_connections: 50,
                connection_timeout: 5,
                run_migrations: false,
            },
            api: ApiConfig {
                port: 8080,
                enable_rate_limiting: true,
                rate_limit_requests: 60,
                strict_rate_limit_requests: 20,
                rate_limit_window_secs: 60,
                max_request_size_bytes: 2 * 1024 * 1024, // 2MB
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
                enable_cors: true,
                cors_origins: vec!["https://app.indcloud.io".to_string()],
            },
            telemetry: TelemetryConfig {
                auto_provision: false,
                default_organization: "Default Organization".to_string(),
            },
            mqtt: MqttConfig {
                enabled: true,
                host: "mqtt".to_string(),
                port: 8883,
                client_id: "indcloud-api".to_string(),
                topic: "indcloud/devices/+/telemetry".to_string(),
                device_auth_required: true,
                keep_alive_secs: 60,
            },
            scheduler: SchedulerConfig::standard(),
            trash: TrashConfig { retention_days: 30 },
            retention: RetentionConfig {
                archive_dir: "/var/lib/indcloud/archives".to_string(),
            },
        }
    }
}

impl SchedulerConfig {
    fn standard() -> Self {
        Self {
            enabled: true,
            global_rules_secs: 60,
            device_health_secs: 300,
            trash_purge_secs: 3600,
            data_retention_secs: 86_400,
            rate_limit_cleanup_secs: 300,
        }
    }
}

/// Parse `name` into `target`, keeping the current value when unset or invalid.
fn override_from_env<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(v) = env::var(name) {
        match v.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("Ignoring invalid value for {}: {}", name, v),
        }
    }
}

fn merge_values(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(config.telemetry.auto_provision);
        assert!(!config.api.enable_rate_limiting);
        assert!(!config.security.jwt_secret.is_empty());
        assert_eq!(config.trash.retention_days, 30);
    }

    #[test]
    fn development_logs_crate_at_debug() {
        assert_eq!(Environment::Development.default_log_filter(), "info,indcloud_api=debug");
        assert_eq!(Environment::Production.default_log_filter(), "info");
        assert!(tracing_subscriber::EnvFilter::try_new(Environment::Development.default_log_filter()).is_ok());
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert!(!config.telemetry.auto_provision);
        assert!(config.api.enable_rate_limiting);
        assert!(config.mqtt.device_auth_required);
        assert!(config.security.jwt_secret.is_empty());
    }

    #[test]
    fn yaml_overlay_replaces_only_named_fields() {
        let config = AppConfig::development()
            .merge_yaml("mqtt:\n  enabled: true\n  port: 8883\napi:\n  strict_rate_limit_requests: 5\n")
            .unwrap();
        assert!(config.mqtt.enabled);
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.api.strict_rate_limit_requests, 5);
        assert_eq!(config.api.rate_limit_requests, 60);
    }

    #[test]
    fn yaml_overlay_rejects_wrong_types() {
        let result = AppConfig::development().merge_yaml("api:\n  port: not-a-port\n");
        assert!(result.is_err());
    }
}
