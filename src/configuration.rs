use config::Config;
use config::ConfigError;
use config::File;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::PgConnectOptions;
use sqlx::postgres::PgSslMode;

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    pub redis_uri: Secret<String>,
}

#[derive(Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub base_url: String,
    pub hmac_secret: Secret<String>,
    /// Signs the unsubscribe token minted into every personalized message
    /// (see `domain::unsubscribe`), distinct from `hmac_secret` above, which
    /// only keys the session/flash cookies.
    pub unsubscribe_token_secret: Secret<String>,
}

#[derive(Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub require_ssl: bool,
}

impl DatabaseSettings {
    pub fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl { PgSslMode::Require } else { PgSslMode::Prefer };
        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
    }

    pub fn connection(&self) -> PgConnectOptions { self.without_db().database(&self.database_name) }
}

/// Outbound email provider. `plan_key` selects the rate-limit profile — the
/// production profile is 8 req/s, burst 16.
#[derive(Deserialize, Clone)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub plan_key: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

impl ProviderSettings {
    pub fn timeout(&self) -> std::time::Duration { std::time::Duration::from_millis(self.timeout_milliseconds) }

    /// Rate limit for the known plan keys; unrecognized keys fall back to
    /// the conservative `default` profile rather than failing startup.
    pub fn rate_limit(&self) -> (f64, f64) {
        match self.plan_key.as_str() {
            "production" => (8.0, 16.0),
            "sandbox" => (1.0, 2.0),
            _ => (2.0, 4.0),
        }
    }
}

#[derive(Deserialize, Clone, Copy)]
pub struct DispatchSettings {
    pub lock_ttl_seconds: i64,
    pub recovery_sweep_interval_seconds: u64,
    pub completion_sweep_interval_seconds: u64,
    pub worker_concurrency: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        // Lock TTL 5 minutes, recovery sweep every 60s, completion sweep
        // every 30s, 2 worker slots per process by default.
        Self {
            lock_ttl_seconds: 300,
            recovery_sweep_interval_seconds: 60,
            completion_sweep_interval_seconds: 30,
            worker_concurrency: 2,
        }
    }
}

#[derive(Deserialize, Clone, Copy)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown_seconds: i64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self { failure_threshold: 5, success_threshold: 2, cooldown_seconds: 60 }
    }
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!("`{other}` is not a supported environment. Use either `local` or `production`.")),
        }
    }
}

/// Loads `configuration/base.yaml`, layered with `configuration/{environment}.yaml`
/// (selected via `APP_ENVIRONMENT`, default `local`), then environment
/// variables prefixed `APP_` (double-underscore separated, e.g.
/// `APP_DATABASE__PORT`). Fails fast on any missing field.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let base_path = std::env::current_dir().expect("failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment =
        std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "local".into()).try_into().expect("failed to parse APP_ENVIRONMENT");
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = Config::builder()
        .add_source(File::from(configuration_directory.join("base.yaml")))
        .add_source(File::from(configuration_directory.join(environment_filename)))
        .add_source(config::Environment::with_prefix("APP").prefix_separator("_").separator("__"))
        .build()?;

    settings.try_deserialize()
}
