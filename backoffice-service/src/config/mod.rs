use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct BackofficeConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub smtp: SmtpConfig,
    pub payments: PaymentsConfig,
    pub app: AppConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Public base URL used to build acceptance and payment links.
    pub base_url: String,
    /// Owner inbox for copy/notice emails.
    pub owner_email: String,
    /// HMAC secret for portal session tokens.
    pub session_secret: Secret<String>,
    pub quote_validity_days: i64,
    pub acceptance_token_ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub quote_intake_attempts: u32,
    pub quote_intake_window_seconds: u64,
    pub acceptance_attempts: u32,
    pub acceptance_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl BackofficeConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = BackofficeConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("backoffice-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env(
                    "DATABASE_URL",
                    Some("postgres://localhost/backoffice"),
                    is_prod,
                )?,
                max_connections: get_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?
                    .parse()
                    .unwrap_or(10),
                min_connections: get_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?
                    .parse()
                    .unwrap_or(1),
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1/"), is_prod)?,
            },
            smtp: SmtpConfig {
                enabled: get_env("SMTP_ENABLED", Some("false"), is_prod)?
                    .parse()
                    .unwrap_or(false),
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: get_env("SMTP_PORT", Some("587"), is_prod)?
                    .parse()
                    .unwrap_or(587),
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                from_email: get_env("SMTP_FROM_EMAIL", Some("no-reply@localhost"), is_prod)?,
                from_name: get_env("SMTP_FROM_NAME", Some("GreenRidge Landscaping"), is_prod)?,
            },
            payments: PaymentsConfig {
                secret_key: Secret::new(get_env("PAYMENTS_SECRET_KEY", Some(""), is_prod)?),
                webhook_secret: Secret::new(get_env("PAYMENTS_WEBHOOK_SECRET", Some(""), is_prod)?),
                api_base_url: get_env(
                    "PAYMENTS_API_BASE_URL",
                    Some("https://api.stripe.com/v1"),
                    is_prod,
                )?,
                currency: get_env("PAYMENTS_CURRENCY", Some("usd"), is_prod)?,
            },
            app: AppConfig {
                base_url: get_env("APP_BASE_URL", Some("http://localhost:3000"), is_prod)?,
                owner_email: get_env("OWNER_EMAIL", Some("owner@localhost"), is_prod)?,
                session_secret: Secret::new(get_env(
                    "SESSION_SECRET",
                    Some("dev-session-secret"),
                    is_prod,
                )?),
                quote_validity_days: get_env("QUOTE_VALIDITY_DAYS", Some("30"), is_prod)?
                    .parse()
                    .unwrap_or(30),
                acceptance_token_ttl_days: get_env("ACCEPTANCE_TOKEN_TTL_DAYS", Some("30"), is_prod)?
                    .parse()
                    .unwrap_or(30),
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
            },
            rate_limit: RateLimitConfig {
                quote_intake_attempts: get_env("RATE_LIMIT_QUOTE_INTAKE_ATTEMPTS", Some("5"), is_prod)?
                    .parse()
                    .unwrap_or(5),
                quote_intake_window_seconds: get_env(
                    "RATE_LIMIT_QUOTE_INTAKE_WINDOW_SECONDS",
                    Some("3600"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(3600),
                acceptance_attempts: get_env("RATE_LIMIT_ACCEPTANCE_ATTEMPTS", Some("10"), is_prod)?
                    .parse()
                    .unwrap_or(10),
                acceptance_window_seconds: get_env(
                    "RATE_LIMIT_ACCEPTANCE_WINDOW_SECONDS",
                    Some("600"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(600),
                global_ip_limit: get_env("RATE_LIMIT_GLOBAL_IP_LIMIT", Some("100"), is_prod)?
                    .parse()
                    .unwrap_or(100),
                global_ip_window_seconds: get_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(60),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.app.quote_validity_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "QUOTE_VALIDITY_DAYS must be positive"
            )));
        }

        if self.app.acceptance_token_ttl_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCEPTANCE_TOKEN_TTL_DAYS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if !self.smtp.enabled {
                tracing::warn!("SMTP is disabled in production - customer emails will not send");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
