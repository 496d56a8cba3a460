use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

/// Settings for the third-party address check. An access key is required
/// unless the check is switched off with `EMAIL_VERIFIER_DISABLED=true`.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailVerifierConfig {
    pub api_url: String,
    pub access_key: Option<String>,
    pub disabled: bool,
    pub timeout_secs: u64,
}

impl EmailVerifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Run the bundled migrations on startup. Keep off for persistent deployments.
    pub db_sync: bool,
    pub jwt: JwtConfig,
    pub email: EmailVerifierConfig,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests don't have to touch
    /// the process environment.
    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = match get("DATABASE_URL") {
            Some(url) => url,
            None => database_url_from_parts(&get)?,
        };

        let jwt = JwtConfig {
            secret: get("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: get("JWT_ISSUER").unwrap_or_else(|| "userauth".into()),
            audience: get("JWT_AUDIENCE").unwrap_or_else(|| "userauth-clients".into()),
        };
        anyhow::ensure!(!jwt.secret.is_empty(), "JWT_SECRET must not be empty");

        let email = EmailVerifierConfig {
            api_url: get("EMAIL_VERIFIER_URL")
                .unwrap_or_else(|| "http://apilayer.net/api/check".into()),
            access_key: get("EMAIL_VERIFIER_ACCESS_KEY").filter(|k| !k.trim().is_empty()),
            disabled: get("EMAIL_VERIFIER_DISABLED").map(|v| v == "true").unwrap_or(false),
            timeout_secs: get("EMAIL_VERIFIER_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5),
        };
        anyhow::ensure!(
            email.disabled || email.access_key.is_some(),
            "EMAIL_VERIFIER_ACCESS_KEY must be set (or EMAIL_VERIFIER_DISABLED=true)"
        );

        Ok(Self {
            database_url,
            db_sync: get("DB_SYNC").map(|v| v == "true").unwrap_or(false),
            jwt,
            email,
            host: get("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: get("APP_PORT")
                .map(|v| v.parse::<u16>())
                .transpose()
                .context("APP_PORT must be a port number")?
                .unwrap_or(8080),
        })
    }
}

fn database_url_from_parts<F>(get: &F) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let host = get("DB_HOST").context("DATABASE_URL or DB_HOST must be set")?;
    let port = get("DB_PORT")
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(5432);
    let user = get("DB_USER").context("DB_USER must be set")?;
    let pass = get("DB_PASS").unwrap_or_default();
    let name = get("DB_NAME").context("DB_NAME must be set")?;
    Ok(format!("postgres://{user}:{pass}@{host}:{port}/{name}"))
}
