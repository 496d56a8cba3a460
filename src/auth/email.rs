use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::EmailVerifierConfig;

/// Confirms an address is well-formed and deliverable.
///
/// Implementations never fail: any problem talking to the backing service
/// counts as an unverified address.
#[async_trait]
pub trait EmailVerifier: Send + Sync {
    async fn verify(&self, email: &str) -> bool;
}

/// Used when no verification service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllVerifier;

#[async_trait]
impl EmailVerifier for AcceptAllVerifier {
    async fn verify(&self, _email: &str) -> bool {
        true
    }
}

/// Fixed answer, for tests.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct StaticVerifier(pub bool);

#[cfg(test)]
#[async_trait]
impl EmailVerifier for StaticVerifier {
    async fn verify(&self, _email: &str) -> bool {
        self.0
    }
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    format_valid: Option<bool>,
    #[serde(default)]
    mx_found: Option<bool>,
    #[serde(default)]
    smtp_check: Option<bool>,
}

impl CheckResponse {
    fn deliverable(&self) -> bool {
        self.format_valid.unwrap_or(false)
            && self.mx_found.unwrap_or(false)
            && self.smtp_check.unwrap_or(false)
    }
}

/// Client for the mailboxlayer `check` endpoint.
#[derive(Debug, Clone)]
pub struct MailboxLayerVerifier {
    http: Client,
    api_url: String,
    access_key: String,
}

impl MailboxLayerVerifier {
    pub fn new(cfg: &EmailVerifierConfig, access_key: impl Into<String>) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(cfg.timeout())
            .build()
            .context("build email verifier http client")?;
        Ok(Self {
            http,
            api_url: cfg.api_url.clone(),
            access_key: access_key.into(),
        })
    }

    async fn check(&self, email: &str) -> anyhow::Result<bool> {
        let res = self
            .http
            .get(&self.api_url)
            .query(&[
                ("access_key", self.access_key.as_str()),
                ("email", email),
                ("smtp", "1"),
                ("format", "1"),
            ])
            .send()
            .await
            .context("email check request")?
            .error_for_status()
            .context("email check status")?;
        let body: CheckResponse = res.json().await.context("email check body")?;
        debug!(email, ?body, "email check response");
        Ok(body.deliverable())
    }
}

#[async_trait]
impl EmailVerifier for MailboxLayerVerifier {
    async fn verify(&self, email: &str) -> bool {
        match self.check(email).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %format!("{e:#}"), email, "email verification failed");
                false
            }
        }
    }
}
