//! Operator push alerts over FCM HTTP v1.
//!
//! Authentication is the service-account flow: an RS256-signed JWT is
//! exchanged at the account's `token_uri` for a short-lived access token,
//! which is cached until shortly before it expires.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PUSH_TIMEOUT_SECS};
use crate::error::AppError;
use crate::notify::PushNotifier;

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const FCM_API_BASE: &str = "https://fcm.googleapis.com";
/// Refresh the access token this long before it actually expires.
const TOKEN_REFRESH_MARGIN_SECS: u64 = 60;
const TOKEN_LIFETIME_SECS: u64 = 3600;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: u64,
}

pub struct FcmNotifier {
    http: reqwest::Client,
    account: ServiceAccount,
    device_token: String,
    bot_name: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl FcmNotifier {
    pub fn new(account: ServiceAccount, device_token: String, bot_name: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            account,
            device_token,
            bot_name,
            api_base: FCM_API_BASE.to_string(),
            token: Mutex::new(None),
        }
    }

    /// Build the notifier from config, degrading to a disabled notifier when
    /// the device token or the credentials file is missing or unreadable.
    pub fn from_config(cfg: &Config) -> Arc<dyn PushNotifier> {
        let Some(device_token) = cfg.fcm_device_token.clone() else {
            return Arc::new(DisabledNotifier::new("FCM_DEVICE_TOKEN is not set"));
        };
        match load_service_account(&cfg.fcm_credentials_path) {
            Ok(account) => {
                info!("[PUSH] FCM enabled for project {}", account.project_id);
                Arc::new(Self::new(account, device_token, cfg.bot_name.clone()))
            }
            Err(e) => Arc::new(DisabledNotifier::new(format!(
                "FCM credentials unavailable at {}: {e}",
                cfg.fcm_credentials_path.display()
            ))),
        }
    }

    async fn access_token(&self) -> Result<String, AppError> {
        let now = unix_now();
        let mut cache = self.token.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.expires_at > now + TOKEN_REFRESH_MARGIN_SECS {
                return Ok(cached.access_token.clone());
            }
        }

        let exp = now + TOKEN_LIFETIME_SECS;
        let claims = JwtClaims {
            iss: &self.account.client_email,
            scope: FCM_SCOPE,
            aud: &self.account.token_uri,
            iat: now,
            exp,
        };
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(self.account.private_key.as_bytes())
            .map_err(|e| AppError::Push(format!("invalid service account key: {e}")))?;
        let jwt = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256),
            &claims,
            &key,
        )
        .map_err(|e| AppError::Push(format!("failed to sign JWT: {e}")))?;

        let resp: Value = self
            .http
            .post(&self.account.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", jwt.as_str()),
            ])
            .timeout(Duration::from_secs(PUSH_TIMEOUT_SECS))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let access_token = resp["access_token"]
            .as_str()
            .ok_or_else(|| AppError::Push("token response missing access_token".to_string()))?
            .to_string();
        let expires_at = now + resp["expires_in"].as_u64().unwrap_or(TOKEN_LIFETIME_SECS);

        debug!("[PUSH] access token refreshed");
        *cache = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at,
        });
        Ok(access_token)
    }

    async fn send(&self, title: &str, body: &str) -> Result<(), AppError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.api_base, self.account.project_id
        );
        self.http
            .post(&url)
            .bearer_auth(token)
            .json(&fcm_message(&self.device_token, &self.bot_name, title, body))
            .timeout(Duration::from_secs(PUSH_TIMEOUT_SECS))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl PushNotifier for FcmNotifier {
    async fn push(&self, title: &str, body: &str) {
        match self.send(title, body).await {
            Ok(()) => info!("[PUSH] sent \"{title}\""),
            Err(e) => error!("[PUSH] failed to send \"{title}\": {e}"),
        }
    }
}

/// Stands in when push is not configured. Warns once, then stays quiet.
pub struct DisabledNotifier {
    reason: String,
    warned: AtomicBool,
}

impl DisabledNotifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            warned: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PushNotifier for DisabledNotifier {
    async fn push(&self, title: &str, _body: &str) {
        if !self.warned.swap(true, Ordering::SeqCst) {
            warn!("[PUSH] push notifications disabled: {}", self.reason);
        }
        debug!("[PUSH] skipped \"{title}\"");
    }
}

fn load_service_account(path: &Path) -> Result<ServiceAccount, AppError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn fcm_message(device_token: &str, bot_name: &str, title: &str, body: &str) -> Value {
    json!({
        "message": {
            "token": device_token,
            "notification": {
                "title": format!("{title} ({bot_name})"),
                "body": format!("{body} [Instance: {bot_name}]"),
            },
            "data": {
                "botName": bot_name,
                "title": title,
                "body": body,
            },
        }
    })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
