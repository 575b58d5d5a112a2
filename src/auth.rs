//! Bearer-token authentication against the POS identity endpoint.
//!
//! The token lifetime is not tracked here; `PosClient` re-authenticates
//! exactly once when a data endpoint answers 401.

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::info;

use crate::config::SyncConfig;
use crate::error::SyncError;

/// A bearer token issued by the identity endpoint.
#[derive(Debug, Clone)]
pub struct BearerToken {
    pub access_token: String,
    /// Advisory lifetime in seconds, when the endpoint reports one.
    pub expires_in: Option<i64>,
}

pub struct Authenticator {
    http: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl Authenticator {
    pub fn new(http: Client, config: &SyncConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    /// Exchange the client credential pair for a bearer token.
    ///
    /// Credential rejection (or any non-success answer from the identity
    /// endpoint) is `SyncError::Auth` and fatal for the pass.
    pub async fn login(&self) -> Result<BearerToken, SyncError> {
        let url = format!("{}/authentication/v1/login", self.base_url);
        let body = serde_json::json!({
            "clientId": self.client_id,
            "clientSecret": self.client_secret,
        });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Auth {
                status: 0,
                detail: format!("identity endpoint unreachable: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SyncError::Auth {
                status: status.as_u16(),
                detail: auth_failure_detail(status, &text),
            });
        }

        let payload: Value = resp.json().await.map_err(|e| SyncError::Auth {
            status: status.as_u16(),
            detail: format!("invalid JSON from identity endpoint: {e}"),
        })?;

        let token = extract_token(&payload).ok_or_else(|| SyncError::Auth {
            status: status.as_u16(),
            detail: "identity response carried no access token".to_string(),
        })?;

        info!(expires_in = ?token.expires_in, "authenticated against POS identity endpoint");
        Ok(token)
    }
}

/// Pull the token out of the identity response. Both the nested
/// `{"token": {"accessToken": ..}}` and flat `{"accessToken": ..}` shapes
/// are accepted.
fn extract_token(payload: &Value) -> Option<BearerToken> {
    let holder = payload.get("token").unwrap_or(payload);
    let access_token = holder
        .get("accessToken")
        .or_else(|| holder.get("access_token"))
        .and_then(Value::as_str)
        .map(String::from)
        .filter(|s| !s.is_empty())?;
    let expires_in = holder
        .get("expiresIn")
        .or_else(|| holder.get("expires_in"))
        .and_then(Value::as_i64);
    Some(BearerToken {
        access_token,
        expires_in,
    })
}

fn auth_failure_detail(status: StatusCode, body: &str) -> String {
    let base = match status.as_u16() {
        400 | 401 => "client credentials rejected",
        403 => "client not authorized",
        s if s >= 500 => "identity endpoint server error",
        _ => "unexpected identity endpoint response",
    };
    let trimmed = body.trim();
    if trimmed.is_empty() {
        base.to_string()
    } else {
        format!("{base}: {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token_nested_and_flat() {
        let nested = serde_json::json!({
            "token": { "accessToken": "abc", "expiresIn": 86400 }
        });
        let tok = extract_token(&nested).unwrap();
        assert_eq!(tok.access_token, "abc");
        assert_eq!(tok.expires_in, Some(86400));

        let flat = serde_json::json!({ "access_token": "xyz" });
        let tok = extract_token(&flat).unwrap();
        assert_eq!(tok.access_token, "xyz");
        assert_eq!(tok.expires_in, None);
    }

    #[test]
    fn test_extract_token_rejects_empty() {
        assert!(extract_token(&serde_json::json!({ "accessToken": "" })).is_none());
        assert!(extract_token(&serde_json::json!({})).is_none());
    }
}
