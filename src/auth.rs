//! Token validation against the external supervisor

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::ids::decode_id;
use crate::models::UserInfo;

/// Resolves bearer tokens to user identities
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<bool>;

    async fn user_info(&self, token: &str) -> Result<UserInfo>;

    /// Validate `token`, then fetch the identity behind it
    async fn authenticate(&self, token: &str) -> Result<UserInfo> {
        if token.is_empty() || !self.validate(token).await? {
            return Err(AppError::Unauthorized("Invalid access token".to_string()));
        }
        self.user_info(token).await
    }
}

/// Signature the supervisor expects next to a forwarded token
pub fn request_token(secret_key: &str, token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret_key.as_bytes());
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// HTTP client for the supervisor's auth API
pub struct SupervisorClient {
    client: Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    uid: String,
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    avatar: String,
}

impl SupervisorClient {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    async fn get(&self, path: &str, token: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", token)
            .header("Request-Token", request_token(&self.secret_key, token))
            .send()
            .await
            .map_err(|e| AppError::Supervisor(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AppError::Unauthorized(format!("Supervisor rejected token: {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Supervisor(format!(
                "Request to {} failed: {} - {}",
                path, status, text
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl TokenValidator for SupervisorClient {
    async fn validate(&self, token: &str) -> Result<bool> {
        let body: ValidateResponse = self
            .get("/api/v1/auth/validateAccessToken", token)
            .await?
            .json()
            .await
            .map_err(|e| AppError::Supervisor(e.to_string()))?;
        Ok(body.valid)
    }

    async fn user_info(&self, token: &str) -> Result<UserInfo> {
        let body: UserResponse = self
            .get("/api/v1/users/me", token)
            .await?
            .json()
            .await
            .map_err(|e| AppError::Supervisor(e.to_string()))?;

        let id = decode_id(&body.id)
            .map_err(|e| AppError::Supervisor(format!("Malformed user id: {}", e)))?;
        Ok(UserInfo {
            id,
            uid: body.uid,
            nickname: body.nickname,
            avatar: body.avatar,
        })
    }
}

/// Fixed token table, for local development and tests
#[derive(Default)]
pub struct StaticValidator {
    users: HashMap<String, UserInfo>,
}

impl StaticValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: impl Into<String>, user: UserInfo) -> Self {
        self.users.insert(token.into(), user);
        self
    }
}

#[async_trait]
impl TokenValidator for StaticValidator {
    async fn validate(&self, token: &str) -> Result<bool> {
        Ok(self.users.contains_key(token))
    }

    async fn user_info(&self, token: &str) -> Result<UserInfo> {
        self.users
            .get(token)
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Unknown token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserInfo {
        UserInfo {
            id: 1,
            uid: "u-1".to_string(),
            nickname: "alice".to_string(),
            avatar: String::new(),
        }
    }

    #[test]
    fn test_request_token_is_sha256_hex() {
        let signed = request_token("secret", "token");
        assert_eq!(signed.len(), 64);
        assert!(signed.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(signed, request_token("secret", "token"));
        assert_ne!(signed, request_token("other", "token"));
    }

    #[tokio::test]
    async fn test_static_validator() {
        let validator = StaticValidator::new().with_user("t1", alice());
        assert_eq!(validator.authenticate("t1").await.unwrap().nickname, "alice");
        assert!(matches!(
            validator.authenticate("nope").await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(validator.authenticate("").await.is_err());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = SupervisorClient::new("http://sup:9001/", "k");
        assert_eq!(client.base_url, "http://sup:9001");
    }
}
