//! Google STS / IAM credentials wire shapes shared by the mock token backend
//! and the token-exchange plugin.

use serde::{Deserialize, Serialize};

/// Token type the federated endpoint issues
pub const ISSUED_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Requested lifetime of generated access tokens
pub const ACCESS_TOKEN_LIFETIME: &str = "3600s";

/// Body of `POST /v1/identitybindingtoken`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedTokenRequest {
    pub audience: String,
    pub grant_type: String,
    pub requested_token_type: String,
    pub scope: String,
    pub subject_token: String,
    pub subject_token_type: String,
}

/// Successful federated token response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedTokenResponse {
    pub access_token: String,
    pub issued_token_type: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Body of `POST .../serviceAccounts/{account}:generateAccessToken`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenRequest {
    #[serde(default)]
    pub delegates: Vec<String>,
    pub scope: Vec<String>,
    pub lifetime: String,
}

/// Successful access token response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
    /// RFC 3339 expiry timestamp
    pub expire_time: String,
}

/// OAuth-style error body returned by both endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthError {
    pub error: String,
    pub error_description: String,
}

impl OAuthError {
    pub fn new(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self { error: error.into(), error_description: description.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_federated_request_uses_camel_case() {
        let request = FederatedTokenRequest {
            audience: "aud".into(),
            grant_type: "grant".into(),
            requested_token_type: "type".into(),
            scope: "scope".into(),
            subject_token: "token".into(),
            subject_token_type: "jwt".into(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["grantType"], "grant");
        assert_eq!(value["subjectTokenType"], "jwt");
    }

    #[test]
    fn test_access_token_response_field_names() {
        let value = serde_json::json!({
            "accessToken": "tok",
            "expireTime": "2030-01-01T00:00:00Z"
        });
        let response: AccessTokenResponse = serde_json::from_value(value).unwrap();
        assert_eq!(response.access_token, "tok");
    }
}
