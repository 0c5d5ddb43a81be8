use crate::domain::models::ProfileUpdate;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;

const DEFAULT_IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1";
const DEFAULT_TOKEN_ENDPOINT: &str = "https://securetoken.googleapis.com/v1/token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokenResponse {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenResponse {
    pub uid: String,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountProfile {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// Password-credential identity endpoints.
///
/// Rejections by the provider surface as [`InfraError::Auth`]; transport
/// failures surface as [`InfraError::Network`].
#[async_trait]
pub trait AuthHttpClient: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthTokenResponse, InfraError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthTokenResponse, InfraError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshTokenResponse, InfraError>;

    async fn update_profile(
        &self,
        id_token: &str,
        update: &ProfileUpdate,
    ) -> Result<AccountProfile, InfraError>;

    async fn lookup(&self, id_token: &str) -> Result<AccountProfile, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestAuthClient {
    client: Client,
    api_key: String,
    identity_endpoint: String,
    token_endpoint: String,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordAuthPayload {
    local_id: String,
    #[serde(default)]
    email: String,
    display_name: Option<String>,
    #[serde(rename = "photoUrl")]
    photo_url: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct RefreshPayload {
    user_id: String,
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountPayload {
    local_id: String,
    #[serde(default)]
    email: String,
    display_name: Option<String>,
    #[serde(rename = "photoUrl")]
    photo_url: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct LookupPayload {
    users: Option<Vec<AccountPayload>>,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl ReqwestAuthClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            identity_endpoint: DEFAULT_IDENTITY_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
        }
    }

    /// Points the client at an emulator or proxy.
    pub fn with_endpoints(
        mut self,
        identity_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        self.identity_endpoint = identity_endpoint.into().trim_end_matches('/').to_string();
        self.token_endpoint = token_endpoint.into();
        self
    }

    fn account_endpoint(&self, action: &str) -> String {
        format!("{}/accounts:{action}", self.identity_endpoint)
    }

    async fn read_response<T: DeserializeOwned>(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<T, InfraError> {
        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading {operation} response: {error}"))
        })?;

        if !status.is_success() {
            let code = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or_else(|| format!("HTTP_{}", status.as_u16()));
            if status.is_server_error() {
                return Err(InfraError::Network(format!(
                    "{operation} failed with http {}: {code}",
                    status.as_u16()
                )));
            }
            return Err(InfraError::Auth(describe_auth_error(&code)));
        }

        serde_json::from_str::<T>(&body).map_err(|error| {
            InfraError::Auth(format!("invalid {operation} payload: {error}"))
        })
    }

    async fn post_account<T: DeserializeOwned>(
        &self,
        action: &str,
        body: serde_json::Value,
    ) -> Result<T, InfraError> {
        let response = self
            .client
            .post(self.account_endpoint(action))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("request to accounts:{action} failed: {error}")))?;
        Self::read_response(response, action).await
    }
}

#[async_trait]
impl AuthHttpClient for ReqwestAuthClient {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthTokenResponse, InfraError> {
        let payload: PasswordAuthPayload = self
            .post_account(
                "signInWithPassword",
                serde_json::json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true
                }),
            )
            .await?;
        Ok(payload.into())
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthTokenResponse, InfraError> {
        let payload: PasswordAuthPayload = self
            .post_account(
                "signUp",
                serde_json::json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true
                }),
            )
            .await?;
        Ok(payload.into())
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshTokenResponse, InfraError> {
        let response = self
            .client
            .post(&self.token_endpoint)
            .query(&[("key", self.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("token refresh request failed: {error}")))?;
        let payload: RefreshPayload = Self::read_response(response, "token refresh").await?;
        Ok(RefreshTokenResponse {
            uid: payload.user_id,
            id_token: payload.id_token,
            refresh_token: payload.refresh_token,
            expires_in: parse_expires_in(payload.expires_in.as_deref()),
        })
    }

    async fn update_profile(
        &self,
        id_token: &str,
        update: &ProfileUpdate,
    ) -> Result<AccountProfile, InfraError> {
        let mut body = serde_json::json!({
            "idToken": id_token,
            "returnSecureToken": false
        });
        if let Some(object) = body.as_object_mut() {
            if let Some(name) = update.display_name.as_deref() {
                object.insert("displayName".to_string(), serde_json::json!(name.trim()));
            }
            if let Some(photo_url) = update.photo_url.as_deref() {
                object.insert("photoUrl".to_string(), serde_json::json!(photo_url.trim()));
            }
        }
        let payload: AccountPayload = self.post_account("update", body).await?;
        Ok(payload.into())
    }

    async fn lookup(&self, id_token: &str) -> Result<AccountProfile, InfraError> {
        let payload: LookupPayload = self
            .post_account("lookup", serde_json::json!({ "idToken": id_token }))
            .await?;
        payload
            .users
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(AccountProfile::from)
            .ok_or_else(|| InfraError::Auth("account lookup returned no user".to_string()))
    }
}

impl From<PasswordAuthPayload> for AuthTokenResponse {
    fn from(payload: PasswordAuthPayload) -> Self {
        Self {
            uid: payload.local_id,
            email: payload.email,
            display_name: payload.display_name.filter(|value| !value.trim().is_empty()),
            photo_url: payload.photo_url.filter(|value| !value.trim().is_empty()),
            id_token: payload.id_token,
            refresh_token: payload.refresh_token,
            expires_in: parse_expires_in(payload.expires_in.as_deref()),
        }
    }
}

impl From<AccountPayload> for AccountProfile {
    fn from(payload: AccountPayload) -> Self {
        Self {
            uid: payload.local_id,
            email: payload.email,
            display_name: payload.display_name.filter(|value| !value.trim().is_empty()),
            photo_url: payload.photo_url.filter(|value| !value.trim().is_empty()),
        }
    }
}

fn parse_expires_in(raw: Option<&str>) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(3_600)
        .max(0)
}

/// Maps provider error codes such as `WEAK_PASSWORD : ...` to readable text.
pub fn describe_auth_error(code: &str) -> String {
    let key = code.split(" : ").next().unwrap_or(code).trim();
    match key {
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => {
            "Invalid email or password".to_string()
        }
        "EMAIL_EXISTS" => "An account with this email already exists".to_string(),
        "INVALID_EMAIL" => "Email address is not valid".to_string(),
        "WEAK_PASSWORD" => "Password should be at least 6 characters".to_string(),
        "USER_DISABLED" => "This account has been disabled".to_string(),
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "Too many attempts; try again later".to_string(),
        "TOKEN_EXPIRED" | "INVALID_ID_TOKEN" | "INVALID_REFRESH_TOKEN" | "USER_NOT_FOUND" => {
            "Session expired; sign in again".to_string()
        }
        other => format!("Authentication failed ({other})"),
    }
}
