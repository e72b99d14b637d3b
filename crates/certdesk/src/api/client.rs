//! Typed client for the certificate backend's REST API.

use std::sync::RwLock;

use log::{debug, info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use super::types::{
    AuthPayload, BatchStartRequest, BatchStartResponse, IssueCertificateRequest, LoginBody,
    MessageResponse, NotificationSettings, PasswordChange, PreviewResponse, ProfileUpdate,
    Registration, SearchPage, SearchQuery, SingleIssueResponse, UploadFile, User, UserEnvelope,
    VerificationResult,
};
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::sanitize::{fingerprint, redact_email, truncate_body};

pub type Result<T> = std::result::Result<T, ApiError>;

/// A user together with the session token the server issued.
pub struct AuthSession {
    pub user: User,
    pub token: SecretString,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("user", &self.user.id)
            .field("token", &"***")
            .finish()
    }
}

impl From<AuthPayload> for AuthSession {
    fn from(payload: AuthPayload) -> Self {
        Self {
            user: payload.user,
            token: SecretString::from(payload.token),
        }
    }
}

fn create_http_client(config: &ClientConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {}", e)))
}

/// REST client. The bearer token is shared by all clones of the session and
/// can be swapped at login/logout without rebuilding the client.
pub struct ApiClient {
    http: Client,
    base_url: Url,
    token: RwLock<Option<SecretString>>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| ApiError::Validation(format!("Invalid API base URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Validation(format!(
                "API base URL cannot be a base: {}",
                config.api_base_url
            )));
        }

        Ok(Self {
            http: create_http_client(config)?,
            base_url,
            token: RwLock::new(None),
        })
    }

    pub fn set_token(&self, token: SecretString) {
        debug!("Attaching session token {}", fingerprint(token.expose_secret()));
        if let Ok(mut slot) = self.token.write() {
            *slot = Some(token);
        }
    }

    pub fn clear_token(&self) {
        if let Ok(mut slot) = self.token.write() {
            *slot = None;
        }
    }

    pub fn token(&self) -> Option<SecretString> {
        self.token.read().ok().and_then(|slot| slot.clone())
    }

    pub fn has_token(&self) -> bool {
        self.token.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Builds `{base}/{segments...}`, percent-encoding each segment.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Validation("API base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authed(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.token().ok_or(ApiError::MissingToken)?;
        Ok(builder.bearer_auth(token.expose_secret()))
    }

    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        handle_response(response).await
    }

    // ─── Auth & profile ──────────────────────────────────────────────────────

    pub async fn login(&self, email: &str, password: &SecretString) -> Result<AuthSession> {
        info!("Logging in as {}", redact_email(email));
        let body = LoginBody {
            email: email.trim(),
            password: password.expose_secret(),
        };
        let request = self.http.post(self.endpoint(&["auth", "login"])?).json(&body);
        let payload: AuthPayload = self.execute(request).await?;
        Ok(payload.into())
    }

    pub async fn register(&self, registration: &Registration) -> Result<AuthSession> {
        info!("Registering {}", redact_email(&registration.email));
        let request = self
            .http
            .post(self.endpoint(&["auth", "register"])?)
            .json(registration);
        let payload: AuthPayload = self.execute(request).await?;
        Ok(payload.into())
    }

    pub async fn current_user(&self) -> Result<User> {
        let request = self.authed(self.http.get(self.endpoint(&["users", "me"])?))?;
        let envelope: UserEnvelope = self.execute(request).await?;
        Ok(envelope.user)
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<MessageResponse> {
        let url = self.endpoint(&["users", "me", "profile"])?;
        let request = self.authed(self.http.put(url).json(update))?;
        self.execute(request).await
    }

    pub async fn change_password(&self, change: &PasswordChange) -> Result<MessageResponse> {
        let url = self.endpoint(&["users", "me", "password"])?;
        let request = self.authed(self.http.put(url).json(change))?;
        self.execute(request).await
    }

    pub async fn update_notifications(
        &self,
        settings: &NotificationSettings,
    ) -> Result<MessageResponse> {
        let url = self.endpoint(&["users", "me", "notifications"])?;
        let request = self.authed(self.http.put(url).json(settings))?;
        self.execute(request).await
    }

    // ─── Issuance ────────────────────────────────────────────────────────────

    /// Submits one certificate; the server acknowledges with a task id and
    /// reports progress over the push channel.
    pub async fn issue_certificate(
        &self,
        request: &IssueCertificateRequest,
    ) -> Result<SingleIssueResponse> {
        request.validate()?;

        let mut form = Form::new();
        for (name, value) in request.text_fields() {
            form = form.text(name, value);
        }
        if let Some(file) = &request.file {
            form = form.part("certificateFile", file_part(file)?);
        }

        let url = self.endpoint(&["certificates", "issue"])?;
        let response: SingleIssueResponse =
            self.execute(self.authed(self.http.post(url).multipart(form))?).await?;
        info!("Single issuance accepted as task {}", response.task_id);
        Ok(response)
    }

    pub async fn preview_bulk(&self, csv: &UploadFile) -> Result<PreviewResponse> {
        let form = Form::new().part("csvFile", file_part(csv)?);
        let url = self.endpoint(&["certificates", "bulk-issue-preview"])?;
        let preview: PreviewResponse =
            self.execute(self.authed(self.http.post(url).multipart(form))?).await?;
        debug!(
            "Preview of {}: {} rows, row errors: {}",
            csv.file_name,
            preview.data.len(),
            preview.has_row_errors
        );
        Ok(preview)
    }

    pub async fn start_bulk(&self, request: &BatchStartRequest) -> Result<BatchStartResponse> {
        if request.rows.is_empty() {
            return Err(ApiError::Validation("no rows to issue".to_string()));
        }
        let url = self.endpoint(&["certificates", "bulk-issue-start"])?;
        let response: BatchStartResponse =
            self.execute(self.authed(self.http.post(url).json(request))?).await?;
        info!(
            "Batch {} accepted with {} task ids for {} rows",
            response.batch_id,
            response.task_ids.len(),
            request.rows.len()
        );
        Ok(response)
    }

    // ─── Search & verify ─────────────────────────────────────────────────────

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchPage> {
        let url = self.endpoint(&["certificates", "search"])?;
        let request = self.authed(self.http.get(url).query(&query.params()))?;
        self.execute(request).await
    }

    pub async fn verify(&self, certificate: &UploadFile) -> Result<VerificationResult> {
        let form = Form::new().part("certificate", file_part(certificate)?);
        let url = self.endpoint(&["certificates", "verify"])?;
        self.execute(self.authed(self.http.post(url).multipart(form))?)
            .await
    }

    /// Verification by certificate id. Needs no session.
    pub async fn public_verify(&self, certificate_id: &str) -> Result<VerificationResult> {
        let id = certificate_id.trim();
        if id.is_empty() {
            return Err(ApiError::Validation("certificate id is empty".to_string()));
        }
        let url = self.endpoint(&["certificates", "public-verify", id])?;
        self.execute(self.http.get(url)).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.has_token())
            .finish()
    }
}

fn file_part(file: &UploadFile) -> Result<Part> {
    Part::bytes(file.bytes.clone())
        .file_name(file.file_name.clone())
        .mime_str(&file.mime)
        .map_err(|e| ApiError::Validation(format!("Invalid MIME type '{}': {}", file.mime, e)))
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        let body = response.text().await?;
        return serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()));
    }

    let body = response.text().await.unwrap_or_default();
    let error = status_error(status, &body);
    warn!("Request failed: {}", error);
    Err(error)
}

/// Maps a non-success status and its body to an [`ApiError`].
pub(crate) fn status_error(status: StatusCode, body: &str) -> ApiError {
    let message = server_message(body).unwrap_or_else(|| {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            truncate_body(body.trim())
        }
    });

    if status == StatusCode::UNAUTHORIZED {
        ApiError::Unauthorized { message }
    } else {
        ApiError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// Extracts `message` (or `error`) from a JSON error body.
fn server_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        .map(|m| truncate_body(m.trim()))
        .filter(|m| !m.is_empty())
}
