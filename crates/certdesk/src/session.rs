//! Authenticated session: token persistence, push-channel lifetime and the
//! user-facing issuance workflows.
//!
//! The push channel is bound exactly while a token is held. Logging out, or
//! any REST call answered with 401, unbinds it and forgets the token.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{info, warn};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::api::{
    ApiClient, AuthSession, BatchStartRequest, IssueCertificateRequest, MessageResponse,
    NotificationSettings, PasswordChange, PreviewResponse, ProfileUpdate, Registration,
    SearchQuery, SingleIssueResponse, UploadFile, User, VerificationResult,
};
use crate::channel::{ChannelBinding, ChannelState, ReconnectPolicy, SseEventSource};
use crate::config::ClientConfig;
use crate::error::{ApiError, CertdeskError, SessionError};
use crate::sanitize::fingerprint;
use crate::search::SearchState;
use crate::secrets::TokenCipher;
use crate::tracking::{ingest, IngestDiagnostic, TrackerHandle};

pub type Result<T> = std::result::Result<T, SessionError>;

// ─── Token persistence ──────────────────────────────────────────────────────

/// Where the session token survives restarts.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<SecretString>>;
    fn save(&self, token: &SecretString) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Keeps the token for the lifetime of the process only.
#[derive(Default)]
pub struct MemorySessionStore {
    token: Mutex<Option<SecretString>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> Result<MutexGuard<'_, Option<SecretString>>> {
        self.token.lock().map_err(|_| SessionError::Poisoned)
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<SecretString>> {
        Ok(self.slot()?.clone())
    }

    fn save(&self, token: &SecretString) -> Result<()> {
        *self.slot()? = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot()? = None;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    sealed: bool,
    token: String,
    saved_at: DateTime<Utc>,
}

/// JSON file store. The token is sealed with AES-256-GCM when a cipher is
/// configured and kept as plaintext otherwise.
pub struct FileSessionStore {
    path: PathBuf,
    cipher: Option<TokenCipher>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>, cipher: Option<TokenCipher>) -> Self {
        Self {
            path: path.into(),
            cipher,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn store_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Store {
            path: self.path.clone(),
            source,
        }
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<SecretString>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.store_error(e)),
        };

        let stored: StoredSession =
            serde_json::from_str(&content).map_err(|e| SessionError::Corrupt(e.to_string()))?;

        match (stored.sealed, &self.cipher) {
            (true, Some(cipher)) => Ok(Some(cipher.open(&stored.token)?)),
            (true, None) => Err(SessionError::Corrupt(
                "token is sealed but no session key is configured".to_string(),
            )),
            (false, _) => Ok(Some(SecretString::from(stored.token))),
        }
    }

    fn save(&self, token: &SecretString) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.store_error(e))?;
        }

        let stored = match &self.cipher {
            Some(cipher) => StoredSession {
                sealed: true,
                token: cipher.seal(token)?,
                saved_at: Utc::now(),
            },
            None => StoredSession {
                sealed: false,
                token: token.expose_secret().to_string(),
                saved_at: Utc::now(),
            },
        };
        let json = serde_json::to_string_pretty(&stored)
            .map_err(|e| SessionError::Corrupt(e.to_string()))?;

        std::fs::write(&self.path, json).map_err(|e| self.store_error(e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| self.store_error(e))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.store_error(e)),
        }
    }
}

// ─── Session ────────────────────────────────────────────────────────────────

/// Result of starting a bulk batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStarted {
    pub batch_id: String,
    /// Task records created for this batch.
    pub tracked: usize,
    /// Rows or ids that could not be correlated.
    pub diagnostics: Vec<IngestDiagnostic>,
    /// False if the tracker was reset while the request was in flight.
    pub installed: bool,
}

pub struct Session {
    api: Arc<ApiClient>,
    tracker: TrackerHandle,
    channel: ChannelBinding,
    store: Box<dyn SessionStore>,
    user: Option<User>,
    auth_lost: bool,
}

impl Session {
    pub fn new(
        api: Arc<ApiClient>,
        tracker: TrackerHandle,
        channel: ChannelBinding,
        store: Box<dyn SessionStore>,
    ) -> Self {
        Self {
            api,
            tracker,
            channel,
            store,
            user: None,
            auth_lost: false,
        }
    }

    /// Wires the REST client, SSE channel and session store described by
    /// `config` around an existing tracker.
    pub fn from_config(
        config: &ClientConfig,
        tracker: TrackerHandle,
    ) -> std::result::Result<Self, CertdeskError> {
        let api = Arc::new(ApiClient::new(config)?);
        let source = Arc::new(SseEventSource::new(config)?);
        let channel = ChannelBinding::new(
            source,
            tracker.clone(),
            ReconnectPolicy::from(&config.channel),
        );

        let store: Box<dyn SessionStore> = match config.session.file_path() {
            Some(path) => {
                let cipher = TokenCipher::from_env(config.session.key_env())?;
                if cipher.is_none() {
                    warn!(
                        "{} not set, session token will be stored unencrypted",
                        config.session.key_env()
                    );
                }
                Box::new(FileSessionStore::new(path, cipher))
            }
            None => {
                warn!("No config directory available, session will not persist");
                Box::new(MemorySessionStore::new())
            }
        };

        Ok(Self::new(api, tracker, channel, store))
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn tracker(&self) -> &TrackerHandle {
        &self.tracker
    }

    pub fn channel(&self) -> &ChannelBinding {
        &self.channel
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.api.has_token()
    }

    /// True when the server rejected the session and the user must log in
    /// again.
    pub fn needs_reauth(&self) -> bool {
        self.auth_lost || self.channel.state().needs_reauth()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    pub async fn login(&mut self, email: &str, password: &SecretString) -> Result<&User> {
        let auth = self.api.login(email, password).await?;
        self.establish(auth).await
    }

    pub async fn register(&mut self, registration: &Registration) -> Result<&User> {
        let auth = self.api.register(registration).await?;
        self.establish(auth).await
    }

    async fn establish(&mut self, auth: AuthSession) -> Result<&User> {
        self.store.save(&auth.token)?;
        self.attach(auth.token).await;
        info!("Logged in as user {}", auth.user.id);
        Ok(&*self.user.insert(auth.user))
    }

    async fn attach(&mut self, token: SecretString) {
        self.api.set_token(token.clone());
        self.channel.bind(token).await;
        self.auth_lost = false;
    }

    /// Resumes a stored session. A token the server no longer accepts is
    /// discarded and `Ok(None)` is returned.
    pub async fn restore(&mut self) -> Result<Option<&User>> {
        let Some(token) = self.store.load()? else {
            return Ok(None);
        };

        info!("Restoring session {}", fingerprint(token.expose_secret()));
        self.api.set_token(token.clone());
        match self.api.current_user().await {
            Ok(user) => {
                self.channel.bind(token).await;
                self.auth_lost = false;
                Ok(Some(&*self.user.insert(user)))
            }
            Err(e) if e.is_unauthorized() => {
                warn!("Stored session is no longer valid: {}", e);
                self.api.clear_token();
                self.store.clear()?;
                Ok(None)
            }
            Err(e) => {
                self.api.clear_token();
                Err(e.into())
            }
        }
    }

    /// Unbinds the channel, forgets the token and clears all tracking.
    pub async fn logout(&mut self) -> Result<()> {
        self.channel.unbind().await;
        self.api.clear_token();
        self.user = None;
        self.auth_lost = false;
        self.tracker.reset().await?;
        self.tracker.reset_single().await?;
        self.store.clear()?;
        info!("Logged out");
        Ok(())
    }

    /// Drops a token the server has rejected.
    async fn invalidate(&mut self) {
        warn!("Session token rejected by server, re-authentication required");
        self.channel.unbind().await;
        self.api.clear_token();
        self.user = None;
        self.auth_lost = true;
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear stored session: {}", e);
        }
    }

    /// Passes `result` through, invalidating the session on a 401.
    async fn guard<T>(&mut self, result: std::result::Result<T, ApiError>) -> Result<T> {
        match result {
            Err(ApiError::Unauthorized { message }) => {
                self.invalidate().await;
                Err(ApiError::Unauthorized { message }.into())
            }
            Err(ApiError::MissingToken) => Err(SessionError::NotAuthenticated),
            other => other.map_err(SessionError::from),
        }
    }

    // ─── Profile ─────────────────────────────────────────────────────────────

    pub async fn refresh_user(&mut self) -> Result<&User> {
        let result = self.api.current_user().await;
        let user = self.guard(result).await?;
        Ok(&*self.user.insert(user))
    }

    pub async fn update_profile(&mut self, update: &ProfileUpdate) -> Result<MessageResponse> {
        let result = self.api.update_profile(update).await;
        let response = self.guard(result).await?;
        self.adopt_user(&response);
        Ok(response)
    }

    pub async fn change_password(&mut self, change: &PasswordChange) -> Result<MessageResponse> {
        let result = self.api.change_password(change).await;
        self.guard(result).await
    }

    pub async fn update_notifications(
        &mut self,
        settings: &NotificationSettings,
    ) -> Result<MessageResponse> {
        let result = self.api.update_notifications(settings).await;
        let response = self.guard(result).await?;
        self.adopt_user(&response);
        Ok(response)
    }

    fn adopt_user(&mut self, response: &MessageResponse) {
        if let Some(user) = &response.user {
            self.user = Some(user.clone());
        }
    }

    // ─── Issuance ────────────────────────────────────────────────────────────

    /// Submits one certificate and starts tracking its task.
    pub async fn issue(
        &mut self,
        request: &IssueCertificateRequest,
    ) -> Result<SingleIssueResponse> {
        let result = self.api.issue_certificate(request).await;
        let response = self.guard(result).await?;
        self.tracker.track_single(&response.task_id).await?;
        Ok(response)
    }

    pub async fn preview(&mut self, csv: &UploadFile) -> Result<PreviewResponse> {
        let result = self.api.preview_bulk(csv).await;
        self.guard(result).await
    }

    /// Starts a batch from a clean preview and installs its task records.
    ///
    /// The previous batch stays on display until the server accepts the new
    /// one; a logout or reset in between discards the late ingest.
    pub async fn start_batch(
        &mut self,
        preview: &PreviewResponse,
        file_name: &str,
        folder_link: Option<&str>,
    ) -> Result<BatchStarted> {
        preview.ensure_startable()?;
        if !self.api.has_token() {
            return Err(SessionError::NotAuthenticated);
        }

        let generation = self.tracker.begin_batch().await?;
        let request = BatchStartRequest {
            rows: preview.data.clone(),
            folder_link: folder_link
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
            file_name: file_name.to_string(),
        };
        let result = self.api.start_bulk(&request).await;
        let response = self.guard(result).await?;

        let outcome = ingest(&preview.data, &response);
        let tracked = outcome.tasks.len();
        let diagnostics = outcome.diagnostics.clone();
        let installed = self.tracker.ingest(generation, outcome).await?;
        if !installed {
            warn!(
                "Batch {} was superseded before it could be tracked",
                response.batch_id
            );
        }

        Ok(BatchStarted {
            batch_id: response.batch_id,
            tracked,
            diagnostics,
            installed,
        })
    }

    // ─── Search & verify ─────────────────────────────────────────────────────

    /// Loads a search page into `state`. Failures are recorded in the state
    /// without clearing the page already shown; a 401 also invalidates the
    /// session.
    pub async fn search(&mut self, state: &mut SearchState, query: SearchQuery) -> bool {
        let ticket = state.begin();
        let result = self.api.search(&query).await;
        let unauthorized = matches!(result, Err(ApiError::Unauthorized { .. }));
        let ok = result.is_ok();
        let applied = state.complete(ticket, query, result);
        if unauthorized {
            self.invalidate().await;
        }
        applied && ok
    }

    pub async fn verify(&mut self, certificate: &UploadFile) -> Result<VerificationResult> {
        let result = self.api.verify(certificate).await;
        self.guard(result).await
    }

    pub async fn public_verify(&self, certificate_id: &str) -> Result<VerificationResult> {
        Ok(self.api.public_verify(certificate_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn token(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySessionStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&token("abc")).unwrap();
        assert_eq!(store.load().unwrap().unwrap().expose_secret(), "abc");
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_memory_store_reports_poisoned_lock() {
        let store = Arc::new(MemorySessionStore::new());
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.token.lock().unwrap();
            panic!("poison the store");
        })
        .join();

        assert!(matches!(store.load(), Err(SessionError::Poisoned)));
        assert!(matches!(store.save(&token("abc")), Err(SessionError::Poisoned)));
        assert!(matches!(store.clear(), Err(SessionError::Poisoned)));
    }

    #[test]
    fn test_file_store_plaintext() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let store = FileSessionStore::new(&path, None);

        assert!(store.load().unwrap().is_none());
        store.save(&token("plain-token")).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("plain-token"));
        assert_eq!(store.load().unwrap().unwrap().expose_secret(), "plain-token");

        store.clear().unwrap();
        assert!(!path.exists());
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_sealed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let cipher = TokenCipher::from_hex_key(TEST_KEY).unwrap();
        let store = FileSessionStore::new(&path, Some(cipher));

        store.save(&token("sealed-token")).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("sealed-token"));
        assert!(raw.contains("\"sealed\": true"));
        assert_eq!(store.load().unwrap().unwrap().expose_secret(), "sealed-token");

        // Without the key the sealed token cannot be used
        let keyless = FileSessionStore::new(&path, None);
        assert!(matches!(keyless.load(), Err(SessionError::Corrupt(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"), None);
        store.save(&token("t")).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        let store = FileSessionStore::new(&path, None);
        assert!(matches!(store.load(), Err(SessionError::Corrupt(_))));
    }
}
