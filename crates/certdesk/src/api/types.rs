//! Request and response bodies of the certificate backend.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

// ─── Users & auth ───────────────────────────────────────────────────────────

/// Account of the logged-in issuer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_settings: Option<NotificationSettings>,
}

/// `{user, token}` returned by login and register.
#[derive(Deserialize)]
pub(crate) struct AuthPayload {
    pub user: User,
    pub token: String,
}

/// `{user}` returned by `GET /users/me`.
#[derive(Debug, Deserialize)]
pub(crate) struct UserEnvelope {
    pub user: User,
}

#[derive(Serialize)]
pub(crate) struct LoginBody<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// New account details.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("email", &crate::sanitize::redact_email(&self.email))
            .field("password", &"***")
            .field("organization", &self.organization)
            .finish()
    }
}

/// Partial profile update; unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

impl std::fmt::Debug for PasswordChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordChange { .. }")
    }
}

/// Email notification preferences.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub email_on_issue: bool,
    pub email_on_failure: bool,
    pub email_on_verification: bool,
}

/// `{message, user?}` returned by profile updates.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user: Option<User>,
}

// ─── Uploads ────────────────────────────────────────────────────────────────

/// A file attached to a multipart request.
#[derive(Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: &str, bytes: Vec<u8>) -> Self {
        let mime = mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            file_name: file_name.to_string(),
            mime,
            bytes,
        }
    }

    /// Reads a file from disk, guessing its MIME type from the extension.
    pub async fn from_path(path: &Path) -> Result<Self, ApiError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ApiError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self::new(&file_name, bytes))
    }
}

impl std::fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadFile")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

// ─── Single issue ───────────────────────────────────────────────────────────

/// Form for issuing one certificate.
#[derive(Debug, Clone, Default)]
pub struct IssueCertificateRequest {
    pub recipient_name: String,
    pub recipient_email: String,
    pub certificate_name: String,
    pub roll_no: Option<String>,
    pub issue_date: Option<String>,
    pub grade: Option<String>,
    pub certificate_link: Option<String>,
    pub file: Option<UploadFile>,
}

impl IssueCertificateRequest {
    /// Checks required fields before anything is sent.
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut missing = Vec::new();
        if self.recipient_name.trim().is_empty() {
            missing.push("recipient name");
        }
        if self.recipient_email.trim().is_empty() {
            missing.push("recipient email");
        }
        if self.certificate_name.trim().is_empty() {
            missing.push("certificate name");
        }
        if self.file.is_none() && self.certificate_link.as_deref().is_none_or(str::is_empty) {
            missing.push("certificate file or link");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(format!("missing {}", missing.join(", "))))
        }
    }

    /// Text parts of the multipart form, in a stable order.
    pub fn text_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("recipientName", self.recipient_name.trim().to_string()),
            ("recipientEmail", self.recipient_email.trim().to_string()),
            ("certificateName", self.certificate_name.trim().to_string()),
        ];
        let optional = [
            ("rollNo", &self.roll_no),
            ("issueDate", &self.issue_date),
            ("grade", &self.grade),
            ("certificateLink", &self.certificate_link),
        ];
        for (name, value) in optional {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                fields.push((name, value.trim().to_string()));
            }
        }
        fields
    }
}

/// `202 {taskId}` acknowledgement of a single submission.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SingleIssueResponse {
    pub task_id: String,
}

// ─── Bulk issue ─────────────────────────────────────────────────────────────

/// One previewed CSV row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CsvRow {
    #[serde(rename = "rowNumber")]
    pub row_number: u32,
    #[serde(rename = "Roll No", default)]
    pub roll_no: String,
    #[serde(rename = "Recipient Name", default)]
    pub recipient_name: String,
    #[serde(rename = "Recipient Email", default)]
    pub recipient_email: String,
    #[serde(rename = "Certificate Name/Type", default)]
    pub certificate_name: String,
    #[serde(rename = "Issue Date", default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    #[serde(rename = "Certificate Link", default)]
    pub certificate_link: String,
    #[serde(rename = "Grade", default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    #[serde(rename = "_validationError", default, skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
}

impl CsvRow {
    /// Key the server embeds in assigned task ids.
    pub fn natural_key(&self) -> &str {
        self.roll_no.trim()
    }

    pub fn has_error(&self) -> bool {
        self.validation_error
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty())
    }
}

/// Server-side preview of an uploaded CSV.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    #[serde(default)]
    pub data: Vec<CsvRow>,
    #[serde(default)]
    pub has_row_errors: bool,
}

impl PreviewResponse {
    /// Rows carrying a validation error, as `(row number, message)`.
    pub fn row_errors(&self) -> Vec<(u32, &str)> {
        self.data
            .iter()
            .filter(|row| row.has_error())
            .map(|row| (row.row_number, row.validation_error.as_deref().unwrap_or_default()))
            .collect()
    }

    /// Fails while any row carries a validation error; a batch may only be
    /// started from a clean, non-empty preview.
    pub fn ensure_startable(&self) -> Result<(), ApiError> {
        if self.data.is_empty() {
            return Err(ApiError::Validation("preview contains no rows".to_string()));
        }

        let errors = self.row_errors();
        if !errors.is_empty() {
            let rows: Vec<String> = errors.iter().map(|(n, _)| n.to_string()).collect();
            return Err(ApiError::Validation(format!(
                "fix validation errors in rows {} before starting",
                rows.join(", ")
            )));
        }
        if self.has_row_errors {
            return Err(ApiError::Validation(
                "server reported row errors in this preview".to_string(),
            ));
        }
        Ok(())
    }
}

/// Body of `POST /certificates/bulk-issue-start`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStartRequest {
    pub rows: Vec<CsvRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_link: Option<String>,
    pub file_name: String,
}

/// `202 {batchId, taskIds}` acknowledgement of a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchStartResponse {
    pub batch_id: String,
    #[serde(default)]
    pub task_ids: Vec<String>,
    /// Explicit `rowNumber -> taskId` table, when the server provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignments: Option<BTreeMap<u32, String>>,
}

// ─── Search & verify ────────────────────────────────────────────────────────

/// Paginated search parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            search: None,
        }
    }
}

impl SearchQuery {
    pub fn page(page: u32) -> Self {
        Self {
            page: page.max(1),
            ..Self::default()
        }
    }

    pub fn with_search(mut self, search: &str) -> Self {
        let trimmed = search.trim();
        self.search = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub(crate) fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.max(1).to_string()),
            ("limit", self.limit.max(1).to_string()),
        ];
        if let Some(search) = &self.search {
            params.push(("search", search.clone()));
        }
        params
    }
}

/// One issued certificate as listed by search.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CertificateSummary {
    #[serde(alias = "_id")]
    pub id: String,
    pub recipient_name: String,
    pub recipient_email: String,
    pub certificate_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// One page of search results.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    #[serde(default)]
    pub data: Vec<CertificateSummary>,
    #[serde(default = "first_page")]
    pub current_page: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_count: u64,
}

fn first_page() -> u32 {
    1
}

/// Outcome of verifying a certificate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub is_valid: bool,
    #[serde(default)]
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
