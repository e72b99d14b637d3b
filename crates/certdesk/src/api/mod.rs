//! REST API of the certificate backend.

pub mod client;
pub mod types;

pub use client::{ApiClient, AuthSession};
pub use types::{
    BatchStartRequest, BatchStartResponse, CertificateSummary, CsvRow, IssueCertificateRequest,
    MessageResponse, NotificationSettings, PasswordChange, PreviewResponse, ProfileUpdate,
    Registration, SearchPage, SearchQuery, SingleIssueResponse, UploadFile, User,
    VerificationResult,
};
