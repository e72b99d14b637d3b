//! Certificate verification.

use std::path::Path;

use certdesk::api::{UploadFile, VerificationResult};

use super::{render, CliError};
use crate::state::CliState;

pub async fn verify(state: &mut CliState, file: &Path, json: bool) -> Result<(), CliError> {
    let certificate = UploadFile::from_path(file).await?;
    let result = state.session.verify(&certificate).await?;
    render(json, &result, describe)
}

pub async fn public_verify(state: &mut CliState, id: &str, json: bool) -> Result<(), CliError> {
    let result = state.session.public_verify(id).await?;
    render(json, &result, describe)
}

fn describe(result: &VerificationResult) -> String {
    let verdict = if result.is_valid { "VALID" } else { "NOT VALID" };
    let mut out = verdict.to_string();
    if !result.hash.is_empty() {
        out.push_str(&format!(" (hash {})", result.hash));
    }
    if let Some(message) = &result.message {
        out.push_str(&format!(": {}", message));
    }
    out
}
