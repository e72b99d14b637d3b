//! Login, logout and the current user.

use certdesk::api::User;
use certdesk::channel::ChannelState;
use certdesk::resolve_secret;
use log::info;
use serde::Serialize;

use super::{render, CliError};
use crate::state::CliState;

pub const PASSWORD_ENV_VAR: &str = "CERTDESK_PASSWORD";
pub const PASSWORD_FILE_ENV_VAR: &str = "CERTDESK_PASSWORD_FILE";

/// Who is logged in and whether live updates are flowing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoamiResponse {
    pub user: User,
    pub channel: ChannelState,
}

pub async fn login(state: &mut CliState, email: &str, json: bool) -> Result<(), CliError> {
    // A password file takes precedence over the plain variable
    let password_file = std::env::var(PASSWORD_FILE_ENV_VAR).ok();
    let password = resolve_secret(None, password_file.as_deref(), Some(PASSWORD_ENV_VAR))?;

    let user = state.session.login(email, &password).await?.clone();
    info!("Session stored; push channel bound");
    render(json, &user, |u| format!("Logged in as {} <{}>", u.name, u.email))
}

pub async fn logout(state: &mut CliState, json: bool) -> Result<(), CliError> {
    state.session.logout().await?;
    render(json, &(), |_| "Logged out".to_string())
}

pub async fn whoami(state: &mut CliState, json: bool) -> Result<(), CliError> {
    let user = state.session.refresh_user().await?.clone();
    let response = WhoamiResponse {
        user,
        channel: state.session.channel_state(),
    };
    render(json, &response, |r| {
        let mut line = format!("{} <{}>", r.user.name, r.user.email);
        if let Some(organization) = &r.user.organization {
            line.push_str(&format!(", {}", organization));
        }
        line.push_str(&format!("\npush channel: {}", r.channel));
        line
    })
}
