//! Paginated certificate search.

use certdesk::api::{SearchPage, SearchQuery};
use certdesk::SearchState;

use super::{render, CliError};
use crate::state::CliState;

pub async fn search(
    state: &mut CliState,
    query: Option<&str>,
    page: u32,
    json: bool,
) -> Result<(), CliError> {
    let mut query_params = SearchQuery::page(page);
    if let Some(text) = query {
        query_params = query_params.with_search(text);
    }

    let mut view = SearchState::new();
    if !state.session.search(&mut view, query_params).await {
        if state.session.needs_reauth() {
            return Err(CliError::NotLoggedIn);
        }
        return Err(CliError::Search(
            view.error().unwrap_or("no response").to_string(),
        ));
    }

    match view.page() {
        Some(page) => render(json, page, describe),
        None => Ok(()),
    }
}

fn describe(page: &SearchPage) -> String {
    if page.data.is_empty() {
        return "No certificates found".to_string();
    }
    let mut out = format!(
        "Page {} of {} ({} certificates)",
        page.current_page,
        page.total_pages.max(1),
        page.total_count
    );
    for certificate in &page.data {
        out.push_str(&format!(
            "\n  {}  {} <{}>  {}",
            certificate.id,
            certificate.recipient_name,
            certificate.recipient_email,
            certificate.certificate_name
        ));
        if let Some(status) = &certificate.status {
            out.push_str(&format!("  [{}]", status));
        }
    }
    out
}
