//! Paginated certificate search view.
//!
//! A failed fetch records a message but keeps the last page that loaded, so
//! an error on page 2 never blanks the results of page 1. Responses to
//! superseded requests are ignored.

use log::{debug, warn};
use serde::Serialize;

use crate::api::{CertificateSummary, SearchPage, SearchQuery};
use crate::error::ApiError;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchState {
    #[serde(skip)]
    shown_query: Option<SearchQuery>,
    page: Option<SearchPage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    loading: bool,
    #[serde(skip)]
    latest_ticket: u64,
}

impl SearchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of the last successfully loaded page.
    pub fn results(&self) -> &[CertificateSummary] {
        self.page.as_ref().map(|p| p.data.as_slice()).unwrap_or_default()
    }

    pub fn page(&self) -> Option<&SearchPage> {
        self.page.as_ref()
    }

    /// Query that produced the shown page.
    pub fn shown_query(&self) -> Option<&SearchQuery> {
        self.shown_query.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn has_next_page(&self) -> bool {
        self.page
            .as_ref()
            .is_some_and(|p| p.current_page < p.total_pages)
    }

    pub fn has_previous_page(&self) -> bool {
        self.page.as_ref().is_some_and(|p| p.current_page > 1)
    }

    /// Marks a request as in flight and returns its ticket.
    pub fn begin(&mut self) -> u64 {
        self.latest_ticket += 1;
        self.loading = true;
        self.latest_ticket
    }

    /// Records the result of request `ticket`. Returns false if a newer
    /// request was started in the meantime and the result was ignored.
    pub fn complete(
        &mut self,
        ticket: u64,
        query: SearchQuery,
        result: Result<SearchPage, ApiError>,
    ) -> bool {
        if ticket != self.latest_ticket {
            debug!("Ignoring superseded search response #{}", ticket);
            return false;
        }

        self.loading = false;
        match result {
            Ok(page) => {
                self.page = Some(page);
                self.shown_query = Some(query);
                self.error = None;
            }
            Err(e) => {
                warn!("Search for page {} failed: {}", query.page, e);
                self.error = Some(e.to_string());
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(current: u32, total_pages: u32, ids: &[&str]) -> SearchPage {
        SearchPage {
            data: ids
                .iter()
                .map(|id| CertificateSummary {
                    id: id.to_string(),
                    ..Default::default()
                })
                .collect(),
            current_page: current,
            total_pages,
            total_count: 25,
        }
    }

    #[test]
    fn test_failed_page_keeps_previous_results() {
        let mut state = SearchState::new();

        let ticket = state.begin();
        assert!(state.is_loading());
        state.complete(ticket, SearchQuery::page(1), Ok(page(1, 3, &["a", "b"])));
        assert_eq!(state.results().len(), 2);
        assert!(state.has_next_page());
        assert!(!state.has_previous_page());

        let ticket = state.begin();
        state.complete(
            ticket,
            SearchQuery::page(2),
            Err(ApiError::Transport("connection reset".to_string())),
        );

        assert!(!state.is_loading());
        assert_eq!(state.results().len(), 2);
        assert_eq!(state.page().unwrap().current_page, 1);
        assert_eq!(state.shown_query().unwrap().page, 1);
        assert!(state.error().unwrap().contains("connection reset"));
    }

    #[test]
    fn test_success_clears_error() {
        let mut state = SearchState::new();
        let ticket = state.begin();
        state.complete(ticket, SearchQuery::page(1), Err(ApiError::MissingToken));
        assert!(state.error().is_some());
        assert!(state.results().is_empty());

        let ticket = state.begin();
        state.complete(ticket, SearchQuery::page(2), Ok(page(2, 3, &["c"])));
        assert!(state.error().is_none());
        assert!(state.has_previous_page());
    }

    #[test]
    fn test_superseded_response_is_ignored() {
        let mut state = SearchState::new();
        let slow = state.begin();
        let fast = state.begin();

        assert!(state.complete(fast, SearchQuery::page(3), Ok(page(3, 3, &["z"]))));
        assert!(!state.complete(slow, SearchQuery::page(2), Ok(page(2, 3, &["y"]))));
        assert_eq!(state.page().unwrap().current_page, 3);
        assert!(!state.has_next_page());
    }
}
