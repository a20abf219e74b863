//! Scripted provider for tests. No network access.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::client::SearchProvider;
use super::types::{PageRequest, SearchHit, SearchPage};
use crate::error::SearchError;

/// Replays canned pages in order and records every request. Once the script
/// runs out it answers with empty pages.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<SearchPage, SearchError>>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<SearchPage, SearchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for ScriptedProvider {
    async fn fetch_page(&self, request: &PageRequest) -> Result<SearchPage, SearchError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SearchPage::default()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn hit(position: Option<u32>, title: &str, link: &str) -> SearchHit {
    SearchHit {
        position,
        title: Some(title.to_string()),
        link: Some(link.to_string()),
        ..Default::default()
    }
}

pub fn page(hits: Vec<SearchHit>, next: Option<&str>) -> SearchPage {
    SearchPage {
        hits,
        next: next.map(str::to_string),
    }
}
