//! Search Client: queries the provider for each alert, pages through results,
//! deduplicates by URL and scores every candidate.

mod client;
mod fetcher;
mod types;
mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use self::client::{create_http_client, page_from_response, SearchProvider, SerpApiProvider, SerpApiSettings};
pub use self::fetcher::SearchClient;
pub use self::types::*;
pub use self::util::{parse_date, recency_window, resolve_outlet, sanitize_query};
