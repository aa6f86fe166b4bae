//! Page discovery and fetching.
//!
//! [`enumerate`] asks the content source for every publishable address and
//! [`crawl`] turns that list into a stream of fetched bodies, consulting the
//! page cache first when one is attached.

mod crawl;
mod enumerate;
pub mod error;
mod fetch;

pub use crate::crawl::{CrawlEvent, CrawlSummary, Crawler, Strategy, crawl};
pub use crate::enumerate::{Category, Coverage, Enumeration, PageUnit, enumerate};
pub use crate::fetch::{BasicAuth, Fetch, FetchFailure, HttpFetcher, USER_AGENT, is_loopback};
