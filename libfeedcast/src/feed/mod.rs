//! Feed retrieval and entry selection
//!
//! A feed is fetched once per run and scanned in document order. Only the
//! first entry that has not been published yet is returned; older unposted
//! entries further down wait for later runs.

use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_MAX_FEED_BYTES;
use crate::db::DedupStore;
use crate::error::{FeedError, Result};

pub mod decode;
pub mod parser;

pub use decode::{decode_feed, DecodedFeed};
pub use parser::parse_entries;

/// A media reference attached to an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub url: String,
    pub mime_type: Option<String>,
    /// `medium` attribute of `media:content` ("image", "video", ...)
    pub medium: Option<String>,
}

impl MediaRef {
    /// Unless the feed says otherwise, a reference is assumed to be an image
    pub fn is_image(&self) -> bool {
        let mime_ok = self
            .mime_type
            .as_deref()
            .map_or(true, |mime| mime.to_ascii_lowercase().starts_with("image/"));
        let medium_ok = self
            .medium
            .as_deref()
            .map_or(true, |medium| medium.eq_ignore_ascii_case("image"));
        mime_ok && medium_ok
    }
}

/// A single feed item
///
/// Every field is optional because feeds in the wild omit any of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub media_content: Vec<MediaRef>,
    pub media_thumbnails: Vec<MediaRef>,
    pub enclosures: Vec<MediaRef>,
}

impl Entry {
    /// Natural identifier: the explicit id, else the link
    pub fn identifier(&self) -> Option<&str> {
        self.id.as_deref().or(self.link.as_deref())
    }

    /// First image reference from media content, then thumbnails, then
    /// enclosures
    pub fn image_url(&self) -> Option<&str> {
        self.media_content
            .iter()
            .chain(&self.media_thumbnails)
            .chain(&self.enclosures)
            .find(|media| media.is_image())
            .map(|media| media.url.as_str())
    }
}

/// Raw feed payload
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

/// HTTP feed fetcher
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl FeedFetcher {
    /// Create a fetcher whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("feedcast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FeedError::Request)?;
        Ok(Self {
            client,
            max_bytes: DEFAULT_MAX_FEED_BYTES,
        })
    }

    /// Refuse feed bodies larger than `max_bytes`
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Download the feed; non-2xx responses are errors
    pub async fn fetch(&self, url: &str) -> std::result::Result<FetchedFeed, FeedError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let limit = self.max_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(FeedError::TooLarge { limit });
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(FeedError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedFeed { body, content_type })
    }

    /// Download, decode and parse a feed
    pub async fn fetch_entries(&self, url: &str) -> std::result::Result<Vec<Entry>, FeedError> {
        let fetched = self.fetch(url).await?;
        let decoded = decode_feed(&fetched.body, fetched.content_type.as_deref());
        if decoded.lossy {
            warn!(
                "Could not detect the encoding of {}, decoded as lossy UTF-8",
                url
            );
        } else {
            debug!("Decoded {} as {}", url, decoded.encoding);
        }
        parse_entries(&decoded.text)
    }

    /// Newest entry of the feed that has not been published yet
    ///
    /// Fetch and parse failures are logged and give `None`.
    pub async fn fetch_latest_unposted(
        &self,
        feed_url: &str,
        store: &dyn DedupStore,
    ) -> Option<Entry> {
        let entries = match self.fetch_entries(feed_url).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping feed {}: {}", feed_url, e);
                return None;
            }
        };

        debug!("Feed {} has {} entries", feed_url, entries.len());
        first_unposted(feed_url, entries, store).await
    }
}

/// First entry, in feed order, whose identifier is not in the store
///
/// Entries with neither id nor link are ignored. A failing store lookup
/// counts as "not posted".
pub async fn first_unposted(
    feed_url: &str,
    entries: Vec<Entry>,
    store: &dyn DedupStore,
) -> Option<Entry> {
    for entry in entries {
        let Some(entry_id) = entry.identifier() else {
            continue;
        };

        match store.is_posted(feed_url, entry_id).await {
            Ok(true) => continue,
            Ok(false) => {
                info!("New entry {} found in {}", entry_id, feed_url);
                return Some(entry);
            }
            Err(e) => {
                warn!(
                    "Dedup lookup failed for {} in {}, treating as unposted: {}",
                    entry_id, feed_url, e
                );
                return Some(entry);
            }
        }
    }

    debug!("No unposted entries in {}", feed_url);
    None
}
