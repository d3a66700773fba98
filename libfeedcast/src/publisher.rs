//! Turning a feed entry into a published post
//!
//! The publisher composes the post text, stages the entry image when the
//! account may attach media, and posts with retries for transient errors.
//! Nothing here returns an error: every path ends in a [`PublishOutcome`].

use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::accounts::{Account, PostFormat};
use crate::error::{FeedError, FeedcastError, PlatformError, Result};
use crate::feed::Entry;
use crate::platforms::{Platform, PostRequest};
use crate::types::{Capability, ImageMimeType};

const ELLIPSIS: char = '…';

/// Result of a single publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { post_id: String, with_media: bool },
    Failed {
        reason: String,
        /// The platform refused the account itself, not just this post
        account_rejected: bool,
    },
    /// Dry run; nothing was sent
    Skipped,
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }

    fn failed(reason: impl Into<String>) -> Self {
        PublishOutcome::Failed {
            reason: reason.into(),
            account_rejected: false,
        }
    }
}

/// Authentication failures stop the account; a post refused with 403 too
fn rejects_account(error: &FeedcastError, posting: bool) -> bool {
    match error.as_platform() {
        Some(PlatformError::Authentication(_)) => true,
        Some(PlatformError::PermissionDenied(_)) => posting,
        _ => false,
    }
}

/// Exponential backoff for transient posting errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each later one
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Compose the post body for an entry
///
/// The title is shortened with an ellipsis so the whole body fits in
/// `limit` characters; the link is kept intact even if it alone exceeds
/// the limit. Returns `None` for an entry with neither link nor id.
pub fn compose_text(entry: &Entry, format: PostFormat, limit: usize) -> Option<String> {
    let link = entry.link.as_deref().or(entry.identifier())?.trim();

    let title = match format {
        PostFormat::LinkOnly => None,
        PostFormat::TitleAndLink => entry
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty()),
    };

    let Some(title) = title else {
        return Some(link.to_string());
    };

    // Room left for the title once the link and the newline are in
    let room = limit.saturating_sub(link.chars().count() + 1);
    if title.chars().count() <= room {
        return Some(format!("{}\n{}", title, link));
    }
    if room < 2 {
        return Some(link.to_string());
    }

    let mut shortened: String = title.chars().take(room - 1).collect();
    shortened.truncate(shortened.trim_end().len());
    shortened.push(ELLIPSIS);
    Some(format!("{}\n{}", shortened, link))
}

/// Post with retry logic and exponential backoff
///
/// Only transient errors (network, rate limit) are retried; anything else
/// is returned at once.
pub async fn post_with_retry(
    platform: &dyn Platform,
    request: &PostRequest,
    policy: &RetryPolicy,
) -> Result<String> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match platform.post(request).await {
            Ok(post_id) => {
                if attempt > 1 {
                    info!(
                        "Successfully posted to {} on attempt {}",
                        platform.name(),
                        attempt
                    );
                }
                return Ok(post_id);
            }
            Err(e) => {
                let transient = e.as_platform().is_some_and(|p| p.is_transient());
                if !transient || attempt >= max_attempts {
                    if transient {
                        warn!(
                            "Failed to post to {} after {} attempts: {}",
                            platform.name(),
                            max_attempts,
                            e
                        );
                    }
                    return Err(e);
                }

                let delay = policy.delay_after(attempt);
                warn!(
                    "Transient error posting to {} (attempt {}/{}): {}. Retrying in {:?}",
                    platform.name(),
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// An image downloaded for upload; the file goes away on drop
struct StagedImage {
    file: NamedTempFile,
    mime_type: ImageMimeType,
    size: u64,
}

pub struct Publisher {
    client: reqwest::Client,
    staging_dir: PathBuf,
    max_image_bytes: u64,
    retry: RetryPolicy,
    dry_run: bool,
}

impl Publisher {
    /// Create a publisher staging images under `staging_dir`
    pub fn new(staging_dir: PathBuf, max_image_bytes: u64, fetch_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .user_agent(concat!("feedcast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FeedError::Request)?;

        Ok(Self {
            client,
            staging_dir,
            max_image_bytes,
            retry: RetryPolicy::default(),
            dry_run: false,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Compose and log posts without sending them
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Publish one entry for `account`
    pub async fn publish(
        &self,
        platform: &dyn Platform,
        account: &Account,
        entry: &Entry,
        capability: Capability,
    ) -> PublishOutcome {
        let Some(text) =
            compose_text(entry, account.post_format, platform.character_limit())
        else {
            return PublishOutcome::failed("entry has neither link nor id");
        };

        if self.dry_run {
            info!(
                "[dry run] {} would post: {:?} (image: {})",
                account.name,
                text,
                entry.image_url().unwrap_or("none")
            );
            return PublishOutcome::Skipped;
        }

        let mut request = PostRequest::text(text);

        match entry.image_url() {
            Some(image_url) if capability.allows_media() => match self
                .stage_image(image_url)
                .await
            {
                Ok(staged) => {
                    debug!(
                        "Staged {} ({} bytes, {}) at {}",
                        image_url,
                        staged.size,
                        staged.mime_type,
                        staged.file.path().display()
                    );
                    match platform
                        .upload_media(staged.file.path(), staged.mime_type)
                        .await
                    {
                        Ok(media_id) => request = request.with_media(media_id),
                        Err(e) => {
                            error!(
                                "Image upload to {} failed for {}: {}",
                                platform.name(),
                                account.name,
                                e
                            );
                            return PublishOutcome::Failed {
                                reason: e.to_string(),
                                account_rejected: rejects_account(&e, false),
                            };
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "Could not stage image {}, posting text only: {}",
                        image_url, e
                    );
                }
            },
            Some(_) => {
                debug!("{} has restricted access, posting text only", account.name);
            }
            None => {}
        }

        let with_media = !request.media_ids.is_empty();
        match post_with_retry(platform, &request, &self.retry).await {
            Ok(post_id) => {
                info!(
                    "Published to {} for {} as {}{}",
                    platform.name(),
                    account.name,
                    post_id,
                    if with_media { " with image" } else { "" }
                );
                PublishOutcome::Published {
                    post_id,
                    with_media,
                }
            }
            Err(e) => {
                error!(
                    "Publishing to {} failed for {}: {}",
                    platform.name(),
                    account.name,
                    e
                );
                PublishOutcome::Failed {
                    reason: e.to_string(),
                    account_rejected: rejects_account(&e, true),
                }
            }
        }
    }

    /// Download `url` into a temp file in the staging directory
    ///
    /// The body is streamed to disk and aborted once it passes
    /// `max_image_bytes`.
    async fn stage_image(&self, url: &str) -> Result<StagedImage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FeedError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(ImageMimeType::from_mime_str);
        let mime_type = header_mime
            .or_else(|| ImageMimeType::from_path(url))
            .ok_or_else(|| {
                FeedcastError::InvalidInput(format!("{} is not a supported image type", url))
            })?;

        let limit = self.max_image_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(FeedError::TooLarge { limit }.into());
        }

        std::fs::create_dir_all(&self.staging_dir).map_err(FeedError::Io)?;
        let mut file = tempfile::Builder::new()
            .prefix("feedcast-")
            .suffix(&format!(".{}", mime_type.extension()))
            .tempfile_in(&self.staging_dir)
            .map_err(FeedError::Io)?;

        let mut size = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(FeedError::Request)?;
            size += chunk.len() as u64;
            if size > limit {
                return Err(FeedError::TooLarge { limit }.into());
            }
            file.write_all(&chunk).map_err(FeedError::Io)?;
        }
        file.flush().map_err(FeedError::Io)?;

        Ok(StagedImage {
            file,
            mime_type,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Credentials;
    use crate::feed::MediaRef;
    use crate::platforms::mock::MockPlatform;
    use secrecy::SecretString;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nnot really an image";

    fn account(format: PostFormat) -> Account {
        Account {
            name: "news".to_string(),
            credentials: Credentials {
                instance: "mastodon.example".to_string(),
                access_token: SecretString::from("token".to_string()),
            },
            feeds: vec!["https://example.com/feed.xml".to_string()],
            delay: Duration::from_secs(0),
            post_format: format,
        }
    }

    fn entry(title: Option<&str>, link: Option<&str>) -> Entry {
        Entry {
            id: Some("id-1".to_string()),
            title: title.map(String::from),
            link: link.map(String::from),
            ..Default::default()
        }
    }

    fn with_image(mut entry: Entry, url: String) -> Entry {
        entry.media_content.push(MediaRef {
            url,
            mime_type: None,
            medium: None,
        });
        entry
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn publisher(staging: &TempDir) -> Publisher {
        Publisher::new(staging.path().to_path_buf(), 1024, Duration::from_secs(5))
            .unwrap()
            .with_retry_policy(fast_retry())
    }

    fn staging_is_empty(dir: &TempDir) -> bool {
        std::fs::read_dir(dir.path()).unwrap().next().is_none()
    }

    async fn image_server(body: &[u8], content_type: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/image.png"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_vec(), content_type))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_compose_title_and_link() {
        let e = entry(Some("  Hello world "), Some("https://example.com/a"));
        assert_eq!(
            compose_text(&e, PostFormat::TitleAndLink, 500).unwrap(),
            "Hello world\nhttps://example.com/a"
        );
        assert_eq!(
            compose_text(&e, PostFormat::LinkOnly, 500).unwrap(),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_compose_truncates_title_only() {
        let link = "https://example.com/a";
        let e = entry(Some(&"word ".repeat(40)), Some(link));

        let text = compose_text(&e, PostFormat::TitleAndLink, 60).unwrap();
        assert_eq!(text.chars().count(), 60);
        assert!(text.ends_with(&format!("…\n{}", link)));

        // A link longer than the limit is still posted whole
        let long_link = format!("https://example.com/{}", "x".repeat(100));
        let e = entry(Some("Title"), Some(&long_link));
        assert_eq!(
            compose_text(&e, PostFormat::TitleAndLink, 50).unwrap(),
            long_link
        );
    }

    #[test]
    fn test_compose_without_link_uses_identifier() {
        let e = entry(Some("Title"), None);
        assert_eq!(
            compose_text(&e, PostFormat::TitleAndLink, 500).unwrap(),
            "Title\nid-1"
        );
        assert!(compose_text(&Entry::default(), PostFormat::LinkOnly, 500).is_none());
    }

    #[test]
    fn test_retry_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_post_with_retry_recovers_from_transient() {
        let platform =
            MockPlatform::flaky("mock", PlatformError::RateLimit("slow down".to_string()), 2);
        let result = post_with_retry(&platform, &PostRequest::text("hi"), &fast_retry()).await;

        assert_eq!(result.unwrap(), "mock-post-1");
        assert_eq!(platform.post_attempts(), 3);
    }

    #[tokio::test]
    async fn test_post_with_retry_exhausts_attempts() {
        let platform = MockPlatform::post_failure(
            "mock",
            PlatformError::Network("connection refused".to_string()),
        );
        let result = post_with_retry(&platform, &PostRequest::text("hi"), &fast_retry()).await;

        assert!(result.is_err());
        assert_eq!(platform.post_attempts(), 3);
    }

    #[tokio::test]
    async fn test_post_with_retry_permanent_failure() {
        let platform = MockPlatform::post_failure(
            "mock",
            PlatformError::Authentication("revoked".to_string()),
        );
        let result = post_with_retry(&platform, &PostRequest::text("hi"), &fast_retry()).await;

        assert!(matches!(
            result,
            Err(FeedcastError::Platform(PlatformError::Authentication(_)))
        ));
        assert_eq!(platform.post_attempts(), 1);
    }

    #[tokio::test]
    async fn test_elevated_publish_attaches_image() {
        let server = image_server(PNG, "image/png").await;
        let staging = TempDir::new().unwrap();
        let platform = MockPlatform::success("mock");
        let e = with_image(
            entry(Some("Title"), Some("https://example.com/a")),
            format!("{}/image.png", server.uri()),
        );

        let outcome = publisher(&staging)
            .publish(&platform, &account(PostFormat::TitleAndLink), &e, Capability::Elevated)
            .await;

        assert_eq!(
            outcome,
            PublishOutcome::Published {
                post_id: "mock-post-1".to_string(),
                with_media: true
            }
        );
        let uploads = platform.uploads();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].existed);
        assert_eq!(uploads[0].size, PNG.len() as u64);
        assert_eq!(uploads[0].mime_type, ImageMimeType::Png);
        assert_eq!(platform.posts()[0].media_ids, vec!["mock-media-1".to_string()]);
        assert!(staging_is_empty(&staging));
    }

    #[tokio::test]
    async fn test_restricted_publish_never_downloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(PNG.to_vec(), "image/png"))
            .expect(0)
            .mount(&server)
            .await;

        let staging = TempDir::new().unwrap();
        let platform = MockPlatform::success("mock");
        let e = with_image(
            entry(Some("Title"), Some("https://example.com/a")),
            format!("{}/image.png", server.uri()),
        );

        let outcome = publisher(&staging)
            .publish(&platform, &account(PostFormat::TitleAndLink), &e, Capability::Restricted)
            .await;

        assert!(outcome.is_published());
        assert!(platform.uploads().is_empty());
        assert!(platform.posts()[0].media_ids.is_empty());
    }

    #[tokio::test]
    async fn test_staging_failure_falls_back_to_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let staging = TempDir::new().unwrap();
        let platform = MockPlatform::success("mock");
        let e = with_image(
            entry(Some("Title"), Some("https://example.com/a")),
            format!("{}/missing.png", server.uri()),
        );

        let outcome = publisher(&staging)
            .publish(&platform, &account(PostFormat::TitleAndLink), &e, Capability::Elevated)
            .await;

        assert_eq!(
            outcome,
            PublishOutcome::Published {
                post_id: "mock-post-1".to_string(),
                with_media: false
            }
        );
        assert!(platform.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_image_is_dropped() {
        let big = vec![0u8; 4096];
        let server = image_server(&big, "image/png").await;
        let staging = TempDir::new().unwrap();
        let platform = MockPlatform::success("mock");
        let e = with_image(
            entry(Some("Title"), Some("https://example.com/a")),
            format!("{}/image.png", server.uri()),
        );

        let outcome = publisher(&staging)
            .publish(&platform, &account(PostFormat::TitleAndLink), &e, Capability::Elevated)
            .await;

        assert!(outcome.is_published());
        assert!(platform.uploads().is_empty());
        assert!(staging_is_empty(&staging));
    }

    #[tokio::test]
    async fn test_upload_failure_fails_publish_and_cleans_up() {
        let server = image_server(PNG, "image/png").await;
        let staging = TempDir::new().unwrap();
        let platform = MockPlatform::media_forbidden("mock");
        let e = with_image(
            entry(Some("Title"), Some("https://example.com/a")),
            format!("{}/image.png", server.uri()),
        );

        let outcome = publisher(&staging)
            .publish(&platform, &account(PostFormat::TitleAndLink), &e, Capability::Elevated)
            .await;

        assert!(matches!(
            outcome,
            PublishOutcome::Failed {
                account_rejected: false,
                ..
            }
        ));
        assert!(platform.uploads()[0].existed);
        assert!(platform.posts().is_empty());
        assert!(staging_is_empty(&staging));
    }

    #[tokio::test]
    async fn test_post_failure_after_upload_cleans_up() {
        let server = image_server(PNG, "image/png").await;
        let staging = TempDir::new().unwrap();
        let platform = MockPlatform::post_failure(
            "mock",
            PlatformError::Validation("rejected".to_string()),
        );
        let e = with_image(
            entry(Some("Title"), Some("https://example.com/a")),
            format!("{}/image.png", server.uri()),
        );

        let outcome = publisher(&staging)
            .publish(&platform, &account(PostFormat::TitleAndLink), &e, Capability::Elevated)
            .await;

        assert!(matches!(
            outcome,
            PublishOutcome::Failed {
                account_rejected: false,
                ..
            }
        ));
        assert_eq!(platform.uploads().len(), 1);
        assert!(staging_is_empty(&staging));
    }

    #[tokio::test]
    async fn test_revoked_token_rejects_account() {
        let staging = TempDir::new().unwrap();
        let platform = MockPlatform::post_failure(
            "mock",
            PlatformError::Authentication("token revoked".to_string()),
        );
        let e = entry(Some("Title"), Some("https://example.com/a"));

        let outcome = publisher(&staging)
            .publish(&platform, &account(PostFormat::TitleAndLink), &e, Capability::Restricted)
            .await;

        assert!(matches!(
            outcome,
            PublishOutcome::Failed {
                account_rejected: true,
                ..
            }
        ));
        // Not transient, so no retry
        assert_eq!(platform.post_attempts(), 1);
    }

    #[tokio::test]
    async fn test_refused_post_rejects_account() {
        let staging = TempDir::new().unwrap();
        let platform = MockPlatform::post_failure(
            "mock",
            PlatformError::PermissionDenied("account suspended".to_string()),
        );
        let e = entry(Some("Title"), Some("https://example.com/a"));

        let outcome = publisher(&staging)
            .publish(&platform, &account(PostFormat::LinkOnly), &e, Capability::Restricted)
            .await;

        assert!(matches!(
            outcome,
            PublishOutcome::Failed {
                account_rejected: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let staging = TempDir::new().unwrap();
        let platform = MockPlatform::success("mock");
        let e = entry(Some("Title"), Some("https://example.com/a"));

        let outcome = publisher(&staging)
            .with_dry_run(true)
            .publish(&platform, &account(PostFormat::TitleAndLink), &e, Capability::Elevated)
            .await;

        assert_eq!(outcome, PublishOutcome::Skipped);
        assert_eq!(platform.post_attempts(), 0);
    }
}
