//! Mastodon platform implementation
//!
//! Talks to Mastodon (and API-compatible Fediverse servers) through the
//! megalodon library.

use async_trait::async_trait;
use megalodon::entities::{StatusVisibility, UploadMedia};
use megalodon::megalodon::{PostStatusInputOptions, PostStatusOutput};
use megalodon::{Megalodon, SNS};
use std::path::Path;
use tracing::{debug, warn};

use crate::accounts::Credentials;
use crate::error::{PlatformError, Result};
use crate::platforms::{Platform, PostRequest};
use crate::types::{ImageMimeType, Visibility};

/// Character limit used until the instance reports its own
pub const DEFAULT_CHARACTER_LIMIT: usize = 500;

/// Mastodon platform client
pub struct MastodonClient {
    client: Box<dyn Megalodon + Send + Sync>,
    instance_url: String,
    character_limit: usize,
}

impl MastodonClient {
    /// Create a client with the default character limit
    ///
    /// No request is made; use [`MastodonClient::connect`] to also pick up
    /// the instance's limit.
    pub fn new(instance_url: String, access_token: String) -> Result<Self> {
        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url.clone(),
            Some(access_token),
            None,
        )
        .map_err(|e| {
            PlatformError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
        })?;

        Ok(Self {
            client,
            instance_url,
            character_limit: DEFAULT_CHARACTER_LIMIT,
        })
    }

    /// Build a client for an account and fetch the instance character limit
    ///
    /// An unreachable instance info endpoint keeps the default limit; the
    /// credential check that follows reports real connectivity problems.
    pub async fn connect(credentials: &Credentials) -> Result<Self> {
        let mut client = Self::new(
            credentials.instance_url(),
            credentials.token().to_string(),
        )?;

        if let Err(e) = client.fetch_instance_info().await {
            warn!(
                "Could not read instance info from {}, using {} characters: {}",
                client.instance_url, client.character_limit, e
            );
        }

        Ok(client)
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    /// Query the instance for its maximum status length
    pub async fn fetch_instance_info(&mut self) -> Result<()> {
        let response = self
            .client
            .get_instance()
            .await
            .map_err(|e| map_megalodon_error(e, "fetch instance info"))?;

        let limit = response.json.configuration.statuses.max_characters as usize;
        if limit > 0 {
            self.character_limit = limit;
        }

        debug!(
            "Instance {} allows {} characters",
            self.instance_url, self.character_limit
        );
        Ok(())
    }
}

#[async_trait]
impl Platform for MastodonClient {
    fn name(&self) -> &str {
        "mastodon"
    }

    async fn verify_credentials(&self) -> Result<()> {
        self.client
            .verify_account_credentials()
            .await
            .map_err(|e| map_megalodon_error(e, "verify credentials"))?;

        Ok(())
    }

    fn character_limit(&self) -> usize {
        self.character_limit
    }

    // megalodon derives the upload content type from the file extension,
    // so staged files must carry one matching `mime_type`
    async fn upload_media(&self, path: &Path, mime_type: ImageMimeType) -> Result<String> {
        debug!("Uploading {} ({}) to {}", path.display(), mime_type, self.instance_url);

        let response = self
            .client
            .upload_media(path.to_string_lossy().into_owned(), None)
            .await
            .map_err(|e| map_megalodon_error(e, "upload media"))?;

        let media_id = match response.json {
            UploadMedia::Attachment(attachment) => attachment.id,
            UploadMedia::AsyncAttachment(attachment) => attachment.id,
        };

        Ok(media_id)
    }

    async fn post(&self, request: &PostRequest) -> Result<String> {
        if request.text.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }

        let options = PostStatusInputOptions {
            media_ids: (!request.media_ids.is_empty()).then(|| request.media_ids.clone()),
            visibility: Some(match request.visibility {
                Visibility::Public => StatusVisibility::Public,
                Visibility::Direct => StatusVisibility::Direct,
            }),
            ..Default::default()
        };

        let response = self
            .client
            .post_status(request.text.clone(), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let post_id = match response.json {
            PostStatusOutput::Status(status) => status.id,
            PostStatusOutput::ScheduledStatus(scheduled) => scheduled.id,
        };

        Ok(post_id)
    }

    async fn delete_post(&self, post_id: &str) -> Result<()> {
        self.client
            .delete_status(post_id.to_string())
            .await
            .map(|_| ())
            .map_err(|e| map_megalodon_error(e, "delete status").into())
    }
}

/// Map megalodon errors to PlatformError
///
/// - HTTP 401 → `Authentication`
/// - HTTP 403 → `PermissionDenied`
/// - HTTP 422 → `Validation`
/// - HTTP 429 → `RateLimit`
/// - other HTTP 4xx → `Posting`
/// - HTTP 5xx and anything unrecognised → `Network`
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PlatformError {
    let status = match &error {
        megalodon::error::Error::OwnError(own) => own.status,
        megalodon::error::Error::RequestError(e) => e.status().map(|s| s.as_u16()),
        _ => None,
    };
    classify_error(&error.to_string(), status, context)
}

/// Classify by HTTP status when known, otherwise by the message text
fn classify_error(error_str: &str, status: Option<u16>, context: &str) -> PlatformError {
    let error_lower = error_str.to_lowercase();

    match status.or_else(|| extract_http_status(error_str)) {
        Some(401) => PlatformError::Authentication(format!(
            "Mastodon authentication failed ({}): {}. \
                    Suggestion: Verify the access token is valid and has not been revoked.",
            context, error_str
        )),
        Some(403) => PlatformError::PermissionDenied(format!(
            "Mastodon refused the request ({}): {}",
            context, error_str
        )),
        Some(422) => PlatformError::Validation(format!(
            "Mastodon validation failed ({}): {}",
            context, error_str
        )),
        Some(429) => PlatformError::RateLimit(format!(
            "Mastodon rate limit exceeded ({}): {}",
            context, error_str
        )),
        Some(500..=599) => PlatformError::Network(format!(
            "Mastodon server error ({}): {}",
            context, error_str
        )),
        Some(400..=499) => PlatformError::Posting(format!(
            "Mastodon rejected the request ({}): {}",
            context, error_str
        )),
        Some(_) => {
            PlatformError::Network(format!("Mastodon HTTP error ({}): {}", context, error_str))
        }
        None => {
            if error_lower.contains("forbidden") || error_lower.contains("not permitted") {
                PlatformError::PermissionDenied(format!(
                    "Mastodon refused the request ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("unauthorized")
                || error_lower.contains("authentication")
                || error_lower.contains("token")
            {
                PlatformError::Authentication(format!(
                    "Mastodon authentication failed ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("parse")
                || error_lower.contains("json")
                || error_lower.contains("deserialize")
            {
                PlatformError::Posting(format!(
                    "Mastodon response parse error ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("rate limit")
                || error_lower.contains("too many requests")
            {
                PlatformError::RateLimit(format!(
                    "Mastodon rate limit exceeded ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("validation") || error_lower.contains("unprocessable") {
                PlatformError::Validation(format!(
                    "Mastodon validation failed ({}): {}",
                    context, error_str
                ))
            } else {
                PlatformError::Network(format!(
                    "Mastodon error ({}): {}. \
                        Suggestion: Check your network connection and instance availability.",
                    context, error_str
                ))
            }
        }
    }
}

/// Extract an HTTP status code from an error message
///
/// Looks for patterns like "HTTP 401", "status 403" or a bare "401:".
fn extract_http_status(error_str: &str) -> Option<u16> {
    let prefixes = ["HTTP ", "status ", "code: ", "status_code: "];

    for prefix in &prefixes {
        if let Some(pos) = error_str.find(prefix) {
            let after_prefix = &error_str[pos + prefix.len()..];
            if let Some(code) = after_prefix.get(0..3).and_then(|s| s.parse::<u16>().ok()) {
                if (100..=599).contains(&code) {
                    return Some(code);
                }
            }
        }
    }

    // Standalone 3-digit codes followed by ':', ' ' or the end of the message
    let bytes = error_str.as_bytes();
    for (i, digits) in bytes.windows(3).enumerate() {
        if !digits.iter().all(u8::is_ascii_digit) {
            continue;
        }
        if !matches!(bytes.get(i + 3), None | Some(b':') | Some(b' ')) {
            continue;
        }
        if i > 0 && bytes[i - 1].is_ascii_digit() {
            continue;
        }
        let code = digits
            .iter()
            .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
        if (100..=599).contains(&code) {
            return Some(code);
        }
    }

    None
}
