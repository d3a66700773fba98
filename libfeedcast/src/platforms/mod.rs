//! Destination platform abstraction
//!
//! Publishing goes through the [`Platform`] trait so the pipeline never
//! talks to a concrete service. The Mastodon client is the production
//! implementation; [`mock::MockPlatform`] stands in for it in tests.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::types::{ImageMimeType, Visibility};

pub mod mastodon;

// Mock platform is available for all builds (not just tests) to support integration tests
pub mod mock;

/// An outbound status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostRequest {
    pub text: String,
    /// Ids returned by [`Platform::upload_media`]
    pub media_ids: Vec<String>,
    pub visibility: Visibility,
}

impl PostRequest {
    /// Public text-only post
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_media(mut self, media_id: impl Into<String>) -> Self {
        self.media_ids.push(media_id.into());
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

/// Unified interface to a publishing destination
#[async_trait]
pub trait Platform: Send + Sync {
    /// Lowercase identifier (e.g. "mastodon")
    fn name(&self) -> &str;

    /// Check that the account credentials are accepted
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` when the token is rejected.
    async fn verify_credentials(&self) -> Result<()>;

    /// Maximum number of characters in a post
    fn character_limit(&self) -> usize;

    /// Upload a local image and return the platform media id
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::PermissionDenied` when the account may not
    /// upload media.
    async fn upload_media(&self, path: &Path, mime_type: ImageMimeType) -> Result<String>;

    /// Publish a status and return its id
    async fn post(&self, request: &PostRequest) -> Result<String>;

    /// Retract a previously published status
    async fn delete_post(&self, post_id: &str) -> Result<()>;
}
