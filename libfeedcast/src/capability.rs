//! Per-account media capability detection
//!
//! Some accounts may only publish text. Rather than trusting configuration,
//! the prober makes a throwaway direct-visibility post with a tiny image
//! attached and retracts it straight away.

use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

use crate::error::{FeedcastError, PlatformError};
use crate::platforms::{Platform, PostRequest};
use crate::types::{Capability, ImageMimeType, Visibility};

/// Smallest valid PNG: one transparent pixel
pub const PROBE_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

const PROBE_TEXT: &str = "feedcast capability check, this post is removed immediately";

/// Decide whether `platform` accepts media posts for this account
///
/// Never fails: anything other than a clean round trip is `Restricted`.
/// The answer is a hint; publishing still handles refusals on its own.
pub async fn probe(platform: &dyn Platform, staging_dir: &Path) -> Capability {
    let capability = match probe_media_post(platform, staging_dir).await {
        Ok(()) => Capability::Elevated,
        Err(ProbeFailure::Denied(reason)) => {
            info!(
                "{} does not permit media posts: {}",
                platform.name(),
                reason
            );
            Capability::Restricted
        }
        Err(ProbeFailure::Other(e)) => {
            error!(
                "Capability probe on {} failed, assuming restricted access: {}",
                platform.name(),
                e
            );
            Capability::Restricted
        }
    };

    info!("Capability for {}: {}", platform.name(), capability);
    capability
}

enum ProbeFailure {
    Denied(String),
    Other(FeedcastError),
}

impl From<FeedcastError> for ProbeFailure {
    fn from(error: FeedcastError) -> Self {
        match error {
            FeedcastError::Platform(PlatformError::PermissionDenied(reason)) => {
                ProbeFailure::Denied(reason)
            }
            other => ProbeFailure::Other(other),
        }
    }
}

impl From<std::io::Error> for ProbeFailure {
    fn from(error: std::io::Error) -> Self {
        ProbeFailure::Other(FeedcastError::InvalidInput(format!(
            "could not stage probe image: {}",
            error
        )))
    }
}

async fn probe_media_post(
    platform: &dyn Platform,
    staging_dir: &Path,
) -> std::result::Result<(), ProbeFailure> {
    std::fs::create_dir_all(staging_dir)?;

    // Removed when dropped, on every return path
    let mut image = tempfile::Builder::new()
        .prefix("feedcast-probe-")
        .suffix(".png")
        .tempfile_in(staging_dir)?;
    image.write_all(PROBE_PNG)?;
    image.flush()?;

    let media_id = platform
        .upload_media(image.path(), ImageMimeType::Png)
        .await?;
    debug!("Probe image uploaded to {} as {}", platform.name(), media_id);

    let request = PostRequest::text(PROBE_TEXT)
        .with_media(media_id)
        .with_visibility(Visibility::Direct);
    let post_id = platform.post(&request).await?;

    if let Err(e) = platform.delete_post(&post_id).await {
        error!(
            "Could not remove probe post {} from {}: {}",
            post_id,
            platform.name(),
            e
        );
    } else {
        debug!("Probe post {} removed", post_id);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::{MockConfig, MockPlatform};
    use tempfile::TempDir;

    fn staging_is_empty(dir: &TempDir) -> bool {
        std::fs::read_dir(dir.path()).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_round_trip_is_elevated() {
        let staging = TempDir::new().unwrap();
        let platform = MockPlatform::success("mock");

        assert_eq!(probe(&platform, staging.path()).await, Capability::Elevated);

        let uploads = platform.uploads();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].existed);
        assert_eq!(uploads[0].size, PROBE_PNG.len() as u64);

        let posts = platform.posts();
        assert_eq!(posts[0].visibility, Visibility::Direct);
        assert_eq!(posts[0].media_ids, vec!["mock-media-1".to_string()]);
        assert_eq!(platform.deleted(), vec!["mock-post-1".to_string()]);
        assert!(staging_is_empty(&staging));
    }

    #[tokio::test]
    async fn test_permission_denied_is_restricted() {
        let staging = TempDir::new().unwrap();
        let platform = MockPlatform::media_forbidden("mock");

        assert_eq!(
            probe(&platform, staging.path()).await,
            Capability::Restricted
        );
        assert!(platform.posts().is_empty());
        assert!(staging_is_empty(&staging));
    }

    #[tokio::test]
    async fn test_unexpected_error_is_restricted() {
        let staging = TempDir::new().unwrap();
        let platform =
            MockPlatform::post_failure("mock", PlatformError::Network("offline".to_string()));

        assert_eq!(
            probe(&platform, staging.path()).await,
            Capability::Restricted
        );
        assert!(platform.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_failed_retraction_keeps_elevated() {
        let staging = TempDir::new().unwrap();
        let platform = MockPlatform::new(MockConfig {
            delete_error: Some(PlatformError::Network("timeout".to_string())),
            ..Default::default()
        });

        assert_eq!(probe(&platform, staging.path()).await, Capability::Elevated);
        assert_eq!(platform.posts().len(), 1);
    }

    #[test]
    fn test_probe_png_signature() {
        assert_eq!(&PROBE_PNG[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(ImageMimeType::from_path("probe.png"), Some(ImageMimeType::Png));
    }
}
