//! Mock platform implementation for testing
//!
//! A configurable stand-in for a real destination. It can reject
//! credentials, refuse media uploads, fail posts (a fixed number of times or
//! always) and records every call so tests can assert on what would have
//! been published.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::accounts::Account;
use crate::error::{PlatformError, Result};
use crate::pipeline::PlatformFactory;
use crate::platforms::{Platform, PostRequest};
use crate::types::ImageMimeType;

/// A media upload seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub path: PathBuf,
    pub mime_type: ImageMimeType,
    /// Whether the file was present on disk when the upload was made
    pub existed: bool,
    pub size: u64,
}

/// Shared call log; clones observe the same calls
#[derive(Debug, Clone, Default)]
pub struct MockCalls {
    pub verify_count: Arc<Mutex<usize>>,
    pub post_attempts: Arc<Mutex<usize>>,
    pub uploads: Arc<Mutex<Vec<RecordedUpload>>>,
    pub posts: Arc<Mutex<Vec<PostRequest>>>,
    pub deleted: Arc<Mutex<Vec<String>>>,
}

/// Configuration for mock platform behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub name: String,

    /// Error returned by `verify_credentials`
    pub auth_error: Option<PlatformError>,

    /// Error returned by `upload_media`
    pub upload_error: Option<PlatformError>,

    /// Error returned by `post`
    pub post_error: Option<PlatformError>,

    /// How many `post` calls fail with `post_error` before succeeding;
    /// `None` fails every call
    pub post_failures: Option<usize>,

    /// Error returned by `delete_post`
    pub delete_error: Option<PlatformError>,

    pub character_limit: usize,

    pub calls: MockCalls,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            auth_error: None,
            upload_error: None,
            post_error: None,
            post_failures: None,
            delete_error: None,
            character_limit: 500,
            calls: MockCalls::default(),
        }
    }
}

/// Mock platform for testing
#[derive(Debug, Clone)]
pub struct MockPlatform {
    config: MockConfig,
}

impl MockPlatform {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// A platform where everything succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Credentials are rejected
    pub fn auth_failure(name: &str, error: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            auth_error: Some(PlatformError::Authentication(error.to_string())),
            ..Default::default()
        })
    }

    /// Media uploads are refused, text posts succeed
    pub fn media_forbidden(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            upload_error: Some(PlatformError::PermissionDenied(
                "media uploads are not permitted for this account".to_string(),
            )),
            ..Default::default()
        })
    }

    /// Every post fails with `error`
    pub fn post_failure(name: &str, error: PlatformError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            post_error: Some(error),
            ..Default::default()
        })
    }

    /// The first `failures` posts fail with `error`, later ones succeed
    pub fn flaky(name: &str, error: PlatformError, failures: usize) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            post_error: Some(error),
            post_failures: Some(failures),
            ..Default::default()
        })
    }

    pub fn with_limit(name: &str, limit: usize) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            character_limit: limit,
            ..Default::default()
        })
    }

    pub fn verify_count(&self) -> usize {
        *self.config.calls.verify_count.lock().unwrap()
    }

    pub fn post_attempts(&self) -> usize {
        *self.config.calls.post_attempts.lock().unwrap()
    }

    /// Successful posts
    pub fn posts(&self) -> Vec<PostRequest> {
        self.config.calls.posts.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.config.calls.uploads.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.config.calls.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn verify_credentials(&self) -> Result<()> {
        *self.config.calls.verify_count.lock().unwrap() += 1;

        match &self.config.auth_error {
            Some(error) => Err(error.clone().into()),
            None => Ok(()),
        }
    }

    fn character_limit(&self) -> usize {
        self.config.character_limit
    }

    async fn upload_media(&self, path: &Path, mime_type: ImageMimeType) -> Result<String> {
        let metadata = std::fs::metadata(path).ok();
        let mut uploads = self.config.calls.uploads.lock().unwrap();
        uploads.push(RecordedUpload {
            path: path.to_path_buf(),
            mime_type,
            existed: metadata.is_some(),
            size: metadata.map(|m| m.len()).unwrap_or(0),
        });

        if let Some(error) = &self.config.upload_error {
            return Err(error.clone().into());
        }
        Ok(format!("{}-media-{}", self.config.name, uploads.len()))
    }

    async fn post(&self, request: &PostRequest) -> Result<String> {
        let attempt = {
            let mut attempts = self.config.calls.post_attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };

        if let Some(error) = &self.config.post_error {
            let failing = match self.config.post_failures {
                Some(failures) => attempt <= failures,
                None => true,
            };
            if failing {
                return Err(error.clone().into());
            }
        }

        let chars = request.text.chars().count();
        if chars > self.config.character_limit {
            return Err(PlatformError::Validation(format!(
                "Content exceeds {} character limit (current: {} characters)",
                self.config.character_limit, chars
            ))
            .into());
        }

        let mut posts = self.config.calls.posts.lock().unwrap();
        posts.push(request.clone());
        Ok(format!("{}-post-{}", self.config.name, posts.len()))
    }

    async fn delete_post(&self, post_id: &str) -> Result<()> {
        if let Some(error) = &self.config.delete_error {
            return Err(error.clone().into());
        }
        self.config
            .calls
            .deleted
            .lock()
            .unwrap()
            .push(post_id.to_string());
        Ok(())
    }
}

/// Hands out mock platforms by account name
///
/// Accounts without a registered platform fail to connect. Every
/// connection shares the registered mock's call log.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    platforms: HashMap<String, MockPlatform>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platform(mut self, account_name: &str, platform: MockPlatform) -> Self {
        self.platforms.insert(account_name.to_string(), platform);
        self
    }
}

#[async_trait]
impl PlatformFactory for MockFactory {
    async fn connect(&self, account: &Account) -> Result<Box<dyn Platform>> {
        match self.platforms.get(&account.name) {
            Some(platform) => Ok(Box::new(platform.clone())),
            None => Err(PlatformError::Network(format!(
                "no mock platform registered for {}",
                account.name
            ))
            .into()),
        }
    }
}
