//! Durable storage for [`NotificationState`].
//!
//! Loading never fails: a missing, unreadable, or corrupt backing document is
//! logged and treated as empty history. Saving never fails either; losing
//! one update only risks a duplicate alert on the next run.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{error, info, warn};

use crate::notification::state::{parse_state, render_state, NotificationState};

/// Where the serialized state lives.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    async fn read(&self) -> Result<Option<String>>;

    /// Replace the stored document in one step.
    async fn write(&self, contents: &str) -> Result<()>;

    /// Location for log messages.
    fn describe(&self) -> String;
}

/// An S3 object holding the state document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
    pub region: Option<String>,
}

impl fmt::Display for S3Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Which backend a run should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateLocation {
    File(PathBuf),
    S3(S3Location),
}

/// S3 when both `S3_BUCKET` and `S3_STATE_KEY` are set and non-empty
/// (`AWS_REGION` optional), otherwise the local file at `path`.
pub fn select_location(env: impl Fn(&str) -> Option<String>, path: &Path) -> StateLocation {
    let var = |name: &str| {
        env(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    match (var("S3_BUCKET"), var("S3_STATE_KEY")) {
        (Some(bucket), Some(key)) => StateLocation::S3(S3Location {
            bucket,
            key,
            region: var("AWS_REGION"),
        }),
        _ => StateLocation::File(path.to_path_buf()),
    }
}

/// Local JSON file, replaced atomically on every write.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl StateBackend for FileBackend {
    async fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    async fn write(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let temp_path = self.temp_path();
        let cleanup = |e: std::io::Error| {
            let _ = fs::remove_file(&temp_path);
            e
        };

        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        file.write_all(contents.as_bytes()).map_err(cleanup)?;
        file.sync_all().map_err(cleanup)?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .map_err(cleanup)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// One S3 object, read whole and overwritten with a single put.
pub struct S3Backend {
    client: aws_sdk_s3::Client,
    location: S3Location,
}

impl S3Backend {
    pub fn new(client: aws_sdk_s3::Client, location: S3Location) -> Self {
        Self { client, location }
    }

    /// Client from the standard AWS credential chain, pinned to the
    /// location's region when one is given.
    pub async fn from_env(location: S3Location) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &location.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;
        Self::new(aws_sdk_s3::Client::new(&sdk_config), location)
    }
}

#[async_trait]
impl StateBackend for S3Backend {
    async fn read(&self) -> Result<Option<String>> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.location.bucket)
            .key(&self.location.key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None)
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!("Failed to get {}", self.location)))
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read body of {}", self.location))?
            .into_bytes();
        let contents = String::from_utf8(bytes.to_vec())
            .with_context(|| format!("{} is not UTF-8", self.location))?;
        Ok(Some(contents))
    }

    async fn write(&self, contents: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.location.bucket)
            .key(&self.location.key)
            .content_type("application/json")
            .body(ByteStream::from(contents.as_bytes().to_vec()))
            .send()
            .await
            .with_context(|| format!("Failed to put {}", self.location))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.location.to_string()
    }
}

pub struct StateStore {
    backend: Box<dyn StateBackend>,
}

impl StateStore {
    pub fn new(backend: Box<dyn StateBackend>) -> Self {
        Self { backend }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(FileBackend::new(path)))
    }

    /// Store for `location`; S3 clients are configured from the environment.
    pub async fn open(location: StateLocation) -> Self {
        match location {
            StateLocation::File(path) => Self::file(path),
            StateLocation::S3(s3) => Self::new(Box::new(S3Backend::from_env(s3).await)),
        }
    }

    pub fn location(&self) -> String {
        self.backend.describe()
    }

    pub async fn load(&self) -> NotificationState {
        let location = self.backend.describe();

        let contents = match self.backend.read().await {
            Ok(Some(contents)) => contents,
            Ok(None) => {
                info!(location = %location, "No existing notification state, starting fresh");
                return NotificationState::new();
            }
            Err(e) => {
                warn!(location = %location, error = %format!("{e:#}"), "Failed to read notification state");
                return NotificationState::new();
            }
        };

        match parse_state(&contents) {
            Ok(state) => {
                info!(location = %location, records = state.len(), "Notification state loaded");
                state
            }
            Err(e) => {
                warn!(location = %location, error = %e, "Ignoring unusable notification state");
                NotificationState::new()
            }
        }
    }

    /// Persist `state`. Failures are logged, never returned.
    pub async fn save(&self, state: &NotificationState) -> bool {
        let location = self.backend.describe();

        let result = match render_state(state).context("Failed to serialize notification state") {
            Ok(contents) => self.backend.write(&contents).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(location = %location, records = state.len(), "Notification state saved");
                true
            }
            Err(e) => {
                error!(location = %location, error = %format!("{e:#}"), "Failed to save notification state");
                false
            }
        }
    }
}
