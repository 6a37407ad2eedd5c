//! File references that resolve to a local path.
//!
//! A [`FileResource`] is built from a URL, a local path, or a mapping of
//! fields. Remote `http(s)` content is downloaded once into a [`FileCache`];
//! local paths are made absolute. Metadata (content type, size, file name) is
//! filled in from disk unless the caller supplied it.

mod cache;

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use path_absolutize::Absolutize;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::InstanceType;
use schemars::schema::Schema;
use schemars::schema::SchemaObject;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de;
use serde_json::Value;
use url::Url;

pub use cache::BROWSER_USER_AGENT;
pub use cache::FALLBACK_FILENAME;
pub use cache::FileCache;
pub use cache::cache_key;

use crate::error::InfshErr;
use crate::error::Result;

/// Raw file fields as they appear on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl FileFields {
    /// Fields present in `self` win; the rest come from `fallback`.
    fn or(self, fallback: FileFields) -> Self {
        Self {
            uri: self.uri.or(fallback.uri),
            path: self.path.or(fallback.path),
            content_type: self.content_type.or(fallback.content_type),
            size: self.size.or(fallback.size),
            filename: self.filename.or(fallback.filename),
        }
    }
}

/// Everything a [`FileResource`] can be constructed from.
#[derive(Debug, Clone, PartialEq)]
pub enum FileInput {
    /// A URL or a local path.
    Reference(String),
    Fields(FileFields),
    /// Another resource; its fields are copied.
    Existing(FileResource),
}

impl FileInput {
    /// Merges explicit `overrides` into this input.
    ///
    /// For a reference string the string becomes `uri` and every other field
    /// comes from `overrides`. For mappings and existing resources the
    /// overrides win field by field.
    pub fn into_fields(self, overrides: FileFields) -> FileFields {
        match self {
            FileInput::Reference(uri) => FileFields {
                uri: Some(uri),
                ..overrides
            },
            FileInput::Fields(fields) => overrides.or(fields),
            FileInput::Existing(resource) => overrides.or(resource.to_fields()),
        }
    }
}

impl From<&str> for FileInput {
    fn from(value: &str) -> Self {
        FileInput::Reference(value.to_string())
    }
}

impl From<String> for FileInput {
    fn from(value: String) -> Self {
        FileInput::Reference(value)
    }
}

impl From<&Path> for FileInput {
    fn from(value: &Path) -> Self {
        FileInput::Fields(FileFields {
            path: Some(value.to_path_buf()),
            ..FileFields::default()
        })
    }
}

impl From<PathBuf> for FileInput {
    fn from(value: PathBuf) -> Self {
        FileInput::Fields(FileFields {
            path: Some(value),
            ..FileFields::default()
        })
    }
}

impl From<FileFields> for FileInput {
    fn from(value: FileFields) -> Self {
        FileInput::Fields(value)
    }
}

impl From<FileResource> for FileInput {
    fn from(value: FileResource) -> Self {
        FileInput::Existing(value)
    }
}

impl TryFrom<Value> for FileInput {
    type Error = InfshErr;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(reference) => Ok(FileInput::Reference(reference)),
            Value::Object(_) => serde_json::from_value::<FileFields>(value.clone())
                .map(FileInput::Fields)
                .map_err(|_| InfshErr::InvalidInput(value.to_string())),
            other => Err(InfshErr::InvalidInput(other.to_string())),
        }
    }
}

/// A file with a resolved local path.
///
/// `path` is always set and absolute once construction succeeds. For remote
/// inputs it points into the download cache and `uri` keeps the original
/// URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResource {
    uri: Option<String>,
    path: PathBuf,
    content_type: Option<String>,
    size: Option<u64>,
    filename: Option<String>,
}

/// Validated fields with the remote part still to be fetched.
struct Pending {
    fields: FileFields,
    /// The `uri` as written, when it must be downloaded.
    remote: Option<String>,
}

impl Pending {
    fn new(fields: FileFields) -> Result<Self> {
        if fields.uri.is_none() && fields.path.is_none() {
            return Err(InfshErr::MissingLocation);
        }
        let remote = fields.uri.clone().filter(|uri| is_remote_uri(uri));
        Ok(Self { fields, remote })
    }

    fn finish(self, downloaded: Option<PathBuf>) -> Result<FileResource> {
        let FileFields {
            uri,
            path,
            content_type,
            size,
            filename,
        } = self.fields;

        let path = match (downloaded, &uri) {
            (Some(path), _) => path,
            (None, Some(uri)) => PathBuf::from(uri),
            (None, None) => path.ok_or(InfshErr::MissingLocation)?,
        };
        if path.as_os_str().is_empty() {
            return Err(InfshErr::MissingLocation);
        }

        let mut resource = FileResource {
            uri,
            path: absolute(&path)?,
            content_type,
            size,
            filename,
        };
        resource.fill_missing_metadata();
        Ok(resource)
    }
}

impl FileResource {
    /// Resolves `input` using [`FileCache::current`]. Remote inputs are
    /// downloaded on the calling thread.
    pub fn new(input: impl Into<FileInput>) -> Result<Self> {
        Self::resolve(input, &FileCache::current())
    }

    /// Rebuilds a resource from its external form. A `path` that already
    /// exists on disk is kept as is, so a serialized resource comes back
    /// unchanged without going through the cache; otherwise this is
    /// [`FileResource::resolve`].
    pub fn from_record(input: impl Into<FileInput>, cache: &FileCache) -> Result<Self> {
        let fields = input.into().into_fields(FileFields::default());
        if let Some(path) = fields.path.clone()
            && path.exists()
        {
            return Pending::new(fields)?.finish(Some(path));
        }
        Self::resolve(fields, cache)
    }

    /// Resource for an existing local path. The path is made absolute but is
    /// not required to exist.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Pending::new(FileFields {
            path: Some(path.as_ref().to_path_buf()),
            ..FileFields::default()
        })?
        .finish(None)
    }

    pub fn resolve(input: impl Into<FileInput>, cache: &FileCache) -> Result<Self> {
        Self::resolve_with(input, FileFields::default(), cache)
    }

    /// Like [`FileResource::resolve`], with explicit field overrides merged
    /// into the input first.
    pub fn resolve_with(
        input: impl Into<FileInput>,
        overrides: FileFields,
        cache: &FileCache,
    ) -> Result<Self> {
        let pending = Pending::new(input.into().into_fields(overrides))?;
        let downloaded = match &pending.remote {
            Some(uri) => Some(cache.fetch_blocking(uri)?),
            None => None,
        };
        pending.finish(downloaded)
    }

    /// Suspending twin of [`FileResource::resolve`].
    pub async fn resolve_async(input: impl Into<FileInput>, cache: &FileCache) -> Result<Self> {
        Self::resolve_with_async(input, FileFields::default(), cache).await
    }

    pub async fn resolve_with_async(
        input: impl Into<FileInput>,
        overrides: FileFields,
        cache: &FileCache,
    ) -> Result<Self> {
        let pending = Pending::new(input.into().into_fields(overrides))?;
        let downloaded = match &pending.remote {
            Some(uri) => Some(cache.fetch(uri).await?),
            None => None,
        };
        pending.finish(downloaded)
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Whether the content was fetched from an `http(s)` URL.
    pub fn is_remote(&self) -> bool {
        self.uri.as_deref().is_some_and(is_remote_uri)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Re-reads content type, size and file name from disk, replacing
    /// whatever was there before. A missing file leaves the fields alone.
    pub fn refresh_metadata(&mut self) {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };
        self.content_type = guess_content_type(&self.path);
        self.size = Some(meta.len());
        self.filename = file_name(&self.path);
    }

    /// The URI this resource was created from, or its local path.
    pub fn as_reference(&self) -> String {
        match &self.uri {
            Some(uri) => uri.clone(),
            None => self.path.display().to_string(),
        }
    }

    /// Snapshot of all fields, e.g. to build a modified copy.
    pub fn to_fields(&self) -> FileFields {
        FileFields {
            uri: self.uri.clone(),
            path: Some(self.path.clone()),
            content_type: self.content_type.clone(),
            size: self.size,
            filename: self.filename.clone(),
        }
    }

    fn fill_missing_metadata(&mut self) {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };
        if self.content_type.is_none() {
            self.content_type = guess_content_type(&self.path);
        }
        if self.size.is_none() {
            self.size = Some(meta.len());
        }
        if self.filename.is_none() {
            self.filename = file_name(&self.path);
        }
    }
}

impl fmt::Display for FileResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.uri {
            Some(uri) => f.write_str(uri),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

impl Serialize for FileResource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_fields().serialize(serializer)
    }
}

/// Accepts a reference string or a field mapping and goes through
/// [`FileResource::from_record`] with [`FileCache::current`]. A record whose
/// `path` exists is taken as is; other remote references are downloaded,
/// which blocks the current thread and fails inside a current-thread runtime.
impl<'de> Deserialize<'de> for FileResource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let input = FileInput::try_from(value).map_err(de::Error::custom)?;
        FileResource::from_record(input, &FileCache::current()).map_err(de::Error::custom)
    }
}

impl JsonSchema for FileResource {
    fn is_referenceable() -> bool {
        false
    }

    fn schema_name() -> String {
        "File".to_string()
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        SchemaObject {
            instance_type: Some(InstanceType::String.into()),
            format: Some("file".to_string()),
            ..Default::default()
        }
        .into()
    }
}

fn is_remote_uri(uri: &str) -> bool {
    Url::parse(uri).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(path.absolutize()?.into_owned())
}

fn guess_content_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first_raw().map(str::to_string)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
