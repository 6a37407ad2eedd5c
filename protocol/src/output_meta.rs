//! Usage metadata an app reports alongside its output.
//!
//! The platform prices a task from these records: `inputs` describe what the
//! task consumed and `outputs` what it produced. Entries are independent and
//! kept in array order; duplicates are allowed.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// Value allowed inside the `extra` map of a [`MetaItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Map(BTreeMap<String, MetaValue>),
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// App-specific pricing factors.
pub type MetaExtra = BTreeMap<String, MetaValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[derive(strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MetaItemType {
    Text,
    Image,
    Video,
    Audio,
    Raw,
}

/// Standard video resolution presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[derive(strum_macros::Display)]
pub enum VideoResolution {
    #[serde(rename = "480p")]
    #[strum(serialize = "480p")]
    P480,
    #[serde(rename = "720p")]
    #[strum(serialize = "720p")]
    P720,
    #[serde(rename = "1080p")]
    #[strum(serialize = "1080p")]
    P1080,
    #[serde(rename = "1440p")]
    #[strum(serialize = "1440p")]
    P1440,
    #[serde(rename = "4k")]
    #[strum(serialize = "4k")]
    K4,
}

fn megapixels(width: u32, height: u32) -> f64 {
    f64::from(width) * f64::from(height) / 1_000_000.0
}

/// Text consumed or produced, e.g. LLM tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TextMeta {
    /// Input tokens when listed in `inputs`, output tokens in `outputs`.
    pub tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<MetaExtra>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    pub resolution_mp: f64,
    /// Diffusion steps.
    pub steps: u32,
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<MetaExtra>,
}

impl Default for ImageMeta {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            resolution_mp: 0.0,
            steps: 0,
            count: 1,
            extra: None,
        }
    }
}

impl ImageMeta {
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            resolution_mp: megapixels(width, height),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    /// Megapixels per frame.
    pub resolution_mp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<VideoResolution>,
    pub seconds: f64,
    pub fps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<MetaExtra>,
}

impl VideoMeta {
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            resolution_mp: megapixels(width, height),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AudioMeta {
    pub seconds: f64,
    pub sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<MetaExtra>,
}

/// Escape hatch for apps that price themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RawMeta {
    /// Cost in dollar cents.
    pub cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<MetaExtra>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetaItem {
    Text(TextMeta),
    Image(ImageMeta),
    Video(VideoMeta),
    Audio(AudioMeta),
    Raw(RawMeta),
}

impl MetaItem {
    pub fn item_type(&self) -> MetaItemType {
        match self {
            Self::Text(_) => MetaItemType::Text,
            Self::Image(_) => MetaItemType::Image,
            Self::Video(_) => MetaItemType::Video,
            Self::Audio(_) => MetaItemType::Audio,
            Self::Raw(_) => MetaItemType::Raw,
        }
    }

    pub fn extra(&self) -> Option<&MetaExtra> {
        match self {
            Self::Text(meta) => meta.extra.as_ref(),
            Self::Image(meta) => meta.extra.as_ref(),
            Self::Video(meta) => meta.extra.as_ref(),
            Self::Audio(meta) => meta.extra.as_ref(),
            Self::Raw(meta) => meta.extra.as_ref(),
        }
    }
}

impl From<TextMeta> for MetaItem {
    fn from(meta: TextMeta) -> Self {
        Self::Text(meta)
    }
}

impl From<ImageMeta> for MetaItem {
    fn from(meta: ImageMeta) -> Self {
        Self::Image(meta)
    }
}

impl From<VideoMeta> for MetaItem {
    fn from(meta: VideoMeta) -> Self {
        Self::Video(meta)
    }
}

impl From<AudioMeta> for MetaItem {
    fn from(meta: AudioMeta) -> Self {
        Self::Audio(meta)
    }
}

impl From<RawMeta> for MetaItem {
    fn from(meta: RawMeta) -> Self {
        Self::Raw(meta)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutputMeta {
    #[serde(default)]
    pub inputs: Vec<MetaItem>,
    #[serde(default)]
    pub outputs: Vec<MetaItem>,
}

impl OutputMeta {
    pub fn new(inputs: Vec<MetaItem>, outputs: Vec<MetaItem>) -> Self {
        Self { inputs, outputs }
    }
}
