//! Wire types shared between the inference.sh client and the platform.
//!
//! Nothing in this crate performs I/O.

pub mod output_meta;
pub mod run;
pub mod session;

pub use output_meta::AudioMeta;
pub use output_meta::ImageMeta;
pub use output_meta::MetaExtra;
pub use output_meta::MetaItem;
pub use output_meta::MetaItemType;
pub use output_meta::MetaValue;
pub use output_meta::OutputMeta;
pub use output_meta::RawMeta;
pub use output_meta::TextMeta;
pub use output_meta::VideoMeta;
pub use output_meta::VideoResolution;
pub use run::DEFAULT_FUNCTION;
pub use run::NEW_SESSION;
pub use run::RunRequest;
pub use run::RunResponse;
pub use run::SessionRef;
pub use run::TaskStatus;
pub use session::AppSession;
pub use session::SessionStatus;
