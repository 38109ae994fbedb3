//! The core data model: [`Job`], [`Segment`], [`MediaInfo`], and the request
//! shape accepted by `submit`.

mod job;
mod media;
mod segment;

pub use job::{DownloadSpec, Job, JobStatus};
pub use media::{Format, Fragment, MediaInfo, Protocol};
pub use segment::{Segment, SegmentState};

/// Opaque, stable job identifier. A `String` rather than a newtype so it can
/// be generated (UUID), parsed from CLI input, and used as a map key without
/// ceremony — matching how the rest of the control surface (§6) treats it.
pub type JobId = String;
