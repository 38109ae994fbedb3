//! Persistent job index (§6: "enumerate jobs on startup without scanning").
//!
//! Per-job resume state (segment bitmap, byte offsets) lives in each job's
//! own `manifest.json` under its temp dir ([`crate::segment_store`]); this
//! module is the *global* index over job ids so startup recovery and `list`
//! don't need to walk the filesystem. Same operations the teacher's
//! SQLite-backed job table exposed, reimplemented over one JSON file guarded
//! by a file lock substitute (write via temp file + rename, same idiom used
//! throughout this crate for atomic persistence).

mod store;

pub use store::{JobsIndex, JobsIndexError};
