//! CLI command handlers. Each command is in its own file for clarity and line limit.

mod add;
mod cancel;
mod checksum;
mod limits;
mod pause;
mod remove;
mod resume;
mod run;
mod status;

pub use add::run_add;
pub use cancel::run_cancel;
pub use checksum::run_checksum;
pub use limits::{run_set_max_concurrent, run_set_speed_limit};
pub use pause::run_pause;
pub use remove::run_remove;
pub use resume::run_start;
pub use run::run_scheduler;
pub use status::run_status;
