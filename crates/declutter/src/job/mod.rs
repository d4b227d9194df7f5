//! Job domain types: the persisted record, user options, and the
//! client-facing view.

pub mod options;
pub mod record;
pub mod view;

pub use options::{CreativityLevel, TransformOptions};
pub use record::{ImagePayload, JobRecord, JobStatus};
pub use view::{CachePolicy, JobView};
