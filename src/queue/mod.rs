//! Job queue: records, in-memory store, cancellation and progress plumbing.

pub mod broker;
pub mod cancel;
pub mod job;
pub mod progress;
pub mod store;

pub use broker::JobBroker;
pub use cancel::CancelRegistry;
pub use job::{CANCELLED_MESSAGE, Job, JobId, JobResult, JobStatus, JobView};
pub use progress::{Progress, ProgressSink, ProgressUpdate};
pub use store::{JobStore, QueueError, QueueStats, parse_url_list};
