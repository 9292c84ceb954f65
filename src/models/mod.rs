pub mod loaders;
pub mod progress;
pub mod unit;

pub use loaders::{load_video_index, VideoEntry, VideoIndex};
pub use progress::{ItemStatus, ProgressRecord, TransitionMeta};
pub use unit::{Batch, Job, JobResult, MergeSection, Unit};
