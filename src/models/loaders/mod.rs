pub mod index_loader;

pub use index_loader::{load_video_index, VideoEntry, VideoIndex};
