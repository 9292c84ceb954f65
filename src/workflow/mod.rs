pub mod item_ctx;
pub mod summary_flow;

pub use item_ctx::ItemCtx;
pub use summary_flow::{format_section, parse_frontmatter, SummaryFlow};
