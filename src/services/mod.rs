pub mod batcher;
pub mod document_writer;
pub mod prompt;
pub mod splitter;
pub mod token_estimator;
pub mod transform;

pub use batcher::{BalancedBatcher, BatchPlan};
pub use document_writer::DocumentWriter;
pub use prompt::{PromptParams, PromptTemplate};
pub use splitter::UnitSplitter;
pub use token_estimator::TokenEstimator;
pub use transform::{OpenAiTransform, Transform};
