pub mod answer;
pub mod memory;
pub mod pipeline;

pub use memory::{format_history, ChatMemory, ChatRole, ChatTurn};
pub use pipeline::{PipelineCache, SessionPipeline};
