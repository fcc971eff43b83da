pub mod index;
pub mod persistence;

pub use index::{ChunkRecord, IndexMeta, ScoredChunk, VectorIndex};
pub use persistence::{IndexPersistence, UpdateOutcome, UpdateReport};
