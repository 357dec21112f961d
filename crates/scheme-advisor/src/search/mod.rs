pub mod chunker;
pub mod passage_index;

pub use chunker::{Chunk, TextChunker};
pub use passage_index::PassageIndex;
