pub mod desc;
pub mod encoder;

pub use desc::ChunkDesc;
pub use encoder::{ChunkAddOutcome, ChunkEncoder};
