pub mod checkpoint;
pub mod json_file;
pub mod memory;
pub mod traits;

pub use checkpoint::{CheckpointManager, ResumeOrigin, ResumePoint};
pub use json_file::JsonFileCheckpointStore;
pub use memory::MemoryCheckpointStore;
pub use traits::{CheckpointStore, StateError};
