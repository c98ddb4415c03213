pub mod file;
pub mod memory;

pub use file::{DirectoryPublisher, FileDeadLetterChannel};
pub use memory::{MemoryDeadLetterChannel, MemoryPublisher};
