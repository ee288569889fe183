pub mod chroma;
pub mod json_file;
pub mod memory;

pub use chroma::ChromaStore;
pub use json_file::JsonFileDocumentStore;
pub use memory::{InMemoryDocumentStore, InMemoryVectorStore};
