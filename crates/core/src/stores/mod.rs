//! Concrete vector-index service clients.

pub mod pinecone;

pub use pinecone::PineconeStore;
