//! External retrieval collaborators
//!
//! The vector index and the keyword search endpoint are opaque services;
//! these traits are the seams the router and agent memory call through.

mod keyword;
mod vector;

pub use keyword::{HttpKeywordSearch, KeywordSearch};
pub use vector::{HttpVectorStore, VectorStore};
