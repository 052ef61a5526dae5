//! Backend abstractions for the engine's external collaborators

pub mod core;
pub mod memory;

pub use core::*;
pub use memory::{
    MemoryDatabase, MemorySearchIndex, MemorySearchIndexFactory, MemorySecretStore,
    StaticCredentials,
};
