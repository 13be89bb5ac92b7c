//! murmur-infrastructure: durable storage backends.
//!
//! Provides the concrete `MemoryRepository` implementation the
//! application layer persists conversation records through.

pub mod toml_memory_repository;

pub use toml_memory_repository::TomlMemoryRepository;
