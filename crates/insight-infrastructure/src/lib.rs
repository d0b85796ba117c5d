//! Concrete adapters for Insight: configuration files, session storage, the
//! schema descriptor, the SQLite query engine and the Python chart sandbox.

pub mod config_service;
pub mod json_schema_provider;
pub mod json_session_repository;
pub mod memory_session_repository;
pub mod paths;
pub mod python_sandbox;
pub mod sqlite_engine;
pub mod storage;

pub use crate::config_service::{ConfigService, LoadedConfig};
pub use crate::json_schema_provider::JsonSchemaProvider;
pub use crate::json_session_repository::JsonSessionRepository;
pub use crate::memory_session_repository::InMemorySessionRepository;
pub use crate::paths::InsightPaths;
pub use crate::python_sandbox::PythonSandbox;
pub use crate::sqlite_engine::SqliteEngine;
