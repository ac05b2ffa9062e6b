//! Configuration: TOML schema, layered loading and validation

pub mod builtin;
pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::ConfigLoader;
pub use schema::{ClusterConfig, CommonConfig, Config, GeneratorConfig, InterpreterConfig};
pub use validator::ConfigValidator;
