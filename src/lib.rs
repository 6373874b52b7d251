// Library surface for the binary and for headless/integration tests.
pub mod app;
pub mod app_dirs;
pub mod capture;
pub mod clock;
pub mod condition;
pub mod config;
pub mod error;
pub mod experiment;
pub mod export;
pub mod logger;
pub mod machine;
pub mod persistence;
pub mod runtime;
pub mod script;
pub mod survey;
pub mod transcript;
pub mod ui;
pub mod util;
pub mod validation;

pub use error::{Error, Result};
