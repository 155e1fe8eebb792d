//! # django-more-core
//!
//! Core types for django-more: the error taxonomy, settings and their
//! loader, logging setup, and the application registry whose `ready`
//! hooks apply patches at start-up.

pub mod apps;
pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

pub use apps::{AppConfig, AppRegistry, ReadyContext};
pub use error::{DjangoError, DjangoResult, ValidationError};
pub use settings::{DatabaseSettings, LazySettings, MigrationSettings, Settings, SETTINGS};
