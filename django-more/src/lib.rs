//! # django-more
//!
//! Runtime patching, custom database types and native enum migrations.
//!
//! This is the meta-crate that re-exports all sub-crates for convenient
//! access, and runs the start-up sequence through [`setup`].
//!
//! ```
//! use django_more::core::Settings;
//!
//! let runtime = django_more::setup(Settings::default()).unwrap();
//! assert!(runtime.apps().is_installed("django_enum"));
//! ```

#![allow(clippy::missing_const_for_fn)]

pub mod runtime;

pub use runtime::{setup, setup_with_apps, Runtime};

/// The patch engine: namespaces, classes and the patch registry.
pub use django_more_patchy as patchy;

/// Errors, settings, logging and the app registry.
pub use django_more_core as core;

/// Values, field types, host backends and the custom type contract.
pub use django_more_db as db;

/// Project state, operations, autodetection, loading and execution.
pub use django_more_migrations as migrations;

/// Native database enums.
pub use django_more_enum as enums;

pub use serde;
pub use serde_json;
pub use tracing;
pub use tracing_subscriber;
