//! # django-more-db
//!
//! The database side of django-more: the values and field types migration
//! state is written in, the host backend class tree that start-up patches
//! are applied to, and the custom type contract.
//!
//! ## Modules
//!
//! - [`apps`] - The `django_types` app, [`TypesConfig`]
//! - [`value`] - Backend-agnostic [`Value`]
//! - [`fields`] - [`FieldType`] and [`OnDelete`]
//! - [`template`] - `%(name)s` templates and parameterized [`DbType`]s
//! - [`backends`] - Host backend classes, [`Backend`] and [`DatabaseFeatures`]
//! - [`types`] - [`CustomType`], [`CustomTypeField`], [`DependencyEdge`] and [`patch_types`]

#![allow(clippy::missing_const_for_fn)]

pub mod apps;
pub mod backends;
pub mod fields;
pub mod template;
pub mod types;
pub mod value;

pub use apps::TypesConfig;
pub use backends::{
    host_namespace, load_backends, Backend, ColumnSpec, DatabaseBackendType, DatabaseFeatures,
};
pub use fields::{FieldType, OnDelete};
pub use template::{render, DbType, MissingParameter};
pub use types::{
    default_type_name, patch_types, resolve_type_identity, types_patched, CustomType,
    CustomTypeField, DependencyEdge, EdgeTarget, FieldDependencies, TypeDef, TypeIdentity, TypeLookup,
};
pub use value::Value;
