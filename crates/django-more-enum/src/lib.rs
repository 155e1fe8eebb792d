//! # django-more-enum
//!
//! Native database enums on top of the custom type support in
//! `django-more-db`.
//!
//! ## Modules
//!
//! - [`enum_def`] - [`EnumDef`], its members and [`EnumValue`]
//! - [`field`] - [`EnumField`], a column holding one member of an enum
//! - [`operations`] - [`CreateEnum`], [`RemoveEnum`], [`RenameEnum`] and [`AlterEnum`]
//! - [`questioner`] - [`EnumQuestioner`], the enum questions
//! - [`detector`] - [`EnumDetector`], the autodetector extension
//! - [`patch`] - [`patch_enum`], the start-up backend patches
//! - [`apps`] - The `django_enum` app, [`EnumConfig`]

#![allow(clippy::missing_const_for_fn)]

pub mod apps;
pub mod detector;
pub mod enum_def;
pub mod field;
pub mod operations;
pub mod patch;
pub mod questioner;

pub use apps::EnumConfig;
pub use detector::EnumDetector;
pub use enum_def::{EnumDef, EnumMember, EnumMeta, EnumValue, ENUM_CATEGORY};
pub use field::{ChoiceInput, EnumField, EnumInput};
pub use operations::{
    register_operations, AlterEnum, CreateEnum, FieldRef, RemovalPolicy, RemoveEnum, RenameEnum,
};
pub use patch::{enum_patched, patch_enum, ENUM_PATCHES};
pub use questioner::EnumQuestioner;
