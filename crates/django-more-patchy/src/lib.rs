//! # django-more-patchy
//!
//! The patch engine used by django-more to extend a host ORM at start-up.
//!
//! A host exposes its extension points as a [`Namespace`] of live modules
//! and classes. Patch sets resolve targets by dotted name and copy or merge
//! attributes onto them from a source. Every method that replaces another
//! method is recorded in a [`PatchRegistry`], keyed by the replacement's own
//! identity, so the replacement can call through to what it replaced with
//! [`Call::invoke_previous`].
//!
//! ## Modules
//!
//! - [`object`] - Classes, instances, modules, methods and attribute values
//! - [`namespace`] - Module registry and dotted-name resolution
//! - [`patcher`] - `add`, `merge` and `auto` patch application
//! - [`registry`] - Records of replaced implementations
//! - [`call`] - The context passed to method bodies
//! - [`error`] - Patch engine errors

#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::return_self_not_must_use)]

pub mod call;
pub mod error;
pub mod namespace;
pub mod object;
pub mod patcher;
pub mod registry;

pub use call::Call;
pub use error::PatchError;
pub use namespace::{Namespace, Target};
pub use object::{
    Attr, BoundMethod, ClassBuilder, ClassRef, Instance, Method, MethodId, MethodKind,
    MethodResult, Module, ModuleRef, Receiver,
};
pub use patcher::{is_hidden, AutoOptions, PatchTarget, Patcher};
pub use registry::{PatchRecord, PatchRegistry};
