//! Errors raised by the patch engine.
//!
//! Resolution failures distinguish a target that does not exist
//! ([`PatchError::NotFound`]) from one that exists but failed to load
//! ([`PatchError::Resolve`]), so start-up code can tell a configuration
//! mistake from a broken dependency.

/// The error type for every fallible patch engine operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    /// No module or attribute matches the dotted name.
    #[error("No module or attribute found for '{name}'")]
    NotFound {
        /// The absolute dotted name that was looked up.
        name: String,
    },

    /// The module exists but loading it failed.
    #[error("Resolving '{name}' failed: {reason}")]
    Resolve {
        /// The module path whose loader failed.
        name: String,
        /// The loader's error message.
        reason: String,
    },

    /// The name resolved to something that cannot be patched.
    #[error("'{name}' is not a valid patch target: {reason}")]
    InvalidTarget {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The source (or target) lacks the requested attribute.
    #[error("{target} has no attribute '{name}'")]
    MissingAttribute {
        /// The object that was searched.
        target: String,
        /// The attribute name.
        name: String,
    },

    /// No replaced implementation is recorded for a method.
    #[error("No previous implementation recorded for {method}")]
    NoPrevious {
        /// Qualified name of the calling method.
        method: String,
    },

    /// A patch was attempted after start-up completed.
    #[error("Patch registry is frozen; cannot patch {target}.{name} after start-up")]
    Frozen {
        /// The target being patched.
        target: String,
        /// The attribute being patched.
        name: String,
    },

    /// A method call failed at runtime.
    #[error("Calling {method} failed: {reason}")]
    Call {
        /// Qualified name of the method.
        method: String,
        /// What went wrong.
        reason: String,
    },

    /// Applying a patch from a source onto a target failed.
    #[error("Patching {target} from {origin} failed: {cause}")]
    Failed {
        /// The target name.
        target: String,
        /// The source name.
        origin: String,
        /// The underlying failure.
        #[source]
        cause: Box<PatchError>,
    },
}

impl PatchError {
    /// Wraps this error with the target/source pair that was being patched.
    pub fn for_pair(self, target: impl Into<String>, origin: impl Into<String>) -> Self {
        match self {
            already @ Self::Failed { .. } => already,
            cause => Self::Failed {
                target: target.into(),
                origin: origin.into(),
                cause: Box::new(cause),
            },
        }
    }

    /// Builds a [`PatchError::Call`] for the given method.
    pub fn call(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Call {
            method: method.into(),
            reason: reason.into(),
        }
    }
}
