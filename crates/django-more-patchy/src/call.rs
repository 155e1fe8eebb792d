//! The context handed to every method body.

use serde_json::Value;

use crate::error::PatchError;
use crate::object::{Attr, BoundMethod, ClassRef, Instance, Method, MethodResult, Receiver};
use crate::registry::PatchRegistry;

/// The receiver, the running method and the registry, as seen from inside a
/// method body.
///
/// [`Call::invoke_previous`] is the patch-aware counterpart of calling the
/// overridden implementation: it finds whatever the running method replaced
/// by looking up the running method's own identity in the registry.
pub struct Call<'a> {
    registry: &'a PatchRegistry,
    method: &'a Method,
    receiver: &'a Receiver,
}

impl<'a> Call<'a> {
    pub(crate) const fn new(
        registry: &'a PatchRegistry,
        method: &'a Method,
        receiver: &'a Receiver,
    ) -> Self {
        Self {
            registry,
            method,
            receiver,
        }
    }

    pub const fn registry(&self) -> &'a PatchRegistry {
        self.registry
    }

    /// The method currently executing.
    pub const fn method(&self) -> &'a Method {
        self.method
    }

    pub const fn receiver(&self) -> &'a Receiver {
        self.receiver
    }

    pub fn instance(&self) -> Result<&'a Instance, PatchError> {
        match self.receiver {
            Receiver::Instance(instance) => Ok(instance),
            _ => Err(PatchError::call(
                self.method.qualname(),
                "called without an instance",
            )),
        }
    }

    /// The class of the receiver (the class itself for class methods).
    pub fn class(&self) -> Result<ClassRef, PatchError> {
        self.receiver
            .class()
            .ok_or_else(|| PatchError::call(self.method.qualname(), "called without a class"))
    }

    /// Attribute access on the receiver.
    pub fn get(&self, name: &str) -> Result<Attr, PatchError> {
        self.receiver.get(self.registry, name)
    }

    /// Calls another method on the same receiver.
    pub fn call_method(&self, name: &str, args: &[Value]) -> MethodResult {
        self.receiver.call_method(self.registry, name, args)
    }

    /// Calls `name` on the next class after the running method's owner in
    /// the receiver's MRO. Methods without an owner start after the
    /// receiver's own class.
    pub fn call_super(&self, name: &str, args: &[Value]) -> MethodResult {
        let class = self.class()?;
        let mro = class.mro();
        let start = self
            .method
            .owner()
            .and_then(|owner| mro.iter().position(|c| c.qualified_name() == owner))
            .unwrap_or(0);
        let found = mro.iter().skip(start + 1).find_map(|c| c.own(name));
        match found {
            Some(attr) => match attr.as_method() {
                Some(method) => {
                    BoundMethod::bind(method.clone(), self.receiver).call(self.registry, args)
                }
                None => Err(PatchError::call(
                    format!("super({}).{name}", class.qualified_name()),
                    format!("{} is not callable", attr.kind()),
                )),
            },
            None => Err(PatchError::MissingAttribute {
                target: format!("super({})", class.qualified_name()),
                name: name.to_string(),
            }),
        }
    }

    /// The implementation the running method replaced, bound to the same
    /// receiver but not called.
    pub fn previous(&self) -> Result<BoundMethod, PatchError> {
        self.registry
            .previous(self.method.id())
            .map(|method| BoundMethod::bind(method, self.receiver))
            .ok_or_else(|| PatchError::NoPrevious {
                method: self.method.qualname(),
            })
    }

    /// Calls the implementation the running method replaced.
    ///
    /// # Panics
    ///
    /// Panics when the running method was not installed by the patch
    /// engine over an existing method. That is a programming error, so it
    /// is not reported as a recoverable [`PatchError`].
    pub fn invoke_previous(&self, args: &[Value]) -> MethodResult {
        let Some(previous) = self.registry.previous(self.method.id()) else {
            panic!(
                "invoke_previous called from {}, which was not installed over an existing implementation",
                self.method.qualname()
            );
        };
        BoundMethod::bind(previous, self.receiver).call(self.registry, args)
    }
}
