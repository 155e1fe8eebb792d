//! The live object model that patches are applied to.
//!
//! Host code describes its patchable surface as [`Module`]s holding
//! [`ClassRef`]s, functions and data. Classes are shared handles: every
//! holder of a `ClassRef` observes attribute changes made by the patch
//! engine, which is what makes patching after instances exist work.
//!
//! Methods carry a stable [`MethodId`]. Clones of a method (including the
//! copy made when a method is rebound onto a new owner) keep the same id,
//! and the [`PatchRegistry`](crate::PatchRegistry) is keyed by it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use crate::call::Call;
use crate::error::PatchError;
use crate::registry::PatchRegistry;

/// The result of calling a patchable method.
pub type MethodResult = Result<Value, PatchError>;

type MethodFn = dyn Fn(&Call<'_>, &[Value]) -> MethodResult + Send + Sync;

static NEXT_METHOD_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a method body, shared by all clones of a [`Method`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u64);

impl MethodId {
    fn next() -> Self {
        Self(NEXT_METHOD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a method binds its receiver when it is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Bound to the instance it is looked up on.
    Instance,
    /// Bound to the class of whatever it is looked up on.
    Class,
    /// Never bound.
    Static,
    /// Called without arguments on attribute access.
    Property,
}

impl MethodKind {
    const fn label(self) -> &'static str {
        match self {
            Self::Instance => "method",
            Self::Class => "classmethod",
            Self::Static => "staticmethod",
            Self::Property => "property",
        }
    }
}

/// A callable attribute.
#[derive(Clone)]
pub struct Method {
    id: MethodId,
    name: String,
    kind: MethodKind,
    owner: Option<String>,
    func: Arc<MethodFn>,
}

impl Method {
    /// Creates a method with a fresh identity.
    pub fn new<F>(kind: MethodKind, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Call<'_>, &[Value]) -> MethodResult + Send + Sync + 'static,
    {
        Self {
            id: MethodId::next(),
            name: name.into(),
            kind,
            owner: None,
            func: Arc::new(func),
        }
    }

    /// An instance method.
    pub fn instance<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Call<'_>, &[Value]) -> MethodResult + Send + Sync + 'static,
    {
        Self::new(MethodKind::Instance, name, func)
    }

    /// A class method.
    pub fn class_method<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Call<'_>, &[Value]) -> MethodResult + Send + Sync + 'static,
    {
        Self::new(MethodKind::Class, name, func)
    }

    /// A static method, also used for module-level functions.
    pub fn static_method<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Call<'_>, &[Value]) -> MethodResult + Send + Sync + 'static,
    {
        Self::new(MethodKind::Static, name, func)
    }

    /// A read-only property.
    pub fn property<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Call<'_>, &[Value]) -> MethodResult + Send + Sync + 'static,
    {
        Self::new(MethodKind::Property, name, func)
    }

    pub const fn id(&self) -> MethodId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn kind(&self) -> MethodKind {
        self.kind
    }

    /// Qualified name of the class this method is attached to, if any.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// `Owner.name`, or just the name for free functions.
    pub fn qualname(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{owner}.{}", self.name),
            None => self.name.clone(),
        }
    }

    pub(crate) fn with_owner(&self, owner: Option<&str>) -> Self {
        Self {
            owner: owner.map(str::to_string),
            ..self.clone()
        }
    }

    pub(crate) fn with_kind(&self, kind: MethodKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    pub(crate) fn invoke(&self, call: &Call<'_>, args: &[Value]) -> MethodResult {
        (self.func)(call, args)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {} {}>", self.kind.label(), self.qualname(), self.id)
    }
}

/// What a method is bound to when called.
#[derive(Debug, Clone)]
pub enum Receiver {
    Unbound,
    Class(ClassRef),
    Instance(Instance),
}

impl Receiver {
    /// The class used for method resolution.
    pub fn class(&self) -> Option<ClassRef> {
        match self {
            Self::Unbound => None,
            Self::Class(class) => Some(class.clone()),
            Self::Instance(instance) => Some(instance.class()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Unbound => "<unbound>".to_string(),
            Self::Class(class) => class.qualified_name(),
            Self::Instance(instance) => format!("<{} instance>", instance.class().qualified_name()),
        }
    }

    /// Raw attribute lookup: instance overrides first, then the class MRO.
    pub fn lookup(&self, name: &str) -> Option<Attr> {
        match self {
            Self::Unbound => None,
            Self::Class(class) => class.get(name),
            Self::Instance(instance) => instance.own(name).or_else(|| instance.class().get(name)),
        }
    }

    /// Attribute access with binding: properties are evaluated and methods
    /// come back bound to this receiver.
    pub fn get(&self, registry: &PatchRegistry, name: &str) -> Result<Attr, PatchError> {
        match self.lookup(name) {
            Some(Attr::Method(method)) if method.kind() == MethodKind::Property => {
                BoundMethod::bind(method, self)
                    .call(registry, &[])
                    .map(Attr::from)
            }
            Some(Attr::Method(method)) => Ok(Attr::Bound(BoundMethod::bind(method, self))),
            Some(other) => Ok(other),
            None => Err(PatchError::MissingAttribute {
                target: self.describe(),
                name: name.to_string(),
            }),
        }
    }

    /// Looks up `name` and calls it with `args`.
    pub fn call_method(&self, registry: &PatchRegistry, name: &str, args: &[Value]) -> MethodResult {
        match self.lookup(name) {
            Some(Attr::Method(method)) if method.kind() == MethodKind::Property => Err(
                PatchError::call(method.qualname(), "property is not callable"),
            ),
            Some(Attr::Method(method)) => BoundMethod::bind(method, self).call(registry, args),
            Some(Attr::Bound(bound)) => bound.call(registry, args),
            Some(other) => Err(PatchError::call(
                format!("{}.{name}", self.describe()),
                format!("{} is not callable", other.kind()),
            )),
            None => Err(PatchError::MissingAttribute {
                target: self.describe(),
                name: name.to_string(),
            }),
        }
    }
}

/// A method paired with its receiver.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    method: Method,
    receiver: Receiver,
}

impl BoundMethod {
    /// Binds according to the method kind: static methods drop the
    /// receiver and class methods bind to the receiver's class.
    pub fn bind(method: Method, receiver: &Receiver) -> Self {
        let receiver = match method.kind() {
            MethodKind::Static => Receiver::Unbound,
            MethodKind::Class => receiver.class().map_or(Receiver::Unbound, Receiver::Class),
            MethodKind::Instance | MethodKind::Property => receiver.clone(),
        };
        Self { method, receiver }
    }

    pub const fn method(&self) -> &Method {
        &self.method
    }

    pub const fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn call(&self, registry: &PatchRegistry, args: &[Value]) -> MethodResult {
        let needs_instance = matches!(
            self.method.kind(),
            MethodKind::Instance | MethodKind::Property
        );
        if needs_instance && !matches!(self.receiver, Receiver::Instance(_)) {
            return Err(PatchError::call(
                self.method.qualname(),
                "unbound method requires an instance",
            ));
        }
        let call = Call::new(registry, &self.method, &self.receiver);
        self.method.invoke(&call, args)
    }
}

/// An attribute value held by a class, module or instance.
#[derive(Debug, Clone)]
pub enum Attr {
    Method(Method),
    /// A method already bound to a receiver; rebound when patched onto a class.
    Bound(BoundMethod),
    Map(serde_json::Map<String, Value>),
    List(Vec<Value>),
    Set(BTreeSet<String>),
    /// Scalar data.
    Data(Value),
    Class(ClassRef),
    Module(ModuleRef),
}

impl Attr {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Method(_) => "method",
            Self::Bound(_) => "bound method",
            Self::Map(_) => "mapping",
            Self::List(_) => "sequence",
            Self::Set(_) => "set",
            Self::Data(_) => "data",
            Self::Class(_) => "class",
            Self::Module(_) => "module",
        }
    }

    /// The underlying method of a method or bound-method attribute.
    pub const fn as_method(&self) -> Option<&Method> {
        match self {
            Self::Method(method) => Some(method),
            Self::Bound(bound) => Some(&bound.method),
            _ => None,
        }
    }

    pub const fn as_class(&self) -> Option<&ClassRef> {
        match self {
            Self::Class(class) => Some(class),
            _ => None,
        }
    }

    pub const fn as_map(&self) -> Option<&serde_json::Map<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub const fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Set(set) => Some(set),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Data(value) => value.as_bool(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Data(value) => value.as_str(),
            _ => None,
        }
    }

    /// Converts plain data attributes back into JSON.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Self::Data(value) => Some(value.clone()),
            Self::Map(map) => Some(Value::Object(map.clone())),
            Self::List(list) => Some(Value::Array(list.clone())),
            Self::Set(set) => Some(Value::Array(
                set.iter().cloned().map(Value::String).collect(),
            )),
            _ => None,
        }
    }
}

impl From<Value> for Attr {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Map(map),
            Value::Array(list) => Self::List(list),
            other => Self::Data(other),
        }
    }
}

impl From<Method> for Attr {
    fn from(method: Method) -> Self {
        Self::Method(method)
    }
}

impl From<ClassRef> for Attr {
    fn from(class: ClassRef) -> Self {
        Self::Class(class)
    }
}

impl From<ModuleRef> for Attr {
    fn from(module: ModuleRef) -> Self {
        Self::Module(module)
    }
}

impl From<BTreeSet<String>> for Attr {
    fn from(set: BTreeSet<String>) -> Self {
        Self::Set(set)
    }
}

impl From<bool> for Attr {
    fn from(value: bool) -> Self {
        Self::Data(Value::Bool(value))
    }
}

impl From<&str> for Attr {
    fn from(value: &str) -> Self {
        Self::Data(Value::String(value.to_string()))
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method(method) => write!(f, "{method}"),
            Self::Bound(bound) => write!(f, "<bound {} of {}>", bound.method, bound.receiver.describe()),
            Self::Class(class) => write!(f, "<class {}>", class.qualified_name()),
            Self::Module(module) => write!(f, "<module {}>", module.path()),
            Self::Set(set) => write!(f, "{set:?}"),
            Self::Map(_) | Self::List(_) | Self::Data(_) => match self.to_value() {
                Some(value) => write!(f, "{value}"),
                None => Ok(()),
            },
        }
    }
}

// ── Classes ─────────────────────────────────────────────────────────

#[derive(Debug)]
struct Class {
    name: String,
    module: String,
    bases: Vec<ClassRef>,
    attrs: BTreeMap<String, Attr>,
}

/// A shared handle to a live class.
#[derive(Clone)]
pub struct ClassRef(Arc<RwLock<Class>>);

impl ClassRef {
    /// Creates an empty class with the given bases.
    pub fn new(name: impl Into<String>, module: impl Into<String>, bases: Vec<Self>) -> Self {
        Self(Arc::new(RwLock::new(Class {
            name: name.into(),
            module: module.into(),
            bases,
            attrs: BTreeMap::new(),
        })))
    }

    pub fn builder(name: impl Into<String>, module: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            name: name.into(),
            module: module.into(),
            bases: Vec::new(),
            attrs: Vec::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Class> {
        self.0.read().expect("class lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Class> {
        self.0.write().expect("class lock poisoned")
    }

    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    pub fn module(&self) -> String {
        self.read().module.clone()
    }

    /// `module.Name`.
    pub fn qualified_name(&self) -> String {
        let class = self.read();
        format!("{}.{}", class.module, class.name)
    }

    pub fn bases(&self) -> Vec<Self> {
        self.read().bases.clone()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Method resolution order: this class first, then bases depth-first
    /// with duplicates dropped.
    pub fn mro(&self) -> Vec<Self> {
        let mut order = vec![self.clone()];
        for base in self.bases() {
            for class in base.mro() {
                if !order.iter().any(|seen| seen.ptr_eq(&class)) {
                    order.push(class);
                }
            }
        }
        order
    }

    pub fn is_subclass_of(&self, other: &Self) -> bool {
        self.mro().iter().any(|class| class.ptr_eq(other))
    }

    /// An attribute declared directly on this class.
    pub fn own(&self, name: &str) -> Option<Attr> {
        self.read().attrs.get(name).cloned()
    }

    pub fn own_names(&self) -> Vec<String> {
        self.read().attrs.keys().cloned().collect()
    }

    /// Looks `name` up through the MRO.
    pub fn get(&self, name: &str) -> Option<Attr> {
        self.mro().iter().find_map(|class| class.own(name))
    }

    /// Sets an attribute on this class. Methods are re-owned by this class.
    pub fn set(&self, name: impl Into<String>, attr: impl Into<Attr>) {
        let owner = self.qualified_name();
        let attr = match attr.into() {
            Attr::Method(method) => Attr::Method(method.with_owner(Some(&owner))),
            other => other,
        };
        self.write().attrs.insert(name.into(), attr);
    }

    pub fn remove(&self, name: &str) -> Option<Attr> {
        self.write().attrs.remove(name)
    }

    /// A method looked up on this class and bound to it.
    pub fn bound(&self, name: &str) -> Option<BoundMethod> {
        let method = self.get(name)?.as_method()?.clone();
        Some(BoundMethod::bind(method, &Receiver::Class(self.clone())))
    }

    /// Calls a class or static method.
    pub fn call(&self, registry: &PatchRegistry, name: &str, args: &[Value]) -> MethodResult {
        Receiver::Class(self.clone()).call_method(registry, name, args)
    }

    pub fn instantiate(&self) -> Instance {
        Instance(Arc::new(InstanceData {
            class: self.clone(),
            fields: RwLock::new(BTreeMap::new()),
        }))
    }
}

impl PartialEq for ClassRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class {}>", self.qualified_name())
    }
}

/// Builder for [`ClassRef`].
pub struct ClassBuilder {
    name: String,
    module: String,
    bases: Vec<ClassRef>,
    attrs: Vec<(String, Attr)>,
}

impl ClassBuilder {
    #[must_use]
    pub fn base(mut self, base: &ClassRef) -> Self {
        self.bases.push(base.clone());
        self
    }

    /// Adds a method under its own name.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.attrs.push((method.name().to_string(), Attr::Method(method)));
        self
    }

    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, attr: impl Into<Attr>) -> Self {
        self.attrs.push((name.into(), attr.into()));
        self
    }

    pub fn finish(self) -> ClassRef {
        let class = ClassRef::new(self.name, self.module, self.bases);
        for (name, attr) in self.attrs {
            class.set(name, attr);
        }
        class
    }
}

// ── Instances ───────────────────────────────────────────────────────

struct InstanceData {
    class: ClassRef,
    fields: RwLock<BTreeMap<String, Attr>>,
}

/// An instance of a live class, with its own attribute overrides.
#[derive(Clone)]
pub struct Instance(Arc<InstanceData>);

impl Instance {
    pub fn class(&self) -> ClassRef {
        self.0.class.clone()
    }

    pub fn own(&self, name: &str) -> Option<Attr> {
        self.0
            .fields
            .read()
            .expect("instance lock poisoned")
            .get(name)
            .cloned()
    }

    /// Sets an instance attribute, shadowing the class.
    pub fn set(&self, name: impl Into<String>, attr: impl Into<Attr>) {
        let attr = match attr.into() {
            Attr::Method(method) => Attr::Method(method.with_owner(None)),
            other => other,
        };
        self.0
            .fields
            .write()
            .expect("instance lock poisoned")
            .insert(name.into(), attr);
    }

    pub fn get(&self, registry: &PatchRegistry, name: &str) -> Result<Attr, PatchError> {
        Receiver::Instance(self.clone()).get(registry, name)
    }

    pub fn call(&self, registry: &PatchRegistry, name: &str, args: &[Value]) -> MethodResult {
        Receiver::Instance(self.clone()).call_method(registry, name, args)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} instance>", self.0.class.qualified_name())
    }
}

// ── Modules ─────────────────────────────────────────────────────────

/// A module definition, registered into a [`Namespace`](crate::Namespace).
#[derive(Debug)]
pub struct Module {
    path: String,
    members: BTreeMap<String, Attr>,
}

impl Module {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn with_class(mut self, class: ClassRef) -> Self {
        self.members.insert(class.name(), Attr::Class(class));
        self
    }

    #[must_use]
    pub fn with_function(mut self, function: Method) -> Self {
        self.members
            .insert(function.name().to_string(), Attr::Method(function.with_owner(None)));
        self
    }

    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, attr: impl Into<Attr>) -> Self {
        self.members.insert(name.into(), attr.into());
        self
    }
}

/// A shared handle to a loaded module.
#[derive(Clone)]
pub struct ModuleRef(Arc<RwLock<Module>>);

impl ModuleRef {
    pub fn path(&self) -> String {
        self.0.read().expect("module lock poisoned").path.clone()
    }

    pub fn get(&self, name: &str) -> Option<Attr> {
        self.0
            .read()
            .expect("module lock poisoned")
            .members
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.0
            .read()
            .expect("module lock poisoned")
            .members
            .keys()
            .cloned()
            .collect()
    }

    pub fn set(&self, name: impl Into<String>, attr: impl Into<Attr>) {
        let attr = match attr.into() {
            Attr::Method(method) => Attr::Method(method.with_owner(None)),
            other => other,
        };
        self.0
            .write()
            .expect("module lock poisoned")
            .members
            .insert(name.into(), attr);
    }

    /// Whether a member was defined in this module rather than imported.
    /// Classes record their defining module; submodules are never local.
    pub fn is_local(&self, name: &str) -> bool {
        match self.get(name) {
            Some(Attr::Class(class)) => class.module() == self.path(),
            Some(Attr::Module(_)) | None => false,
            Some(_) => true,
        }
    }

    /// Calls a module-level function.
    pub fn call(&self, registry: &PatchRegistry, name: &str, args: &[Value]) -> MethodResult {
        match self.get(name) {
            Some(Attr::Method(method)) => {
                BoundMethod::bind(method, &Receiver::Unbound).call(registry, args)
            }
            Some(Attr::Bound(bound)) => bound.call(registry, args),
            Some(other) => Err(PatchError::call(
                format!("{}.{name}", self.path()),
                format!("{} is not callable", other.kind()),
            )),
            None => Err(PatchError::MissingAttribute {
                target: self.path(),
                name: name.to_string(),
            }),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Module> for ModuleRef {
    fn from(module: Module) -> Self {
        Self(Arc::new(RwLock::new(module)))
    }
}

impl fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<module {}>", self.path())
    }
}
