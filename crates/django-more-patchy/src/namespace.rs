//! Module namespace and dotted-name resolution.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::PatchError;
use crate::object::{Attr, ClassRef, Module, ModuleRef};

type Loader = dyn Fn() -> Result<Module, String> + Send + Sync;

enum ModuleSlot {
    Loaded(ModuleRef),
    Pending(Arc<Loader>),
}

/// A live module or class that patches can be applied to.
#[derive(Debug, Clone)]
pub enum Target {
    Module(ModuleRef),
    Class(ClassRef),
}

impl Target {
    /// Dotted name of the target.
    pub fn name(&self) -> String {
        match self {
            Self::Module(module) => module.path(),
            Self::Class(class) => class.qualified_name(),
        }
    }

    pub const fn as_class(&self) -> Option<&ClassRef> {
        match self {
            Self::Class(class) => Some(class),
            Self::Module(_) => None,
        }
    }

    pub const fn as_module(&self) -> Option<&ModuleRef> {
        match self {
            Self::Module(module) => Some(module),
            Self::Class(_) => None,
        }
    }

    /// Attribute lookup; classes search their MRO.
    pub fn get(&self, name: &str) -> Option<Attr> {
        match self {
            Self::Module(module) => module.get(name),
            Self::Class(class) => class.get(name),
        }
    }

    pub fn own(&self, name: &str) -> Option<Attr> {
        match self {
            Self::Module(module) => module.get(name),
            Self::Class(class) => class.own(name),
        }
    }

    pub fn own_names(&self) -> Vec<String> {
        match self {
            Self::Module(module) => module.names(),
            Self::Class(class) => class.own_names(),
        }
    }

    pub fn set(&self, name: &str, attr: Attr) {
        match self {
            Self::Module(module) => module.set(name, attr),
            Self::Class(class) => class.set(name, attr),
        }
    }

    /// Whether `name` is declared on this target itself.
    pub fn is_local(&self, name: &str) -> bool {
        match self {
            Self::Module(module) => module.is_local(name),
            Self::Class(class) => class.own(name).is_some(),
        }
    }
}

impl From<ClassRef> for Target {
    fn from(class: ClassRef) -> Self {
        Self::Class(class)
    }
}

impl From<ModuleRef> for Target {
    fn from(module: ModuleRef) -> Self {
        Self::Module(module)
    }
}

/// Registry of the modules that make up the patchable surface of a host.
#[derive(Default)]
pub struct Namespace {
    modules: RwLock<BTreeMap<String, ModuleSlot>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an already-built module, replacing any previous entry.
    pub fn register(&self, module: Module) -> ModuleRef {
        let path = module.path().to_string();
        let module = ModuleRef::from(module);
        self.modules
            .write()
            .expect("namespace lock poisoned")
            .insert(path, ModuleSlot::Loaded(module.clone()));
        module
    }

    /// Registers a module that is built on first import.
    pub fn register_lazy<F>(&self, path: impl Into<String>, loader: F)
    where
        F: Fn() -> Result<Module, String> + Send + Sync + 'static,
    {
        self.modules
            .write()
            .expect("namespace lock poisoned")
            .insert(path.into(), ModuleSlot::Pending(Arc::new(loader)));
    }

    pub fn contains(&self, path: &str) -> bool {
        self.modules
            .read()
            .expect("namespace lock poisoned")
            .contains_key(path)
    }

    pub fn module_paths(&self) -> Vec<String> {
        self.modules
            .read()
            .expect("namespace lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Imports a module by absolute path, running its loader if needed.
    pub fn import(&self, path: &str) -> Result<ModuleRef, PatchError> {
        let loader = {
            let modules = self.modules.read().expect("namespace lock poisoned");
            match modules.get(path) {
                Some(ModuleSlot::Loaded(module)) => return Ok(module.clone()),
                Some(ModuleSlot::Pending(loader)) => loader.clone(),
                None => {
                    return Err(PatchError::NotFound {
                        name: path.to_string(),
                    })
                }
            }
        };

        let module = loader().map_err(|reason| PatchError::Resolve {
            name: path.to_string(),
            reason,
        })?;
        if module.path() != path {
            return Err(PatchError::Resolve {
                name: path.to_string(),
                reason: format!("loader produced module '{}'", module.path()),
            });
        }
        tracing::debug!("Imported module {path}");
        Ok(self.register(module))
    }

    /// Resolves a dotted name to a live module or class.
    ///
    /// Names starting with `.` are relative to `package`, one extra dot per
    /// parent level. The longest registered module prefix is imported and
    /// the rest of the name is walked as attributes.
    pub fn resolve(&self, name: &str, package: Option<&str>) -> Result<Target, PatchError> {
        let absolute = absolute_name(name, package)?;
        let parts: Vec<&str> = absolute.split('.').collect();

        for split in (1..=parts.len()).rev() {
            let path = parts[..split].join(".");
            if !self.contains(&path) {
                continue;
            }
            let module = self.import(&path)?;
            return walk(Target::Module(module), &parts[split..], &absolute);
        }

        Err(PatchError::NotFound { name: absolute })
    }

    /// Resolves a dotted name that must name a class.
    pub fn resolve_class(&self, name: &str, package: Option<&str>) -> Result<ClassRef, PatchError> {
        match self.resolve(name, package)? {
            Target::Class(class) => Ok(class),
            Target::Module(module) => Err(PatchError::InvalidTarget {
                name: module.path(),
                reason: "expected a class, found a module".to_string(),
            }),
        }
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("modules", &self.module_paths())
            .finish()
    }
}

fn absolute_name(name: &str, package: Option<&str>) -> Result<String, PatchError> {
    let level = name.chars().take_while(|c| *c == '.').count();
    if level == 0 {
        return Ok(name.to_string());
    }
    let Some(package) = package else {
        return Err(PatchError::InvalidTarget {
            name: name.to_string(),
            reason: "relative name requires a package".to_string(),
        });
    };
    let mut base: Vec<&str> = package.split('.').collect();
    if level - 1 >= base.len() {
        return Err(PatchError::InvalidTarget {
            name: name.to_string(),
            reason: format!("relative name goes beyond top-level package '{package}'"),
        });
    }
    base.truncate(base.len() - (level - 1));
    let rest = &name[level..];
    if rest.is_empty() {
        Ok(base.join("."))
    } else {
        Ok(format!("{}.{rest}", base.join(".")))
    }
}

fn walk(mut current: Target, rest: &[&str], absolute: &str) -> Result<Target, PatchError> {
    for part in rest {
        current = match current.get(part) {
            Some(Attr::Class(class)) => Target::Class(class),
            Some(Attr::Module(module)) => Target::Module(module),
            Some(other) => {
                return Err(PatchError::InvalidTarget {
                    name: absolute.to_string(),
                    reason: format!("'{part}' is a {}, not a module or class", other.kind()),
                })
            }
            None => {
                return Err(PatchError::NotFound {
                    name: absolute.to_string(),
                })
            }
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn namespace() -> Namespace {
        let ns = Namespace::new();
        let outer = ClassRef::new("Outer", "host.models", vec![]);
        outer.set("Meta", ClassRef::new("Meta", "host.models", vec![]));
        ns.register(
            Module::new("host.models")
                .with_class(outer)
                .with_attr("VERSION", json!("1.0")),
        );
        ns.register_lazy("host.broken", || Err("boom".to_string()));
        ns.register_lazy("host.lazy", || {
            Ok(Module::new("host.lazy").with_class(ClassRef::new("Lazy", "host.lazy", vec![])))
        });
        ns
    }

    // ── resolve ──

    #[test]
    fn test_resolve_module() {
        let target = namespace().resolve("host.models", None).unwrap();
        assert_eq!(target.name(), "host.models");
        assert!(target.as_module().is_some());
    }

    #[test]
    fn test_resolve_class_and_nested_class() {
        let ns = namespace();
        assert_eq!(ns.resolve("host.models.Outer", None).unwrap().name(), "host.models.Outer");
        let meta = ns.resolve_class("host.models.Outer.Meta", None).unwrap();
        assert_eq!(meta.name(), "Meta");
    }

    #[test]
    fn test_resolve_relative() {
        let ns = namespace();
        let target = ns.resolve(".Outer", Some("host.models")).unwrap();
        assert_eq!(target.name(), "host.models.Outer");
        let target = ns.resolve("..models.Outer", Some("host.models")).unwrap();
        assert_eq!(target.name(), "host.models.Outer");
    }

    #[test]
    fn test_resolve_relative_without_package() {
        let err = namespace().resolve(".Outer", None).unwrap_err();
        assert!(matches!(err, PatchError::InvalidTarget { .. }));
    }

    #[test]
    fn test_resolve_missing_is_not_found() {
        let ns = namespace();
        assert!(matches!(
            ns.resolve("host.models.Missing", None),
            Err(PatchError::NotFound { .. })
        ));
        assert!(matches!(
            ns.resolve("nowhere.at.all", None),
            Err(PatchError::NotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_broken_is_resolve_error() {
        let err = namespace().resolve("host.broken.Thing", None).unwrap_err();
        assert_eq!(
            err,
            PatchError::Resolve {
                name: "host.broken".into(),
                reason: "boom".into()
            }
        );
    }

    #[test]
    fn test_resolve_lazy_module_loads_once() {
        let ns = namespace();
        let first = ns.resolve_class("host.lazy.Lazy", None).unwrap();
        let second = ns.resolve_class("host.lazy.Lazy", None).unwrap();
        assert!(first.ptr_eq(&second));
    }

    #[test]
    fn test_resolve_data_attribute_is_invalid() {
        let err = namespace().resolve("host.models.VERSION", None).unwrap_err();
        assert!(matches!(err, PatchError::InvalidTarget { .. }));
    }
}
