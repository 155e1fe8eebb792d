//! Applying attributes from a source onto a target.
//!
//! ```ignore
//! let patcher = Patcher::new(&namespace, &registry)
//!     .target_root("django.db")
//!     .source_root("django_more_enum.patches");
//! patcher
//!     .cls("backends.postgresql.features.DatabaseFeatures", Some("PostgresDatabaseFeatures"))?
//!     .auto()?;
//! ```

use std::collections::BTreeSet;

use crate::error::PatchError;
use crate::namespace::{Namespace, Target};
use crate::object::{Attr, MethodKind, Receiver};
use crate::registry::{PatchRecord, PatchRegistry};

/// Member filter for [`PatchTarget::auto_with`].
#[derive(Debug, Clone, Default)]
pub struct AutoOptions {
    /// Extra names to include even if hidden or not declared on the source.
    pub allow: BTreeSet<String>,
    /// When set, exactly these names are applied.
    pub only_allow: Option<BTreeSet<String>>,
}

impl AutoOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn allow<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn only_allow<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only_allow = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

/// Hidden names follow the leading-underscore convention.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('_')
}

/// Entry point for a set of patches, optionally rooted at a target package
/// and a source package.
#[derive(Debug, Clone, Copy)]
pub struct Patcher<'a> {
    namespace: &'a Namespace,
    registry: &'a PatchRegistry,
    target_root: Option<&'a str>,
    source_root: Option<&'a str>,
}

impl<'a> Patcher<'a> {
    pub const fn new(namespace: &'a Namespace, registry: &'a PatchRegistry) -> Self {
        Self {
            namespace,
            registry,
            target_root: None,
            source_root: None,
        }
    }

    /// Target names are resolved relative to this package.
    #[must_use]
    pub const fn target_root(mut self, root: &'a str) -> Self {
        self.target_root = Some(root);
        self
    }

    /// Source names are resolved relative to this package.
    #[must_use]
    pub const fn source_root(mut self, root: &'a str) -> Self {
        self.source_root = Some(root);
        self
    }

    pub const fn namespace(&self) -> &'a Namespace {
        self.namespace
    }

    pub const fn registry(&self) -> &'a PatchRegistry {
        self.registry
    }

    fn join(root: Option<&str>, name: &str) -> String {
        match root {
            Some(root) => format!("{root}.{name}"),
            None => name.to_string(),
        }
    }

    /// Patches the class at `target`. Without an explicit `source` the
    /// class of the same name under the source root is used.
    pub fn cls(&self, target: &str, source: Option<&str>) -> Result<PatchTarget<'a>, PatchError> {
        self.open(target, source, true)
    }

    /// Patches the module at `target`. Without an explicit `source` the
    /// source root module itself is used.
    pub fn module(&self, target: &str, source: Option<&str>) -> Result<PatchTarget<'a>, PatchError> {
        self.open(target, source, false)
    }

    /// Patches an already-resolved target with literal values only.
    pub fn target(&self, target: impl Into<Target>) -> PatchTarget<'a> {
        PatchTarget::new(self.namespace, self.registry, target.into(), None)
    }

    fn open(
        &self,
        target: &str,
        source: Option<&str>,
        want_class: bool,
    ) -> Result<PatchTarget<'a>, PatchError> {
        let target_name = Self::join(self.target_root, target);
        let source_name = match (source, self.source_root) {
            (Some(source), root) => Some(Self::join(root, source)),
            (None, Some(root)) if want_class => {
                let last = target.rsplit('.').next().unwrap_or(target);
                Some(format!("{root}.{last}"))
            }
            (None, Some(root)) => Some(root.to_string()),
            (None, None) => None,
        };
        let origin = source_name.clone().unwrap_or_else(|| "<values>".to_string());

        let resolved = self
            .namespace
            .resolve(&target_name, None)
            .map_err(|e| e.for_pair(&target_name, &origin))?;
        if want_class && resolved.as_class().is_none() {
            return Err(PatchError::InvalidTarget {
                name: target_name.clone(),
                reason: "expected a class".to_string(),
            }
            .for_pair(&target_name, &origin));
        }
        let source = source_name
            .map(|name| self.namespace.resolve(&name, None))
            .transpose()
            .map_err(|e| e.for_pair(&target_name, &origin))?;

        Ok(PatchTarget::new(self.namespace, self.registry, resolved, source))
    }
}

/// A resolved target together with its source.
#[derive(Debug, Clone)]
pub struct PatchTarget<'a> {
    namespace: &'a Namespace,
    registry: &'a PatchRegistry,
    target: Target,
    source: Option<Target>,
}

impl<'a> PatchTarget<'a> {
    const fn new(
        namespace: &'a Namespace,
        registry: &'a PatchRegistry,
        target: Target,
        source: Option<Target>,
    ) -> Self {
        Self {
            namespace,
            registry,
            target,
            source,
        }
    }

    pub const fn target(&self) -> &Target {
        &self.target
    }

    pub const fn source(&self) -> Option<&Target> {
        self.source.as_ref()
    }

    fn source_name(&self) -> String {
        self.source
            .as_ref()
            .map_or_else(|| "<values>".to_string(), Target::name)
    }

    /// Opens a class nested in this module target, with the class of the
    /// same (or the given) name in the source module as its source.
    pub fn cls(&self, name: &str, source: Option<&str>) -> Result<PatchTarget<'a>, PatchError> {
        let target_name = format!("{}.{name}", self.target.name());
        let class = match self.target.get(name) {
            Some(Attr::Class(class)) => class,
            _ => {
                return Err(PatchError::NotFound {
                    name: target_name.clone(),
                }
                .for_pair(target_name, self.source_name()))
            }
        };
        let source_class = match &self.source {
            Some(module) => {
                let source_attr = source.unwrap_or(name);
                match module.get(source_attr) {
                    Some(Attr::Class(class)) => Some(Target::Class(class)),
                    _ => {
                        return Err(PatchError::MissingAttribute {
                            target: module.name(),
                            name: source_attr.to_string(),
                        }
                        .for_pair(target_name, module.name()))
                    }
                }
            }
            None => None,
        };
        Ok(Self::new(
            self.namespace,
            self.registry,
            Target::Class(class),
            source_class,
        ))
    }

    fn fetch(&self, name: &str) -> Result<Attr, PatchError> {
        let Some(source) = &self.source else {
            return Err(PatchError::MissingAttribute {
                target: "<no source>".to_string(),
                name: name.to_string(),
            });
        };
        source.get(name).ok_or_else(|| PatchError::MissingAttribute {
            target: source.name(),
            name: name.to_string(),
        })
    }

    /// Copies the named attributes from the source onto the target.
    pub fn add(&self, names: &[&str]) -> Result<&Self, PatchError> {
        tracing::info!(
            "Patching {} from {} with attrs: {:?}",
            self.target.name(),
            self.source_name(),
            names
        );
        for name in names {
            let value = self
                .fetch(name)
                .map_err(|e| e.for_pair(self.target.name(), self.source_name()))?;
            self.assign(name, value)?;
        }
        Ok(self)
    }

    /// Assigns literal values onto the target.
    pub fn add_values<I, K>(&self, values: I) -> Result<&Self, PatchError>
    where
        I: IntoIterator<Item = (K, Attr)>,
        K: Into<String>,
    {
        let values: Vec<(String, Attr)> = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        tracing::info!(
            "Patching {} directly with attrs: {:?}",
            self.target.name(),
            values.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>()
        );
        for (name, value) in values {
            self.assign(&name, value)?;
        }
        Ok(self)
    }

    /// Like [`add`](Self::add), but containers are combined with the
    /// existing value instead of replacing it.
    pub fn merge(&self, names: &[&str]) -> Result<&Self, PatchError> {
        tracing::info!(
            "Merging {} from {} with attrs: {:?}",
            self.target.name(),
            self.source_name(),
            names
        );
        for name in names {
            let value = self
                .fetch(name)
                .map_err(|e| e.for_pair(self.target.name(), self.source_name()))?;
            self.merge_one(name, value)?;
        }
        Ok(self)
    }

    /// Merges literal values onto the target.
    pub fn merge_values<I, K>(&self, values: I) -> Result<&Self, PatchError>
    where
        I: IntoIterator<Item = (K, Attr)>,
        K: Into<String>,
    {
        for (name, value) in values {
            let name = name.into();
            self.merge_one(&name, value)?;
        }
        Ok(self)
    }

    /// Applies every visible member declared on the source.
    pub fn auto(&self) -> Result<&Self, PatchError> {
        self.auto_with(&AutoOptions::default())
    }

    pub fn auto_with(&self, options: &AutoOptions) -> Result<&Self, PatchError> {
        let names = self.auto_names(options)?;
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        self.add(&names)
    }

    fn auto_names(&self, options: &AutoOptions) -> Result<Vec<String>, PatchError> {
        let Some(source) = &self.source else {
            return Err(PatchError::InvalidTarget {
                name: self.target.name(),
                reason: "auto patching requires a source".to_string(),
            });
        };
        if let Some(only) = &options.only_allow {
            return Ok(only
                .iter()
                .filter(|name| source.get(name).is_some())
                .cloned()
                .collect());
        }
        let mut names: Vec<String> = source
            .own_names()
            .into_iter()
            .filter(|name| !is_hidden(name) && source.is_local(name))
            .collect();
        for name in &options.allow {
            if !names.contains(name) && source.get(name).is_some() {
                names.push(name.clone());
            }
        }
        Ok(names)
    }

    fn merge_one(&self, name: &str, value: Attr) -> Result<(), PatchError> {
        let merged = match (self.target.get(name), value) {
            (Some(Attr::Map(mut old)), Attr::Map(new)) => {
                old.extend(new);
                Attr::Map(old)
            }
            (Some(Attr::List(mut old)), Attr::List(new)) => {
                old.extend(new);
                Attr::List(old)
            }
            (Some(Attr::Set(mut old)), Attr::Set(new)) => {
                old.extend(new);
                Attr::Set(old)
            }
            (Some(Attr::Class(old)), Attr::Class(new)) => {
                tracing::debug!(
                    "Merging class {} into {}",
                    new.qualified_name(),
                    old.qualified_name()
                );
                let nested = Self::new(
                    self.namespace,
                    self.registry,
                    Target::Class(old),
                    Some(Target::Class(new)),
                );
                let names = nested.auto_names(&AutoOptions::default())?;
                for member in names {
                    let value = nested.fetch(&member)?;
                    nested.merge_one(&member, value)?;
                }
                return Ok(());
            }
            (None, new) => new,
            (Some(old), new) => {
                tracing::warn!(
                    "Cannot merge {}.{name}: {} with {}, replacing instead",
                    self.target.name(),
                    old.kind(),
                    new.kind()
                );
                new
            }
        };
        self.assign(name, merged)
    }

    fn assign(&self, name: &str, value: Attr) -> Result<(), PatchError> {
        let target_name = self.target.name();
        self.registry.ensure_writable(&target_name, name)?;

        let current = self.target.get(name);
        let rebound = matches!(value, Attr::Bound(_));
        let value = match value {
            Attr::Bound(bound) => {
                let kind = match bound.receiver() {
                    Receiver::Class(_) => MethodKind::Class,
                    _ => bound.method().kind(),
                };
                Attr::Method(bound.method().with_kind(kind))
            }
            other => other,
        };
        tracing::debug!(
            " {target_name}.{name} was {}, but will be {value}{}",
            current
                .as_ref()
                .map_or_else(|| "none".to_string(), ToString::to_string),
            if rebound { " which will be rebound" } else { "" }
        );

        if let (Some(new), Some(old)) = (
            value.as_method(),
            current.as_ref().and_then(Attr::as_method),
        ) {
            if new.id() == old.id() {
                tracing::debug!("{target_name}.{name} is already {new}, skipping");
                return Ok(());
            }
            self.registry.record(
                new,
                PatchRecord {
                    target: target_name,
                    name: name.to_string(),
                    previous: old.clone(),
                },
            )?;
        }

        self.target.set(name, value);
        Ok(())
    }
}
