//! Migrations and the dependency graph between them.
//!
//! A [`Migration`] is a named sequence of [`Operation`]s belonging to one
//! app. The [`MigrationGraph`] orders migrations across apps so history can
//! be replayed and applied in dependency order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use django_more_core::{DjangoError, DjangoResult};

use crate::operations::Operation;
use crate::state::ProjectState;

/// `(app_label, name)` identifying a migration.
pub type MigrationKey = (String, String);

/// A single migration containing an ordered list of operations.
pub struct Migration {
    /// The migration name (e.g. "0001_initial").
    pub name: String,
    /// The app this migration belongs to.
    pub app_label: String,
    /// Migrations that must be applied before this one.
    pub dependencies: Vec<MigrationKey>,
    /// The operations to apply, in order.
    pub operations: Vec<Box<dyn Operation>>,
    /// Whether this is the first migration of its app.
    pub initial: bool,
}

impl Migration {
    pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            app_label: app_label.into(),
            dependencies: Vec::new(),
            operations: Vec::new(),
            initial: false,
        }
    }

    #[must_use]
    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    #[must_use]
    pub fn depends_on(mut self, app_label: impl Into<String>, name: impl Into<String>) -> Self {
        self.dependencies.push((app_label.into(), name.into()));
        self
    }

    #[must_use]
    pub fn add_operation(mut self, op: Box<dyn Operation>) -> Self {
        self.operations.push(op);
        self
    }

    pub fn key(&self) -> MigrationKey {
        (self.app_label.clone(), self.name.clone())
    }

    /// Applies every operation's state change to `state`, in order.
    pub fn mutate_state(&self, state: &mut ProjectState) -> DjangoResult<()> {
        for op in &self.operations {
            op.state_forwards(&self.app_label, state)?;
        }
        Ok(())
    }

    /// Whether every operation can be reversed.
    pub fn reversible(&self) -> bool {
        self.operations.iter().all(|op| op.reversible())
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("app_label", &self.app_label)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("operations", &self.operations.iter().map(|op| op.kind()).collect::<Vec<_>>())
            .field("initial", &self.initial)
            .finish()
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.name)
    }
}

// ── MigrationGraph ──────────────────────────────────────────────────────

/// The dependency DAG between migrations of all apps.
#[derive(Debug, Clone, Default)]
pub struct MigrationGraph {
    nodes: BTreeMap<MigrationKey, bool>,
    forward_edges: BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
    backward_edges: BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
}

impl MigrationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, app_label: impl Into<String>, name: impl Into<String>, initial: bool) {
        let key = (app_label.into(), name.into());
        self.forward_edges.entry(key.clone()).or_default();
        self.backward_edges.entry(key.clone()).or_default();
        self.nodes.insert(key, initial);
    }

    /// Records that `child` depends on `parent`. Both must be nodes.
    pub fn add_dependency(&mut self, child: MigrationKey, parent: MigrationKey) -> DjangoResult<()> {
        for key in [&child, &parent] {
            if !self.nodes.contains_key(key) {
                return Err(DjangoError::MigrationError(format!(
                    "Migration {}.{} not found in graph",
                    key.0, key.1
                )));
            }
        }
        self.forward_edges
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
        self.backward_edges.entry(child).or_default().insert(parent);
        Ok(())
    }

    /// All migrations, parents before children. Ties break by key.
    pub fn topological_order(&self) -> DjangoResult<Vec<MigrationKey>> {
        let mut in_degree: BTreeMap<&MigrationKey, usize> = self
            .backward_edges
            .iter()
            .map(|(key, parents)| (key, parents.len()))
            .collect();

        let mut queue: VecDeque<&MigrationKey> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&key, _)| key)
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());
        while let Some(node) = queue.pop_front() {
            result.push(node.clone());
            for child in self.forward_edges.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            let stuck: Vec<String> = in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(key, _)| format!("{}.{}", key.0, key.1))
                .collect();
            return Err(DjangoError::CircularDependency(format!(
                "migration graph: {}",
                stuck.join(", ")
            )));
        }
        Ok(result)
    }

    /// `target` and everything it transitively depends on, parents first.
    pub fn forwards_plan(&self, target: &MigrationKey) -> DjangoResult<Vec<MigrationKey>> {
        let ancestors = self.closure(target, &self.backward_edges)?;
        Ok(self
            .topological_order()?
            .into_iter()
            .filter(|key| ancestors.contains(key))
            .collect())
    }

    /// `target` and everything that transitively depends on it, children
    /// first.
    pub fn backwards_plan(&self, target: &MigrationKey) -> DjangoResult<Vec<MigrationKey>> {
        let descendants = self.closure(target, &self.forward_edges)?;
        let mut plan: Vec<MigrationKey> = self
            .topological_order()?
            .into_iter()
            .filter(|key| descendants.contains(key))
            .collect();
        plan.reverse();
        Ok(plan)
    }

    fn closure(
        &self,
        start: &MigrationKey,
        edges: &BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
    ) -> DjangoResult<BTreeSet<MigrationKey>> {
        if !self.contains(start) {
            return Err(DjangoError::MigrationError(format!(
                "Migration {}.{} not found in graph",
                start.0, start.1
            )));
        }
        let mut seen = BTreeSet::new();
        let mut stack = vec![start.clone()];
        while let Some(key) = stack.pop() {
            if seen.insert(key.clone()) {
                stack.extend(edges.get(&key).into_iter().flatten().cloned());
            }
        }
        Ok(seen)
    }

    /// Migrations of `app_label` that nothing in the same app depends on.
    pub fn leaf_nodes(&self, app_label: &str) -> Vec<MigrationKey> {
        self.forward_edges
            .iter()
            .filter(|(key, children)| {
                key.0 == app_label && !children.iter().any(|child| child.0 == app_label)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Migrations of `app_label` with no dependencies in the same app.
    pub fn root_nodes(&self, app_label: &str) -> Vec<MigrationKey> {
        self.backward_edges
            .iter()
            .filter(|(key, parents)| {
                key.0 == app_label && !parents.iter().any(|parent| parent.0 == app_label)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn node_keys(&self) -> Vec<MigrationKey> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &MigrationKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn is_initial(&self, key: &MigrationKey) -> bool {
        self.nodes.get(key).copied().unwrap_or(false)
    }

    pub fn dependencies(&self, key: &MigrationKey) -> Vec<MigrationKey> {
        self.backward_edges
            .get(key)
            .map(|parents| parents.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn dependents(&self, key: &MigrationKey) -> Vec<MigrationKey> {
        self.forward_edges
            .get(key)
            .map(|children| children.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn validate(&self) -> DjangoResult<()> {
        self.topological_order().map(|_| ())
    }
}
