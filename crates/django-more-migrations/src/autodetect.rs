//! Migration auto-detection by comparing project states.
//!
//! The [`MigrationAutodetector`] compares a "from" [`ProjectState`] with a
//! "to" [`ProjectState`] and produces the operations that turn one into the
//! other, per app, ordered so every operation runs after whatever it
//! depends on.
//!
//! Custom types are handled by [`AutodetectorExtension`]s. They run first,
//! see both states through a [`DetectionContext`], and may seed the "to"
//! state, ask questions, and record type renames. Model and field diffing
//! runs afterwards and treats a column whose type was renamed as unchanged.

use std::collections::{BTreeMap, BTreeSet};

use django_more_core::{DjangoError, DjangoResult};
use django_more_db::{DependencyEdge, FieldType};

use crate::migration::{Migration, MigrationGraph, MigrationKey};
use crate::operations::{
    AddField, AlterField, CreateModel, DeleteModel, Operation, RemoveField, RenameField,
};
use crate::questioner::MigrationQuestioner;
use crate::serializer::generate_migration_name;
use crate::state::{MigrationFieldDef, ModelState, ProjectState};

// ── Changes ─────────────────────────────────────────────────────────────

/// Detected operations, grouped by app label.
#[derive(Debug, Default)]
pub struct Changes {
    by_app: BTreeMap<String, Vec<Box<dyn Operation>>>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `op` to `app_label`'s list, or puts it first when
    /// `beginning` is set.
    pub fn add_operation(&mut self, app_label: &str, op: Box<dyn Operation>, beginning: bool) {
        tracing::debug!(app = app_label, operation = %op.describe(), "detected change");
        let ops = self.by_app.entry(app_label.to_string()).or_default();
        if beginning {
            ops.insert(0, op);
        } else {
            ops.push(op);
        }
    }

    pub fn get(&self, app_label: &str) -> &[Box<dyn Operation>] {
        self.by_app.get(app_label).map_or(&[], Vec::as_slice)
    }

    pub fn apps(&self) -> impl Iterator<Item = &str> {
        self.by_app.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_app.values().all(Vec::is_empty)
    }

    /// Total number of operations across apps.
    pub fn len(&self) -> usize {
        self.by_app.values().map(Vec::len).sum()
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<Box<dyn Operation>>> {
        self.by_app
    }
}

// ── Extensions ──────────────────────────────────────────────────────────

/// Everything an extension sees while detecting changes.
pub struct DetectionContext<'a> {
    pub from_state: &'a ProjectState,
    pub to_state: &'a mut ProjectState,
    pub questioner: &'a mut dyn MigrationQuestioner,
    pub changes: Changes,
    renamed_types: BTreeMap<String, String>,
}

impl<'a> DetectionContext<'a> {
    pub fn new(
        from_state: &'a ProjectState,
        to_state: &'a mut ProjectState,
        questioner: &'a mut dyn MigrationQuestioner,
    ) -> Self {
        Self {
            from_state,
            to_state,
            questioner,
            changes: Changes::new(),
            renamed_types: BTreeMap::new(),
        }
    }

    /// Records that custom type `old_name` is now called `new_name`.
    pub fn record_type_rename(&mut self, old_name: impl Into<String>, new_name: impl Into<String>) {
        self.renamed_types.insert(new_name.into(), old_name.into());
    }

    /// The previous name of a renamed custom type.
    pub fn renamed_from(&self, new_name: &str) -> Option<&str> {
        self.renamed_types.get(new_name).map(String::as_str)
    }
}

/// A strategy object adding detection for something the host does not
/// know about, such as custom database types.
pub trait AutodetectorExtension: Send + Sync {
    fn name(&self) -> &str;

    fn generate(&self, ctx: &mut DetectionContext<'_>) -> DjangoResult<()>;
}

// ── MigrationAutodetector ───────────────────────────────────────────────

/// Compares two [`ProjectState`]s and generates migration operations.
///
/// Detects, in addition to what extensions report:
/// - New models (`CreateModel`) and deleted models (`DeleteModel`)
/// - Added fields (`AddField`) and removed fields (`RemoveField`)
/// - Renamed fields (`RenameField`), when the questioner confirms
/// - Altered fields (`AlterField`)
pub struct MigrationAutodetector {
    from_state: ProjectState,
    to_state: ProjectState,
    extensions: Vec<Box<dyn AutodetectorExtension>>,
}

impl MigrationAutodetector {
    pub fn new(from_state: ProjectState, to_state: ProjectState) -> Self {
        Self {
            from_state,
            to_state,
            extensions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_extension(mut self, extension: Box<dyn AutodetectorExtension>) -> Self {
        self.add_extension(extension);
        self
    }

    pub fn add_extension(&mut self, extension: Box<dyn AutodetectorExtension>) {
        self.extensions.push(extension);
    }

    pub fn extension_names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    pub fn from_state(&self) -> &ProjectState {
        &self.from_state
    }

    /// The target state, including anything extensions seeded into it.
    pub fn to_state(&self) -> &ProjectState {
        &self.to_state
    }

    /// Detects changes and returns each app's operations in dependency
    /// order.
    pub fn changes(
        &mut self,
        questioner: &mut dyn MigrationQuestioner,
    ) -> DjangoResult<BTreeMap<String, Vec<Box<dyn Operation>>>> {
        let span = tracing::debug_span!("autodetect", extensions = self.extensions.len());
        let _enter = span.enter();

        let mut ctx = DetectionContext::new(&self.from_state, &mut self.to_state, questioner);
        for extension in &self.extensions {
            tracing::debug!(extension = extension.name(), "running autodetector extension");
            extension.generate(&mut ctx)?;
        }
        generate_model_changes(&mut ctx);

        ctx.changes
            .into_inner()
            .into_iter()
            .filter(|(_, ops)| !ops.is_empty())
            .map(|(app, ops)| {
                let sorted = sort_operations(&app, ops)?;
                Ok((app, sorted))
            })
            .collect()
    }
}

fn generate_model_changes(ctx: &mut DetectionContext<'_>) {
    let from = ctx.from_state;
    let to_models: Vec<ModelState> = ctx.to_state.models.values().cloned().collect();

    for model in &to_models {
        if from.models.contains_key(&model.key()) {
            continue;
        }
        ctx.changes.add_operation(
            &model.app_label,
            Box::new(CreateModel {
                name: model.name.clone(),
                fields: model.fields.clone(),
                options: model.options.clone(),
            }),
            false,
        );
    }

    for (key, model) in &from.models {
        if !ctx.to_state.models.contains_key(key) {
            ctx.changes.add_operation(
                &model.app_label,
                Box::new(DeleteModel {
                    name: model.name.clone(),
                }),
                false,
            );
        }
    }

    for new_model in &to_models {
        if let Some(old_model) = from.models.get(&new_model.key()) {
            generate_field_changes(ctx, old_model, new_model);
        }
    }
}

fn generate_field_changes(ctx: &mut DetectionContext<'_>, old_model: &ModelState, new_model: &ModelState) {
    let app = new_model.app_label.as_str();
    let mut removed: Vec<&MigrationFieldDef> = old_model
        .fields
        .iter()
        .filter(|f| new_model.get_field(&f.name).is_none())
        .collect();
    let added: Vec<&MigrationFieldDef> = new_model
        .fields
        .iter()
        .filter(|f| old_model.get_field(&f.name).is_none())
        .collect();

    for field in added {
        let candidate = removed
            .iter()
            .position(|old| !fields_differ(ctx, old, field, false));
        let renamed = candidate.filter(|&i| {
            ctx.questioner.ask_rename(
                &new_model.name,
                &removed[i].name,
                &field.name,
                field.field_type.data_type_key(),
            )
        });
        if let Some(i) = renamed {
            let old = removed.remove(i);
            ctx.changes.add_operation(
                app,
                Box::new(RenameField {
                    model_name: new_model.name.clone(),
                    old_name: old.name.clone(),
                    new_name: field.name.clone(),
                }),
                false,
            );
        } else {
            ctx.changes.add_operation(
                app,
                Box::new(AddField {
                    model_name: new_model.name.clone(),
                    field: field.clone(),
                }),
                false,
            );
        }
    }

    for field in removed {
        ctx.changes.add_operation(
            app,
            Box::new(RemoveField {
                model_name: new_model.name.clone(),
                field_name: field.name.clone(),
            }),
            false,
        );
    }

    for new_field in &new_model.fields {
        let Some(old_field) = old_model.get_field(&new_field.name) else {
            continue;
        };
        if fields_differ(ctx, old_field, new_field, true) {
            ctx.changes.add_operation(
                app,
                Box::new(AlterField {
                    model_name: new_model.name.clone(),
                    field_name: new_field.name.clone(),
                    field: new_field.clone(),
                }),
                false,
            );
        }
    }
}

/// Whether two definitions describe different columns. A custom type that
/// was renamed counts as the same type. `compare_names` also compares the
/// field and column names.
fn fields_differ(
    ctx: &DetectionContext<'_>,
    old: &MigrationFieldDef,
    new: &MigrationFieldDef,
    compare_names: bool,
) -> bool {
    if compare_names && (old.name != new.name || old.column != new.column) {
        return true;
    }
    !field_types_match(ctx, &old.field_type, &new.field_type)
        || old.primary_key != new.primary_key
        || old.null != new.null
        || old.default != new.default
        || old.unique != new.unique
        || old.db_index != new.db_index
        || old.max_length != new.max_length
}

fn field_types_match(ctx: &DetectionContext<'_>, old: &FieldType, new: &FieldType) -> bool {
    match (old, new) {
        (
            FieldType::Custom {
                category: old_category,
                type_name: old_name,
            },
            FieldType::Custom {
                category: new_category,
                type_name: new_name,
            },
        ) => {
            old_category == new_category
                && (old_name == new_name || ctx.renamed_from(new_name) == Some(old_name.as_str()))
        }
        _ => old == new,
    }
}

// ── Ordering ────────────────────────────────────────────────────────────

fn satisfies(provided: &DependencyEdge, needed: &DependencyEdge) -> bool {
    provided == needed
        || (provided.field_name.is_none()
            && provided.owner_label == needed.owner_label
            && provided.object_name == needed.object_name
            && provided.created == needed.created
            && provided.target == needed.target)
}

/// Orders `ops` so each runs after every other operation in the list
/// that provides one of its dependency edges. Otherwise the original order
/// is kept. Edges nothing in the list provides are assumed satisfied.
pub fn sort_operations(
    app_label: &str,
    ops: Vec<Box<dyn Operation>>,
) -> DjangoResult<Vec<Box<dyn Operation>>> {
    let provides: Vec<Vec<DependencyEdge>> = ops.iter().map(|op| op.provides(app_label)).collect();
    let mut parents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); ops.len()];
    for (i, op) in ops.iter().enumerate() {
        for edge in op.dependencies(app_label) {
            for (j, provided) in provides.iter().enumerate() {
                if i != j && provided.iter().any(|p| satisfies(p, &edge)) {
                    parents[i].insert(j);
                }
            }
        }
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); ops.len()];
    for (i, ps) in parents.iter().enumerate() {
        for &p in ps {
            children[p].push(i);
        }
    }
    let mut waiting: Vec<usize> = parents.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = (0..ops.len()).filter(|&i| waiting[i] == 0).collect();
    let mut order = Vec::with_capacity(ops.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &child in &children[i] {
            waiting[child] -= 1;
            if waiting[child] == 0 {
                ready.insert(child);
            }
        }
    }

    if order.len() != ops.len() {
        let stuck: Vec<String> = (0..ops.len())
            .filter(|&i| waiting[i] > 0)
            .map(|i| ops[i].describe())
            .collect();
        return Err(DjangoError::CircularDependency(format!(
            "{app_label}: {}",
            stuck.join(", ")
        )));
    }

    let mut slots: Vec<Option<Box<dyn Operation>>> = ops.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

// ── Arranging into migrations ───────────────────────────────────────────

/// Wraps each app's operations in a migration that follows the app's
/// current leaf in `graph`.
///
/// Names are numbered after the existing leaf (`0001_initial` for a new
/// app). Operations depending on another app's objects make the migration
/// depend on that app's newest migration.
pub fn arrange_for_graph(
    changes: BTreeMap<String, Vec<Box<dyn Operation>>>,
    graph: &MigrationGraph,
) -> Vec<Migration> {
    let mut names: BTreeMap<String, MigrationKey> = BTreeMap::new();
    let mut numbered = Vec::new();
    for (app, ops) in changes {
        let leaf = graph.leaf_nodes(&app).into_iter().last();
        let name = match &leaf {
            None => generate_migration_name(1, Some("initial")),
            Some((_, leaf_name)) => {
                let number = leaf_name
                    .split('_')
                    .next()
                    .and_then(|n| n.parse::<u32>().ok())
                    .unwrap_or(0);
                generate_migration_name(number + 1, None)
            }
        };
        names.insert(app.clone(), (app.clone(), name.clone()));
        numbered.push((app, name, leaf, ops));
    }

    numbered
        .into_iter()
        .map(|(app, name, leaf, ops)| {
            let mut migration = Migration::new(&app, name);
            migration.initial = leaf.is_none();
            let mut dependencies: BTreeSet<MigrationKey> = leaf.into_iter().collect();
            for op in &ops {
                for edge in op.dependencies(&app) {
                    if edge.owner_label == app {
                        continue;
                    }
                    let other = names
                        .get(&edge.owner_label)
                        .cloned()
                        .or_else(|| graph.leaf_nodes(&edge.owner_label).into_iter().last());
                    dependencies.extend(other);
                }
            }
            migration.dependencies = dependencies.into_iter().collect();
            migration.operations = ops;
            migration
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::RunSQL;
    use crate::questioner::NonInteractiveQuestioner;
    use crate::state::ModelOptions;
    use django_more_db::OnDelete;

    fn post(fields: Vec<MigrationFieldDef>) -> ModelState {
        let mut all = vec![MigrationFieldDef::new("id", FieldType::BigAutoField).primary_key()];
        all.extend(fields);
        ModelState::new("blog", "post", all)
    }

    fn state(models: Vec<ModelState>) -> ProjectState {
        let mut state = ProjectState::new();
        for model in models {
            state.add_model(model);
        }
        state
    }

    fn kinds(ops: &[Box<dyn Operation>]) -> Vec<&'static str> {
        ops.iter().map(|op| op.kind()).collect()
    }

    fn detect(
        from: ProjectState,
        to: ProjectState,
        questioner: &mut dyn MigrationQuestioner,
    ) -> BTreeMap<String, Vec<Box<dyn Operation>>> {
        MigrationAutodetector::new(from, to).changes(questioner).unwrap()
    }

    fn title() -> MigrationFieldDef {
        MigrationFieldDef::new("title", FieldType::CharField).max_length(200)
    }

    // ── Models ──

    #[test]
    fn test_no_changes() {
        let s = state(vec![post(vec![title()])]);
        let changes = detect(s.clone(), s, &mut NonInteractiveQuestioner::default());
        assert!(changes.is_empty());
    }

    #[test]
    fn test_create_and_delete_model() {
        let from = state(vec![ModelState::new("blog", "draft", vec![])]);
        let to = state(vec![post(vec![])]);
        let changes = detect(from, to, &mut NonInteractiveQuestioner::default());
        assert_eq!(kinds(&changes["blog"]), vec!["CreateModel", "DeleteModel"]);
    }

    // ── Fields ──

    #[test]
    fn test_add_remove_alter_field() {
        let from = state(vec![post(vec![
            title(),
            MigrationFieldDef::new("body", FieldType::TextField),
        ])]);
        let to = state(vec![post(vec![
            title().nullable(),
            MigrationFieldDef::new("views", FieldType::IntegerField).default(0),
        ])]);
        let changes = detect(from, to, &mut NonInteractiveQuestioner::default());
        assert_eq!(
            kinds(&changes["blog"]),
            vec!["AddField", "RemoveField", "AlterField"]
        );
    }

    #[test]
    fn test_rename_field_needs_confirmation() {
        let from = state(vec![post(vec![title()])]);
        let to = state(vec![post(vec![MigrationFieldDef::new("headline", FieldType::CharField)
            .max_length(200)])]);

        let changes = detect(from.clone(), to.clone(), &mut NonInteractiveQuestioner::default());
        assert_eq!(kinds(&changes["blog"]), vec!["AddField", "RemoveField"]);

        let mut yes = NonInteractiveQuestioner::default().with_default("ask_rename", true);
        let changes = detect(from, to, &mut yes);
        assert_eq!(kinds(&changes["blog"]), vec!["RenameField"]);
        let rename = changes["blog"][0].as_any().downcast_ref::<RenameField>().unwrap();
        assert_eq!((rename.old_name.as_str(), rename.new_name.as_str()), ("title", "headline"));
    }

    #[test]
    fn test_renamed_custom_type_is_not_an_alteration() {
        struct RenameMood;
        impl AutodetectorExtension for RenameMood {
            fn name(&self) -> &str {
                "rename-mood"
            }
            fn generate(&self, ctx: &mut DetectionContext<'_>) -> DjangoResult<()> {
                ctx.record_type_rename("blog_enum_mood", "blog_enum_feeling");
                Ok(())
            }
        }

        let from = state(vec![post(vec![MigrationFieldDef::custom("mood", "enum", "blog_enum_mood")])]);
        let to = state(vec![post(vec![MigrationFieldDef::custom("mood", "enum", "blog_enum_feeling")])]);

        let changes = detect(from.clone(), to.clone(), &mut NonInteractiveQuestioner::default());
        assert_eq!(kinds(&changes["blog"]), vec!["AlterField"]);

        let mut detector = MigrationAutodetector::new(from, to).with_extension(Box::new(RenameMood));
        assert_eq!(detector.extension_names(), vec!["rename-mood"]);
        let changes = detector.changes(&mut NonInteractiveQuestioner::default()).unwrap();
        assert!(changes.is_empty());
    }

    // ── Ordering ──

    #[test]
    fn test_extension_operations_can_go_first() {
        struct Prelude;
        impl AutodetectorExtension for Prelude {
            fn name(&self) -> &str {
                "prelude"
            }
            fn generate(&self, ctx: &mut DetectionContext<'_>) -> DjangoResult<()> {
                ctx.changes.add_operation("blog", Box::new(RunSQL::new("SELECT 2", "")), false);
                ctx.changes.add_operation("blog", Box::new(RunSQL::new("SELECT 1", "")), true);
                Ok(())
            }
        }
        let mut detector = MigrationAutodetector::new(ProjectState::new(), state(vec![post(vec![])]))
            .with_extension(Box::new(Prelude));
        let changes = detector.changes(&mut NonInteractiveQuestioner::default()).unwrap();
        let sql: Vec<&str> = changes["blog"]
            .iter()
            .filter_map(|op| op.as_any().downcast_ref::<RunSQL>())
            .map(|op| op.sql_forwards.as_str())
            .collect();
        assert_eq!(sql, vec!["SELECT 1", "SELECT 2"]);
        assert_eq!(kinds(&changes["blog"]), vec!["RunSQL", "RunSQL", "CreateModel"]);
    }

    #[test]
    fn test_sort_puts_dependencies_first() {
        let comment = CreateModel {
            name: "comment".into(),
            fields: vec![MigrationFieldDef::new(
                "post",
                FieldType::ForeignKey {
                    to: "blog.post".into(),
                    on_delete: OnDelete::Cascade,
                    related_name: None,
                },
            )],
            options: ModelOptions::default(),
        };
        let post = CreateModel {
            name: "post".into(),
            fields: vec![],
            options: ModelOptions::default(),
        };
        let ops: Vec<Box<dyn Operation>> = vec![Box::new(comment), Box::new(post)];
        let sorted = sort_operations("blog", ops).unwrap();
        let names: Vec<String> = sorted.iter().map(|op| op.describe()).collect();
        assert_eq!(names, vec!["Create model post", "Create model comment"]);
    }

    #[test]
    fn test_sort_detects_cycles() {
        let fk = |name: &str, to: &str| CreateModel {
            name: name.into(),
            fields: vec![MigrationFieldDef::new(
                "other",
                FieldType::ForeignKey {
                    to: to.into(),
                    on_delete: OnDelete::Cascade,
                    related_name: None,
                },
            )],
            options: ModelOptions::default(),
        };
        let ops: Vec<Box<dyn Operation>> = vec![Box::new(fk("a", "blog.b")), Box::new(fk("b", "blog.a"))];
        let err = sort_operations("blog", ops).unwrap_err();
        assert!(matches!(err, DjangoError::CircularDependency(_)));
    }

    #[test]
    fn test_field_edge_satisfied_by_whole_model() {
        let created = DependencyEdge::created("blog", "post");
        assert!(satisfies(&created, &DependencyEdge::created("blog", "post").with_field("title")));
        assert!(!satisfies(
            &DependencyEdge::created("blog", "post").with_field("title"),
            &created
        ));
        assert!(!satisfies(&created, &DependencyEdge::deleted("blog", "post")));
        assert!(!satisfies(&DependencyEdge::type_created("blog", "post"), &created));
        assert!(satisfies(
            &DependencyEdge::type_created("blog", "post"),
            &DependencyEdge::type_created("blog", "post")
        ));
    }

    // ── Arranging ──

    #[test]
    fn test_arrange_for_graph() {
        let mut graph = MigrationGraph::new();
        graph.add_node("auth", "0003_groups", false);

        let mut changes: BTreeMap<String, Vec<Box<dyn Operation>>> = BTreeMap::new();
        changes.insert(
            "auth".into(),
            vec![Box::new(RunSQL::new("SELECT 1", "")) as Box<dyn Operation>],
        );
        changes.insert(
            "blog".into(),
            vec![Box::new(CreateModel {
                name: "post".into(),
                fields: vec![MigrationFieldDef::new(
                    "author",
                    FieldType::ForeignKey {
                        to: "auth.user".into(),
                        on_delete: OnDelete::Cascade,
                        related_name: None,
                    },
                )],
                options: ModelOptions::default(),
            }) as Box<dyn Operation>],
        );

        let migrations = arrange_for_graph(changes, &graph);
        assert_eq!(migrations.len(), 2);
        assert!(migrations[0].name.starts_with("0004_auto_"));
        assert_eq!(migrations[0].dependencies, vec![("auth".to_string(), "0003_groups".to_string())]);
        assert_eq!(migrations[1].name, "0001_initial");
        assert!(migrations[1].initial);
        assert_eq!(migrations[1].dependencies, vec![migrations[0].key()]);
    }
}
