//! Autodetection of enum type changes.
//!
//! [`EnumDetector`] runs before model diffing. It compares the enum types
//! of the two states and reports renames, new and removed types, and
//! changed value lists. Renamed types are recorded on the context so that
//! columns following the rename are not reported as altered.

use std::collections::{BTreeMap, BTreeSet};

use django_more_core::{DjangoError, DjangoResult};
use django_more_db::{CustomTypeField, TypeDef, Value};
use django_more_migrations::{AutodetectorExtension, DetectionContext, Operation, ProjectState};

use crate::enum_def::ENUM_CATEGORY;
use crate::operations::{AlterEnum, CreateEnum, FieldRef, RemoveEnum, RenameEnum};
use crate::questioner::EnumQuestioner;

/// Finds enum types created, removed, renamed or altered between states.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumDetector;

/// Enum types of `state` by name: registered ones, then any a live
/// field carries that the state has not registered.
fn enum_types(state: &ProjectState) -> BTreeMap<String, TypeDef> {
    let mut types: BTreeMap<String, TypeDef> = state
        .db_types()
        .iter()
        .filter(|(_, def)| def.category() == ENUM_CATEGORY)
        .map(|(name, def)| (name.clone(), def.clone()))
        .collect();
    for field in state.models.values().flat_map(|m| m.fields.iter()) {
        if field.is_custom_type() && field.category() == ENUM_CATEGORY {
            if let Some(def) = field.type_def() {
                types
                    .entry(field.type_name().to_string())
                    .or_insert_with(|| def.clone());
            }
        }
    }
    types
}

fn stored_values(def: &TypeDef) -> Vec<String> {
    def.values()
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

/// The app owning `type_name` in `state`.
fn owner(state: &ProjectState, type_name: &str, def: &TypeDef) -> DjangoResult<String> {
    if let Some(label) = state.type_app_label(type_name) {
        return Ok(label.to_string());
    }
    if let Some(label) = def.explicit_app_label() {
        return Ok(label.to_string());
    }
    state
        .models
        .values()
        .flat_map(|m| m.fields.iter())
        .find(|f| f.is_custom_type() && f.type_name() == type_name)
        .and_then(|f| f.type_app_label().map(str::to_string))
        .ok_or_else(|| {
            DjangoError::MigrationError(format!("cannot tell which app owns enum type '{type_name}'"))
        })
}

impl AutodetectorExtension for EnumDetector {
    fn name(&self) -> &str {
        "enum"
    }

    fn generate(&self, ctx: &mut DetectionContext<'_>) -> DjangoResult<()> {
        let seeded = ctx.to_state.seed_types_from_fields(Some(ENUM_CATEGORY));
        if !seeded.is_empty() {
            tracing::debug!("Seeded enum types from fields: {:?}", seeded);
        }

        let old_types = enum_types(ctx.from_state);
        let new_types = enum_types(ctx.to_state);
        let mut removed: Vec<&String> = old_types
            .keys()
            .filter(|name| !new_types.contains_key(*name))
            .collect();
        let added: Vec<&String> = new_types
            .keys()
            .filter(|name| !old_types.contains_key(*name))
            .collect();

        let mut ops: Vec<(String, Box<dyn Operation>)> = Vec::new();
        let mut creates = Vec::new();

        for name in added {
            let def = &new_types[name];
            let app = owner(ctx.to_state, name, def)?;
            let values: BTreeSet<String> = stored_values(def).into_iter().collect();

            let mut renamed = None;
            for (i, old_name) in removed.iter().enumerate() {
                let old_def = &old_types[*old_name];
                let same_values = stored_values(old_def).into_iter().collect::<BTreeSet<_>>() == values;
                if same_values && ctx.questioner.ask_rename_enum(old_name, name, &values) {
                    renamed = Some(i);
                    break;
                }
            }

            match renamed {
                Some(i) => {
                    let old_name = removed.remove(i);
                    tracing::debug!("Enum type {} renamed to {}", old_name, name);
                    ctx.record_type_rename(old_name.as_str(), name.as_str());
                    let op: Box<dyn Operation> = Box::new(RenameEnum::new(old_name, name));
                    ops.push((app, op));
                }
                None => creates.push((app, CreateEnum::new(name, stored_values(def)))),
            }
        }
        ops.extend(creates.into_iter().map(|(app, op)| (app, Box::new(op) as Box<dyn Operation>)));

        for name in removed {
            let app = owner(ctx.from_state, name, &old_types[name])?;
            let mut op = RemoveEnum::new(name);
            op.fields = ctx
                .from_state
                .fields_with_type(name)
                .into_iter()
                .map(|((app_label, model_name), field_name)| FieldRef {
                    app_label,
                    model_name,
                    field_name,
                })
                .collect();
            ops.push((app, Box::new(op) as Box<dyn Operation>));
        }

        for (name, new_def) in &new_types {
            let Some(old_def) = old_types.get(name) else {
                continue;
            };
            let old_values = stored_values(old_def);
            let new_values = stored_values(new_def);
            let add: Vec<String> = new_values
                .iter()
                .filter(|v| !old_values.contains(v))
                .cloned()
                .collect();
            let remove: Vec<String> = old_values
                .iter()
                .filter(|v| !new_values.contains(v))
                .cloned()
                .collect();
            if add.is_empty() && remove.is_empty() {
                continue;
            }
            let on_delete = if remove.is_empty() {
                None
            } else {
                ctx.questioner.ask_remove_enum_values(name, &remove)
            };
            let app = owner(ctx.to_state, name, new_def)?;
            let op = AlterEnum::new(name)
                .add_values(add)
                .remove_values(remove)
                .on_delete(on_delete);
            ops.push((app, Box::new(op) as Box<dyn Operation>));
        }

        // Type changes go ahead of the model changes found afterwards.
        for (app, op) in ops.into_iter().rev() {
            ctx.changes.add_operation(&app, op, true);
        }
        Ok(())
    }
}
