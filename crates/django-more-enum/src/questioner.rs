//! Enum questions for the autodetector.
//!
//! Any [`MigrationQuestioner`] can answer them. Configured answers live
//! under `ask_rename_enum`, `ask_remove_enum_values` and
//! `ask_remove_enum_values_set`.

use std::collections::BTreeSet;

use serde_json::Value as Json;

use django_more_migrations::MigrationQuestioner;

use crate::operations::RemovalPolicy;

const REMOVAL_CHOICES: [&str; 7] = [
    "CASCADE: delete rows holding a removed value",
    "PROTECT: refuse to migrate while such rows exist",
    "SET_NULL: set the column to NULL",
    "SET_DEFAULT: set the column to its default",
    "SET(...): set the column to a value of your choice",
    "DO_NOTHING: leave the rows alone",
    "Leave it to the field definitions",
];

/// The enum questions, available on every questioner.
pub trait EnumQuestioner: MigrationQuestioner {
    /// Whether enum type `old` was renamed to `new`. Both hold `values`.
    fn ask_rename_enum(&mut self, old: &str, new: &str, values: &BTreeSet<String>) -> bool {
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        self.ask_boolean(
            "ask_rename_enum",
            &format!(
                "Did you rename enum {old} to {new} (values {})? [y/N]",
                values.join(", ")
            ),
            false,
        )
    }

    /// What to do with rows holding `removed` values of `db_type`. `None`
    /// leaves it to the field definitions.
    fn ask_remove_enum_values(&mut self, db_type: &str, removed: &[String]) -> Option<RemovalPolicy> {
        match self.default_for("ask_remove_enum_values") {
            Some(Json::Null) => return None,
            Some(Json::String(configured)) => match configured.parse() {
                Ok(policy) => return Some(policy),
                Err(e) => tracing::warn!("Ignoring configured removal policy: {}", e),
            },
            _ => {}
        }

        let choices: Vec<String> = REMOVAL_CHOICES.iter().map(|c| (*c).to_string()).collect();
        let prompt = format!(
            "Values {} were removed from enum {db_type}. What should happen to rows holding them?",
            removed.join(", ")
        );
        match self.ask_choice("ask_remove_enum_values", &prompt, &choices, 6) {
            0 => Some(RemovalPolicy::Cascade),
            1 => Some(RemovalPolicy::Protect),
            2 => Some(RemovalPolicy::SetNull),
            3 => Some(RemovalPolicy::SetDefault),
            4 => self
                .ask_text("ask_remove_enum_values_set", "Value to set those rows to:")
                .map(RemovalPolicy::Set),
            5 => Some(RemovalPolicy::DoNothing),
            _ => None,
        }
    }
}

impl<Q: MigrationQuestioner + ?Sized> EnumQuestioner for Q {}
