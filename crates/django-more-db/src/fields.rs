//! Field type definitions.
//!
//! [`FieldType`] names the column kind of a model field. Built-in kinds map
//! to a backend `data_types` entry of the same name; [`FieldType::Custom`]
//! columns are looked up by their category and carry the name of the
//! database type they are declared against.

/// The type of a model field, determining its SQL column type.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum FieldType {
    /// Auto-incrementing 32-bit integer primary key.
    AutoField,
    /// Auto-incrementing 64-bit integer primary key.
    BigAutoField,
    /// Variable-length string with a max length.
    CharField,
    /// Unlimited-length text.
    TextField,
    /// 32-bit signed integer.
    IntegerField,
    /// 64-bit signed integer.
    BigIntegerField,
    /// 64-bit floating-point number.
    FloatField,
    /// Boolean (true/false).
    BooleanField,
    /// Date without time.
    DateField,
    /// Date and time.
    DateTimeField,
    /// UUID field.
    UuidField,
    /// JSON data.
    JsonField,
    /// Many-to-one relationship.
    ForeignKey {
        /// The target model (e.g. "shop.order").
        to: String,
        /// Behavior when the referenced object is deleted.
        on_delete: OnDelete,
        /// The name used for the reverse relation.
        related_name: Option<String>,
    },
    /// A column backed by a custom database type.
    Custom {
        /// Kind of custom type, e.g. "enum".
        category: String,
        /// The database type name.
        type_name: String,
    },
}

impl FieldType {
    /// Key into a backend's `data_types` table.
    pub fn data_type_key(&self) -> &str {
        match self {
            Self::AutoField => "AutoField",
            Self::BigAutoField => "BigAutoField",
            Self::CharField => "CharField",
            Self::TextField => "TextField",
            Self::IntegerField => "IntegerField",
            Self::BigIntegerField => "BigIntegerField",
            Self::FloatField => "FloatField",
            Self::BooleanField => "BooleanField",
            Self::DateField => "DateField",
            Self::DateTimeField => "DateTimeField",
            Self::UuidField => "UuidField",
            Self::JsonField => "JsonField",
            Self::ForeignKey { .. } => "ForeignKey",
            Self::Custom { category, .. } => category,
        }
    }

    /// The custom type name, for custom-type columns.
    pub fn custom_type_name(&self) -> Option<&str> {
        match self {
            Self::Custom { type_name, .. } => Some(type_name),
            _ => None,
        }
    }

    pub const fn is_relation(&self) -> bool {
        matches!(self, Self::ForeignKey { .. })
    }
}

/// Behavior when a referenced object is deleted (ON DELETE action).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OnDelete {
    /// Delete all related objects (CASCADE).
    Cascade,
    /// Prevent deletion if related objects exist (PROTECT).
    Protect,
    /// Set the foreign key to NULL.
    SetNull,
    /// Set the foreign key to its default value.
    SetDefault,
    /// Take no action (may cause integrity errors).
    DoNothing,
}

impl OnDelete {
    /// The SQL `ON DELETE` action.
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Protect => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::DoNothing => "NO ACTION",
        }
    }
}
