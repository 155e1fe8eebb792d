//! The enum model field.
//!
//! [`EnumField`] stores the value of an [`EnumDef`] member. Values can be
//! given as:
//! - a member of the field's enum
//! - a string matching a member's stored value
//! - a string matching a stored value ignoring case, when the field is not
//!   case sensitive
//! - the member's string form, `EnumName.MEMBER`

use django_more_core::{AppRegistry, DjangoError, DjangoResult, ValidationError};
use django_more_db::types::resolve_type_identity;
use django_more_db::{
    Backend, CustomTypeField, DbType, DependencyEdge, FieldDependencies, TypeDef, Value,
};
use django_more_migrations::MigrationFieldDef;

use crate::enum_def::{EnumDef, EnumValue, ENUM_CATEGORY};

/// What a field is given to clean.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumInput {
    Member(EnumValue),
    Value(Value),
}

impl From<EnumValue> for EnumInput {
    fn from(member: EnumValue) -> Self {
        Self::Member(member)
    }
}

impl From<Value> for EnumInput {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for EnumInput {
    fn from(value: &str) -> Self {
        Self::Value(Value::from(value))
    }
}

impl EnumInput {
    fn is_empty(&self) -> bool {
        match self {
            Self::Member(_) => false,
            Self::Value(Value::Null) => true,
            Self::Value(Value::String(s)) => s.is_empty(),
            Self::Value(Value::List(items)) => items.is_empty(),
            Self::Value(_) => false,
        }
    }

    fn display(&self) -> String {
        match self {
            Self::Member(member) => member.to_string(),
            Self::Value(Value::String(s)) => s.clone(),
            Self::Value(value) => value.to_string(),
        }
    }
}

/// A manually restricted choice: a member of the enum, or a raw
/// `(key, label)` pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ChoiceInput {
    Member(EnumValue),
    Pair(String, String),
}

impl From<EnumValue> for ChoiceInput {
    fn from(member: EnumValue) -> Self {
        Self::Member(member)
    }
}

impl From<(&str, &str)> for ChoiceInput {
    fn from((key, label): (&str, &str)) -> Self {
        Self::Pair(key.to_string(), label.to_string())
    }
}

fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::String(_) => "str",
        Value::Bytes(_) => "bytes",
        Value::Date(_) => "date",
        Value::DateTime(_) => "datetime",
        Value::Uuid(_) => "uuid",
        Value::Json(_) => "json",
        Value::List(_) => "list",
    }
}

/// A model field holding enum members.
#[derive(Debug, Clone)]
pub struct EnumField {
    name: String,
    type_name: String,
    type_app_label: Option<String>,
    def: Option<TypeDef>,
    case_sensitive: Option<bool>,
    manual_choices: Option<Vec<ChoiceInput>>,
    choices: Vec<(String, String)>,
    default: Option<String>,
    max_length: Option<usize>,
    pub null: bool,
    pub blank: bool,
    pub editable: bool,
}

impl EnumField {
    /// A live field over `def`.
    pub fn new(name: impl Into<String>, def: TypeDef, apps: Option<&AppRegistry>) -> DjangoResult<Self> {
        let mut field = Self::detached(name, "", None);
        field.set_type_def(def, apps)?;
        Ok(field)
    }

    /// A field that only knows its type by name, as rebuilt from history.
    pub fn detached(
        name: impl Into<String>,
        type_name: impl Into<String>,
        type_app_label: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            type_app_label: type_app_label.map(str::to_string),
            def: None,
            case_sensitive: None,
            manual_choices: None,
            choices: Vec::new(),
            default: None,
            max_length: None,
            null: false,
            blank: false,
            editable: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = Some(case_sensitive);
        self
    }

    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    #[must_use]
    pub const fn blank(mut self) -> Self {
        self.blank = true;
        self
    }

    #[must_use]
    pub const fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Sets the default; members are stored by value.
    #[must_use]
    pub fn default(mut self, value: impl Into<EnumInput>) -> Self {
        self.default = Some(match value.into() {
            EnumInput::Member(member) => member.value,
            EnumInput::Value(Value::String(s)) => s,
            EnumInput::Value(other) => other.to_string(),
        });
        self
    }

    /// Restricts the field to `choices` instead of every member.
    #[must_use]
    pub fn with_choices<I, C>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ChoiceInput>,
    {
        self.manual_choices = Some(choices.into_iter().map(Into::into).collect());
        self.refresh_choices();
        self
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// `(key, label)` pairs for display: `EnumName.MEMBER` and the stored
    /// value, unless choices were given by hand.
    pub fn choices(&self) -> &[(String, String)] {
        &self.choices
    }

    pub fn enum_def(&self) -> Option<&EnumDef> {
        self.def.as_ref().and_then(EnumDef::downcast)
    }

    fn refresh_choices(&mut self) {
        self.choices = match (&self.manual_choices, self.enum_def()) {
            (Some(manual), _) => manual
                .iter()
                .map(|choice| match choice {
                    ChoiceInput::Member(member) => (member.to_string(), member.value.clone()),
                    ChoiceInput::Pair(key, label) => (key.clone(), label.clone()),
                })
                .collect(),
            (None, Some(def)) => def.iter().map(|m| (m.to_string(), m.value)).collect(),
            (None, None) => Vec::new(),
        };
    }

    fn live_def(&self) -> DjangoResult<&EnumDef> {
        self.enum_def().ok_or_else(|| {
            DjangoError::ImproperlyConfigured(format!(
                "enum field '{}' has no live definition for type '{}'",
                self.name, self.type_name
            ))
        })
    }

    // ── Value conversion ──

    /// Cleans `value` into a member of this field's enum. Null stays
    /// `None`.
    pub fn to_python(&self, value: impl Into<EnumInput>) -> DjangoResult<Option<EnumValue>> {
        let def = self.live_def()?;
        match value.into() {
            EnumInput::Value(Value::Null) => Ok(None),
            EnumInput::Member(member) => {
                if def.contains(&member) {
                    Ok(Some(member))
                } else {
                    Err(ValidationError::new(
                        format!("Invalid enum '{member}' is a member of an incompatible enumeration"),
                        "invalid_enum",
                    )
                    .into())
                }
            }
            EnumInput::Value(Value::String(s)) => self.member_from_str(def, &s).map(Some),
            EnumInput::Value(other) => Err(ValidationError::new(
                format!(
                    "Invalid type '{}' is not an enum member or string",
                    type_label(&other)
                ),
                "invalid_type",
            )
            .into()),
        }
    }

    fn member_from_str(&self, def: &EnumDef, s: &str) -> DjangoResult<EnumValue> {
        if let Some(member) = def.from_value(s) {
            return Ok(member);
        }
        if self.case_sensitive == Some(false) {
            let lowered = s.to_lowercase();
            if let Some(member) = def.iter().find(|m| m.value.to_lowercase() == lowered) {
                return Ok(member);
            }
        }
        if let Some(member) = s
            .strip_prefix(def.name())
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|name| def.get(name))
        {
            return Ok(member);
        }
        Err(ValidationError::new(
            format!(
                "Invalid value '{s}' not in enumeration {:?}",
                def.stored_values()
            ),
            "invalid_value",
        )
        .with_param("value", s)
        .into())
    }

    /// The value sent to the database.
    pub fn get_prep_value(&self, value: impl Into<EnumInput>) -> DjangoResult<Value> {
        let value = value.into();
        if value.is_empty() {
            return Ok(match value {
                EnumInput::Value(v) => v,
                EnumInput::Member(_) => Value::Null,
            });
        }
        Ok(self
            .to_python(value)?
            .map_or(Value::Null, |member| Value::String(member.value)))
    }

    /// Converts a value read from the database.
    pub fn from_db_value(&self, value: &Value) -> DjangoResult<Option<EnumValue>> {
        if value.is_null() {
            return Ok(None);
        }
        let def = self.live_def()?;
        let raw = value.as_str().map_or_else(|| value.to_string(), str::to_string);
        def.from_value(&raw).map(Some).ok_or_else(|| {
            DjangoError::DatabaseError(format!(
                "Invalid enumeration value '{raw}' returned from database for {}",
                self.name
            ))
        })
    }

    /// Field-level validation of an already cleaned value.
    pub fn validate(&self, value: impl Into<EnumInput>) -> DjangoResult<()> {
        if !self.editable {
            return Ok(());
        }
        let value = value.into();
        if self.manual_choices.is_some() {
            let shown = value.display();
            if self.choices.iter().any(|(key, _)| *key == shown) {
                return Ok(());
            }
        } else if let EnumInput::Member(member) = &value {
            if self.live_def()?.contains(member) {
                return Ok(());
            }
        }

        if matches!(value, EnumInput::Value(Value::Null)) && !self.null {
            return Err(ValidationError::new("This field cannot be null.", "null").into());
        }
        if !self.blank && value.is_empty() {
            return Err(ValidationError::new("This field cannot be blank.", "blank").into());
        }
        Err(
            ValidationError::new("Value %(value)r is not a valid choice.", "invalid_choice")
                .with_param("value", value.display())
                .into(),
        )
    }

    // ── Schema ──

    /// The column type on `backend`.
    pub fn db_type(&self, backend: &Backend) -> DjangoResult<DbType> {
        CustomTypeField::db_type(self, backend, self.max_length)
    }

    /// The migration definition of this field.
    pub fn deconstruct(&self) -> DjangoResult<MigrationFieldDef> {
        let mut field = MigrationFieldDef::custom(&self.name, ENUM_CATEGORY, &self.type_name);
        field.type_app_label.clone_from(&self.type_app_label);
        field.null = self.null;
        field.max_length = self.max_length;
        field.default = self.default.clone().map(Value::String);
        if let Some(def) = &self.def {
            field.set_type_def(def.clone(), None)?;
        }
        Ok(field)
    }
}

impl CustomTypeField for EnumField {
    fn category(&self) -> &str {
        ENUM_CATEGORY
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn type_app_label(&self) -> Option<&str> {
        self.type_app_label.as_deref()
    }

    fn type_def(&self) -> Option<&TypeDef> {
        self.def.as_ref()
    }

    /// Only enum definitions are accepted. Attaching one rebuilds the
    /// display choices.
    fn set_type_def(&mut self, def: TypeDef, apps: Option<&AppRegistry>) -> DjangoResult<()> {
        if EnumDef::downcast(&def).is_none() {
            return Err(DjangoError::ImproperlyConfigured(format!(
                "enum field '{}' needs an enum definition, got {} {}",
                self.name,
                def.category(),
                def.qualname()
            )));
        }
        let identity = resolve_type_identity(def.as_ref(), self.type_app_label.as_deref(), apps)?;
        self.type_name = identity.type_name;
        self.type_app_label = Some(identity.app_label);
        self.def = Some(def);
        self.refresh_choices();
        Ok(())
    }
}

impl FieldDependencies for EnumField {
    fn has_dependencies(&self) -> bool {
        true
    }

    fn get_dependencies(&self) -> Vec<DependencyEdge> {
        self.type_dependency().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use django_more_core::AppConfig;
    use django_more_db::{host_namespace, patch_types, DatabaseBackendType};
    use django_more_patchy::{PatchRegistry, Patcher};

    fn status() -> EnumDef {
        EnumDef::new("Order.Status", "shop.models", [("OPEN", "open"), ("PAID", "Paid")]).unwrap()
    }

    fn field() -> EnumField {
        let def = status().with_app_label("shop").into_type_def();
        EnumField::new("status", def, None).unwrap()
    }

    fn code(err: DjangoError) -> String {
        match err {
            DjangoError::ValidationError(e) => e.code,
            other => panic!("expected a validation error, got {other}"),
        }
    }

    struct Shop;

    impl AppConfig for Shop {
        fn name(&self) -> &str {
            "shop"
        }
    }

    // ── Identity ──

    #[test]
    fn test_type_identity_from_containing_app() {
        let mut apps = AppRegistry::new();
        apps.register(Box::new(Shop));
        let field = EnumField::new("status", status().into_type_def(), Some(&apps)).unwrap();
        assert_eq!(field.type_name(), "shop_enum_order_status");
        assert_eq!(field.type_app_label(), Some("shop"));
        assert_eq!(
            field.get_dependencies(),
            vec![DependencyEdge::type_created("shop", "shop_enum_order_status")]
        );
    }

    #[test]
    fn test_explicit_db_type_wins() {
        let def = status().with_db_type("order_status").with_app_label("shop");
        let field = EnumField::new("status", def.into_type_def(), None).unwrap();
        assert_eq!(field.type_name(), "order_status");
    }

    #[derive(Debug)]
    struct NotAnEnum;

    impl django_more_db::CustomType for NotAnEnum {
        fn category(&self) -> &str {
            "enum"
        }
        fn qualname(&self) -> &str {
            "Fake"
        }
        fn module_path(&self) -> &str {
            "shop"
        }
        fn values(&self) -> Vec<Value> {
            Vec::new()
        }
        fn deconstruct(&self) -> serde_json::Value {
            serde_json::Value::Null
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn test_rejects_non_enum_definitions() {
        let err = EnumField::new("status", Arc::new(NotAnEnum), None).unwrap_err();
        assert!(matches!(err, DjangoError::ImproperlyConfigured(_)));
    }

    #[test]
    fn test_detached_field_made_live() {
        let mut types: BTreeMap<String, TypeDef> = BTreeMap::new();
        types.insert(
            "shop_status".into(),
            EnumDef::functional("shop", "shop_status", ["a", "b"]).unwrap().into_type_def(),
        );
        let mut field = EnumField::detached("status", "shop_status", Some("shop"));
        assert!(field.choices().is_empty());
        assert!(field.make_live(&types).unwrap());
        assert_eq!(field.choices().len(), 2);
    }

    // ── to_python ──

    #[test]
    fn test_to_python_accepts_members_and_values() {
        let field = field();
        let paid = status().get("PAID").unwrap();
        assert_eq!(field.to_python(paid.clone()).unwrap(), Some(paid.clone()));
        assert_eq!(field.to_python("Paid").unwrap(), Some(paid.clone()));
        assert_eq!(field.to_python("Status.PAID").unwrap(), Some(paid));
        assert_eq!(field.to_python(Value::Null).unwrap(), None);
    }

    #[test]
    fn test_to_python_case_sensitivity() {
        assert_eq!(code(field().to_python("paid").unwrap_err()), "invalid_value");
        let relaxed = field().case_sensitive(false);
        assert_eq!(relaxed.to_python("paid").unwrap().unwrap().name, "PAID");
    }

    #[test]
    fn test_to_python_rejects_other_enums() {
        let other = EnumDef::new("Status", "billing", [("PAID", "Paid")]).unwrap();
        let err = field().to_python(other.get("PAID").unwrap()).unwrap_err();
        assert_eq!(code(err), "invalid_enum");
    }

    #[test]
    fn test_to_python_rejects_other_types() {
        let err = field().to_python(Value::Int(3)).unwrap_err();
        assert_eq!(code(err), "invalid_type");
        assert!(field().to_python("Status.MISSING").is_err());
    }

    #[test]
    fn test_detached_field_cannot_clean() {
        let field = EnumField::detached("status", "shop_status", None);
        assert!(matches!(
            field.to_python("open"),
            Err(DjangoError::ImproperlyConfigured(_))
        ));
    }

    // ── Database values ──

    #[test]
    fn test_get_prep_value() {
        let field = field();
        assert_eq!(field.get_prep_value("Status.OPEN").unwrap(), Value::from("open"));
        assert_eq!(field.get_prep_value(Value::Null).unwrap(), Value::Null);
        assert_eq!(field.get_prep_value("").unwrap(), Value::from(""));
    }

    #[test]
    fn test_from_db_value() {
        let field = field();
        assert_eq!(field.from_db_value(&Value::from("open")).unwrap().unwrap().name, "OPEN");
        assert_eq!(field.from_db_value(&Value::Null).unwrap(), None);
        assert!(matches!(
            field.from_db_value(&Value::from("gone")),
            Err(DjangoError::DatabaseError(_))
        ));
    }

    // ── validate ──

    #[test]
    fn test_validate() {
        let field = field();
        field.validate(status().get("OPEN").unwrap()).unwrap();
        assert_eq!(code(field.validate(Value::Null).unwrap_err()), "null");
        assert_eq!(code(field.validate("").unwrap_err()), "blank");
        assert_eq!(code(field.validate("open").unwrap_err()), "invalid_choice");
        let optional = self::field().nullable().blank();
        assert_eq!(code(optional.validate(Value::Null).unwrap_err()), "invalid_choice");
    }

    #[test]
    fn test_validate_manual_choices() {
        let field = field().with_choices([status().get("OPEN").unwrap()]);
        assert_eq!(field.choices(), &[("Status.OPEN".to_string(), "open".to_string())]);
        field.validate(status().get("OPEN").unwrap()).unwrap();
        assert!(field.validate(status().get("PAID").unwrap()).is_err());
    }

    #[test]
    fn test_non_editable_fields_skip_validation() {
        let mut field = field();
        field.editable = false;
        field.validate("anything").unwrap();
    }

    #[test]
    fn test_choices_from_members() {
        assert_eq!(
            field().choices(),
            &[
                ("Status.OPEN".to_string(), "open".to_string()),
                ("Status.PAID".to_string(), "Paid".to_string()),
            ]
        );
    }

    // ── Schema ──

    #[test]
    fn test_db_type_falls_back_to_varchar() {
        let ns = host_namespace();
        let registry = Arc::new(PatchRegistry::new());
        patch_types(&Patcher::new(&ns, &registry)).unwrap();
        let sqlite = Backend::load(&ns, registry, DatabaseBackendType::SQLite).unwrap();
        assert_eq!(field().db_type(&sqlite).unwrap().sql(), "varchar(4)");
    }

    #[test]
    fn test_deconstruct() {
        let field = field().nullable().default(status().get("PAID").unwrap());
        assert_eq!(field.default_value(), Some("Paid"));
        let def = field.deconstruct().unwrap();
        assert_eq!(def.type_name(), "shop_enum_order_status");
        assert_eq!(def.type_app_label.as_deref(), Some("shop"));
        assert_eq!(def.default, Some(Value::from("Paid")));
        assert!(def.null);
        assert!(def.is_live());
    }
}
