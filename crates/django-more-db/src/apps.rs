//! The `django_types` app.

use django_more_core::{AppConfig, DjangoResult, ReadyContext};

use crate::types::patch_types;

/// Installs custom type support on the host backends when the app
/// registry becomes ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypesConfig;

impl AppConfig for TypesConfig {
    fn name(&self) -> &str {
        "django_types"
    }

    fn verbose_name(&self) -> &str {
        "Custom database types"
    }

    fn ready(&self, ctx: &ReadyContext<'_>) -> DjangoResult<()> {
        patch_types(&ctx.patcher())?;
        Ok(())
    }
}
