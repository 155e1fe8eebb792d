//! The `django_enum` app.

use django_more_core::{AppConfig, DjangoResult, ReadyContext};

use crate::patch::patch_enum;

/// Installs enum support on the configured backends when the app registry
/// becomes ready. Install after `django_types`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumConfig;

impl AppConfig for EnumConfig {
    fn name(&self) -> &str {
        "django_enum"
    }

    fn verbose_name(&self) -> &str {
        "Database enums"
    }

    fn ready(&self, ctx: &ReadyContext<'_>) -> DjangoResult<()> {
        patch_enum(&ctx.patcher(), ctx.settings())?;
        Ok(())
    }
}
