//! Logging integration for django-more.
//!
//! Provides helpers for configuring [`tracing`]-based logging from
//! [`Settings`](crate::settings::Settings) and for scoping log output to
//! start-up and migration planning.

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The filter is read from `settings.log_level`. In debug mode a pretty,
/// human-readable format is used; otherwise structured JSON. Calling this
/// again after a subscriber is installed has no effect.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// A span covering the application of one app's patches.
///
/// ```
/// use django_more_core::logging::patch_span;
///
/// let span = patch_span("django_more_enum");
/// let _guard = span.enter();
/// tracing::info!("patching");
/// ```
pub fn patch_span(app: &str) -> tracing::Span {
    tracing::info_span!("patch", app = app)
}

/// A span covering one migration planning pass.
pub fn planning_span(app_labels: &[String]) -> tracing::Span {
    tracing::info_span!("makemigrations", apps = ?app_labels)
}
