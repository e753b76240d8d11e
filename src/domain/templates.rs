//! Notification copy: an immutable template table and per-user context.
//!
//! The [`TemplateCatalog`] is built once at startup and shared by reference;
//! there is no global registry to mutate.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

use super::local_time::time_of_day;
use super::notification::NotificationType;
use crate::error::CoreError;

/// Copy template for one notification type.
///
/// `title` and `body` may contain the placeholders `{name}`,
/// `{time_of_day}`, `{local_time}` and `{timezone}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTemplate {
    /// Title template.
    pub title: String,
    /// Body template.
    pub body: String,
    /// In-app deep link opened on tap.
    pub deep_link: Option<String>,
}

impl NotificationTemplate {
    fn new(title: &str, body: &str, deep_link: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            deep_link: Some(deep_link.to_string()),
        }
    }
}

/// Rendered copy ready to go into a push payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNotification {
    /// Final title.
    pub title: String,
    /// Final body.
    pub body: String,
    /// In-app deep link.
    pub deep_link: Option<String>,
}

/// Values substituted into a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    /// Name to greet the user by.
    pub display_name: String,
    /// `"morning"`, `"afternoon"`, `"evening"` or `"night"`.
    pub time_of_day: &'static str,
    /// Local wall-clock time, `HH:MM`.
    pub local_time: String,
    /// IANA timezone name.
    pub timezone: String,
}

impl RenderContext {
    /// Context for sending to a user in `tz` at `now`.
    #[must_use]
    pub fn new(personalization: &Personalization, tz: Tz, now: DateTime<Utc>) -> Self {
        let local = now.with_timezone(&tz);
        Self {
            display_name: personalization.display_name.clone(),
            time_of_day: time_of_day(local.hour()),
            local_time: local.format("%H:%M").to_string(),
            timezone: tz.name().to_string(),
        }
    }

    fn apply(&self, template: &str) -> String {
        template
            .replace("{name}", &self.display_name)
            .replace("{time_of_day}", self.time_of_day)
            .replace("{local_time}", &self.local_time)
            .replace("{timezone}", &self.timezone)
    }
}

/// Immutable lookup table from notification type to template.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: HashMap<NotificationType, NotificationTemplate>,
}

impl TemplateCatalog {
    /// The stock copy for every [`NotificationType`].
    #[must_use]
    pub fn standard() -> Self {
        let templates = HashMap::from([
            (
                NotificationType::WeighInReminder,
                NotificationTemplate::new(
                    "Good {time_of_day}, {name}",
                    "Step on the scale and log today's weight. It only takes a second.",
                    "app://log/measurement",
                ),
            ),
            (
                NotificationType::MealReminder,
                NotificationTemplate::new(
                    "What's on your plate, {name}?",
                    "Snap a photo of your meal to track it.",
                    "app://log/meal",
                ),
            ),
            (
                NotificationType::StreakSaver,
                NotificationTemplate::new(
                    "Keep your streak alive",
                    "It's {local_time}, {name}. Log today before midnight to keep your streak going.",
                    "app://streak",
                ),
            ),
        ]);
        Self { templates }
    }

    /// Template for `notification_type`.
    #[must_use]
    pub fn get(&self, notification_type: NotificationType) -> Option<&NotificationTemplate> {
        self.templates.get(&notification_type)
    }

    /// Renders the template of `notification_type` with `ctx`.
    #[must_use]
    pub fn render(
        &self,
        notification_type: NotificationType,
        ctx: &RenderContext,
    ) -> Option<RenderedNotification> {
        self.get(notification_type).map(|t| RenderedNotification {
            title: ctx.apply(&t.title),
            body: ctx.apply(&t.body),
            deep_link: t.deep_link.clone(),
        })
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Personalization data for one user. Always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Personalization {
    /// Name to greet the user by.
    pub display_name: String,
}

impl Personalization {
    /// Greeting used when no name is known.
    pub const FALLBACK_NAME: &'static str = "there";

    /// The generic fallback.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            display_name: Self::FALLBACK_NAME.to_string(),
        }
    }

    /// Folds a directory lookup into a value, substituting the fallback
    /// for absent, blank, or failed lookups.
    #[must_use]
    pub fn from_lookup(lookup: Result<Option<String>, CoreError>) -> Self {
        match lookup {
            Ok(Some(name)) if !name.trim().is_empty() => Self {
                display_name: name.trim().to_string(),
            },
            Ok(_) => Self::fallback(),
            Err(e) => {
                tracing::debug!(error = %e, "personalization lookup failed, using fallback");
                Self::fallback()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn ctx(name: &str) -> RenderContext {
        let Ok(dt) = DateTime::parse_from_rfc3339("2026-03-02T19:00:00Z") else {
            panic!("bad timestamp");
        };
        let personalization = Personalization::from_lookup(Ok(Some(name.to_string())));
        RenderContext::new(&personalization, Tz::Europe__Madrid, dt.with_timezone(&Utc))
    }

    #[test]
    fn standard_catalog_covers_every_type() {
        let catalog = TemplateCatalog::standard();
        for t in NotificationType::ALL {
            assert!(catalog.get(t).is_some(), "missing template for {t}");
        }
    }

    #[test]
    fn render_substitutes_placeholders() {
        let catalog = TemplateCatalog::standard();
        let Some(rendered) = catalog.render(NotificationType::StreakSaver, &ctx("Ana")) else {
            panic!("expected template");
        };
        assert_eq!(
            rendered.body,
            "It's 20:00, Ana. Log today before midnight to keep your streak going."
        );
        assert_eq!(rendered.deep_link.as_deref(), Some("app://streak"));
    }

    #[test]
    fn render_uses_local_time_of_day() {
        let catalog = TemplateCatalog::standard();
        let Some(rendered) = catalog.render(NotificationType::WeighInReminder, &ctx("Ana")) else {
            panic!("expected template");
        };
        assert_eq!(rendered.title, "Good evening, Ana");
    }

    #[test]
    fn lookup_failures_fall_back() {
        assert_eq!(
            Personalization::from_lookup(Err(CoreError::Timeout("profiles".to_string()))),
            Personalization::fallback()
        );
        assert_eq!(
            Personalization::from_lookup(Ok(Some("   ".to_string()))),
            Personalization::fallback()
        );
        assert_eq!(Personalization::from_lookup(Ok(None)).display_name, "there");
    }
}
