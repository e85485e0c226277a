//! Case log rendering

use crate::ledger::case::{CaseAction, ModerationCase};
use chrono::{DateTime, Utc};

/// Longest message excerpt copied into an automod log entry
const CONTENT_LIMIT: usize = 1000;

/// A case rendered for a log channel, independent of any embed builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseLogEntry {
    pub title: String,
    pub colour: u32,
    /// `(name, value, inline)`
    pub fields: Vec<(String, String, bool)>,
    pub timestamp: DateTime<Utc>,
}

impl CaseLogEntry {
    fn field(&mut self, name: &str, value: impl Into<String>, inline: bool) {
        self.fields.push((name.to_string(), value.into(), inline));
    }

    /// Value of the first field with this name
    #[must_use]
    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _, _)| field == name)
            .map(|(_, value, _)| value.as_str())
    }
}

/// Seconds as `Nm`, `Nh` or `Nd`, rounding down
#[must_use]
pub fn format_duration(secs: u64) -> String {
    match secs {
        0..3_600 => format!("{}m", secs / 60),
        3_600..86_400 => format!("{}h", secs / 3_600),
        _ => format!("{}d", secs / 86_400),
    }
}

fn truncate(content: &str) -> String {
    if content.chars().count() <= CONTENT_LIMIT {
        return content.to_string();
    }
    let mut cut: String = content.chars().take(CONTENT_LIMIT).collect();
    cut.push_str("...");
    cut
}

/// Render a case the way it appears in the mod log channel
#[must_use]
pub fn render_case(case: &ModerationCase) -> CaseLogEntry {
    match (&case.context, case.action) {
        (Some(context), CaseAction::Automod) => {
            let mut entry = CaseLogEntry {
                title: format!("Case #{} — Automod: {}", case.case_number, context.filter),
                colour: case.action.colour(),
                fields: Vec::new(),
                timestamp: case.created_at,
            };
            entry.field("User", format!("{} ({})", case.target_tag, case.target_id), true);
            entry.field("Channel", format!("<#{}>", context.channel_id), true);
            if let Some(matched) = &context.matched {
                entry.field("Matched", matched.clone(), false);
            }
            if !context.content.is_empty() {
                entry.field("Content", truncate(&context.content), false);
            }
            entry.field("Reason", case.reason.clone(), false);
            entry
        }
        _ => {
            let mut entry = CaseLogEntry {
                title: format!(
                    "Case #{} — {}",
                    case.case_number,
                    case.action.to_string().to_uppercase()
                ),
                colour: case.action.colour(),
                fields: Vec::new(),
                timestamp: case.created_at,
            };
            entry.field("Target", format!("{} ({})", case.target_tag, case.target_id), true);
            entry.field(
                "Moderator",
                format!("{} ({})", case.moderator_tag, case.moderator_id),
                true,
            );
            entry.field("Reason", case.reason.clone(), false);
            if let Some(secs) = case.duration_secs.filter(|secs| *secs > 0) {
                entry.field("Duration", format_duration(secs), true);
            }
            entry
        }
    }
}
