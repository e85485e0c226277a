//! Policy filters
//!
//! Each filter inspects message text against one policy category and reports
//! at most one match. Filters hold no state of their own; compiled patterns
//! are memoized in a process-wide cache keyed by pattern text.

use crate::data::ModerationPolicy;
use crate::error::{ModerationError, ModerationResult};
use crate::moderation::swear_words::merge_swear_words;
use dashmap::DashMap;
use derive_more::Display;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::warn;

/// Compiled patterns kept before the cache is reset
const PATTERN_CACHE_LIMIT: usize = 4096;
/// Upper bound on compiled program size for guild-supplied patterns
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

static PATTERN_CACHE: LazyLock<DashMap<String, Option<Regex>>> = LazyLock::new(DashMap::new);

/// Policy categories, listed in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum FilterKind {
    #[display("Banned Word")]
    BannedWords,
    #[display("Regex Filter")]
    Regex,
    #[display("Caps")]
    Caps,
    #[display("Mentions")]
    Mentions,
    #[display("Swear Monitor")]
    SwearMonitor,
}

impl FilterKind {
    /// Fixed evaluation order
    pub const PRIORITY: [Self; 5] = [
        Self::BannedWords,
        Self::Regex,
        Self::Caps,
        Self::Mentions,
        Self::SwearMonitor,
    ];

    /// Destructive filters delete the message and end evaluation
    #[must_use]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::BannedWords | Self::Regex)
    }

    /// Whether a match counts toward automatic escalation
    #[must_use]
    pub const fn feeds_escalation(self) -> bool {
        matches!(self, Self::BannedWords | Self::Regex | Self::SwearMonitor)
    }

    /// Text of the transient warning shown to the author, if any
    #[must_use]
    pub const fn warning(self) -> Option<&'static str> {
        match self {
            Self::BannedWords => Some("your message contained a banned word and was removed."),
            Self::Regex => Some("your message matched a blocked pattern and was removed."),
            Self::Caps => Some("please avoid excessive caps."),
            Self::Mentions => Some("please avoid excessive mentions."),
            Self::SwearMonitor => None,
        }
    }

    /// Short cause used in timeout audit reasons
    #[must_use]
    pub const fn escalation_reason(self) -> &'static str {
        match self {
            Self::BannedWords => "Banned word",
            Self::Regex => "Regex filter",
            Self::Caps => "Caps",
            Self::Mentions => "Mentions",
            Self::SwearMonitor => "Swear word",
        }
    }
}

/// A single filter hit
#[derive(Debug, Clone, PartialEq)]
pub struct FilterMatch {
    pub kind: FilterKind,
    /// Configured term or pattern that matched
    pub matched: Option<String>,
    pub reason: String,
}

impl FilterMatch {
    fn new(kind: FilterKind, reason: impl Into<String>, matched: Option<String>) -> Self {
        Self {
            kind,
            matched,
            reason: reason.into(),
        }
    }

    /// Reason text stored on the case, e.g. `[Banned Word] Banned word detected (matched: foo)`
    #[must_use]
    pub fn case_reason(&self) -> String {
        match &self.matched {
            Some(matched) => format!("[{}] {} (matched: {matched})", self.kind, self.reason),
            None => format!("[{}] {}", self.kind, self.reason),
        }
    }
}

/// Mentions carried by a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MentionSet {
    pub users: HashSet<u64>,
    pub roles: HashSet<u64>,
    /// `@everyone` or `@here`
    pub everyone: bool,
}

impl MentionSet {
    /// Unique users + unique roles + one for a mass mention
    #[must_use]
    pub fn count(&self) -> usize {
        self.users.len() + self.roles.len() + usize::from(self.everyone)
    }
}

/// Run one filter against a message
#[must_use]
pub fn evaluate(
    kind: FilterKind,
    content: &str,
    mentions: &MentionSet,
    policy: &ModerationPolicy,
) -> Option<FilterMatch> {
    match kind {
        FilterKind::BannedWords => {
            if !policy.banned_words.enabled {
                return None;
            }
            find_word_match(content, &policy.banned_words.words)
                .map(|word| FilterMatch::new(kind, "Banned word detected", Some(word)))
        }
        FilterKind::Regex => {
            if !policy.regex_filters.enabled {
                return None;
            }
            find_regex_match(content, &policy.regex_filters.patterns)
                .map(|pattern| FilterMatch::new(kind, "Blocked pattern detected", Some(pattern)))
        }
        FilterKind::Caps => {
            let caps = &policy.caps;
            (caps.enabled && is_caps_abuse(content, caps.ratio, caps.min_length))
                .then(|| FilterMatch::new(kind, "Caps threshold exceeded", None))
        }
        FilterKind::Mentions => {
            if !policy.mentions.enabled {
                return None;
            }
            let count = mentions.count();
            exceeds_mentions(mentions, policy.mentions.max).then(|| {
                FilterMatch::new(
                    kind,
                    format!("Mentions exceeded ({count}/{})", policy.mentions.max),
                    None,
                )
            })
        }
        FilterKind::SwearMonitor => {
            if !policy.swears.enabled {
                return None;
            }
            find_word_match(content, &merge_swear_words(&policy.swears.words))
                .map(|word| FilterMatch::new(kind, "Swear word detected", Some(word)))
        }
    }
}

/// Compile a guild-supplied pattern case-insensitively
///
/// # Errors
/// Returns [`ModerationError::InvalidPolicy`] if the pattern does not compile.
pub fn compile_pattern(pattern: &str) -> ModerationResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .map_err(|e| ModerationError::InvalidPolicy {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

fn cached(key: String, compile: impl FnOnce() -> ModerationResult<Regex>) -> Option<Regex> {
    if let Some(entry) = PATTERN_CACHE.get(&key) {
        return entry.value().clone();
    }

    let compiled = match compile() {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(error = %e, "Skipping unusable policy pattern");
            None
        }
    };

    if PATTERN_CACHE.len() >= PATTERN_CACHE_LIMIT {
        PATTERN_CACHE.clear();
    }
    PATTERN_CACHE.insert(key, compiled.clone());
    compiled
}

fn normalize_list(items: &[String]) -> impl Iterator<Item = String> + '_ {
    items
        .iter()
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
}

/// First configured term that appears as a whole word, case-insensitively
#[must_use]
pub fn find_word_match(content: &str, words: &[String]) -> Option<String> {
    if content.is_empty() {
        return None;
    }
    normalize_list(words).find(|word| {
        cached(format!("word:{word}"), || {
            compile_pattern(&format!(r"\b{}\b", regex::escape(word)))
        })
        .is_some_and(|regex| regex.is_match(content))
    })
}

/// First configured pattern that matches; malformed patterns are skipped
#[must_use]
pub fn find_regex_match(content: &str, patterns: &[String]) -> Option<String> {
    patterns
        .iter()
        .map(|pattern| pattern.trim())
        .filter(|pattern| !pattern.is_empty())
        .find(|pattern| {
            cached(format!("re:{pattern}"), || compile_pattern(pattern))
                .is_some_and(|regex| regex.is_match(content))
        })
        .map(str::to_string)
}

/// Uppercase share of ASCII letters, ignoring messages with fewer than
/// `min_length` letters
#[must_use]
pub fn is_caps_abuse(content: &str, ratio: f64, min_length: usize) -> bool {
    let (letters, upper) = content
        .chars()
        .filter(char::is_ascii_alphabetic)
        .fold((0usize, 0usize), |(letters, upper), c| {
            (letters + 1, upper + usize::from(c.is_ascii_uppercase()))
        });

    if letters == 0 || letters < min_length {
        return false;
    }

    #[allow(clippy::cast_precision_loss)]
    let share = upper as f64 / letters as f64;
    share >= ratio
}

/// Whether a message mentions more targets than allowed
#[must_use]
pub fn exceeds_mentions(mentions: &MentionSet, max: usize) -> bool {
    mentions.count() > max
}
