//! Built-in swear list and obfuscation-aware merging

use std::collections::HashSet;
use std::sync::LazyLock;

/// Default phrases watched by the swear monitor
pub const DEFAULT_SWEAR_WORDS: &[&str] = &[
    // Core profanity
    "fuck",
    "fucker",
    "fucking",
    "motherfucker",
    "motherfucking",
    "mf",
    "shit",
    "shitty",
    "bullshit",
    "horseshit",
    "bitch",
    "bitches",
    "son of a bitch",
    "ass",
    "asshole",
    "dumbass",
    "jackass",
    "bastard",
    "damn",
    "goddamn",
    "hell",
    // Sexual / vulgar
    "dick",
    "dickhead",
    "cock",
    "pussy",
    "twat",
    "cunt",
    "slut",
    "whore",
    "hoe",
    "blowjob",
    "handjob",
    // Body / gross
    "piss",
    "pissed",
    "crap",
    "crappy",
    "scumbag",
    // Insults
    "retard",
    "retarded",
    "idiot",
    "moron",
    "imbecile",
    "jerk",
    "loser",
    "prick",
    "wanker",
    "tosser",
    // Phrases
    "piece of shit",
    "go to hell",
    "fuck you",
    "screw you",
    "shut the fuck up",
    "holy shit",
    "what the hell",
    "what the fuck",
    // Censored forms
    "f*ck",
    "f**k",
    "fu*k",
    "sh*t",
    "s**t",
    "b*tch",
    "a**hole",
    "c*nt",
    "d*ck",
    // Abbreviations
    "wtf",
    "stfu",
];

/// Spaced variants are only generated for entries at least this long
const MIN_SPACED_LEN: usize = 3;

static DEFAULT_MERGED: LazyLock<Vec<String>> = LazyLock::new(|| {
    let mut merger = SwearMerger::default();
    for word in DEFAULT_SWEAR_WORDS {
        merger.add(word);
    }
    merger.words
});

/// Lowercase, trim and collapse internal whitespace
#[must_use]
pub fn normalize_word(word: &str) -> String {
    word.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Keep ASCII letters, digits and whitespace only
#[must_use]
pub fn strip_punctuation(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect()
}

/// `"fuck you"` becomes `"f u c k y o u"`
#[must_use]
pub fn spaced_variant(word: &str) -> Option<String> {
    let cleaned: Vec<char> = strip_punctuation(&normalize_word(word))
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.len() < MIN_SPACED_LEN {
        return None;
    }
    Some(
        cleaned
            .iter()
            .map(char::to_string)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

#[derive(Default)]
struct SwearMerger {
    seen: HashSet<String>,
    words: Vec<String>,
}

impl SwearMerger {
    fn push(&mut self, word: String) {
        if self.seen.insert(word.clone()) {
            self.words.push(word);
        }
    }

    fn add(&mut self, word: &str) {
        let normalized = normalize_word(word);
        if normalized.is_empty() {
            return;
        }

        let stripped = strip_punctuation(&normalized);
        let spaced = spaced_variant(&normalized);
        let keep_stripped = !stripped.trim().is_empty() && stripped != normalized;

        self.push(normalized);
        if keep_stripped {
            self.push(stripped);
        }
        if let Some(spaced) = spaced {
            self.push(spaced);
        }
    }
}

/// Merge the built-in list with a guild's custom entries
///
/// Every entry contributes its normalized form, a punctuation-stripped form
/// when that differs, and a single-character-spaced form. The result is
/// deduplicated and keeps first-seen order, built-ins first.
#[must_use]
pub fn merge_swear_words(custom: &[String]) -> Vec<String> {
    if custom.is_empty() {
        return DEFAULT_MERGED.clone();
    }

    let mut merger = SwearMerger {
        seen: DEFAULT_MERGED.iter().cloned().collect(),
        words: DEFAULT_MERGED.clone(),
    };
    for word in custom {
        merger.add(word);
    }
    merger.words
}
