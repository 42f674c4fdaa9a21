// Built-in moderation vocabulary

use once_cell::sync::Lazy;
use regex::Regex;

/// Explicit/sexual terms matched as lowercase substrings.
///
/// Fragments that occur inside ordinary words ("sex" in "Essex") are not listed.
pub const BLOCKED_TERMS: &[&str] = &[
    "nude",
    "nudity",
    "naked",
    "nsfw",
    "porn",
    "sexual",
    "sexy",
    "erotic",
    "hentai",
    "lewd",
    "xxx",
    "topless",
    "genital",
    "fetish",
    "onlyfans",
    "striptease",
];

/// Phrases counted by the suspicion score
pub const MARKER_PHRASES: &[&str] = &[
    "ignore",
    "bypass",
    "don't follow",
    "disregard",
    "override",
    "new instructions",
];

const OVERRIDE_PATTERN_SOURCES: &[&str] = &[
    r"(?s)\bignore\b.*\b(instructions?|rules|guidelines|prompts?|filters?|restrictions?)\b",
    r"(?s)\bdisregard\b.*\b(instructions?|rules|guidelines|polic(y|ies)|filters?)\b",
    r"(?s)\bbypass\b.*\b(filters?|safety|moderation|restrictions?|guidelines|rules)\b",
    r"(?s)\bpretend\b.*\b(new instructions|no (rules|restrictions|filters?)|unfiltered|uncensored)\b",
    r"(?s)\b(forget|override)\b.*\b(instructions?|rules|guidelines|filters?|restrictions?)\b",
    r"(?s)\bdon't follow\b.*\b(instructions?|rules|guidelines|polic(y|ies))\b",
    r"(?s)\byou are now\b.*\b(unfiltered|uncensored|unrestricted|jailbroken)\b",
    r"(?s)\b(jailbreak|dan mode|developer mode)\b",
];

/// Compiled instruction-override patterns, matched against the lowercased prompt
pub static OVERRIDE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    OVERRIDE_PATTERN_SOURCES
        .iter()
        .filter_map(|source| match Regex::new(source) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::error!(pattern = source, error = %e, "Invalid moderation pattern");
                None
            }
        })
        .collect()
});
