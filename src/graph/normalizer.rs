use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::facts::FactTable;

static NON_ALNUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\s]").expect("valid key cleaning regex"));

/// Strip accents and punctuation: NFD, drop combining marks, keep `[a-zA-Z0-9\s]`.
pub fn clean_string(text: &str) -> String {
    let stripped: String = text.nfd().filter(|c| !is_combining_mark(*c)).collect();
    NON_ALNUM.replace_all(&stripped, "").into_owned()
}

/// Maps a key to its dictionary base form.
pub trait Lemmatizer: Send + Sync {
    fn lemmatize(&self, key: &str) -> String;
}

const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("children", "child"),
    ("men", "man"),
    ("women", "woman"),
    ("people", "person"),
    ("mice", "mouse"),
    ("geese", "goose"),
    ("feet", "foot"),
    ("teeth", "tooth"),
    ("leaves", "leaf"),
    ("wolves", "wolf"),
    ("knives", "knife"),
    ("lives", "life"),
    ("wives", "wife"),
    ("movies", "movie"),
    ("cookies", "cookie"),
    ("buses", "bus"),
    ("prizes", "prize"),
    ("sizes", "size"),
];

const INVARIANT: &[&str] = &[
    "series",
    "species",
    "news",
    "physics",
    "mathematics",
    "economics",
    "politics",
    "ethics",
    "means",
    "headquarters",
    "lens",
];

const POSSESSIVE_SUFFIXES: &[&str] = &["'s", "\u{2019}s", "'", "\u{2019}"];

/// Rule-based English noun lemmatizer.
///
/// Only the last word of a key is reduced ("united states" → "united state").
/// Possessive endings and punctuation on that word are dropped before the
/// rules run, and the rules repeat until the word stops changing, so the
/// output is a fixed point ("women's" → "woman").
///
/// Suffix rules are a heuristic, not a dictionary: words outside the
/// exception tables can end up as non-dictionary stems ("crises" → "crise").
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleLemmatizer;

impl RuleLemmatizer {
    fn lemmatize_word(word: &str) -> String {
        let mut current = word.to_string();
        while let Some(reduced) = Self::reduce_once(&current) {
            current = reduced;
        }
        current
    }

    /// One rule application; `None` when no rule matches.
    fn reduce_once(word: &str) -> Option<String> {
        if let Some((_, base)) = IRREGULAR_PLURALS.iter().find(|(plural, _)| *plural == word) {
            return Some(base.to_string());
        }
        if INVARIANT.contains(&word) {
            return None;
        }

        let len = word.chars().count();
        if len > 4 && word.ends_with("ies") {
            return Some(format!("{}y", &word[..word.len() - 3]));
        }
        if word.ends_with("sses")
            || word.ends_with("xes")
            || word.ends_with("zes")
            || word.ends_with("ches")
            || word.ends_with("shes")
        {
            return Some(word[..word.len() - 2].to_string());
        }
        if len > 3
            && word.ends_with('s')
            && !word.ends_with("ss")
            && !word.ends_with("us")
            && !word.ends_with("is")
        {
            return Some(word[..word.len() - 1].to_string());
        }
        None
    }
}

fn strip_possessive(word: &str) -> &str {
    let word = word.trim_end_matches(|c: char| {
        !c.is_alphanumeric() && c != '\'' && c != '\u{2019}'
    });
    POSSESSIVE_SUFFIXES
        .iter()
        .find_map(|suffix| word.strip_suffix(suffix))
        .unwrap_or(word)
}

impl Lemmatizer for RuleLemmatizer {
    fn lemmatize(&self, key: &str) -> String {
        let (head, last) = match key.rfind(char::is_whitespace) {
            Some(idx) => {
                let ws_len = key[idx..].chars().next().map(char::len_utf8).unwrap_or(1);
                key.split_at(idx + ws_len)
            }
            None => ("", key),
        };

        let word = clean_string(strip_possessive(last));
        format!("{}{}", head, Self::lemmatize_word(&word))
    }
}

/// Optional semantic merge of near-duplicate canonical keys.
///
/// Returns a mapping from key to the representative it should be merged into;
/// keys absent from the mapping keep their own identity.
pub trait KeyMerger: Send + Sync {
    fn merge_similar_keys(&self, keys: &[String]) -> HashMap<String, String>;
}

/// Two-stage key normalizer: lemmatize then clean, merging fact lists at each stage.
pub struct KeyNormalizer {
    lemmatizer: Box<dyn Lemmatizer>,
    merger: Option<Box<dyn KeyMerger>>,
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyNormalizer {
    pub fn new() -> Self {
        Self::with_lemmatizer(Box::new(RuleLemmatizer))
    }

    pub fn with_lemmatizer(lemmatizer: Box<dyn Lemmatizer>) -> Self {
        Self {
            lemmatizer,
            merger: None,
        }
    }

    /// Enable a semantic merge pass after cleaning.
    pub fn with_merger(mut self, merger: Box<dyn KeyMerger>) -> Self {
        self.merger = Some(merger);
        self
    }

    /// Canonical form of one key.
    pub fn canonical_key(&self, key: &str) -> String {
        clean_string(&self.lemmatizer.lemmatize(key))
    }

    /// Normalize a raw key table into the canonical key table.
    pub fn normalize(&self, raw: FactTable) -> FactTable {
        let raw_keys = raw.len();
        let lemmas = raw.regroup(|key| self.lemmatizer.lemmatize(key));
        let lemma_keys = lemmas.len();
        let mut canonical = lemmas.regroup(clean_string);

        if let Some(merger) = &self.merger {
            let keys: Vec<String> = canonical.keys().map(str::to_string).collect();
            let mapping = merger.merge_similar_keys(&keys);
            canonical = canonical.regroup(|key| {
                mapping
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| key.to_string())
            });
        }

        debug!(
            "Normalized {} raw keys -> {} lemmas -> {} canonical keys",
            raw_keys,
            lemma_keys,
            canonical.len()
        );
        canonical
    }
}
