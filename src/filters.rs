//! Structured filters embedded in free-text queries.
//!
//! Filters are described by a fixed table of rules. Each rule owns a
//! case-insensitive pattern, the filter key it sets, and a transform
//! from the first match to the filter value. Every rule is matched against
//! the original query text; the first match of a rule sets its filter and
//! every occurrence of that matched text is cut from the residual. Spans
//! claimed by several rules (`folder:ks9`) are cut once.

use std::{collections::BTreeMap, fmt, ops::Range, sync::LazyLock};

use regex::{Captures, Regex};
use serde::Serialize;
use tracing::debug;

/// Metadata a filter constrains. All keys are matched as case-insensitive
/// substrings of the chunk's `file` field.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FilterKey {
    /// Short document code such as `ks9`.
    Code,
    /// Folder or subfolder name.
    Folder,
}

impl FilterKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Folder => "folder",
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Active filter constraints, keyed by what they constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Filters(BTreeMap<FilterKey, String>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: FilterKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    pub fn insert(&mut self, key: FilterKey, value: impl Into<String>) {
        self.0.insert(key, value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FilterKey, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// True when `file` contains every filter value, ignoring case.
    /// A chunk without a file only matches when no filter is active.
    pub fn matches(&self, file: Option<&str>) -> bool {
        if self.is_empty() {
            return true;
        }
        let Some(file) = file else {
            return false;
        };
        let file = file.to_lowercase();
        self.0
            .values()
            .all(|value| file.contains(&value.to_lowercase()))
    }
}

/// A query split into its free-text part and its filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub residual: String,
    pub filters: Filters,
}

/// One entry of the filter grammar.
struct FilterRule {
    key: FilterKey,
    pattern: Regex,
    transform: fn(&Captures<'_>) -> String,
}

fn code_value(caps: &Captures<'_>) -> String {
    format!("ks{}", &caps[1])
}

fn folder_value(caps: &Captures<'_>) -> String {
    caps[1].to_string()
}

static RULES: LazyLock<Vec<FilterRule>> = LazyLock::new(|| {
    let rule = |key, pattern: &str, transform| FilterRule {
        key,
        // Patterns are literals; a failure here is a programming error
        // caught by the unit tests.
        pattern: Regex::new(pattern).unwrap_or_else(|e| {
            panic!("invalid built-in filter pattern {pattern:?}: {e}")
        }),
        transform,
    };

    vec![
        rule(FilterKey::Code, r"(?i)\bks\s*(\d+)\b", code_value),
        rule(
            FilterKey::Folder,
            r"(?i)\b(?:folder|subfolder):\s*(\S+)",
            folder_value,
        ),
    ]
});

/// Extract filters from `query`, returning them with the stripped query.
///
/// # Examples
///
/// ```
/// use docsift::filters::{parse_query, FilterKey};
///
/// let parsed = parse_query("ks9 aero summary");
/// assert_eq!(parsed.residual, "aero summary");
/// assert_eq!(parsed.filters.get(FilterKey::Code), Some("ks9"));
///
/// let parsed = parse_query("folder:engine torque");
/// assert_eq!(parsed.residual, "torque");
/// assert_eq!(parsed.filters.get(FilterKey::Folder), Some("engine"));
/// ```
pub fn parse_query(query: &str) -> ParsedQuery {
    let mut filters = Filters::new();
    let mut spans: Vec<Range<usize>> = Vec::new();

    for rule in RULES.iter() {
        let Some(caps) = rule.pattern.captures(query) else {
            continue;
        };
        let matched = caps[0].to_lowercase();
        let value = (rule.transform)(&caps);
        debug!(key = %rule.key, value = %value, "extracted query filter");
        filters.insert(rule.key, value);

        // Other matches of the same rule stay in the residual.
        spans.extend(
            rule.pattern
                .find_iter(query)
                .filter(|m| m.as_str().to_lowercase() == matched)
                .map(|m| m.range()),
        );
    }

    if spans.is_empty() {
        return ParsedQuery {
            residual: query.to_string(),
            filters,
        };
    }

    spans.sort_by_key(|span| span.start);
    let mut residual = String::with_capacity(query.len());
    let mut cursor = 0;
    for span in spans {
        if span.start > cursor {
            residual.push_str(&query[cursor..span.start]);
        }
        cursor = cursor.max(span.end);
    }
    residual.push_str(&query[cursor..]);

    ParsedQuery {
        residual: residual.trim().to_string(),
        filters,
    }
}
