//! Event-type pattern matching.
//!
//! A subscription lists patterns; an event matches when any pattern does:
//!
//! - `*` matches every event.
//! - A dotted pattern (`company.propertyChange`) matches only an identical
//!   event type.
//! - A bare pattern (`company`) matches an identical event type, or any event
//!   whose object type starts with it, ignoring case.

use compact_str::CompactString;
use smallvec::SmallVec;
use std::fmt;

/// Pattern that matches every event.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventPattern {
    Wildcard,
    Exact(CompactString),
    /// Stored lowercased; `raw` keeps the registered spelling.
    PrefixOfObjectType {
        raw: CompactString,
        lowered: CompactString,
    },
}

/// Patterns of one subscription in registration order.
pub type EventPatterns = SmallVec<[EventPattern; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternError {
    Empty,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::Empty => write!(f, "event pattern must not be empty"),
        }
    }
}

impl EventPattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }
        if raw == WILDCARD {
            return Ok(Self::Wildcard);
        }
        if raw.contains('.') {
            return Ok(Self::Exact(raw.into()));
        }
        Ok(Self::PrefixOfObjectType {
            raw: raw.into(),
            lowered: lowercase_chars(raw).collect(),
        })
    }

    pub fn matches(&self, event_type: &str, object_type: &str) -> bool {
        match self {
            EventPattern::Wildcard => true,
            EventPattern::Exact(pattern) => pattern == event_type,
            EventPattern::PrefixOfObjectType { raw, lowered } => {
                raw == event_type || starts_with_ignore_case(object_type, lowered)
            }
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventPattern::Wildcard => WILDCARD,
            EventPattern::Exact(pattern) => pattern,
            EventPattern::PrefixOfObjectType { raw, .. } => raw,
        }
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a full pattern list, rejecting empty lists and empty entries.
pub fn parse_patterns<'a>(
    raw: impl IntoIterator<Item = &'a str>,
) -> Result<EventPatterns, PatternError> {
    let patterns = raw
        .into_iter()
        .map(EventPattern::parse)
        .collect::<Result<EventPatterns, _>>()?;
    if patterns.is_empty() {
        return Err(PatternError::Empty);
    }
    Ok(patterns)
}

/// True when any pattern matches.
pub fn any_matches(patterns: &[EventPattern], event_type: &str, object_type: &str) -> bool {
    patterns
        .iter()
        .any(|p| p.matches(event_type, object_type))
}

/// Per-char lowercase mapping. Unlike `str::to_lowercase` it has no
/// word-final sigma rule, so a prefix lowers the same way as the text it heads.
fn lowercase_chars(s: &str) -> impl Iterator<Item = char> + '_ {
    s.chars().flat_map(char::to_lowercase)
}

fn starts_with_ignore_case(haystack: &str, lowered_prefix: &str) -> bool {
    let mut head = lowercase_chars(haystack);
    lowered_prefix.chars().all(|c| head.next() == Some(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(raw: &str) -> EventPattern {
        EventPattern::parse(raw).unwrap()
    }

    #[test]
    fn parse_variants() {
        assert_eq!(pattern("*"), EventPattern::Wildcard);
        assert!(matches!(pattern("company.creation"), EventPattern::Exact(_)));
        assert!(matches!(
            pattern("Company"),
            EventPattern::PrefixOfObjectType { .. }
        ));
        assert_eq!(EventPattern::parse("  "), Err(PatternError::Empty));
    }

    #[test]
    fn object_type_prefix() {
        assert!(pattern("company").matches("company.propertyChange", "company"));
        assert!(!pattern("contact").matches("company.propertyChange", "company"));
    }

    #[test]
    fn prefix_is_case_insensitive() {
        assert!(pattern("COMP").matches("company.creation", "company"));
        assert!(pattern("comp").matches("Company.creation", "Company"));
    }

    #[test]
    fn dotted_pattern_is_exact_only() {
        let p = pattern("company.propertyChange");
        assert!(p.matches("company.propertyChange", "company"));
        assert!(!p.matches("company.creation", "company"));
        assert!(!p.matches("company.propertychange", "company"));
    }

    #[test]
    fn bare_pattern_matches_identical_event_type() {
        assert!(pattern("heartbeat").matches("heartbeat", "system"));
    }

    #[test]
    fn wildcard_matches_everything() {
        assert!(pattern("*").matches("deal.deletion", "deal"));
    }

    #[test]
    fn empty_list_is_rejected() {
        assert_eq!(parse_patterns(Vec::<&str>::new()), Err(PatternError::Empty));
        assert_eq!(parse_patterns(["company", ""]), Err(PatternError::Empty));
        assert_eq!(parse_patterns(["company", "*"]).unwrap().len(), 2);
    }

    #[test]
    fn prefix_longer_than_object_type() {
        assert!(!pattern("companies").matches("company.creation", "company"));
    }

    #[test]
    fn prefix_whose_lowercase_changes_length() {
        // 'İ' lowers to two chars, three bytes.
        assert!(pattern("İstan").matches("İstanbul.created", "İstanbul"));
        assert!(!pattern("istan").matches("İstanbul.created", "İstanbul"));
        // Word-final 'Σ' in the pattern still heads a longer word.
        assert!(pattern("ΟΔΟΣ").matches("place.created", "Οδοσημα"));
    }
}
