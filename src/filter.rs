//! Message filtering by regular expression.

use crate::error::{Result, ReaderError};
use regex::Regex;

/// Compiled message filter.
///
/// Patterns are searched for anywhere in the rendered message, so a bare
/// `EURUSD` matches any message mentioning that symbol. An empty filter
/// matches everything.
#[derive(Clone, Debug, Default)]
pub struct MessageFilter {
    pattern: Option<Regex>,
}

impl MessageFilter {
    /// Filter that lets every message through.
    pub fn match_all() -> Self {
        Self { pattern: None }
    }

    /// Compile a pattern.
    pub fn compile(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| ReaderError::PatternCompile {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: Some(regex),
        })
    }

    /// Compile an optional pattern; `None` matches everything.
    pub fn from_option(pattern: Option<&str>) -> Result<Self> {
        match pattern {
            Some(p) => Self::compile(p),
            None => Ok(Self::match_all()),
        }
    }

    /// Source pattern, if any.
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_ref().map(Regex::as_str)
    }

    pub fn is_match_all(&self) -> bool {
        self.pattern.is_none()
    }

    /// Test a rendered message.
    pub fn matches(&self, text: &str) -> bool {
        match &self.pattern {
            Some(regex) => regex.is_match(text),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_match_all() {
        let filter = MessageFilter::match_all();
        assert!(filter.is_match_all());
        assert!(filter.matches(""));
        assert!(filter.matches("{\n  \"a\": 1\n}"));
    }

    #[test]
    fn test_unanchored_search() {
        let filter = MessageFilter::compile("EURUSD").unwrap();
        assert!(filter.matches("{\n  \"symbol\": \"EURUSD\"\n}"));
        assert!(!filter.matches("{\n  \"symbol\": \"GBPUSD\"\n}"));
        assert_eq!(filter.pattern(), Some("EURUSD"));
    }

    #[test]
    fn test_pattern_can_span_fields() {
        let filter = MessageFilter::compile(r#""volume": [1-9]\d{3,}"#).unwrap();
        assert!(filter.matches("{\n  \"volume\": 12000\n}"));
        assert!(!filter.matches("{\n  \"volume\": 12\n}"));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = MessageFilter::compile("(unclosed");
        assert!(matches!(
            result,
            Err(ReaderError::PatternCompile { ref pattern, .. }) if pattern == "(unclosed"
        ));
    }

    #[test]
    fn test_from_option() {
        assert!(MessageFilter::from_option(None).unwrap().is_match_all());
        assert!(!MessageFilter::from_option(Some("x")).unwrap().is_match_all());
        assert!(MessageFilter::from_option(Some("[")).is_err());
    }

    proptest! {
        #[test]
        fn prop_literal_pattern_matches_iff_contained(
            needle in "[a-z]{1,6}",
            haystack in "[a-z \n]{0,40}",
        ) {
            let filter = MessageFilter::compile(&regex::escape(&needle)).unwrap();
            prop_assert_eq!(filter.matches(&haystack), haystack.contains(&needle));
        }
    }
}
