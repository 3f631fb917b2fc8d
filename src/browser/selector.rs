use std::fmt;

use crate::error::{ReplayError, Result};
use crate::models::SelectorEntry;

/// A selector reduced to one of the two lookup strategies the driver
/// supports. Recorder exports carry several alternatives per step; schemes
/// the engine cannot drive (`pierce/`, `aria/`, `text/`) are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSelector {
    Css(String),
    Xpath(String),
}

impl fmt::Display for ResolvedSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedSelector::Css(s) => write!(f, "{}", s),
            ResolvedSelector::Xpath(s) => write!(f, "xpath/{}", s),
        }
    }
}

/// Classify a single selector string by its scheme prefix. Returns `None`
/// for schemes the driver cannot resolve.
fn classify(selector: &str) -> Option<ResolvedSelector> {
    if let Some(xpath) = selector.strip_prefix("xpath/") {
        return Some(ResolvedSelector::Xpath(xpath.to_string()));
    }
    if selector.starts_with("pierce/")
        || selector.starts_with("aria/")
        || selector.starts_with("text/")
    {
        return None;
    }
    Some(ResolvedSelector::Css(selector.to_string()))
}

/// Pick one usable selector from a step's selector list. XPath wins over
/// css when both are present; within a strategy the last entry wins.
pub fn pick_selector(entries: &[SelectorEntry]) -> Result<ResolvedSelector> {
    let mut xpath = None;
    let mut css = None;

    for entry in entries {
        let Some(raw) = entry.primary() else { continue };
        match classify(raw) {
            Some(ResolvedSelector::Xpath(x)) => xpath = Some(x),
            Some(ResolvedSelector::Css(c)) => css = Some(c),
            None => {}
        }
    }

    if let Some(x) = xpath {
        return Ok(ResolvedSelector::Xpath(x));
    }
    if let Some(c) = css {
        return Ok(ResolvedSelector::Css(c));
    }

    let listing = entries
        .iter()
        .filter_map(|e| e.primary())
        .collect::<Vec<_>>()
        .join(", ");
    Err(ReplayError::InvalidStep(format!(
        "no usable selector in: {}",
        listing
    )))
}

/// Pick a selector from a single raw string (used by custom steps whose
/// `target` carries the selector directly).
pub fn pick_single(raw: &str) -> Result<ResolvedSelector> {
    pick_selector(&[SelectorEntry::One(raw.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(s: &str) -> SelectorEntry {
        SelectorEntry::One(s.to_string())
    }

    #[test]
    fn css_is_implicit() {
        let sel = pick_selector(&[one("#go")]).unwrap();
        assert_eq!(sel, ResolvedSelector::Css("#go".to_string()));
    }

    #[test]
    fn xpath_wins_over_css() {
        let sel = pick_selector(&[one("#go"), one("xpath//button[1]")]).unwrap();
        assert_eq!(sel, ResolvedSelector::Xpath("/button[1]".to_string()));
    }

    #[test]
    fn unsupported_schemes_are_skipped() {
        let sel =
            pick_selector(&[one("aria/Go"), one("pierce/#go"), one("div.go")]).unwrap();
        assert_eq!(sel, ResolvedSelector::Css("div.go".to_string()));

        let err = pick_selector(&[one("aria/Go"), one("text/Go")]).unwrap_err();
        assert!(matches!(err, ReplayError::InvalidStep(_)));
    }

    #[test]
    fn array_entries_contribute_first_element() {
        let entry = SelectorEntry::Many(vec![
            "#primary".to_string(),
            "#fallback".to_string(),
        ]);
        let sel = pick_selector(&[entry]).unwrap();
        assert_eq!(sel, ResolvedSelector::Css("#primary".to_string()));
    }

    #[test]
    fn later_entries_win_within_strategy() {
        let sel = pick_selector(&[one("#first"), one("#second")]).unwrap();
        assert_eq!(sel, ResolvedSelector::Css("#second".to_string()));
    }
}
