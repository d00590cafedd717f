//! Event filter
//!
//! Pure accept/drop decision over inbound chat events. Drops automation
//! accounts, commands, and link-sharing so only conversational text reaches
//! the classifier. Total over all inputs: malformed events are dropped, never
//! reported as errors.

use chatsense_common::config::FilterSettings;
use chatsense_common::RawEvent;
use std::collections::HashSet;

/// Outcome of filtering one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept,
    /// Posted by a deny-listed automation account
    DenyListedAuthor,
    /// Empty or whitespace-only text
    EmptyText,
    /// Starts with a command prefix
    Command,
    /// Contains a link marker
    Link,
    /// Missing source identifier
    Malformed,
}

impl FilterVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, FilterVerdict::Accept)
    }
}

/// Configured event filter
///
/// Cheap to clone; holds no interior state, so the same input always yields
/// the same verdict.
#[derive(Debug, Clone)]
pub struct EventFilter {
    deny_authors: HashSet<String>,
    command_prefixes: Vec<String>,
    link_markers: Vec<String>,
}

impl EventFilter {
    pub fn new(settings: &FilterSettings) -> Self {
        let deny_authors = settings
            .deny_authors
            .iter()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();

        // An empty prefix or marker would match every message
        let command_prefixes = settings
            .command_prefixes
            .iter()
            .filter(|p| !p.is_empty())
            .cloned()
            .collect();

        let link_markers = settings
            .link_markers
            .iter()
            .map(|m| m.to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();

        Self {
            deny_authors,
            command_prefixes,
            link_markers,
        }
    }

    /// Decide on an event given its parts
    pub fn verdict(&self, source_id: &str, author_id: &str, text: &str) -> FilterVerdict {
        if source_id.trim().is_empty() {
            return FilterVerdict::Malformed;
        }

        if self.deny_authors.contains(&author_id.trim().to_lowercase()) {
            return FilterVerdict::DenyListedAuthor;
        }

        if text.trim().is_empty() {
            return FilterVerdict::EmptyText;
        }

        if self
            .command_prefixes
            .iter()
            .any(|prefix| text.starts_with(prefix.as_str()))
        {
            return FilterVerdict::Command;
        }

        let lowered = text.to_lowercase();
        if self
            .link_markers
            .iter()
            .any(|marker| lowered.contains(marker.as_str()))
        {
            return FilterVerdict::Link;
        }

        FilterVerdict::Accept
    }

    /// `true` when the event should be classified
    pub fn accepts(&self, event: &RawEvent) -> bool {
        self.verdict(&event.source_id, &event.author_id, &event.text)
            .is_accept()
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new(&FilterSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsense_common::ChatMessage;

    fn event(source: &str, author: &str, text: &str) -> RawEvent {
        RawEvent::from_message(ChatMessage::new(source, author, text), 0)
    }

    #[test]
    fn test_plain_text_accepted() {
        let filter = EventFilter::default();
        assert!(filter.accepts(&event("chan1", "viewer42", "hello world")));
    }

    #[test]
    fn test_command_prefix_dropped() {
        let filter = EventFilter::default();
        assert_eq!(
            filter.verdict("chan1", "viewer42", "!help"),
            FilterVerdict::Command
        );
        assert!(!filter.accepts(&event("chan1", "viewer42", "!help")));
    }

    #[test]
    fn test_deny_listed_author_dropped_case_insensitive() {
        let filter = EventFilter::default();
        assert_eq!(
            filter.verdict("chan1", "nightbot", "Follow the channel!"),
            FilterVerdict::DenyListedAuthor
        );
        assert_eq!(
            filter.verdict("chan1", "NightBot", "Follow the channel!"),
            FilterVerdict::DenyListedAuthor
        );
    }

    #[test]
    fn test_link_marker_dropped_case_insensitive() {
        let filter = EventFilter::default();
        assert_eq!(
            filter.verdict("chan1", "viewer42", "check HTTPS://example.com"),
            FilterVerdict::Link
        );
        assert_eq!(
            filter.verdict("chan1", "viewer42", "look at this http link"),
            FilterVerdict::Link
        );
    }

    #[test]
    fn test_empty_and_whitespace_dropped() {
        let filter = EventFilter::default();
        assert_eq!(filter.verdict("chan1", "viewer42", ""), FilterVerdict::EmptyText);
        assert_eq!(filter.verdict("chan1", "viewer42", "   "), FilterVerdict::EmptyText);
    }

    #[test]
    fn test_missing_source_is_malformed() {
        let filter = EventFilter::default();
        assert_eq!(filter.verdict("", "viewer42", "hi"), FilterVerdict::Malformed);
    }

    #[test]
    fn test_prefix_only_matches_at_start() {
        let filter = EventFilter::default();
        assert!(filter.verdict("chan1", "viewer42", "wow!").is_accept());
    }

    #[test]
    fn test_empty_config_entries_ignored() {
        let filter = EventFilter::new(&FilterSettings {
            deny_authors: vec!["".to_string()],
            command_prefixes: vec!["".to_string()],
            link_markers: vec!["".to_string()],
        });
        assert!(filter.verdict("chan1", "", "anything at all").is_accept());
    }

    #[test]
    fn test_custom_rules() {
        let filter = EventFilter::new(&FilterSettings {
            deny_authors: vec!["ModBot ".to_string()],
            command_prefixes: vec!["/".to_string(), "!".to_string()],
            link_markers: vec!["www.".to_string()],
        });
        assert_eq!(filter.verdict("chan1", "modbot", "hi"), FilterVerdict::DenyListedAuthor);
        assert_eq!(filter.verdict("chan1", "viewer", "/me waves"), FilterVerdict::Command);
        assert_eq!(filter.verdict("chan1", "viewer", "go to WWW.site"), FilterVerdict::Link);
        // Default link marker no longer applies
        assert!(filter.verdict("chan1", "viewer", "http is a protocol").is_accept());
    }

    #[test]
    fn test_verdict_is_repeatable() {
        let filter = EventFilter::default();
        let inputs = [
            event("chan1", "viewer42", "hello world"),
            event("chan1", "nightbot", "hello"),
            event("chan1", "viewer42", "!so"),
            event("chan1", "viewer42", "http://x"),
        ];
        for e in &inputs {
            let first = filter.accepts(e);
            for _ in 0..5 {
                assert_eq!(filter.accepts(e), first);
            }
        }
    }
}
