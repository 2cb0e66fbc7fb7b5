// Connection filter: case-insensitive, multi-line regex over each entry's text

use crate::connection::DisplayedConnection;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSettings {
    pub enabled: bool,
    pub pattern: String,
}

impl FilterSettings {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.pattern.is_empty()
    }
}

pub fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
}

/// Update `is_visible` on every entry.
///
/// A pattern that does not compile leaves visibility exactly as it was and
/// returns false.
pub fn apply(connections: &mut [DisplayedConnection], settings: &FilterSettings) -> bool {
    if !settings.is_active() {
        for c in connections.iter_mut() {
            c.is_visible = true;
        }
        return true;
    }

    let regex = match compile(&settings.pattern) {
        Ok(regex) => regex,
        Err(e) => {
            log::debug!("Ignoring invalid filter {:?}: {}", settings.pattern, e);
            return false;
        }
    };

    for c in connections.iter_mut() {
        c.is_visible = regex.is_match(&c.to_string());
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, LiveConnection, Protocol};

    fn conn(local: &str, state: ConnectionState, name: &str) -> DisplayedConnection {
        DisplayedConnection::from_live(&LiveConnection::new(
            Protocol::Tcp,
            local.parse().unwrap(),
            "10.0.0.9:443".parse().unwrap(),
            state,
            100,
            name.to_string(),
        ))
    }

    fn sample() -> Vec<DisplayedConnection> {
        vec![
            conn("10.0.0.1:5000", ConnectionState::Established, "firefox"),
            conn("10.0.0.1:22", ConnectionState::Listen, "sshd"),
            conn("10.0.0.1:5001", ConnectionState::TimeWait, "curl"),
        ]
    }

    #[test]
    fn test_filter_on_state() {
        let mut list = sample();
        let settings = FilterSettings {
            enabled: true,
            pattern: "ESTABLISHED".to_string(),
        };

        assert!(apply(&mut list, &settings));
        let visible: Vec<bool> = list.iter().map(|c| c.is_visible).collect();
        assert_eq!(visible, vec![true, false, false]);
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        let mut list = sample();
        let settings = FilterSettings {
            enabled: true,
            pattern: "SSHD|Curl".to_string(),
        };

        apply(&mut list, &settings);
        let visible: Vec<bool> = list.iter().map(|c| c.is_visible).collect();
        assert_eq!(visible, vec![false, true, true]);
    }

    #[test]
    fn test_invalid_pattern_keeps_previous_visibility() {
        let mut list = sample();
        list[0].is_visible = false;
        list[1].is_visible = true;
        list[2].is_visible = false;

        let settings = FilterSettings {
            enabled: true,
            pattern: "(unclosed".to_string(),
        };

        assert!(!apply(&mut list, &settings));
        let visible: Vec<bool> = list.iter().map(|c| c.is_visible).collect();
        assert_eq!(visible, vec![false, true, false]);
    }

    #[test]
    fn test_disabled_or_empty_shows_everything() {
        let mut list = sample();
        for c in list.iter_mut() {
            c.is_visible = false;
        }

        let disabled = FilterSettings {
            enabled: false,
            pattern: "nothing-matches".to_string(),
        };
        apply(&mut list, &disabled);
        assert!(list.iter().all(|c| c.is_visible));

        for c in list.iter_mut() {
            c.is_visible = false;
        }
        let empty = FilterSettings {
            enabled: true,
            pattern: String::new(),
        };
        apply(&mut list, &empty);
        assert!(list.iter().all(|c| c.is_visible));
    }
}
