use std::fmt;

use serde_derive::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Home,
    Away,
}

impl From<bool> for Presence {
    fn from(present: bool) -> Self {
        if present {
            Presence::Home
        } else {
            Presence::Away
        }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Home => f.write_str("home"),
            Presence::Away => f.write_str("away"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PresenceAnnouncement {
    pub presence: Presence,
    pub present: bool,
}

impl PresenceAnnouncement {
    pub fn new(present: bool) -> Self {
        PresenceAnnouncement {
            presence: present.into(),
            present,
        }
    }
}

/// Requests sent to the daemon loop from outside the tick schedule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanRequest {
    Now,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announcement_json() {
        let json = serde_json::to_string(&PresenceAnnouncement::new(true)).unwrap();
        assert_eq!(json, r#"{"presence":"home","present":true}"#);
        let json = serde_json::to_string(&PresenceAnnouncement::new(false)).unwrap();
        assert_eq!(json, r#"{"presence":"away","present":false}"#);
    }
}
