use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::events::EventPayload;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueType {
    #[default]
    Bug,
    Story,
    Task,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bug => "BUG",
            Self::Story => "STORY",
            Self::Task => "TASK",
        }
    }
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUG" => Ok(Self::Bug),
            "STORY" => Ok(Self::Story),
            "TASK" => Ok(Self::Task),
            _ => Err(format!("Invalid issue type: {}", s)),
        }
    }
}

/// Lifecycle state of an issue. Legal moves between states live in
/// [`super::lifecycle`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum IssueState {
    #[default]
    New,
    Active,
    Resolved,
    Closed,
    Removed,
}

impl IssueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Active => "Active",
            Self::Resolved => "Resolved",
            Self::Closed => "Closed",
            Self::Removed => "Removed",
        }
    }
}

impl std::fmt::Display for IssueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(Self::New),
            "Active" => Ok(Self::Active),
            "Resolved" => Ok(Self::Resolved),
            "Closed" => Ok(Self::Closed),
            "Removed" => Ok(Self::Removed),
            _ => Err(format!("Invalid issue state: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub state: IssueState,
    pub description: String,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One row of an issue's audit trail.
///
/// The payload is flattened so the wire shape is
/// `{"id", "issue_id", "type", "payload", "actor", "ts"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub issue_id: i64,
    pub actor: String,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub ts: String,
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

/// Input for creating an issue.
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub title: String,
    pub issue_type: IssueType,
    pub description: String,
    pub created_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_state_roundtrip() {
        for s in &["New", "Active", "Resolved", "Closed", "Removed"] {
            let parsed: IssueState = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("active".parse::<IssueState>().is_err());
    }

    #[test]
    fn test_issue_type_parse_is_case_insensitive() {
        assert_eq!("bug".parse::<IssueType>().unwrap(), IssueType::Bug);
        assert_eq!("Story".parse::<IssueType>().unwrap(), IssueType::Story);
        assert_eq!("TASK".parse::<IssueType>().unwrap(), IssueType::Task);
        assert!("epic".parse::<IssueType>().is_err());
    }

    #[test]
    fn test_issue_serializes_type_field_uppercase() {
        let issue = Issue {
            id: 1,
            title: "Cart total off by a cent".into(),
            issue_type: IssueType::Bug,
            state: IssueState::Active,
            description: String::new(),
            created_by: "user".into(),
            created_at: "2024-01-01T00:00:00.000Z".into(),
            updated_at: "2024-01-01T00:00:00.000Z".into(),
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "BUG");
        assert_eq!(json["state"], "Active");
        assert!(json.get("issue_type").is_none());
    }

    #[test]
    fn test_event_wire_shape() {
        let event = Event {
            id: 3,
            issue_id: 1,
            actor: "user".into(),
            payload: EventPayload::StateChanged {
                from: IssueState::New,
                to: IssueState::Active,
            },
            ts: "2024-01-01T00:00:00.000Z".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StateChanged");
        assert_eq!(json["payload"]["from"], "New");
        assert_eq!(json["payload"]["to"], "Active");
        assert_eq!(json["actor"], "user");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type(), "StateChanged");
    }
}
