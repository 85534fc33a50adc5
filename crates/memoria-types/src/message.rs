//! Dialog messages and speaker inference.

use serde::{Deserialize, Serialize};

/// Role of a dialog message speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Get the wire-format string for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One dialog message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Speaker name, when the transport supplies one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl Message {
    /// Create a message with a speaker name.
    pub fn new(role: Role, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: name.into(),
        }
    }

    /// The speaker label used in formatted output: name when present,
    /// otherwise the role.
    pub fn speaker(&self) -> &str {
        if self.name.is_empty() {
            self.role.as_str()
        } else {
            &self.name
        }
    }
}

/// An ordered list of dialog messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Messages(pub Vec<Message>);

impl Messages {
    /// Name of the first named `user` speaker, falling back to `"user"`.
    pub fn user_name(&self) -> String {
        self.0
            .iter()
            .find(|m| m.role == Role::User && !m.name.is_empty())
            .map(|m| m.name.clone())
            .unwrap_or_else(|| "user".to_string())
    }

    /// Name of the first named `assistant` speaker, falling back to
    /// `"assistant"`.
    pub fn assistant_name(&self) -> String {
        self.0
            .iter()
            .find(|m| m.role == Role::Assistant && !m.name.is_empty())
            .map(|m| m.name.clone())
            .unwrap_or_else(|| "assistant".to_string())
    }

    /// Format the conversation as `speaker: content` lines for prompt input.
    pub fn format(&self) -> String {
        let mut out = String::new();
        for msg in &self.0 {
            out.push_str(msg.speaker());
            out.push_str(": ");
            out.push_str(&msg.content);
            out.push('\n');
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.0.iter()
    }
}

impl From<Vec<Message>> for Messages {
    fn from(messages: Vec<Message>) -> Self {
        Self(messages)
    }
}

impl IntoIterator for Messages {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Messages {
        Messages(vec![
            Message::new(Role::User, "axin", "我今天去了星巴克"),
            Message::new(Role::Assistant, "jarvis", "好的"),
            Message::new(Role::User, "", "我喜欢原味不加糖"),
        ])
    }

    #[test]
    fn test_user_name_first_named() {
        assert_eq!(sample().user_name(), "axin");
    }

    #[test]
    fn test_assistant_name() {
        assert_eq!(sample().assistant_name(), "jarvis");
    }

    #[test]
    fn test_name_fallbacks() {
        let msgs = Messages(vec![Message::new(Role::User, "", "hi")]);
        assert_eq!(msgs.user_name(), "user");
        assert_eq!(msgs.assistant_name(), "assistant");
    }

    #[test]
    fn test_format_uses_role_when_unnamed() {
        let text = sample().format();
        assert!(text.contains("axin: 我今天去了星巴克"));
        assert!(text.contains("jarvis: 好的"));
        assert!(text.contains("user: 我喜欢原味不加糖"));
    }

    #[test]
    fn test_role_serde_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: Role = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(role, Role::System);
    }
}
