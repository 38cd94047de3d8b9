use serde::{Deserialize, Serialize};

use crate::core::attachment::ImageAttachment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Model,
    /// App-authored notices. Shown in the log, never sent to the provider.
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
            Role::System => "system",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_model(self) -> bool {
        self == Role::Model
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "model" => Ok(Role::Model),
            "system" => Ok(Role::System),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<ImageAttachment>,
}

impl ChatMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>, attachments: Vec<ImageAttachment>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            attachments,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_model(&self) -> bool {
        self.role.is_model()
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_round_trip_through_strings() {
        for role in [Role::User, Role::Model, Role::System] {
            assert_eq!(Role::try_from(role.as_str()), Ok(role));
        }
    }

    #[test]
    fn invalid_role_strings_are_rejected() {
        assert!(Role::try_from("assistant").is_err());
    }

    #[test]
    fn user_messages_keep_attachments() {
        let image = ImageAttachment::from_data_url("data:image/png;base64,QUJD");
        let message = ChatMessage::user("see photo", vec![image.clone()]);
        assert!(message.is_user());
        assert!(message.has_attachments());
        assert_eq!(message.attachments, vec![image]);
        assert!(!ChatMessage::model("hi").has_attachments());
    }
}
