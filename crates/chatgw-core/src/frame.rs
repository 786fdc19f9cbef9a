//! Inbound frame parsing and classification.
//!
//! The backend replies and pushes with the same `key:value|...` line format
//! the gateway sends. Parsing is deliberately tolerant: unknown type tags,
//! unordered or duplicate fields, and fields with no colon are all
//! accepted. Classification only needs the `type` field, wherever it sits
//! in the line.

/// Recognized frame kinds, with fallbacks for anything the backend adds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    LoginSuccess,
    LoginError,
    PrivateMessage,
    GroupMessage,
    GroupCreated,
    GroupsList,
    History,
    JoinGroupSuccess,
    OnlineUsers,
    SystemMessage,
    Error,
    /// A `type` tag the gateway does not recognize.
    Unknown(String),
    /// No `type` field present at all.
    Untyped,
}

impl FrameKind {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "login_success" => FrameKind::LoginSuccess,
            "login_error" => FrameKind::LoginError,
            "private_message" => FrameKind::PrivateMessage,
            "group_message" => FrameKind::GroupMessage,
            "group_created" => FrameKind::GroupCreated,
            "groups_list" => FrameKind::GroupsList,
            "history" => FrameKind::History,
            "join_group_success" => FrameKind::JoinGroupSuccess,
            "online_users" => FrameKind::OnlineUsers,
            "system_message" => FrameKind::SystemMessage,
            "error" => FrameKind::Error,
            other => FrameKind::Unknown(other.to_string()),
        }
    }
}

/// One decoded line from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    raw: String,
    fields: Vec<(String, String)>,
    kind: FrameKind,
}

impl Frame {
    /// Parse a single wire line (trailing newline already stripped).
    pub fn parse(line: &str) -> Self {
        let raw = line.trim().to_string();
        let mut fields = Vec::new();
        for part in raw.split('|') {
            match part.split_once(':') {
                Some((key, value)) => fields.push((key.to_string(), value.to_string())),
                None if !part.is_empty() => fields.push((part.to_string(), String::new())),
                None => {}
            }
        }
        let kind = fields
            .iter()
            .find(|(key, _)| key == "type")
            .map(|(_, value)| FrameKind::from_tag(value))
            .unwrap_or(FrameKind::Untyped);
        Self { raw, fields, kind }
    }

    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }

    /// The trimmed source line, exactly as it will be handed to callers.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// First value for `key`, if present.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether this frame settles a login handshake. Only meaningful while
    /// the handshake is in flight; after that these kinds flow through the
    /// generic reply route like any other frame.
    pub fn is_login_reply(&self) -> bool {
        matches!(self.kind, FrameKind::LoginSuccess | FrameKind::LoginError)
    }
}
