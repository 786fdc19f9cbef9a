//! Outbound command encoding for the backend's line protocol.
//!
//! Wire format: one text line per command, fields joined by `|`, each field
//! `key:value`, e.g. `type:private_message|from:alice|to:bob|content:hi`.

/// Strip characters that would corrupt the line framing.
///
/// Line terminators become spaces and the field separator `|` becomes `_`.
/// Applied to free-text payload (message bodies) before encoding; field
/// keys and identifiers are passed through untouched.
pub fn sanitize(value: &str) -> String {
    value.replace(['\n', '\r'], " ").replace('|', "_")
}

/// A command the gateway issues to the backend chat server.
///
/// `encode` produces the single wire line for the command (without the
/// trailing newline; the transport appends it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login {
        username: String,
    },
    PrivateMessage {
        from: String,
        to: String,
        content: String,
    },
    GroupMessage {
        from: String,
        group: String,
        content: String,
    },
    CreateGroup {
        group_name: String,
        creator: String,
    },
    GetGroups {
        username: String,
    },
    GetHistory {
        target: String,
        username: String,
        is_group: bool,
    },
    JoinGroup {
        username: String,
        group: String,
    },
    GetGroupMembers {
        group: String,
    },
    GetOnlineUsers {
        username: String,
    },
}

impl Command {
    /// Encode the command as a single `type:<name>|key:value|...` line.
    pub fn encode(&self) -> String {
        match self {
            Command::Login { username } => {
                format!("type:login|username:{username}")
            }
            Command::PrivateMessage { from, to, content } => {
                format!(
                    "type:private_message|from:{from}|to:{to}|content:{}",
                    sanitize(content)
                )
            }
            Command::GroupMessage {
                from,
                group,
                content,
            } => {
                format!(
                    "type:group_message|from:{from}|group:{group}|content:{}",
                    sanitize(content)
                )
            }
            Command::CreateGroup {
                group_name,
                creator,
            } => {
                format!("type:create_group|group_name:{group_name}|creator:{creator}")
            }
            Command::GetGroups { username } => {
                format!("type:get_groups|username:{username}")
            }
            Command::GetHistory {
                target,
                username,
                is_group,
            } => {
                format!("type:get_history|target:{target}|username:{username}|isGroup:{is_group}")
            }
            Command::JoinGroup { username, group } => {
                format!("type:join_group|username:{username}|group:{group}")
            }
            Command::GetGroupMembers { group } => {
                format!("type:get_group_members|group:{group}")
            }
            Command::GetOnlineUsers { username } => {
                format!("type:get_online_users|username:{username}")
            }
        }
    }
}
