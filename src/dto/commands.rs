use serde::Deserialize;

/// Payload of the `logout` command.
#[derive(Debug, Clone, Deserialize)]
pub struct LogoutCommand {
    /// Player position to clear.
    pub position: i64,
}

/// Payload of the `message` command.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageCommand {
    /// Text to show on the machine.
    pub message: String,
}

/// Payload of the `token_rotate` command; the machine UUID is the command's own target.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRotateCommand {
    /// Replacement bearer token.
    pub token: String,
}
