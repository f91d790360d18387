use serde::Deserialize;

/// Body of a successful login response, inside the `message` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginReply {
    /// Display name of the player who logged in.
    pub username: String,
}

/// Body of a successful registration response, inside the `message` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationReply {
    /// Machine UUID issued by the scoreboard.
    pub uuid: String,
    /// Bearer token issued by the scoreboard.
    pub token: String,
}
