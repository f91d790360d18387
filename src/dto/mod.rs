//! Wire payloads exchanged with the scoreboard service.

/// Payloads of server-pushed commands.
pub mod commands;
/// Request, response and command frames.
pub mod rpc;
/// Score upload bodies.
pub mod scores;
/// Login and registration replies.
pub mod session;
