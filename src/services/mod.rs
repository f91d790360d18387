/// Server command table and built-in handlers.
pub mod commands;
/// Screen surface abstraction.
pub mod display;
/// Score directory change notifications.
pub mod file_watcher;
/// Reconnect supervision for the scoreboard link.
pub mod link_supervisor;
/// QR badge scanner loop.
pub mod qr_ingest;
/// Machine registration.
pub mod registration;
/// Scoreboard WebSocket RPC channel.
pub mod rpc_channel;
/// Score diffing and upload.
pub mod score_sync;
/// Player roster and display tasks.
pub mod session_service;
