//! Server command table and the built-in command handlers.

use std::{collections::HashMap, sync::Arc};

use futures::future::{BoxFuture, FutureExt};
use tracing::{error, info, warn};

use crate::{
    dao::identity::{IdentityStore, MachineIdentity},
    dto::{
        commands::{LogoutCommand, MessageCommand, TokenRotateCommand},
        rpc::ServerCommand,
    },
    services::{
        rpc_channel::{RpcChannel, WeakRpcChannel},
        session_service::SessionManager,
    },
};

/// Boxed async handler invoked with the full command frame.
pub type CommandHandler = Box<dyn Fn(ServerCommand) -> BoxFuture<'static, ()> + Send + Sync>;

/// Command name to handler mapping, built once at startup.
#[derive(Default)]
pub struct CommandTable {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`, replacing any previous handler.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(ServerCommand) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    /// Handler registered for `name`.
    pub fn get(&self, name: &str) -> Option<&CommandHandler> {
        self.handlers.get(name)
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no command is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Build the `logout`, `message` and `token_rotate` handlers.
pub fn builtin_commands(
    channel: &RpcChannel,
    session: Arc<SessionManager>,
    store: IdentityStore,
) -> CommandTable {
    let mut table = CommandTable::new();

    let logout_session = session.clone();
    table.register("logout", move |command| {
        let session = logout_session.clone();
        async move {
            match command.payload_as::<LogoutCommand>() {
                Ok(LogoutCommand { position }) => {
                    if let Err(err) = session.logout(position).await {
                        warn!(error = %err, "logout command ignored");
                    }
                }
                Err(err) => warn!(error = %err, "malformed logout command"),
            }
        }
        .boxed()
    });

    table.register("message", move |command| {
        let session = session.clone();
        async move {
            match command.payload_as::<MessageCommand>() {
                Ok(MessageCommand { message }) => session.announce(message).await,
                Err(err) => warn!(error = %err, "malformed message command"),
            }
        }
        .boxed()
    });

    let weak = channel.downgrade();
    table.register("token_rotate", move |command| {
        rotate_token(weak.clone(), store.clone(), command).boxed()
    });

    table
}

async fn rotate_token(channel: WeakRpcChannel, store: IdentityStore, command: ServerCommand) {
    let TokenRotateCommand { token } = match command.payload_as::<TokenRotateCommand>() {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "malformed token_rotate command");
            return;
        }
    };
    let identity = match MachineIdentity::from_parts(&command.uuid, token) {
        Ok(identity) => identity,
        Err(err) => {
            warn!(error = %err, "token_rotate carried an unusable identity");
            return;
        }
    };
    let Some(channel) = channel.upgrade() else {
        return;
    };

    info!(uuid = %identity.uuid, "rotating machine token");
    if let Err(err) = store.save(&identity) {
        error!(error = %err, "failed to persist rotated token; keeping current session");
        return;
    }
    channel.set_identity(identity).await;
    channel.schedule_reconnect().await;
}
