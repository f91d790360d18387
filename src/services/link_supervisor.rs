use std::time::Duration;

use tokio::{sync::watch, time::sleep};
use tracing::{error, info, warn};

use crate::{error::RpcError, services::rpc_channel::RpcChannel, state::ShutdownSignal};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Reopen the scoreboard link whenever it drops, backing off between failed attempts.
///
/// Returns `Ok` on shutdown and [`RpcError::Authentication`] once the server rejects our
/// credentials, since retrying cannot fix those.
pub async fn run(channel: RpcChannel, mut shutdown: ShutdownSignal) -> Result<(), RpcError> {
    let mut connected = channel.subscribe_connected();
    let mut delay = INITIAL_DELAY;

    loop {
        tokio::select! {
            _ = shutdown.wait() => return Ok(()),
            _ = wait_until(&mut connected, false) => {}
        }

        if channel
            .close_reason()
            .await
            .is_some_and(|reason| reason.is_auth_failure())
        {
            error!("scoreboard rejected machine credentials; not reconnecting");
            return Err(RpcError::Authentication);
        }

        tokio::select! {
            _ = shutdown.wait() => return Ok(()),
            _ = sleep(delay) => {}
        }

        match channel.connect().await {
            Ok(()) => {
                info!("scoreboard link established");
                delay = INITIAL_DELAY;
            }
            Err(RpcError::Authentication) => {
                error!("scoreboard rejected machine credentials; not reconnecting");
                return Err(RpcError::Authentication);
            }
            Err(RpcError::ChannelClosed) => return Ok(()),
            Err(err) => {
                warn!(error = %err, retry_in = ?delay, "scoreboard connection attempt failed");
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

async fn wait_until(state: &mut watch::Receiver<bool>, wanted: bool) {
    let _ = state.wait_for(|current| *current == wanted).await;
}
