//! Screen surface used to show logged-in players.

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tracing::info;

use crate::state::SlotPosition;

/// Renders player slots and server messages on the machine.
///
/// Only the session manager drives a surface.
pub trait DisplaySurface: Send + Sync {
    /// Show `name` in the slot for `position`.
    fn show_slot(&self, position: SlotPosition, name: String) -> BoxFuture<'static, ()>;
    /// Remove the slot for `position` from the screen.
    fn hide_slot(&self, position: SlotPosition) -> BoxFuture<'static, ()>;
    /// Count down `seconds` on the slot for `position`, resolving when it reaches zero.
    fn run_countdown(&self, seconds: u64, position: SlotPosition) -> BoxFuture<'static, ()>;
    /// Show a transient server message.
    fn show_message(&self, message: String) -> BoxFuture<'static, ()>;
}

/// Headless surface that logs what would be drawn.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDisplay;

impl DisplaySurface for TracingDisplay {
    fn show_slot(&self, position: SlotPosition, name: String) -> BoxFuture<'static, ()> {
        async move { info!(position = %position, player = %name, "showing player slot") }.boxed()
    }

    fn hide_slot(&self, position: SlotPosition) -> BoxFuture<'static, ()> {
        async move { info!(position = %position, "hiding player slot") }.boxed()
    }

    fn run_countdown(&self, seconds: u64, position: SlotPosition) -> BoxFuture<'static, ()> {
        async move {
            for remaining in (1..=seconds).rev() {
                tracing::debug!(position = %position, remaining, "slot countdown");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        .boxed()
    }

    fn show_message(&self, message: String) -> BoxFuture<'static, ()> {
        async move { info!(message = %message, "server message") }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn countdown_takes_one_second_per_tick() {
        let started = tokio::time::Instant::now();
        TracingDisplay
            .run_countdown(3, SlotPosition::ALL[0])
            .await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "{elapsed:?}");
    }
}
