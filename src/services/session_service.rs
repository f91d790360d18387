//! Player login sessions: the four-slot roster and the per-slot display tasks.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde_json::json;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{rpc::MessageEnvelope, rpc::RpcRequest, session::LoginReply},
    error::SessionError,
    services::{display::DisplaySurface, rpc_channel::RpcClient},
    state::{Roster, SLOT_COUNT, Shutdown, SlotPosition},
};

/// Login endpoint; body is `[player_uuid, position]`.
pub const LOGIN_PATH: &str = "/api/v1/login";

/// Result of a successful [`SessionManager::login`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The server accepted the login and the slot is now occupied.
    LoggedIn {
        /// Display name returned by the server.
        name: String,
    },
    /// The slot was already occupied; its display was re-triggered without a server call.
    Redisplayed,
    /// Another login for the slot is still waiting on the server; no call was made.
    InProgress,
}

/// Result of [`SessionManager::schedule_display`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A new display task was spawned.
    Started,
    /// A display task is already running for the slot; nothing was done.
    AlreadyRunning,
    /// Nobody is logged in at the slot.
    Vacant,
    /// The daemon is stopping.
    ShuttingDown,
}

/// Owns the roster and the display tasks; every method is safe to call concurrently.
pub struct SessionManager {
    rpc: Arc<dyn RpcClient>,
    display: Arc<dyn DisplaySurface>,
    roster: Mutex<Roster>,
    display_tasks: Mutex<[Option<JoinHandle<()>>; SLOT_COUNT]>,
    logins_in_flight: [AtomicBool; SLOT_COUNT],
    display_duration: Duration,
    shutdown: Shutdown,
}

/// Marks a slot as having a login call in flight; cleared on drop, including cancellation.
struct LoginReservation<'a> {
    flag: &'a AtomicBool,
}

impl<'a> LoginReservation<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for LoginReservation<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl SessionManager {
    /// Create a manager with an empty roster.
    pub fn new(
        rpc: Arc<dyn RpcClient>,
        display: Arc<dyn DisplaySurface>,
        display_duration: Duration,
        shutdown: Shutdown,
    ) -> Arc<Self> {
        Arc::new(Self {
            rpc,
            display,
            roster: Mutex::new(Roster::new()),
            display_tasks: Mutex::new(Default::default()),
            logins_in_flight: Default::default(),
            display_duration,
            shutdown,
        })
    }

    /// Log `player` in at `position`.
    ///
    /// An occupied slot is only re-displayed; no login call is made for it. At most one
    /// login call per slot is in flight at a time.
    pub async fn login(&self, player: Uuid, position: i64) -> Result<LoginOutcome, SessionError> {
        let slot = SlotPosition::try_from(position)?;

        // Reserve before checking occupancy: a finishing login seats its player before
        // releasing the slot, so this check cannot miss it.
        let Some(_reservation) = LoginReservation::acquire(&self.logins_in_flight[slot.index()])
        else {
            debug!(position = %slot, "login already in flight");
            return Ok(LoginOutcome::InProgress);
        };

        if self.roster.lock().await.is_occupied(slot) {
            debug!(position = %slot, "slot already occupied; re-displaying");
            self.schedule_display(slot).await;
            return Ok(LoginOutcome::Redisplayed);
        }

        let request =
            RpcRequest::post(LOGIN_PATH).with_body(json!([player.to_string(), slot.get()]));
        let response = self.rpc.call(request).await?;
        if !response.is_success() {
            warn!(position = %slot, status = response.status, "login rejected");
            return Err(SessionError::LoginRejected {
                status: response.status,
            });
        }

        let reply: MessageEnvelope<LoginReply> = response
            .json_body()
            .map_err(|err| SessionError::MalformedResponse(err.to_string()))?;
        let name = reply.message.username;
        if name.is_empty() {
            return Err(SessionError::MalformedResponse("empty username".into()));
        }

        let seated = self.roster.lock().await.occupy(slot, name.clone());
        if !seated {
            // The slot was filled while our call was out; show who holds it.
            self.schedule_display(slot).await;
            return Ok(LoginOutcome::Redisplayed);
        }

        info!(position = %slot, player = %name, "player logged in");
        self.schedule_display(slot).await;
        Ok(LoginOutcome::LoggedIn { name })
    }

    /// Clear the slot at `position`, returning who was there.
    pub async fn logout(&self, position: i64) -> Result<Option<String>, SessionError> {
        let slot = SlotPosition::try_from(position)?;
        let previous = self.roster.lock().await.vacate(slot);
        match &previous {
            Some(name) => info!(position = %slot, player = %name, "player logged out"),
            None => debug!(position = %slot, "logout for empty slot"),
        }
        Ok(previous)
    }

    /// Empty every slot.
    pub async fn reset(&self) {
        let mut roster = self.roster.lock().await;
        let cleared = roster.occupied();
        roster.reset();
        info!(cleared, "roster reset for new game");
    }

    /// Snapshot of the roster.
    pub async fn roster(&self) -> Roster {
        self.roster.lock().await.clone()
    }

    /// Whether a display task is running for `position`.
    pub async fn is_displaying(&self, position: SlotPosition) -> bool {
        self.display_tasks.lock().await[position.index()]
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Show the player at `position` for the display duration.
    ///
    /// At most one task runs per slot; a call while one is running is a no-op.
    pub async fn schedule_display(&self, position: SlotPosition) -> ScheduleOutcome {
        if self.shutdown.is_triggered() {
            return ScheduleOutcome::ShuttingDown;
        }

        let mut tasks = self.display_tasks.lock().await;
        let task = &mut tasks[position.index()];
        if task.as_ref().is_some_and(|running| !running.is_finished()) {
            debug!(position = %position, "display already running");
            return ScheduleOutcome::AlreadyRunning;
        }

        let Some(name) = self.roster.lock().await.name(position).map(str::to_owned) else {
            return ScheduleOutcome::Vacant;
        };

        let display = self.display.clone();
        let seconds = countdown_seconds(self.display_duration);
        let mut shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(async move {
            display.show_slot(position, name).await;
            tokio::select! {
                _ = display.run_countdown(seconds, position) => {}
                _ = shutdown.wait() => debug!(position = %position, "countdown cut short"),
            }
            display.hide_slot(position).await;
        }));
        ScheduleOutcome::Started
    }

    /// Forward a server message to the screen.
    pub async fn announce(&self, message: String) {
        info!(message = %message, "server message");
        self.display.show_message(message).await;
    }

    /// Stop scheduling and wait for every display task to hide its slot.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        let handles: Vec<_> = self
            .display_tasks
            .lock()
            .await
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "display task failed");
            }
        }
        debug!("display tasks stopped");
    }
}

/// Whole seconds to count down, rounding partial seconds up.
fn countdown_seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
