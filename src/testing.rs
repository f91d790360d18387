//! In-memory collaborators shared by the unit tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    dto::rpc::{RpcRequest, RpcResponse},
    error::RpcError,
    services::{display::DisplaySurface, rpc_channel::RpcClient},
    state::SlotPosition,
};

pub(crate) const GHOST_LOGIN: &str = r#"{"message":{"username":"ghost42"}}"#;

#[derive(Default)]
struct RpcLog {
    calls: Vec<RpcRequest>,
    sends: Vec<RpcRequest>,
    reply: Option<(u16, String)>,
    fail_sends: bool,
}

/// Records every request and answers calls with a canned response.
#[derive(Clone)]
pub(crate) struct FakeRpc {
    log: Arc<Mutex<RpcLog>>,
    gate: Arc<watch::Sender<bool>>,
}

impl FakeRpc {
    /// Answers every call with a successful `ghost42` login.
    pub(crate) fn new() -> Self {
        let (gate, _) = watch::channel(true);
        let fake = Self {
            log: Arc::default(),
            gate: Arc::new(gate),
        };
        fake.reply_with(200, GHOST_LOGIN);
        fake
    }

    /// Keep calls pending until [`FakeRpc::release_calls`].
    pub(crate) fn hold_calls(&self) {
        self.gate.send_replace(false);
    }

    pub(crate) fn release_calls(&self) {
        self.gate.send_replace(true);
    }

    pub(crate) fn reply_with(&self, status: u16, body: &str) {
        self.log.lock().unwrap().reply = Some((status, body.to_owned()));
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.log.lock().unwrap().fail_sends = fail;
    }

    pub(crate) fn calls(&self) -> Vec<RpcRequest> {
        self.log.lock().unwrap().calls.clone()
    }

    pub(crate) fn sends(&self) -> Vec<RpcRequest> {
        self.log.lock().unwrap().sends.clone()
    }
}

impl RpcClient for FakeRpc {
    fn call(&self, request: RpcRequest) -> BoxFuture<'static, Result<RpcResponse, RpcError>> {
        let mut log = self.log.lock().unwrap();
        log.calls.push(request);
        let result = match log.reply.clone() {
            Some((status, body)) => Ok(RpcResponse {
                status,
                body,
                request_id: Uuid::new_v4(),
            }),
            None => Err(RpcError::Disconnected),
        };
        let mut gate = self.gate.subscribe();
        async move {
            let _ = gate.wait_for(|open| *open).await;
            result
        }
        .boxed()
    }

    fn send(&self, request: RpcRequest) -> BoxFuture<'static, Result<(), RpcError>> {
        let mut log = self.log.lock().unwrap();
        let result = if log.fail_sends {
            Err(RpcError::Disconnected)
        } else {
            log.sends.push(request);
            Ok(())
        };
        async move { result }.boxed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DisplayEvent {
    Show(u8, String),
    Hide(u8),
    Countdown(u8, u64),
    Message(String),
}

/// Records display calls; countdowns block until [`FakeDisplay::release`].
#[derive(Clone)]
pub(crate) struct FakeDisplay {
    events: Arc<Mutex<Vec<DisplayEvent>>>,
    release: Arc<watch::Sender<bool>>,
}

impl FakeDisplay {
    pub(crate) fn new() -> Self {
        let (release, _) = watch::channel(false);
        Self {
            events: Arc::default(),
            release: Arc::new(release),
        }
    }

    pub(crate) fn events(&self) -> Vec<DisplayEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, wanted: impl Fn(&DisplayEvent) -> bool) -> usize {
        self.events().iter().filter(|&event| wanted(event)).count()
    }

    /// Let every running and future countdown finish.
    pub(crate) fn release(&self) {
        self.release.send_replace(true);
    }

    fn record(&self, event: DisplayEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl DisplaySurface for FakeDisplay {
    fn show_slot(&self, position: SlotPosition, name: String) -> BoxFuture<'static, ()> {
        self.record(DisplayEvent::Show(position.get(), name));
        async {}.boxed()
    }

    fn hide_slot(&self, position: SlotPosition) -> BoxFuture<'static, ()> {
        self.record(DisplayEvent::Hide(position.get()));
        async {}.boxed()
    }

    fn run_countdown(&self, seconds: u64, position: SlotPosition) -> BoxFuture<'static, ()> {
        self.record(DisplayEvent::Countdown(position.get(), seconds));
        let mut release = self.release.subscribe();
        async move {
            let _ = release.wait_for(|released| *released).await;
        }
        .boxed()
    }

    fn show_message(&self, message: String) -> BoxFuture<'static, ()> {
        self.record(DisplayEvent::Message(message));
        async {}.boxed()
    }
}

/// Poll `check` until it holds, panicking after two seconds.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
