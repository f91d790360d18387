//! QR badge scanner loop feeding player logins.

use std::{future::Future, path::PathBuf, sync::Arc, time::Duration};

use futures::FutureExt;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::DeviceError,
    services::session_service::{LoginOutcome, SessionManager},
    state::{Shutdown, ShutdownSignal, SlotPosition},
};

/// Bytes in one login record: a hyphenated UUID followed by one position digit.
pub const RECORD_LEN: usize = 37;
const UUID_LEN: usize = 36;
/// A partial record idle for longer than this is thrown away.
const PARTIAL_TIMEOUT: Duration = Duration::from_secs(3);
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(250);
const READ_CHUNK: usize = 64;

/// Decoded login badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginRecord {
    /// Player account id.
    pub player: Uuid,
    /// Requested player position.
    pub position: SlotPosition,
}

/// Why a raw record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Records are exactly [`RECORD_LEN`] bytes.
    #[error("record is {0} bytes; expected {RECORD_LEN}")]
    Length(usize),
    /// The first 36 bytes are not a UUID.
    #[error("player id is not a UUID")]
    InvalidUuid,
    /// The trailing byte is not an ASCII digit 1 through 4.
    #[error("position byte {0:#04x} is not 1-4")]
    InvalidPosition(u8),
}

impl LoginRecord {
    /// Decode one raw record.
    pub fn decode(raw: &[u8]) -> Result<Self, RecordError> {
        if raw.len() != RECORD_LEN {
            return Err(RecordError::Length(raw.len()));
        }
        let (id, digit) = raw.split_at(UUID_LEN);
        let player = Uuid::try_parse_ascii(id).map_err(|_| RecordError::InvalidUuid)?;
        let position = match digit[0] {
            byte @ b'1'..=b'4' => SlotPosition::new(i64::from(byte - b'0')),
            _ => None,
        }
        .ok_or(RecordError::InvalidPosition(digit[0]))?;
        Ok(Self { player, position })
    }
}

/// Reassembles fixed-size records from arbitrary read chunks.
#[derive(Debug, Default)]
pub struct RecordFramer {
    buf: Vec<u8>,
    last_byte: Option<Instant>,
}

impl RecordFramer {
    /// Feed `chunk` read at `now`, returning every record it completes.
    ///
    /// CR and LF are ignored. A partial record idle for more than three seconds is dropped first.
    pub fn push(&mut self, chunk: &[u8], now: Instant) -> Vec<Vec<u8>> {
        let stale = self
            .last_byte
            .is_some_and(|last| now.duration_since(last) > PARTIAL_TIMEOUT);
        if stale && !self.buf.is_empty() {
            debug!(bytes = self.buf.len(), "discarding stale partial record");
            self.buf.clear();
        }

        let mut records = Vec::new();
        for &byte in chunk {
            if byte == b'\r' || byte == b'\n' {
                continue;
            }
            self.buf.push(byte);
            if self.buf.len() == RECORD_LEN {
                records.push(std::mem::take(&mut self.buf));
            }
        }
        if !chunk.is_empty() {
            self.last_byte = Some(now);
        }
        records
    }

    /// Drop any partial record.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Bytes of the partial record held so far.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Owns the scanner device and the loop reading it.
pub struct QrIngest {
    device: PathBuf,
    session: Arc<SessionManager>,
    debounce: Duration,
    wake: Shutdown,
    shutdown: Shutdown,
    task: Mutex<Option<JoinHandle<Result<(), DeviceError>>>>,
}

impl QrIngest {
    /// Scanner for `device`. Nothing is opened until [`Self::start`].
    pub fn new(
        device: impl Into<PathBuf>,
        session: Arc<SessionManager>,
        debounce: Duration,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            device: device.into(),
            session,
            debounce,
            wake: Shutdown::new(),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Open the device and spawn the scan loop.
    #[cfg(unix)]
    pub async fn start(&self) -> Result<(), DeviceError> {
        use std::os::unix::fs::OpenOptionsExt;
        use tokio::net::unix::pipe;

        let open_err = |source| DeviceError::Open {
            path: self.device.clone(),
            source,
        };
        let file = std::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.device)
            .map_err(open_err)?;
        let device = pipe::Receiver::from_file_unchecked(file).map_err(open_err)?;

        info!(device = %self.device.display(), "QR scanner started");
        self.start_with(device).await;
        Ok(())
    }

    /// Scanner devices are only supported on Unix.
    #[cfg(not(unix))]
    pub async fn start(&self) -> Result<(), DeviceError> {
        Err(DeviceError::Open {
            path: self.device.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "scanner devices require a Unix host",
            ),
        })
    }

    /// Spawn the scan loop over an already-open reader.
    pub async fn start_with<R>(&self, device: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("QR scanner already started");
            return;
        }
        let scanner = ScanLoop {
            session: self.session.clone(),
            debounce: self.debounce,
            wake: self.wake.subscribe(),
            shutdown: self.shutdown.subscribe(),
        };
        *task = Some(tokio::spawn(scanner.run(device)));
    }

    /// Whether the scan loop is still running.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Wake the loop, wait for it and release the device.
    ///
    /// Returns the loop's own result; safe to call repeatedly or before [`Self::start`].
    pub async fn stop(&self) -> Result<(), DeviceError> {
        self.wake.trigger();
        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "QR scan loop panicked");
                Ok(())
            }
        }
    }
}

struct ScanLoop {
    session: Arc<SessionManager>,
    debounce: Duration,
    wake: ShutdownSignal,
    shutdown: ShutdownSignal,
}

impl ScanLoop {
    async fn run<R>(mut self, mut device: R) -> Result<(), DeviceError>
    where
        R: AsyncRead + Unpin,
    {
        let mut framer = RecordFramer::default();
        let mut buf = [0u8; READ_CHUNK];

        'scan: loop {
            let read = tokio::select! {
                biased;
                _ = self.wake.wait() => break,
                _ = self.shutdown.wait() => break,
                read = device.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    error!("QR scanner device closed");
                    return Err(DeviceError::Closed);
                }
                Ok(n) => {
                    for raw in framer.push(&buf[..n], Instant::now()) {
                        let login = forward(self.session.clone(), raw);
                        let Some(valid) = self.interruptible(login).await else {
                            break 'scan;
                        };
                        if !valid {
                            continue;
                        }
                        if !self.settle(&mut device, &mut framer).await {
                            break 'scan;
                        }
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "QR scanner read failed");
                    if !self.pause(READ_ERROR_BACKOFF).await {
                        break;
                    }
                }
            }
        }

        info!("QR scan loop stopped");
        Ok(())
    }

    /// Debounce after a scan, discarding whatever the scanner sent meanwhile.
    /// Returns `false` when the loop should stop.
    async fn settle<R>(&mut self, device: &mut R, framer: &mut RecordFramer) -> bool
    where
        R: AsyncRead + Unpin,
    {
        if !self.pause(self.debounce).await {
            return false;
        }

        let mut scratch = [0u8; READ_CHUNK];
        let mut discarded = framer.buffered();
        while let Some(Ok(n)) = device.read(&mut scratch).now_or_never() {
            if n == 0 {
                break;
            }
            discarded += n;
        }
        framer.clear();
        if discarded > 0 {
            debug!(discarded, "discarded scanner input received during debounce");
        }
        true
    }

    async fn pause(&mut self, period: Duration) -> bool {
        self.interruptible(sleep(period)).await.is_some()
    }

    /// Run `work` unless the loop is woken or shut down first, which yields `None`.
    async fn interruptible<F: Future>(&mut self, work: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.wake.wait() => None,
            _ = self.shutdown.wait() => None,
            output = work => Some(output),
        }
    }
}

/// Decode and log in one record. Returns whether it was a valid badge.
async fn forward(session: Arc<SessionManager>, raw: Vec<u8>) -> bool {
    let record = match LoginRecord::decode(&raw) {
        Ok(record) => record,
        Err(err) => {
            warn!(error = %err, "discarding malformed QR record");
            return false;
        }
    };

    info!(player = %record.player, position = %record.position, "QR code detected");
    match session
        .login(record.player, i64::from(record.position.get()))
        .await
    {
        Ok(LoginOutcome::LoggedIn { name }) => {
            debug!(player = %name, "QR login complete");
        }
        Ok(LoginOutcome::Redisplayed) => debug!("QR login re-displayed occupied slot"),
        Ok(LoginOutcome::InProgress) => debug!("QR login already in flight for slot"),
        Err(err) => warn!(error = %err, "QR login failed"),
    }
    true
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncWriteExt, DuplexStream, duplex};

    use super::*;
    use crate::testing::{FakeDisplay, FakeRpc, eventually};

    const PLAYER: &str = "11111111-1111-1111-1111-111111111111";

    fn record(player: &str, position: u8) -> Vec<u8> {
        let mut raw = player.as_bytes().to_vec();
        raw.push(b'0' + position);
        raw
    }

    async fn scanner(debounce: Duration) -> (QrIngest, FakeRpc, Arc<SessionManager>, DuplexStream) {
        let rpc = FakeRpc::new();
        let shutdown = Shutdown::new();
        let session = SessionManager::new(
            Arc::new(rpc.clone()),
            Arc::new(FakeDisplay::new()),
            Duration::from_secs(20),
            shutdown.clone(),
        );
        let ingest = QrIngest::new("/dev/null", session.clone(), debounce, shutdown);
        let (device, scanner_end) = duplex(256);
        ingest.start_with(device).await;
        (ingest, rpc, session, scanner_end)
    }

    fn login_positions(rpc: &FakeRpc) -> Vec<serde_json::Value> {
        rpc.calls()
            .into_iter()
            .filter_map(|call| call.body.map(|body| body[1].clone()))
            .collect()
    }

    #[test]
    fn decodes_valid_records() {
        let decoded = LoginRecord::decode(&record(PLAYER, 2)).unwrap();
        assert_eq!(decoded.player, Uuid::parse_str(PLAYER).unwrap());
        assert_eq!(decoded.position.get(), 2);
    }

    #[test]
    fn rejects_bad_records() {
        assert_eq!(
            LoginRecord::decode(b"short"),
            Err(RecordError::Length(5))
        );
        assert_eq!(
            LoginRecord::decode(&record("zzzzzzzz-1111-1111-1111-111111111111", 1)),
            Err(RecordError::InvalidUuid)
        );
        assert_eq!(
            LoginRecord::decode(&record(PLAYER, 5)),
            Err(RecordError::InvalidPosition(b'5'))
        );
        assert_eq!(
            LoginRecord::decode(&record(PLAYER, 0)),
            Err(RecordError::InvalidPosition(b'0'))
        );
    }

    #[test]
    fn framer_skips_line_endings_and_splits_records() {
        let mut framer = RecordFramer::default();
        let now = Instant::now();
        let mut raw = record(PLAYER, 1);
        raw.extend_from_slice(b"\r\n");

        assert!(framer.push(&raw[..20], now).is_empty());
        let records = framer.push(&raw[20..], now);
        assert_eq!(records, vec![record(PLAYER, 1)]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn framer_drops_stale_partial_records() {
        let mut framer = RecordFramer::default();
        let start = Instant::now();
        let raw = record(PLAYER, 3);

        framer.push(&raw[..10], start);
        let late = start + Duration::from_secs(4);
        assert!(framer.push(&raw[..30], late).is_empty());
        assert_eq!(framer.buffered(), 30);

        let records = framer.push(&raw[30..], late + Duration::from_millis(100));
        assert_eq!(records, vec![raw]);
    }

    #[tokio::test]
    async fn scanned_badge_logs_player_in() {
        let (ingest, rpc, session, mut device) = scanner(Duration::from_millis(10)).await;

        let mut raw = record(PLAYER, 2);
        raw.push(b'\n');
        device.write_all(&raw).await.unwrap();

        eventually(|| rpc.calls().len() == 1).await;
        assert_eq!(login_positions(&rpc), vec![serde_json::json!(2)]);

        ingest.stop().await.unwrap();
        session.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_records_do_not_stop_the_loop() {
        let (ingest, rpc, session, mut device) = scanner(Duration::from_millis(10)).await;

        device.write_all(&record("not-a-uuid-at-all-but-36-bytes-long!", 1)).await.unwrap();
        device.write_all(&record(PLAYER, 4)).await.unwrap();

        eventually(|| rpc.calls().len() == 1).await;
        assert_eq!(login_positions(&rpc), vec![serde_json::json!(4)]);
        assert!(ingest.is_running().await);

        ingest.stop().await.unwrap();
        session.shutdown().await;
    }

    #[tokio::test]
    async fn input_during_debounce_is_discarded() {
        let (ingest, rpc, session, mut device) = scanner(Duration::from_millis(100)).await;

        let mut burst = record(PLAYER, 1);
        burst.extend(record(PLAYER, 2));
        device.write_all(&burst).await.unwrap();
        eventually(|| rpc.calls().len() == 1).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        device.write_all(&record(PLAYER, 3)).await.unwrap();
        eventually(|| rpc.calls().len() == 2).await;

        assert_eq!(
            login_positions(&rpc),
            vec![serde_json::json!(1), serde_json::json!(3)]
        );
        ingest.stop().await.unwrap();
        session.shutdown().await;
    }

    #[tokio::test]
    async fn closed_device_is_reported_by_stop() {
        let (ingest, _rpc, session, device) = scanner(Duration::from_millis(10)).await;
        drop(device);

        for _ in 0..200 {
            if !ingest.is_running().await {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(ingest.stop().await, Err(DeviceError::Closed)));
        assert!(ingest.stop().await.is_ok());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn stop_does_not_wait_for_an_in_flight_login() {
        let (ingest, rpc, session, mut device) = scanner(Duration::from_millis(10)).await;
        rpc.hold_calls();

        device.write_all(&record(PLAYER, 1)).await.unwrap();
        eventually(|| rpc.calls().len() == 1).await;

        tokio::time::timeout(Duration::from_secs(1), ingest.stop())
            .await
            .expect("stop returns while the login is pending")
            .unwrap();
        assert!(!ingest.is_running().await);
        assert_eq!(session.roster().await.occupied(), 0);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn stop_before_start_is_harmless() {
        let session = SessionManager::new(
            Arc::new(FakeRpc::new()),
            Arc::new(FakeDisplay::new()),
            Duration::from_secs(20),
            Shutdown::new(),
        );
        let ingest = QrIngest::new("/dev/null", session, Duration::from_secs(1), Shutdown::new());
        assert!(ingest.stop().await.is_ok());
        assert!(ingest.stop().await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_device_fails_to_start() {
        let session = SessionManager::new(
            Arc::new(FakeRpc::new()),
            Arc::new(FakeDisplay::new()),
            Duration::from_secs(20),
            Shutdown::new(),
        );
        let path = std::env::temp_dir().join(format!("ssbd-no-scanner-{}", Uuid::new_v4()));
        let ingest = QrIngest::new(&path, session, Duration::from_secs(1), Shutdown::new());
        assert!(matches!(
            ingest.start().await,
            Err(DeviceError::Open { path: ref p, .. }) if *p == path
        ));
        assert!(!ingest.is_running().await);
    }
}
