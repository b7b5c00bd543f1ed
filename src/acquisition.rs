use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::connector::{ConnectorError, DeviceFamily, SensorConnector};
use crate::sensor_link::{LineSource, LinkError};

/// One timestamped scalar value derived from a single valid record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub timestamp: SystemTime,
    pub value: u32,
}

impl Reading {
    fn now(value: u32) -> Self {
        Self {
            timestamp: SystemTime::now(),
            value,
        }
    }
}

/// Append-only, order-preserving store of readings.
///
/// Cloning yields another handle to the same store. Appends come from the
/// acquisition loop; every other access is a snapshot copy, so no caller
/// ever observes a half-constructed reading.
#[derive(Debug, Clone, Default)]
pub struct ReadingBuffer {
    readings: Arc<Mutex<Vec<Reading>>>,
}

impl ReadingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, reading: Reading) {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reading);
    }

    /// Consistent point-in-time copy of all readings collected so far.
    pub fn snapshot(&self) -> Vec<Reading> {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Recovery budget for read failures other than ordinary timeouts.
///
/// Failures are retried with doubling backoff; the counter resets on any
/// successful read or timeout. Exhausting the budget ends the loop and
/// marks the session [`SessionState::Failed`] instead of spinning forever
/// on a device that never recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_consecutive_failures: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

/// Externally visible state of an [`AcquisitionSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Collecting,
    Failed,
}

/// How an acquisition loop ended, as reported by [`AcquisitionSession::join`].
#[derive(Debug)]
pub enum WorkerExit {
    /// The loop observed the stop request and exited cleanly.
    Stopped,
    /// The retry budget ran out; the link was closed and the session failed.
    Failed(LinkError),
}

#[derive(Debug, Default)]
struct WorkerFlags {
    stop: AtomicBool,
    failed: AtomicBool,
}

struct Worker {
    flags: Arc<WorkerFlags>,
    handle: JoinHandle<WorkerExit>,
}

/// Start/stop state machine owning one link, one buffer and at most one
/// background acquisition loop.
///
/// The session is a plain value owned by the caller; there is no process
/// global behind it. `stop` flips the visible state immediately and lets
/// the loop wind down within one read timeout; callers that need the link
/// provably closed call [`join`](Self::join) afterwards.
pub struct AcquisitionSession {
    source: Option<Box<dyn LineSource>>,
    buffer: ReadingBuffer,
    retry_policy: RetryPolicy,
    worker: Option<Worker>,
    state: SessionState,
}

impl AcquisitionSession {
    /// Create a session around an already opened line source.
    pub fn new(source: impl LineSource + 'static) -> Self {
        Self {
            source: Some(Box::new(source)),
            buffer: ReadingBuffer::new(),
            retry_policy: RetryPolicy::default(),
            worker: None,
            state: SessionState::Idle,
        }
    }

    /// Discover, open and wrap a device of the given family in one call.
    pub fn open(family: DeviceFamily, port: Option<&str>) -> Result<Self, ConnectorError> {
        let link = SensorConnector::connect(family, port)?;
        Ok(Self::new(link))
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Spawn the acquisition loop on the attached link.
    ///
    /// No-op returning `false` while a loop is running or winding down, and
    /// when no link is attached; exactly one loop per link, ever.
    pub fn start(&mut self) -> bool {
        if self.worker.is_some() {
            log::debug!("Acquisition loop already running, ignoring start");
            return false;
        }
        let Some(source) = self.source.take() else {
            log::debug!("No link attached, ignoring start");
            return false;
        };

        let flags = Arc::new(WorkerFlags::default());
        let buffer = self.buffer.clone();
        let retry_policy = self.retry_policy;
        let handle = thread::spawn({
            let flags = Arc::clone(&flags);
            move || acquisition_loop(source, &buffer, retry_policy, &flags)
        });

        self.worker = Some(Worker { flags, handle });
        self.state = SessionState::Collecting;
        true
    }

    /// Request the loop to stop; no-op returning `false` when not collecting.
    ///
    /// The visible state becomes [`SessionState::Idle`] immediately; the
    /// loop itself exits within one read timeout and closes the link.
    pub fn stop(&mut self) -> bool {
        if self.state != SessionState::Collecting {
            return false;
        }
        if let Some(worker) = &self.worker {
            worker.flags.stop.store(true, Ordering::Release);
        }
        self.state = SessionState::Idle;
        true
    }

    /// Block until the loop has exited and report how it ended.
    ///
    /// Requests a stop if none is pending, so `join` alone also shuts the
    /// session down. Returns `None` when no loop was ever started. After
    /// `join` returns, the link is closed and a fresh one may be attached.
    pub fn join(&mut self) -> Option<WorkerExit> {
        let worker = self.worker.take()?;
        worker.flags.stop.store(true, Ordering::Release);

        let exit = match worker.handle.join() {
            Ok(exit) => exit,
            Err(_) => WorkerExit::Failed(LinkError::Io(std::io::Error::other(
                "acquisition thread panicked",
            ))),
        };
        self.state = match exit {
            WorkerExit::Stopped => SessionState::Idle,
            WorkerExit::Failed(_) => SessionState::Failed,
        };
        Some(exit)
    }

    /// Attach a freshly opened link for a new acquisition run.
    ///
    /// Refused while a previous loop has not been joined; the old link may
    /// still be in use over there.
    pub fn attach(&mut self, source: impl LineSource + 'static) -> bool {
        if self.worker.is_some() {
            log::debug!("Previous acquisition loop not joined yet, ignoring attach");
            return false;
        }
        self.source = Some(Box::new(source));
        self.state = SessionState::Idle;
        true
    }

    pub fn state(&self) -> SessionState {
        if self.state == SessionState::Collecting {
            if let Some(worker) = &self.worker {
                if worker.flags.failed.load(Ordering::Acquire) {
                    return SessionState::Failed;
                }
            }
        }
        self.state
    }

    /// Another handle to the session's buffer, for concurrent consumers.
    pub fn buffer(&self) -> ReadingBuffer {
        self.buffer.clone()
    }

    pub fn snapshot(&self) -> Vec<Reading> {
        self.buffer.snapshot()
    }
}

fn acquisition_loop(
    mut source: Box<dyn LineSource>,
    buffer: &ReadingBuffer,
    retry_policy: RetryPolicy,
    flags: &WorkerFlags,
) -> WorkerExit {
    let mut consecutive_failures = 0u32;
    let mut backoff = retry_policy.initial_backoff;

    let exit = loop {
        if flags.stop.load(Ordering::Acquire) {
            log::debug!("Stop requested, ending acquisition");
            break WorkerExit::Stopped;
        }

        match source.read_line() {
            Ok(Some(line)) => {
                consecutive_failures = 0;
                backoff = retry_policy.initial_backoff;
                match parse_reading(&line) {
                    Some(value) => buffer.append(Reading::now(value)),
                    None => log::debug!(
                        "Discarding malformed record {:?}",
                        String::from_utf8_lossy(&line)
                    ),
                }
            }
            Ok(None) => {
                // Bounded-read timeout; loop back to poll the stop flag.
                consecutive_failures = 0;
                backoff = retry_policy.initial_backoff;
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures >= retry_policy.max_consecutive_failures {
                    log::warn!(
                        "Giving up after {consecutive_failures} consecutive read failures: {e}"
                    );
                    flags.failed.store(true, Ordering::Release);
                    break WorkerExit::Failed(e);
                }
                log::debug!("Read failed ({e}), retrying in {backoff:?}");
                thread::sleep(backoff);
                backoff = (backoff * 2).min(retry_policy.max_backoff);
            }
        }
    };

    // Close the link before the exit becomes observable through join.
    drop(source);
    exit
}

/// Parse one record into a reading value: trimmed, non-empty, decimal
/// digits only. Anything else is discarded by the caller.
fn parse_reading(line: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(line).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    enum Step {
        Line(&'static [u8]),
        Fail,
    }

    /// Line source that replays a script, then times out forever.
    /// Counts drops so tests can assert the loop closes it exactly once.
    struct ScriptedSource {
        steps: VecDeque<Step>,
        closed: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> (Self, Arc<AtomicUsize>) {
            let closed = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    steps: steps.into(),
                    closed: Arc::clone(&closed),
                },
                closed,
            )
        }
    }

    impl LineSource for ScriptedSource {
        fn read_line(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
            match self.steps.pop_front() {
                Some(Step::Line(line)) => Ok(Some(line.to_vec())),
                Some(Step::Fail) => Err(LinkError::Io(std::io::Error::other("device gone"))),
                None => {
                    thread::sleep(Duration::from_millis(2));
                    Ok(None)
                }
            }
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_retries() -> RetryPolicy {
        RetryPolicy {
            max_consecutive_failures: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_parse_reading() {
        assert_eq!(parse_reading(b"21"), Some(21));
        assert_eq!(parse_reading(b"  42 \r"), Some(42));
        assert_eq!(parse_reading(b"0"), Some(0));

        assert_eq!(parse_reading(b"abc"), None);
        assert_eq!(parse_reading(b"-5"), None);
        assert_eq!(parse_reading(b""), None);
        assert_eq!(parse_reading(b"   "), None);
        assert_eq!(parse_reading(b"4 2"), None);
        assert_eq!(parse_reading(b"21.5"), None);
        assert_eq!(parse_reading(b"99999999999999999999"), None);
        assert_eq!(parse_reading(&[0xff, 0xfe]), None);
    }

    #[test]
    fn test_buffer_snapshot_is_independent_copy() {
        let buffer = ReadingBuffer::new();
        buffer.append(Reading::now(1));
        buffer.append(Reading::now(2));

        let snapshot = buffer.snapshot();
        buffer.append(Reading::now(3));

        assert_eq!(snapshot.iter().map(|r| r.value).collect::<Vec<_>>(), [1, 2]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_valid_lines_become_readings_in_order() {
        let (source, closed) = ScriptedSource::new(vec![
            Step::Line(b"21"),
            Step::Line(b"notanumber"),
            Step::Line(b"22"),
        ]);
        let mut session = AcquisitionSession::new(source);

        assert!(session.start());
        assert_eq!(session.state(), SessionState::Collecting);
        assert!(wait_until(|| session.buffer().len() == 2));

        assert!(session.stop());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(matches!(session.join(), Some(WorkerExit::Stopped)));

        let readings = session.snapshot();
        assert_eq!(readings.iter().map(|r| r.value).collect::<Vec<_>>(), [21, 22]);
        assert!(readings.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_start_does_not_spawn_second_loop() {
        let (source, _closed) =
            ScriptedSource::new(vec![Step::Line(b"1"), Step::Line(b"2"), Step::Line(b"3")]);
        let mut session = AcquisitionSession::new(source);

        assert!(session.start());
        assert!(!session.start());
        assert!(wait_until(|| session.buffer().len() == 3));

        session.stop();
        session.join();
        assert_eq!(session.snapshot().len(), 3);
    }

    #[test]
    fn test_stop_and_start_without_link_are_noops() {
        let (source, _closed) = ScriptedSource::new(vec![]);
        let mut session = AcquisitionSession::new(source);

        assert!(!session.stop());
        assert_eq!(session.state(), SessionState::Idle);

        session.start();
        session.stop();
        session.join();

        // Link was consumed by the first run; nothing left to start on.
        assert!(!session.start());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_exhausted_retry_budget_fails_session() {
        let (source, closed) =
            ScriptedSource::new(vec![Step::Fail, Step::Fail, Step::Fail, Step::Fail]);
        let mut session = AcquisitionSession::new(source).with_retry_policy(fast_retries());

        assert!(session.start());
        assert!(wait_until(|| session.state() == SessionState::Failed));

        match session.join() {
            Some(WorkerExit::Failed(LinkError::Io(_))) => {}
            other => panic!("Expected failed exit, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transient_failures_recover_within_budget() {
        let (source, _closed) = ScriptedSource::new(vec![
            Step::Line(b"7"),
            Step::Fail,
            Step::Fail,
            Step::Line(b"8"),
        ]);
        let mut session = AcquisitionSession::new(source).with_retry_policy(fast_retries());

        session.start();
        assert!(wait_until(|| session.buffer().len() == 2));
        assert_eq!(session.state(), SessionState::Collecting);

        session.stop();
        assert!(matches!(session.join(), Some(WorkerExit::Stopped)));
        assert_eq!(
            session.snapshot().iter().map(|r| r.value).collect::<Vec<_>>(),
            [7, 8]
        );
    }

    #[test]
    fn test_restart_on_fresh_link_after_join() {
        let (first, first_closed) = ScriptedSource::new(vec![Step::Line(b"1")]);
        let mut session = AcquisitionSession::new(first);

        session.start();
        assert!(wait_until(|| session.buffer().len() == 1));
        session.stop();
        session.join();
        assert_eq!(first_closed.load(Ordering::SeqCst), 1);

        let (second, second_closed) = ScriptedSource::new(vec![Step::Line(b"2")]);
        assert!(session.attach(second));
        assert!(session.start());
        assert!(wait_until(|| session.buffer().len() == 2));
        session.stop();
        assert!(matches!(session.join(), Some(WorkerExit::Stopped)));

        assert_eq!(
            session.snapshot().iter().map(|r| r.value).collect::<Vec<_>>(),
            [1, 2]
        );
        assert_eq!(first_closed.load(Ordering::SeqCst), 1);
        assert_eq!(second_closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_attach_refused_while_loop_not_joined() {
        let (first, _c1) = ScriptedSource::new(vec![]);
        let (second, _c2) = ScriptedSource::new(vec![]);
        let mut session = AcquisitionSession::new(first);

        session.start();
        assert!(!session.attach(second));

        session.stop();
        session.join();
    }

    #[test]
    fn test_concurrent_snapshots_see_prefixes_only() {
        const TOTAL: u32 = 1000;
        let buffer = ReadingBuffer::new();

        let writer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for value in 0..TOTAL {
                    buffer.append(Reading::now(value));
                }
            })
        };

        loop {
            let snapshot = buffer.snapshot();
            for (i, reading) in snapshot.iter().enumerate() {
                assert_eq!(reading.value, i as u32);
            }
            if snapshot.len() == TOTAL as usize {
                break;
            }
        }
        writer.join().expect("writer thread panicked");
        assert_eq!(buffer.len(), TOTAL as usize);
    }
}
