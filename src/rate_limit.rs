//! Fixed-window rate limiting.
//!
//! The governor counts requests per client identity inside a fixed window.
//! Counting happens before the verdict: the request that pushes the counter
//! past capacity is itself recorded and rejected, and every further request
//! in the window keeps incrementing the counter.
//!
//! Storage sits behind [`CounterStore`] so the window arithmetic in
//! [`advance_window`] never depends on where records live.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::observability::{RATE_LIMIT_ALLOWED, RATE_LIMIT_REJECTED, RATE_LIMIT_STORE_ERRORS};

/// Default capacity per window.
pub const DEFAULT_CAPACITY: u64 = 100;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// File name prefix for durable counter records.
const FILE_PREFIX: &str = "chat_rate_limit_";
/// Number of lock stripes guarding file records.
const LOCK_STRIPES: usize = 64;

/// Count of requests seen inside the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCounterRecord {
    /// Unix timestamp (seconds) at which the window opened.
    pub window_start: i64,
    /// Requests counted in the window, including rejected ones.
    pub count: u64,
}

/// Source of the current time, in unix seconds.
pub trait Clock: Send + Sync {
    /// Seconds since the unix epoch.
    fn now(&self) -> i64;
}

/// Wall clock backed by `time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }
}

/// Storage for counter records.
///
/// `update` is the only operation: it runs `f` on the current record for
/// `key` (or `None` when there is none) and persists the result, all inside
/// one exclusive section per key so that simultaneous requests from the same
/// identity never lose an increment.
pub trait CounterStore: Send + Sync {
    /// Atomically replaces the record for `key` with `f(current)`.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<RateCounterRecord>) -> RateCounterRecord,
    ) -> Result<RateCounterRecord>;
}

/// Process-local store, used in tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    records: Mutex<HashMap<String, RateCounterRecord>>,
}

impl MemoryCounterStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<RateCounterRecord>) -> RateCounterRecord,
    ) -> Result<RateCounterRecord> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| Error::io("counter store lock poisoned", ErrorKind::Other.into()))?;
        let record = f(records.get(key).copied());
        records.insert(key.to_string(), record);
        Ok(record)
    }
}

/// Durable store keeping one small text file per identity.
///
/// Each file holds `<window_start>:<count>`. Files are never deleted; a
/// stale record simply resets on its next use. Keys share a fixed set of
/// lock stripes, so memory stays bounded however many identities call.
#[derive(Debug)]
pub struct FileCounterStore {
    dir: PathBuf,
    locks: [Mutex<()>; LOCK_STRIPES],
}

impl FileCounterStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| {
            Error::io(
                format!("failed to create rate limit directory {}", dir.display()),
                err,
            )
        })?;
        Ok(Self {
            dir,
            locks: std::array::from_fn(|_| Mutex::new(())),
        })
    }

    /// Directory the records live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{key}.txt"))
    }

    fn lock_for(&self, key: &str) -> &Mutex<()> {
        &self.locks[stripe(key)]
    }

    fn read(&self, path: &Path) -> Result<Option<RateCounterRecord>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::io("failed to read rate limit record", err)),
        };
        // An unreadable record counts as no record; it resets on write.
        Ok(parse_record(&contents))
    }
}

impl CounterStore for FileCounterStore {
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<RateCounterRecord>) -> RateCounterRecord,
    ) -> Result<RateCounterRecord> {
        let _guard = self
            .lock_for(key)
            .lock()
            .map_err(|_| Error::io("counter record lock poisoned", ErrorKind::Other.into()))?;

        let path = self.path_for(key);
        let record = f(self.read(&path)?);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, format!("{}:{}", record.window_start, record.count))
            .map_err(|err| Error::io("failed to write rate limit record", err))?;
        fs::rename(&tmp, &path)
            .map_err(|err| Error::io("failed to replace rate limit record", err))?;
        Ok(record)
    }
}

fn stripe(key: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % LOCK_STRIPES as u64) as usize
}

fn parse_record(contents: &str) -> Option<RateCounterRecord> {
    let (start, count) = contents.trim().split_once(':')?;
    Some(RateCounterRecord {
        window_start: start.parse().ok()?,
        count: count.parse().ok()?,
    })
}

/// Opens a new window when the current one has expired, then counts one request.
///
/// A window expires when strictly more than `window` seconds have passed
/// since it opened.
pub fn advance_window(
    record: Option<RateCounterRecord>,
    now: i64,
    window: Duration,
) -> RateCounterRecord {
    let window = window.as_secs() as i64;
    let mut record = record.unwrap_or(RateCounterRecord {
        window_start: 0,
        count: 0,
    });
    if now - record.window_start > window {
        record = RateCounterRecord {
            window_start: now,
            count: 0,
        };
    }
    record.count = record.count.saturating_add(1);
    record
}

/// One-way hash of a client identity, hex encoded.
pub fn identity_key(identity: &str) -> String {
    hex::encode(Sha256::digest(identity.as_bytes()))
}

/// Fixed-window request governor.
pub struct RateGovernor {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    capacity: u64,
    window: Duration,
}

impl RateGovernor {
    /// Creates a governor allowing `capacity` requests per `window`.
    pub fn new(store: Arc<dyn CounterStore>, capacity: u64, window: Duration) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            capacity,
            window,
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Requests allowed per window.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Counts a request from `identity` and reports whether it is allowed.
    ///
    /// This always increments, including for requests it rejects.
    pub fn allow(&self, identity: &str) -> Result<bool> {
        let key = identity_key(identity);
        let now = self.clock.now();
        let window = self.window;
        let record = self
            .store
            .update(&key, &mut |current| advance_window(current, now, window))
            .inspect_err(|err| {
                RATE_LIMIT_STORE_ERRORS.click();
                tracing::warn!(error = %err, "rate limit store failed");
            })?;
        let allowed = record.count <= self.capacity;
        if allowed {
            RATE_LIMIT_ALLOWED.click();
        } else {
            RATE_LIMIT_REJECTED.click();
            tracing::debug!(key = %key, count = record.count, "rate limit exceeded");
        }
        Ok(allowed)
    }

    /// Like [`RateGovernor::allow`], but turns a rejection into an error.
    pub fn check(&self, identity: &str) -> Result<()> {
        if self.allow(identity)? {
            Ok(())
        } else {
            Err(Error::rate_limit(
                "Too many requests. Please try again later.",
                Some(self.window.as_secs()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::thread;

    struct FakeClock(AtomicI64);

    impl FakeClock {
        fn at(now: i64) -> Arc<Self> {
            Arc::new(Self(AtomicI64::new(now)))
        }

        fn advance(&self, secs: i64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn governor(capacity: u64, window: u64, clock: Arc<FakeClock>) -> RateGovernor {
        RateGovernor::new(
            Arc::new(MemoryCounterStore::new()),
            capacity,
            Duration::from_secs(window),
        )
        .with_clock(clock)
    }

    #[test]
    fn n_allowed_then_rejected() {
        let clock = FakeClock::at(1_000_000);
        let governor = governor(3, 60, clock.clone());
        for _ in 0..3 {
            assert!(governor.allow("10.0.0.1").unwrap());
        }
        assert!(!governor.allow("10.0.0.1").unwrap());
        assert!(!governor.allow("10.0.0.1").unwrap());
    }

    #[test]
    fn identities_are_independent() {
        let clock = FakeClock::at(1_000_000);
        let governor = governor(1, 60, clock);
        assert!(governor.allow("a").unwrap());
        assert!(governor.allow("b").unwrap());
        assert!(!governor.allow("a").unwrap());
    }

    #[test]
    fn window_expiry_resets_count_to_one() {
        let clock = FakeClock::at(1_000_000);
        let store = Arc::new(MemoryCounterStore::new());
        let governor = RateGovernor::new(store.clone(), 2, Duration::from_secs(60))
            .with_clock(clock.clone());
        for _ in 0..5 {
            governor.allow("x").unwrap();
        }
        assert!(!governor.allow("x").unwrap());

        // Exactly `window` seconds later the window is still open.
        clock.advance(60);
        assert!(!governor.allow("x").unwrap());

        clock.advance(1);
        assert!(governor.allow("x").unwrap());
        let record = store
            .update(&identity_key("x"), &mut |current| current.unwrap())
            .unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, 1_000_061);
    }

    #[test]
    fn check_reports_rate_limit_error() {
        let governor = governor(0, 60, FakeClock::at(5_000));
        let err = governor.check("x").unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(err.http_status(), 429);
    }

    #[test]
    fn advance_window_fresh_record() {
        let record = advance_window(None, 10_000, Duration::from_secs(3600));
        assert_eq!(
            record,
            RateCounterRecord {
                window_start: 10_000,
                count: 1
            }
        );
    }

    #[test]
    fn identity_is_hashed() {
        let key = identity_key("192.168.1.20");
        assert_eq!(key.len(), 64);
        assert!(!key.contains("192"));
        assert_eq!(key, identity_key("192.168.1.20"));
        assert_eq!(
            identity_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn lock_stripes_are_bounded_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCounterStore::new(dir.path()).unwrap();
        for n in 0..1_000 {
            let key = identity_key(&format!("10.0.{}.{}", n / 256, n % 256));
            assert!(stripe(&key) < LOCK_STRIPES);
            assert!(std::ptr::eq(store.lock_for(&key), store.lock_for(&key)));
        }
        assert_eq!(store.locks.len(), LOCK_STRIPES);
    }

    #[test]
    fn file_store_persists_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FakeClock::at(42_000);
        {
            let store = Arc::new(FileCounterStore::new(dir.path()).unwrap());
            let governor =
                RateGovernor::new(store, 2, Duration::from_secs(60)).with_clock(clock.clone());
            assert!(governor.allow("client").unwrap());
            assert!(governor.allow("client").unwrap());
        }
        let store = Arc::new(FileCounterStore::new(dir.path()).unwrap());
        let governor = RateGovernor::new(store, 2, Duration::from_secs(60)).with_clock(clock);
        assert!(!governor.allow("client").unwrap());

        let path = dir
            .path()
            .join(format!("{FILE_PREFIX}{}.txt", identity_key("client")));
        assert_eq!(fs::read_to_string(path).unwrap(), "42000:3");
    }

    #[test]
    fn file_store_treats_garbage_as_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCounterStore::new(dir.path()).unwrap();
        fs::write(store.path_for("k"), "not a record").unwrap();
        let record = store
            .update("k", &mut |current| advance_window(current, 100, DEFAULT_WINDOW))
            .unwrap();
        assert_eq!(record.count, 1);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CounterStore> = Arc::new(FileCounterStore::new(dir.path()).unwrap());
        let governor = Arc::new(
            RateGovernor::new(store.clone(), 1_000, Duration::from_secs(60))
                .with_clock(FakeClock::at(7_000)),
        );
        let handles = (0..8)
            .map(|_| {
                let governor = Arc::clone(&governor);
                thread::spawn(move || {
                    for _ in 0..25 {
                        governor.allow("shared").unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        let record = store
            .update(&identity_key("shared"), &mut |current| current.unwrap())
            .unwrap();
        assert_eq!(record.count, 200);
    }
}
