//! Per-tab session identity, write stamping, and echo tracking.

use crate::types::{Table, Timestamp};
use crate::{RecordId, TimeProvider};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Where a record's last write came from, relative to this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Written by this session.
    Local,
    /// Written by another tab or process.
    Remote,
}

/// What a session remembers about one of its own writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum EchoMark {
    Write(Timestamp),
    Delete,
}

type EchoKey = (Table, RecordId, EchoMark);

/// Bounded FIFO set of writes this session issued and has not yet seen echoed.
#[derive(Debug)]
struct EchoRegistry {
    entries: HashSet<EchoKey>,
    order: VecDeque<EchoKey>,
    capacity: usize,
}

impl EchoRegistry {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn insert(&mut self, key: EchoKey) {
        if self.capacity == 0 || !self.entries.insert(key) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    fn take(&mut self, key: &EchoKey) -> bool {
        if self.entries.remove(key) {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }
}

/// Identity of one open tab/process.
///
/// The id is generated once and stamped as `updatedBy` on every write the
/// session issues. Timestamps from one session are strictly increasing.
pub struct Session {
    id: String,
    last_stamp: AtomicI64,
    echoes: Mutex<EchoRegistry>,
    time_provider: Option<Arc<dyn TimeProvider>>,
}

impl Session {
    /// Default number of remembered writes.
    pub const DEFAULT_ECHO_CAPACITY: usize = 4096;

    /// Creates a session with a fresh random id.
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    /// Creates a session with a caller-chosen id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            last_stamp: AtomicI64::new(0),
            echoes: Mutex::new(EchoRegistry::new(Self::DEFAULT_ECHO_CAPACITY)),
            time_provider: None,
        }
    }

    /// Sets a custom time provider for testing.
    pub fn with_time_provider(mut self, provider: impl TimeProvider + 'static) -> Self {
        self.time_provider = Some(Arc::new(provider));
        self
    }

    /// Sets how many of its own writes the session remembers.
    pub fn with_echo_capacity(self, capacity: usize) -> Self {
        {
            let mut echoes = self.echoes.lock().unwrap_or_else(|e| e.into_inner());
            *echoes = EchoRegistry::new(capacity);
        }
        self
    }

    /// Returns the session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns a timestamp strictly greater than any previous one from this
    /// session.
    pub fn stamp(&self) -> Timestamp {
        let now = self.wall_clock();
        let mut prev = self.last_stamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_stamp
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Classifies a record by comparing its `updatedBy` to this session.
    pub fn classify(&self, updated_by: &str) -> Origin {
        if updated_by == self.id {
            Origin::Local
        } else {
            Origin::Remote
        }
    }

    pub(crate) fn record_echo(&self, table: Table, key: RecordId, mark: EchoMark) {
        let mut echoes = self.echoes.lock().unwrap_or_else(|e| e.into_inner());
        echoes.insert((table, key, mark));
    }

    /// Consumes a remembered write. Returns true if this write was issued by
    /// the session and had not been echoed yet.
    pub(crate) fn take_echo(&self, table: Table, key: RecordId, mark: EchoMark) -> bool {
        let mut echoes = self.echoes.lock().unwrap_or_else(|e| e.into_inner());
        echoes.take(&(table, key, mark))
    }

    fn wall_clock(&self) -> Timestamp {
        if let Some(ref provider) = self.time_provider {
            provider.now()
        } else {
            current_timestamp_millis()
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the current Unix timestamp in milliseconds.
pub(crate) fn current_timestamp_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

// Manual Debug implementation to skip time_provider field
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("last_stamp", &self.last_stamp.load(Ordering::SeqCst))
            .finish()
    }
}
