//! Hybrid Logical Clock timestamps.
//!
//! A [`Timestamp`] combines wall-clock milliseconds, a per-millisecond counter
//! and the generating node's identifier. Timestamps are totally ordered by
//! `(millis, counter, node)` and their canonical string form sorts the same way
//! under plain byte comparison, which is what the Merkle tree and the message
//! log key on.
//!
//! Two operations advance a clock:
//! - [`Timestamp::send`] for a local event
//! - [`Timestamp::receive`] when a remote timestamp is observed
//!
//! Both refuse to produce a timestamp that runs further ahead of the wall
//! clock than the configured drift, overflows the counter, or falls outside
//! the representable time range.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Width of a time bucket, in milliseconds (one minute).
pub const BUCKET_MILLIS: u64 = 60_000;

/// Exclusive upper bound on representable millis: 16^8 minute buckets.
pub const MILLIS_LIMIT: u64 = (1u64 << 32) * BUCKET_MILLIS;

/// Default tolerated distance between a generated timestamp and the wall clock.
pub const DEFAULT_MAX_DRIFT_MS: u64 = 5 * 60 * 1000;

/// Length of the canonical string encoding.
pub const TIMESTAMP_STRING_LEN: usize = 12 + 1 + 4 + 1 + 32;

/// Errors raised while generating or merging timestamps.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("timestamp drift: next {next} is ahead of now {now} by more than {max_drift}ms")]
    Drift { next: u64, now: u64, max_drift: u64 },

    #[error("timestamp counter overflow")]
    CounterOverflow,

    #[error("time out of range: {millis}")]
    TimeOutOfRange { millis: u64 },

    #[error("invalid timestamp string: {0}")]
    Parse(String),
}

/// Identifier of the node (device) that generated a timestamp.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId([u8; 16]);

impl NodeId {
    /// The all-zero node, used for range lower bounds.
    pub const ZERO: NodeId = NodeId([0u8; 16]);

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Generate a random node identifier.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 || !s.bytes().all(is_lower_hex) {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).ok()?;
            bytes[i] = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(NodeId(bytes))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeId::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid node id"))
    }
}

/// Clock settings shared by `send` and `receive`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockConfig {
    /// Maximum number of milliseconds a timestamp may run ahead of the wall clock.
    pub max_drift_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            max_drift_ms: DEFAULT_MAX_DRIFT_MS,
        }
    }
}

/// A hybrid logical clock value.
///
/// Field order matters: the derived `Ord` compares `millis`, then `counter`,
/// then `node`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    pub millis: u64,
    pub counter: u16,
    pub node: NodeId,
}

impl Timestamp {
    pub fn new(millis: u64, counter: u16, node: NodeId) -> Self {
        Self {
            millis,
            counter,
            node,
        }
    }

    /// The starting clock value for a freshly created replica.
    pub fn initial(node: NodeId) -> Self {
        Self::new(0, 0, node)
    }

    /// Smallest timestamp at the given millisecond, used to read the log from
    /// a point of divergence onward.
    pub fn lower_bound(millis: u64) -> Self {
        Self::new(millis, 0, NodeId::ZERO)
    }

    /// Advance the clock for a local event observed at wall-clock `now`.
    pub fn send(&self, now: u64, config: &ClockConfig) -> Result<Timestamp, TimestampError> {
        check_range(now)?;

        let millis = now.max(self.millis);
        let counter = if millis == self.millis {
            increment(self.counter)?
        } else {
            0
        };

        check_drift(millis, now, config)?;
        Ok(Timestamp::new(millis, counter, self.node))
    }

    /// Merge an observed remote timestamp into the local clock.
    pub fn receive(
        &self,
        remote: &Timestamp,
        now: u64,
        config: &ClockConfig,
    ) -> Result<Timestamp, TimestampError> {
        check_range(now)?;
        check_range(remote.millis)?;

        let millis = now.max(self.millis).max(remote.millis);
        let counter = if millis == self.millis && millis == remote.millis {
            increment(self.counter.max(remote.counter))?
        } else if millis == self.millis {
            increment(self.counter)?
        } else if millis == remote.millis {
            increment(remote.counter)?
        } else {
            0
        };

        check_drift(millis, now, config)?;
        Ok(Timestamp::new(millis, counter, self.node))
    }

    /// Canonical, lexicographically sortable encoding.
    pub fn to_canonical(&self) -> String {
        format!("{:012x}-{:04x}-{}", self.millis, self.counter, self.node)
    }

    /// Parse the canonical encoding produced by [`Timestamp::to_canonical`].
    pub fn from_canonical(s: &str) -> Result<Self, TimestampError> {
        let invalid = || TimestampError::Parse(s.to_string());
        if s.len() != TIMESTAMP_STRING_LEN || !s.is_ascii() {
            return Err(invalid());
        }
        let (millis, rest) = s.split_at(12);
        let rest = rest.strip_prefix('-').ok_or_else(invalid)?;
        let (counter, rest) = rest.split_at(4);
        let node = rest.strip_prefix('-').ok_or_else(invalid)?;

        // from_str_radix accepts a leading '+', which the encoding never emits.
        if !millis.bytes().chain(counter.bytes()).all(is_lower_hex) {
            return Err(invalid());
        }
        let millis = u64::from_str_radix(millis, 16).map_err(|_| invalid())?;
        let counter = u16::from_str_radix(counter, 16).map_err(|_| invalid())?;
        let node = NodeId::from_hex(node).ok_or_else(invalid)?;
        Ok(Timestamp::new(millis, counter, node))
    }
}

fn is_lower_hex(b: u8) -> bool {
    matches!(b, b'0'..=b'9' | b'a'..=b'f')
}

fn increment(counter: u16) -> Result<u16, TimestampError> {
    counter.checked_add(1).ok_or(TimestampError::CounterOverflow)
}

fn check_range(millis: u64) -> Result<(), TimestampError> {
    if millis >= MILLIS_LIMIT {
        return Err(TimestampError::TimeOutOfRange { millis });
    }
    Ok(())
}

fn check_drift(next: u64, now: u64, config: &ClockConfig) -> Result<(), TimestampError> {
    if next.saturating_sub(now) > config.max_drift_ms {
        return Err(TimestampError::Drift {
            next,
            now,
            max_drift: config.max_drift_ms,
        });
    }
    Ok(())
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical())
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timestamp::from_canonical(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::from_canonical(&s).map_err(serde::de::Error::custom)
    }
}

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait TimeSource: Send + Sync + 'static {
    fn now_millis(&self) -> u64;
}

/// The operating system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to. Used by tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: u64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

impl<T: TimeSource> TimeSource for std::sync::Arc<T> {
    fn now_millis(&self) -> u64 {
        (**self).now_millis()
    }
}

/// A time source paired with drift settings.
pub struct HybridClock {
    time: Box<dyn TimeSource>,
    config: ClockConfig,
}

impl HybridClock {
    pub fn new(time: impl TimeSource, config: ClockConfig) -> Self {
        Self {
            time: Box::new(time),
            config,
        }
    }

    pub fn system() -> Self {
        Self::new(SystemClock, ClockConfig::default())
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn now_millis(&self) -> u64 {
        self.time.now_millis()
    }

    pub fn send(&self, local: &Timestamp) -> Result<Timestamp, TimestampError> {
        local.send(self.now_millis(), &self.config)
    }

    pub fn receive(&self, local: &Timestamp, remote: &Timestamp) -> Result<Timestamp, TimestampError> {
        local.receive(remote, self.now_millis(), &self.config)
    }
}

impl fmt::Debug for HybridClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridClock")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(b: u8) -> NodeId {
        NodeId::from_bytes([b; 16])
    }

    fn config() -> ClockConfig {
        ClockConfig::default()
    }

    #[test]
    fn test_send_uses_wall_clock_when_ahead() {
        let local = Timestamp::new(1_000, 7, node(1));
        let next = local.send(2_000, &config()).unwrap();
        assert_eq!(next, Timestamp::new(2_000, 0, node(1)));
    }

    #[test]
    fn test_send_increments_counter_when_wall_clock_behind() {
        let local = Timestamp::new(5_000, 3, node(1));
        let next = local.send(4_000, &config()).unwrap();
        assert_eq!(next, Timestamp::new(5_000, 4, node(1)));

        let same = local.send(5_000, &config()).unwrap();
        assert_eq!(same, Timestamp::new(5_000, 4, node(1)));
    }

    #[test]
    fn test_send_counter_overflow() {
        let local = Timestamp::new(5_000, u16::MAX, node(1));
        assert_eq!(
            local.send(5_000, &config()),
            Err(TimestampError::CounterOverflow)
        );
    }

    #[test]
    fn test_receive_counter_overflow() {
        let max = u16::MAX;
        // Local, remote and wall clock all on the same millisecond.
        let local = Timestamp::new(5_000, 3, node(1));
        let remote = Timestamp::new(5_000, max, node(2));
        assert_eq!(
            local.receive(&remote, 5_000, &config()),
            Err(TimestampError::CounterOverflow)
        );

        // Remote ahead of both local and wall clock.
        let local = Timestamp::new(4_000, 0, node(1));
        assert_eq!(
            local.receive(&remote, 4_500, &config()),
            Err(TimestampError::CounterOverflow)
        );

        // Local ahead of both remote and wall clock.
        let local = Timestamp::new(6_000, max, node(1));
        assert_eq!(
            local.receive(&remote, 5_500, &config()),
            Err(TimestampError::CounterOverflow)
        );
    }

    #[test]
    fn test_send_drift() {
        let config = ClockConfig { max_drift_ms: 100 };
        let local = Timestamp::new(10_000, 0, node(1));
        let err = local.send(9_000, &config).unwrap_err();
        assert_eq!(
            err,
            TimestampError::Drift {
                next: 10_000,
                now: 9_000,
                max_drift: 100
            }
        );
        assert!(local.send(9_950, &config).is_ok());
    }

    #[test]
    fn test_receive_counter_rules() {
        let cfg = config();
        let local = Timestamp::new(1_000, 2, node(1));

        // all three equal
        let remote = Timestamp::new(1_000, 9, node(2));
        assert_eq!(local.receive(&remote, 1_000, &cfg).unwrap(), Timestamp::new(1_000, 10, node(1)));

        // local ahead
        let remote = Timestamp::new(900, 9, node(2));
        assert_eq!(local.receive(&remote, 800, &cfg).unwrap(), Timestamp::new(1_000, 3, node(1)));

        // remote ahead
        let remote = Timestamp::new(1_200, 9, node(2));
        assert_eq!(local.receive(&remote, 800, &cfg).unwrap(), Timestamp::new(1_200, 10, node(1)));

        // wall clock ahead
        assert_eq!(local.receive(&remote, 2_000, &cfg).unwrap(), Timestamp::new(2_000, 0, node(1)));
    }

    #[test]
    fn test_receive_rejects_far_future_remote() {
        let local = Timestamp::new(1_000, 0, node(1));
        let remote = Timestamp::new(MILLIS_LIMIT, 0, node(2));
        assert_eq!(
            local.receive(&remote, 1_000, &config()),
            Err(TimestampError::TimeOutOfRange { millis: MILLIS_LIMIT })
        );
    }

    #[test]
    fn test_receive_drift_from_remote() {
        let config = ClockConfig { max_drift_ms: 1_000 };
        let local = Timestamp::new(1_000, 0, node(1));
        let remote = Timestamp::new(10_000, 0, node(2));
        assert!(matches!(
            local.receive(&remote, 1_000, &config),
            Err(TimestampError::Drift { .. })
        ));
    }

    #[test]
    fn test_canonical_roundtrip() {
        let ts = Timestamp::new(1_700_000_000_123, 42, node(0xab));
        let s = ts.to_canonical();
        assert_eq!(s.len(), TIMESTAMP_STRING_LEN);
        assert_eq!(s, "018bcfe5687b-002a-abababababababababababababababab");
        assert_eq!(Timestamp::from_canonical(&s).unwrap(), ts);
    }

    #[test]
    fn test_canonical_rejects_garbage() {
        assert!(Timestamp::from_canonical("").is_err());
        assert!(Timestamp::from_canonical("zz8bcfe56c7b-002a-abababababababababababababababab").is_err());
        assert!(Timestamp::from_canonical("018bcfe56c7b_002a-abababababababababababababababab").is_err());
        assert!(Timestamp::from_canonical("+18bcfe56c7b-002a-abababababababababababababababab").is_err());
    }

    #[test]
    fn test_canonical_order_matches_semantic_order() {
        let a = Timestamp::new(1_000, 0xffff, node(9));
        let b = Timestamp::new(1_001, 0, node(0));
        let c = Timestamp::new(1_001, 0, node(1));
        assert!(a < b && b < c);
        assert!(a.to_canonical() < b.to_canonical());
        assert!(b.to_canonical() < c.to_canonical());
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let ts = Timestamp::new(60_000, 1, node(2));
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, format!("\"{}\"", ts.to_canonical()));
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_hybrid_clock_with_manual_time() {
        let time = std::sync::Arc::new(ManualClock::new(1_000));
        let clock = HybridClock::new(time.clone(), ClockConfig::default());
        let t1 = clock.send(&Timestamp::initial(node(1))).unwrap();
        let t2 = clock.send(&t1).unwrap();
        time.advance(5);
        let t3 = clock.send(&t2).unwrap();
        assert!(t1 < t2 && t2 < t3);
        assert_eq!(t3, Timestamp::new(1_005, 0, node(1)));
    }
}
