//! Property-based tests for the hybrid logical clock.
//!
//! These tests verify the clock laws replication relies on:
//!  - Monotonicity: every send/receive yields a strictly greater timestamp
//!  - Causality: a received timestamp is always below the merged clock
//!  - Encoding: canonical strings sort exactly like timestamps

use proptest::prelude::*;
use rowsync_core::{ClockConfig, NodeId, Timestamp, DEFAULT_MAX_DRIFT_MS};

#[derive(Clone, Debug)]
enum Event {
    /// Local event, wall clock moved by the given (possibly negative) delta.
    Send(i64),
    /// Remote timestamp observed, offset from the wall clock.
    Receive { wall_delta: i64, remote_offset: i64, counter: u16, node: u8 },
}

fn event_strategy() -> impl Strategy<Value = Event> {
    prop_oneof![
        (-50i64..200).prop_map(Event::Send),
        (-50i64..200, -1_000i64..1_000, 0u16..1_000, any::<u8>()).prop_map(
            |(wall_delta, remote_offset, counter, node)| Event::Receive {
                wall_delta,
                remote_offset,
                counter,
                node
            }
        ),
    ]
}

fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (0u64..1u64 << 44, any::<u16>(), any::<[u8; 16]>())
        .prop_map(|(millis, counter, node)| Timestamp::new(millis, counter, NodeId::from_bytes(node)))
}

// ============================================================================
// Clock Property Tests
// ============================================================================

proptest! {
    #[test]
    fn clock_is_strictly_monotonic(events in prop::collection::vec(event_strategy(), 1..200)) {
        let config = ClockConfig { max_drift_ms: DEFAULT_MAX_DRIFT_MS };
        let node = NodeId::from_bytes([7u8; 16]);
        let mut wall: i64 = 1_700_000_000_000;
        let mut local = Timestamp::initial(node);

        for event in events {
            let next = match event {
                Event::Send(delta) => {
                    wall += delta;
                    local.send(wall as u64, &config).unwrap()
                }
                Event::Receive { wall_delta, remote_offset, counter, node: n } => {
                    wall += wall_delta;
                    let remote = Timestamp::new(
                        (wall + remote_offset) as u64,
                        counter,
                        NodeId::from_bytes([n; 16]),
                    );
                    let next = local.receive(&remote, wall as u64, &config).unwrap();
                    prop_assert!((next.millis, next.counter) > (remote.millis, remote.counter));
                    next
                }
            };
            prop_assert!(next > local, "{:?} !> {:?}", next, local);
            prop_assert_eq!(next.node, node);
            local = next;
        }
    }

    #[test]
    fn canonical_encoding_preserves_order(a in timestamp_strategy(), b in timestamp_strategy()) {
        let (sa, sb) = (a.to_canonical(), b.to_canonical());
        prop_assert_eq!(a.cmp(&b), sa.cmp(&sb));
        prop_assert_eq!(Timestamp::from_canonical(&sa).unwrap(), a);
    }
}
