//! Online/offline heuristic.
//!
//! A node is online while less than two reporting intervals have passed since
//! its last update. Nothing here probes the network; the verdict is computed
//! from stored fields whenever someone asks.

use chrono::{DateTime, Utc};

use crate::models::node::Node;

/// Number of missed reporting intervals after which a node counts as offline.
pub const GRACE_INTERVALS: i64 = 2;

/// `true` iff `now - updated_at < 2 * frequency`. A node that has never been
/// updated is offline.
pub fn is_online(node: &Node, now: DateTime<Utc>) -> bool {
    match node.updated_at {
        Some(updated_at) => within_window(updated_at, node.frequency, now),
        None => false,
    }
}

fn within_window(updated_at: DateTime<Utc>, frequency_ms: i64, now: DateTime<Utc>) -> bool {
    let elapsed_ms = (now - updated_at).num_milliseconds();
    elapsed_ms < frequency_ms.saturating_mul(GRACE_INTERVALS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::node::{DEFAULT_FREQUENCY_MS, DEFAULT_NAME, NODE_TYPE};
    use chrono::{Duration, TimeZone};

    fn node_updated_at(updated_at: Option<DateTime<Utc>>) -> Node {
        Node {
            doc_id: "doc".into(),
            id: "rpi_hub".into(),
            name: DEFAULT_NAME.into(),
            node_type: NODE_TYPE.into(),
            frequency: DEFAULT_FREQUENCY_MS,
            online: false,
            temperature: None,
            humidity: None,
            created_at: updated_at,
            updated_at,
        }
    }

    #[test]
    fn online_strictly_inside_two_intervals() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let node = node_updated_at(Some(t0));

        assert!(is_online(&node, t0));
        assert!(is_online(&node, t0 + Duration::milliseconds(119_999)));
        assert!(!is_online(&node, t0 + Duration::milliseconds(120_000)));
        assert!(!is_online(&node, t0 + Duration::hours(1)));
    }

    #[test]
    fn clock_skew_into_the_future_counts_as_online() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let node = node_updated_at(Some(t0 + Duration::seconds(5)));
        assert!(is_online(&node, t0));
    }

    #[test]
    fn never_updated_node_is_offline() {
        let node = node_updated_at(None);
        assert!(!is_online(&node, Utc::now()));
    }

    #[test]
    fn huge_frequency_does_not_overflow() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut node = node_updated_at(Some(t0));
        node.frequency = i64::MAX;
        assert!(node.is_online(t0 + Duration::days(365)));
    }
}
