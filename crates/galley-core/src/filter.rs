//! Per-connection subscription filter.
//!
//! A filter has three optional dimensions. An absent dimension places no
//! constraint; every configured dimension must pass for a message to match.
//! Dimensions are only evaluated against messages that carry a ticket
//! (or, for `ticket_ids`, an explicit ticket id). Stats and alerts are
//! kitchen-wide and always pass.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{ServerMessage, value_as_key};

/// Subscription predicate sent by a dashboard in a `subscribe` frame.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionFilter {
    /// Ticket statuses of interest (e.g. `FIRED`, `READY`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statuses: Option<BTreeSet<String>>,
    /// Station ids of interest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stations: Option<BTreeSet<String>>,
    /// Ticket ids of interest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_ids: Option<BTreeSet<String>>,
}

impl SubscriptionFilter {
    /// No dimension configured.
    pub fn is_empty(&self) -> bool {
        self.statuses.is_none() && self.stations.is_none() && self.ticket_ids.is_none()
    }

    /// Whether `message` passes every configured dimension.
    pub fn matches(&self, message: &ServerMessage) -> bool {
        if let Some(ids) = &self.ticket_ids {
            if let Some(ticket_id) = message.ticket_id() {
                if !ids.contains(&ticket_id) {
                    return false;
                }
            } else if message.ticket().is_some() {
                return false;
            }
        }

        let Some(ticket) = message.ticket() else {
            return true;
        };

        if let Some(statuses) = &self.statuses {
            if !field_in(ticket, &["status"], statuses) {
                return false;
            }
        }
        if let Some(stations) = &self.stations {
            if !field_in(ticket, &["station", "stationId"], stations) {
                return false;
            }
        }
        true
    }
}

/// Optional filter: `None` receives everything.
pub fn filter_matches(filter: Option<&SubscriptionFilter>, message: &ServerMessage) -> bool {
    filter.is_none_or(|f| f.matches(message))
}

fn field_in(ticket: &Value, keys: &[&str], allowed: &BTreeSet<String>) -> bool {
    keys.iter()
        .find_map(|k| ticket.get(*k).and_then(value_as_key))
        .is_some_and(|v| allowed.contains(&v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn set(values: &[&str]) -> Option<BTreeSet<String>> {
        Some(values.iter().map(|s| (*s).to_string()).collect())
    }

    fn ticket_updated(ticket: Value) -> ServerMessage {
        ServerMessage::TicketUpdated {
            ticket,
            sound: None,
            priority: None,
        }
    }

    #[test]
    fn no_filter_matches_everything() {
        let msg = ticket_updated(json!({"id": "t1", "status": "READY"}));
        assert!(filter_matches(None, &msg));
        assert!(SubscriptionFilter::default().matches(&msg));
    }

    #[test]
    fn fired_filter_rejects_ready_ticket() {
        let filter = SubscriptionFilter {
            statuses: set(&["FIRED"]),
            ..Default::default()
        };
        assert!(!filter.matches(&ticket_updated(json!({"id": "t1", "status": "READY"}))));
        assert!(filter.matches(&ticket_updated(json!({"id": "t1", "status": "FIRED"}))));
    }

    #[test]
    fn station_reads_station_or_station_id() {
        let filter = SubscriptionFilter {
            stations: set(&["grill"]),
            ..Default::default()
        };
        assert!(filter.matches(&ticket_updated(json!({"station": "grill"}))));
        assert!(filter.matches(&ticket_updated(json!({"stationId": "grill"}))));
        assert!(!filter.matches(&ticket_updated(json!({"stationId": "fry"}))));
        assert!(!filter.matches(&ticket_updated(json!({"id": "t1"}))));
    }

    #[test]
    fn numeric_ids_are_stringified() {
        let filter = SubscriptionFilter {
            ticket_ids: set(&["42"]),
            ..Default::default()
        };
        assert!(filter.matches(&ticket_updated(json!({"id": 42}))));
        assert!(!filter.matches(&ticket_updated(json!({"id": 43}))));
    }

    #[test]
    fn ticket_ids_apply_to_timer_updates() {
        let filter = SubscriptionFilter {
            ticket_ids: set(&["t1"]),
            statuses: set(&["FIRED"]),
            ..Default::default()
        };
        let timer = |id: &str| ServerMessage::TimerUpdate {
            ticket_id: id.to_string(),
            time_data: json!({"elapsed": 30}),
        };
        assert!(filter.matches(&timer("t1")));
        assert!(!filter.matches(&timer("t2")));
    }

    #[test]
    fn kitchen_wide_messages_pass_any_filter() {
        let filter = SubscriptionFilter {
            statuses: set(&["FIRED"]),
            stations: set(&["grill"]),
            ticket_ids: set(&["t1"]),
        };
        assert!(filter.matches(&ServerMessage::StatsUpdated { stats: json!({}) }));
        assert!(filter.matches(&ServerMessage::EmergencyAlert {
            alert: json!({"text": "fire"}),
            priority: crate::protocol::Priority::High,
            sound: "emergency_alert".into(),
        }));
    }

    #[test]
    fn deserializes_camel_case_and_partial() {
        let filter: SubscriptionFilter =
            serde_json::from_value(json!({"ticketIds": ["a"], "stations": []})).unwrap();
        assert!(filter.statuses.is_none());
        assert_eq!(filter.stations, Some(BTreeSet::new()));
        assert_eq!(filter.ticket_ids, set(&["a"]));
    }

    fn status() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("NEW".to_string()),
            Just("FIRED".to_string()),
            Just("READY".to_string()),
            Just("SERVED".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn status_dimension_is_set_membership(
            allowed in prop::collection::btree_set(status(), 0..4),
            actual in status(),
        ) {
            let filter = SubscriptionFilter { statuses: Some(allowed.clone()), ..Default::default() };
            let msg = ticket_updated(json!({"id": "t", "status": actual}));
            prop_assert_eq!(filter.matches(&msg), allowed.contains(&actual));
        }

        #[test]
        fn dimensions_combine_with_and(
            statuses in prop::collection::btree_set(status(), 1..4),
            actual in status(),
            station_ok in any::<bool>(),
        ) {
            let filter = SubscriptionFilter {
                statuses: Some(statuses.clone()),
                stations: set(&["grill"]),
                ticket_ids: None,
            };
            let station = if station_ok { "grill" } else { "fry" };
            let msg = ticket_updated(json!({"status": actual, "station": station}));
            prop_assert_eq!(filter.matches(&msg), statuses.contains(&actual) && station_ok);
        }

        #[test]
        fn empty_filter_is_transparent(id in "[a-z0-9]{1,8}", s in status()) {
            let msg = ticket_updated(json!({"id": id, "status": s}));
            prop_assert!(SubscriptionFilter::default().matches(&msg));
        }
    }
}
