use crate::core::{PreloadType, SubscribePayload};
use std::collections::BTreeMap;

/// The minimal (topic, fields) pair actually read from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSubscription {
    pub topic: String,
    /// Ordered, deduplicated field names. `None` means the whole message.
    pub fields: Option<Vec<String>>,
    pub preload_type: PreloadType,
}

/// Reduce requested payloads to one minimal subscription per topic.
///
/// Any whole-message request for a topic wins over field lists; otherwise
/// the fields are the union of all requests, keeping first-seen order. A
/// full preload request anywhere upgrades the topic's preload type. Output
/// is sorted by topic so equal inputs resolve identically.
pub fn resolve_subscriptions(payloads: &[SubscribePayload]) -> Vec<ResolvedSubscription> {
    let mut by_topic: BTreeMap<String, ResolvedSubscription> = BTreeMap::new();

    for payload in payloads {
        let entry = by_topic
            .entry(payload.topic.clone())
            .or_insert_with(|| ResolvedSubscription {
                topic: payload.topic.clone(),
                fields: Some(Vec::new()),
                preload_type: PreloadType::Partial,
            });

        if payload.preload_type == PreloadType::Full {
            entry.preload_type = PreloadType::Full;
        }

        match (&mut entry.fields, &payload.fields) {
            // whole message already requested: nothing can narrow it
            (None, _) => {}
            (fields @ Some(_), None) => *fields = None,
            (Some(existing), Some(requested)) => {
                for field in requested {
                    if !existing.contains(field) {
                        existing.push(field.clone());
                    }
                }
            }
        }
    }

    by_topic.into_values().collect()
}

/// The topic names of a resolved set, in sorted order.
pub fn resolved_topics(subscriptions: &[ResolvedSubscription]) -> Vec<String> {
    subscriptions.iter().map(|s| s.topic.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_fields(topic: &str, fields: &[&str]) -> SubscribePayload {
        SubscribePayload {
            topic: topic.to_string(),
            fields: Some(fields.iter().map(|f| f.to_string()).collect()),
            preload_type: PreloadType::Partial,
        }
    }

    #[test]
    fn test_whole_message_wins() {
        let resolved = resolve_subscriptions(&[
            with_fields("/imu", &["orientation"]),
            SubscribePayload::topic("/imu"),
            with_fields("/imu", &["angular_velocity"]),
        ]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].fields, None);
    }

    #[test]
    fn test_fields_union_keeps_order() {
        let resolved = resolve_subscriptions(&[
            with_fields("/gps", &["lat", "lon"]),
            with_fields("/gps", &["lon", "alt"]),
        ]);
        assert_eq!(
            resolved[0].fields,
            Some(vec!["lat".to_string(), "lon".to_string(), "alt".to_string()])
        );
    }

    #[test]
    fn test_topics_sorted_and_unique() {
        let resolved = resolve_subscriptions(&[
            SubscribePayload::topic("/b"),
            SubscribePayload::topic("/a"),
            SubscribePayload::topic("/b"),
        ]);
        assert_eq!(resolved_topics(&resolved), vec!["/a".to_string(), "/b".to_string()]);
    }

    #[test]
    fn test_full_preload_upgrades() {
        let mut full = SubscribePayload::topic("/a");
        full.preload_type = PreloadType::Full;
        let resolved = resolve_subscriptions(&[SubscribePayload::topic("/a"), full]);
        assert_eq!(resolved[0].preload_type, PreloadType::Full);
    }

    #[test]
    fn test_empty_field_list_stays_empty() {
        let resolved = resolve_subscriptions(&[with_fields("/a", &[])]);
        assert_eq!(resolved[0].fields, Some(Vec::new()));
    }
}
