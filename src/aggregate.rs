use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::db::{Feed, Resource, Topic};

/// Response body for a newly created feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedCreated {
    pub feed_id: i64,
    pub feed_name: String,
    pub is_public: bool,
    /// Resources keyed by topic name; every stored topic has an entry
    pub topics: BTreeMap<String, Vec<Resource>>,
    pub not_found_topics: Vec<String>,
}

/// Group stored resources under their topic names.
///
/// Resources whose topic is not in `topics` are skipped.
pub fn aggregate(
    feed: &Feed,
    topics: &[Topic],
    resources: &[Resource],
    not_found_topics: Vec<String>,
) -> FeedCreated {
    let names: HashMap<i64, &str> = topics.iter().map(|t| (t.id, t.name.as_str())).collect();

    let mut grouped: BTreeMap<String, Vec<Resource>> = topics
        .iter()
        .map(|t| (t.name.clone(), Vec::new()))
        .collect();

    for resource in resources {
        if let Some(name) = names.get(&resource.topic_id) {
            if let Some(bucket) = grouped.get_mut(*name) {
                bucket.push(resource.clone());
            }
        }
    }

    FeedCreated {
        feed_id: feed.id,
        feed_name: feed.name.clone(),
        is_public: feed.is_public,
        topics: grouped,
        not_found_topics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> Feed {
        Feed {
            id: 1,
            user_id: 1,
            name: "Sports Feed".to_string(),
            is_public: true,
            created_at: "2026-01-01T00:00:00.000000Z".to_string(),
            updated_at: "2026-01-01T00:00:00.000000Z".to_string(),
        }
    }

    fn topic(id: i64, name: &str) -> Topic {
        Topic {
            id,
            feed_id: 1,
            name: name.to_string(),
        }
    }

    fn resource(id: i64, topic_id: i64) -> Resource {
        Resource {
            id,
            topic_id,
            title: format!("Resource {}", id),
            date: "1900 - 1910".to_string(),
            kind: "Newspaper".to_string(),
            editorial: String::new(),
            languages: "English".to_string(),
        }
    }

    #[test]
    fn test_groups_by_topic_name() {
        let topics = vec![topic(10, "swimming"), topic(11, "tennis")];
        let resources = vec![resource(1, 10), resource(2, 11), resource(3, 10)];

        let created = aggregate(&feed(), &topics, &resources, vec!["chess".to_string()]);

        assert_eq!(created.feed_id, 1);
        assert_eq!(created.feed_name, "Sports Feed");
        assert!(created.is_public);
        assert_eq!(created.topics["swimming"].len(), 2);
        assert_eq!(created.topics["tennis"].len(), 1);
        assert_eq!(created.not_found_topics, vec!["chess"]);
    }

    #[test]
    fn test_topic_without_resources_still_has_key() {
        let topics = vec![topic(10, "swimming"), topic(11, "rowing")];
        let resources = vec![resource(1, 10)];

        let created = aggregate(&feed(), &topics, &resources, Vec::new());

        assert!(created.topics["rowing"].is_empty());
        assert_eq!(created.topics.len(), 2);
    }

    #[test]
    fn test_orphan_resources_are_skipped() {
        let topics = vec![topic(10, "swimming")];
        let resources = vec![resource(1, 10), resource(2, 99)];

        let created = aggregate(&feed(), &topics, &resources, Vec::new());

        assert_eq!(created.topics["swimming"].len(), 1);
    }

    #[test]
    fn test_serialized_shape() {
        let topics = vec![topic(10, "swimming")];
        let resources = vec![resource(1, 10)];

        let created = aggregate(&feed(), &topics, &resources, vec!["chess".to_string()]);
        let value = serde_json::to_value(&created).unwrap();

        assert_eq!(value["feed_id"], 1);
        assert_eq!(value["feed_name"], "Sports Feed");
        assert_eq!(value["not_found_topics"][0], "chess");
        assert_eq!(value["topics"]["swimming"][0]["type"], "Newspaper");
        assert_eq!(value["topics"]["swimming"][0]["title"], "Resource 1");
    }
}
