use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const MIN_FEED_NAME_LENGTH: usize = 3;
pub const MAX_FEED_NAME_LENGTH: usize = 255;
pub const MIN_TOPIC_LENGTH: usize = 2;
pub const MAX_TOPIC_LENGTH: usize = 50;
pub const MAX_TOPICS_PER_FEED: usize = 5;

/// A feed-creation request that has passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedRequest {
    pub feed_name: String,
    pub is_public: bool,
    pub topics: Vec<String>,
}

impl FeedRequest {
    /// Validate a raw JSON payload into a typed request.
    ///
    /// Values are returned exactly as received; trimming is only used to
    /// detect blank topics.
    pub fn from_value(payload: &Value) -> Result<Self> {
        let object = payload
            .as_object()
            .ok_or_else(|| invalid("payload must be a dictionary"))?;

        if object.is_empty() {
            return Err(invalid("empty payload"));
        }

        let feed_name = required_field(object, "feed_name")?
            .as_str()
            .ok_or_else(|| invalid("feed_name must be of type str"))?;
        let is_public = required_field(object, "is_public")?
            .as_bool()
            .ok_or_else(|| invalid("is_public must be of type bool"))?;
        let topics = required_field(object, "topics")?
            .as_array()
            .ok_or_else(|| invalid("topics must be of type list"))?;

        if feed_name.is_empty() {
            return Err(invalid("feed_name is empty"));
        }
        if topics.is_empty() {
            return Err(invalid("topics is empty"));
        }

        validate_feed_name(feed_name)?;

        if topics.len() > MAX_TOPICS_PER_FEED {
            return Err(invalid(&format!(
                "topics list cannot contain more than {} items",
                MAX_TOPICS_PER_FEED
            )));
        }

        let mut names = Vec::with_capacity(topics.len());
        for topic in topics {
            let name = match topic.as_str() {
                Some(s) if !s.trim().is_empty() => s,
                _ => return Err(invalid("each topic must be a non-empty string")),
            };
            check_topic_length(name).map_err(|msg| invalid(&msg))?;
            names.push(name.to_string());
        }

        let unique: HashSet<&String> = names.iter().collect();
        if unique.len() != names.len() {
            return Err(invalid("duplicate topics are not allowed"));
        }

        Ok(Self {
            feed_name: feed_name.to_string(),
            is_public,
            topics: names,
        })
    }
}

/// Shared by creation and rename.
pub fn validate_feed_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if len > MAX_FEED_NAME_LENGTH {
        return Err(invalid(&format!(
            "feed_name must be less than {} characters",
            MAX_FEED_NAME_LENGTH
        )));
    }
    if len < MIN_FEED_NAME_LENGTH {
        return Err(invalid(&format!(
            "feed_name must be at least {} characters",
            MIN_FEED_NAME_LENGTH
        )));
    }
    Ok(())
}

/// Length bounds for a topic name, returned as a plain message so callers
/// can wrap it in the error kind that fits their stage.
pub fn check_topic_length(name: &str) -> std::result::Result<(), String> {
    let len = name.chars().count();
    if len > MAX_TOPIC_LENGTH {
        return Err(format!(
            "topic name must be less than {} characters",
            MAX_TOPIC_LENGTH
        ));
    }
    if len < MIN_TOPIC_LENGTH {
        return Err(format!(
            "topic name must be at least {} characters",
            MIN_TOPIC_LENGTH
        ));
    }
    Ok(())
}

fn required_field<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a Value> {
    object
        .get(field)
        .ok_or_else(|| invalid(&format!("missing {}", field)))
}

fn invalid(message: &str) -> Error {
    Error::InvalidPayload(message.to_string())
}
