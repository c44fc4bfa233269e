use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fetcher::{FetchResponse, TopicResult};

/// Fetch results split by whether the data service had anything for them.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub found_topics: Vec<String>,
    pub not_found_topics: Vec<String>,
    /// Results for `found_topics`, in the same order
    pub results: Vec<TopicResult>,
}

/// Partition a fetch response against the topics that were requested.
///
/// Results for topics that were never requested are dropped, requested topics
/// missing from the response count as not found, and only the first result
/// for a repeated topic is kept. Fails with `FetchFailed` for a failed fetch
/// and `NoDataFound` when no topic has items.
pub fn classify(requested: &[String], response: FetchResponse) -> Result<Classification> {
    let results = match response {
        FetchResponse::Topics(results) => results,
        FetchResponse::Failed(failure) => return Err(Error::FetchFailed(failure)),
    };

    let wanted: HashSet<&str> = requested.iter().map(String::as_str).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut found = Vec::new();

    for result in results {
        if !wanted.contains(result.topic.as_str()) {
            warn!("Ignoring result for unrequested topic '{}'", result.topic);
            continue;
        }
        if !seen.insert(result.topic.clone()) {
            continue;
        }
        if result.data.total_items > 0 {
            found.push(result);
        }
    }

    let found_topics: Vec<String> = found.iter().map(|r| r.topic.clone()).collect();
    let not_found_topics: Vec<String> = requested
        .iter()
        .filter(|topic| !found_topics.contains(topic))
        .cloned()
        .collect();

    debug!(
        "Classified topics: {} found, {} not found",
        found_topics.len(),
        not_found_topics.len()
    );

    if found_topics.is_empty() {
        return Err(Error::NoDataFound(not_found_topics));
    }

    Ok(Classification {
        found_topics,
        not_found_topics,
        results: found,
    })
}
