//! Feed creation workflow
//!
//! [`FeedDataHandler::process_request`] runs a raw payload through every
//! stage in order: validation, one batched fetch, classification, the
//! transactional write and finally response aggregation. A stage that fails
//! ends the workflow with its error and nothing is persisted.

use serde_json::Value;
use tracing::{info, warn};

use crate::aggregate::{aggregate, FeedCreated};
use crate::classifier::classify;
use crate::db::Database;
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::payload::FeedRequest;
use crate::persist::store_feed;

pub struct FeedDataHandler<'a> {
    db: &'a Database,
    fetcher: &'a Fetcher,
}

impl<'a> FeedDataHandler<'a> {
    pub fn new(db: &'a Database, fetcher: &'a Fetcher) -> Self {
        Self { db, fetcher }
    }

    pub async fn process_request(&self, owner_id: i64, payload: &Value) -> Result<FeedCreated> {
        let request = FeedRequest::from_value(payload).map_err(|e| {
            warn!("Rejected feed payload from user {}: {}", owner_id, e);
            e
        })?;

        info!(
            "Creating feed '{}' for user {} with topics {:?}",
            request.feed_name, owner_id, request.topics
        );

        let response = self.fetcher.fetch_topics(&request.topics).await;
        let classification = classify(&request.topics, response).map_err(|e| {
            warn!("Feed '{}' not created: {}", request.feed_name, e);
            e
        })?;

        let stored = store_feed(
            self.db,
            owner_id,
            &request,
            &classification.found_topics,
            &classification.results,
        )
        .await?;

        info!(
            "Created feed {} ('{}'), {} topics not found",
            stored.feed.id,
            stored.feed.name,
            classification.not_found_topics.len()
        );

        Ok(aggregate(
            &stored.feed,
            &stored.topics,
            &stored.resources,
            classification.not_found_topics,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataServiceConfig;
    use crate::error::Error;
    use crate::fetcher::FetchFailure;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (Database, i64, MockServer) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        let user = db.create_user("reader", "hash").await.unwrap();
        let server = MockServer::start().await;
        (db, user.id, server)
    }

    fn fetcher_for(server: &MockServer) -> Fetcher {
        Fetcher::new(&DataServiceConfig {
            url: format!("{}/api/get-news-data", server.uri()),
            timeout_secs: 5,
            function_key: None,
        })
        .unwrap()
    }

    fn items(count: usize) -> Vec<Value> {
        (0..count)
            .map(|i| {
                json!({
                    "title": format!("Paper {}", i),
                    "start_year": "1900",
                    "end_year": "1950",
                    "type": "Newspaper",
                    "editorial": "Press",
                    "language": ["English"]
                })
            })
            .collect()
    }

    async fn count(db: &Database, table: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(db.pool())
            .await
            .unwrap();
        n
    }

    #[tokio::test]
    async fn test_partial_results_create_feed() {
        let (db, user_id, server) = setup().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "topic": "swimming", "data": { "totalItems": 3, "items": items(3) } },
                { "topic": "chess", "data": { "totalItems": 0, "items": [] } }
            ])))
            .mount(&server)
            .await;
        let fetcher = fetcher_for(&server);

        let created = FeedDataHandler::new(&db, &fetcher)
            .process_request(
                user_id,
                &json!({
                    "feed_name": "Sports Feed",
                    "is_public": true,
                    "topics": ["swimming", "chess"]
                }),
            )
            .await
            .unwrap();

        assert_eq!(created.feed_name, "Sports Feed");
        assert_eq!(created.not_found_topics, vec!["chess"]);
        assert_eq!(created.topics.len(), 1);
        assert_eq!(created.topics["swimming"].len(), 3);
        assert_eq!(created.topics["swimming"][0].date, "1900 - 1950");

        assert_eq!(count(&db, "feeds").await, 1);
        assert_eq!(count(&db, "topics").await, 1);
        assert_eq!(count(&db, "resources").await, 3);
    }

    #[tokio::test]
    async fn test_all_empty_writes_nothing() {
        let (db, user_id, server) = setup().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "topic": "chess", "data": { "totalItems": 0, "items": [] } }
            ])))
            .mount(&server)
            .await;
        let fetcher = fetcher_for(&server);

        let err = FeedDataHandler::new(&db, &fetcher)
            .process_request(
                user_id,
                &json!({ "feed_name": "Board Games", "is_public": false, "topics": ["chess"] }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoDataFound(ref t) if t == &vec!["chess".to_string()]));
        assert_eq!(count(&db, "feeds").await, 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_writes_nothing() {
        let (db, user_id, server) = setup().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "quota" })))
            .mount(&server)
            .await;
        let fetcher = fetcher_for(&server);

        let err = FeedDataHandler::new(&db, &fetcher)
            .process_request(
                user_id,
                &json!({ "feed_name": "Sports", "is_public": true, "topics": ["tennis"] }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::FetchFailed(FetchFailure::Upstream(_))));
        assert_eq!(count(&db, "feeds").await, 0);
    }

    #[tokio::test]
    async fn test_invalid_payload_skips_fetch() {
        let (db, user_id, server) = setup().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;
        let fetcher = fetcher_for(&server);

        let err = FeedDataHandler::new(&db, &fetcher)
            .process_request(
                user_id,
                &json!({ "feed_name": "ab", "is_public": true, "topics": ["tennis"] }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidPayload(_)));
        assert_eq!(count(&db, "feeds").await, 0);
    }
}
