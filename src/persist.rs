//! Transactional writes for feed creation and topic appends
//!
//! A new feed, its topics and their resources are written inside one
//! transaction. Topics and resources are each staged in their own savepoint
//! so a batch is released as a unit, but nothing is durable until the outer
//! transaction commits. Any error drops the transaction, which rolls back
//! the feed row along with everything staged under it.

use std::collections::HashMap;

use serde_json::Value;
use sqlx::{Connection, QueryBuilder, Sqlite, SqliteConnection};
use tracing::{info, warn};

use crate::db::{now_timestamp, Database, Feed, Resource, Topic};
use crate::error::{Error, Result};
use crate::fetcher::{FetchItem, TopicResult};
use crate::payload::{check_topic_length, FeedRequest, MAX_TOPICS_PER_FEED};

const RESOURCE_BATCH_SIZE: usize = 100;

/// A resource row built from a fetch item, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResource {
    pub topic_id: i64,
    pub title: String,
    pub date: String,
    pub kind: String,
    pub editorial: String,
    pub languages: String,
}

impl NewResource {
    pub fn from_item(topic_id: i64, item: &FetchItem) -> Self {
        let date = match (text_of(&item.start_year), text_of(&item.end_year)) {
            (Some(start), Some(end)) => format!("{} - {}", start, end),
            _ => text_of(&item.date).unwrap_or_default(),
        };

        Self {
            topic_id,
            title: item.title.clone(),
            date,
            kind: item.kind.clone().unwrap_or_default(),
            editorial: item.editorial.clone().unwrap_or_default(),
            languages: item.language.join(","),
        }
    }
}

/// Non-empty strings and non-zero numbers count as present.
fn text_of(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// Everything committed for one new feed.
#[derive(Debug, Clone)]
pub struct StoredFeed {
    pub feed: Feed,
    pub topics: Vec<Topic>,
    pub resources: Vec<Resource>,
}

/// Write a feed, one topic per found topic and one resource per item of
/// those topics, all or nothing.
pub async fn store_feed(
    db: &Database,
    owner_id: i64,
    request: &FeedRequest,
    found_topics: &[String],
    results: &[TopicResult],
) -> Result<StoredFeed> {
    let mut tx = db.begin().await?;

    let staged = stage_feed(&mut *tx, owner_id, request, found_topics, results).await;

    match staged {
        Ok(stored) => {
            tx.commit().await?;
            info!(
                "Committed feed {} with {} topics and {} resources",
                stored.feed.id,
                stored.topics.len(),
                stored.resources.len()
            );
            Ok(stored)
        }
        Err(e) => {
            warn!("Rolling back feed '{}': {}", request.feed_name, e);
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

async fn stage_feed(
    conn: &mut SqliteConnection,
    owner_id: i64,
    request: &FeedRequest,
    found_topics: &[String],
    results: &[TopicResult],
) -> Result<StoredFeed> {
    let feed = insert_feed(conn, owner_id, &request.feed_name, request.is_public).await?;
    let topics = stage_topics(conn, feed.id, found_topics).await?;
    let resources = stage_resources(conn, &topics, results).await?;

    Ok(StoredFeed {
        feed,
        topics,
        resources,
    })
}

async fn insert_feed(
    conn: &mut SqliteConnection,
    owner_id: i64,
    name: &str,
    is_public: bool,
) -> Result<Feed> {
    let now = now_timestamp();
    let feed = sqlx::query_as::<_, Feed>(
        r#"
        INSERT INTO feeds (user_id, name, is_public, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(owner_id)
    .bind(name)
    .bind(is_public)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(feed)
}

async fn stage_topics(
    conn: &mut SqliteConnection,
    feed_id: i64,
    names: &[String],
) -> Result<Vec<Topic>> {
    let mut batch = Connection::begin(&mut *conn).await?;

    let mut topics = Vec::with_capacity(names.len());
    for name in names {
        topics.push(insert_topic_checked(&mut *batch, feed_id, name).await?);
    }

    batch.commit().await?;
    Ok(topics)
}

/// Insert one topic after re-checking the live topic count and the name.
///
/// The caller must already hold the database write lock, otherwise the count
/// can go stale before the insert.
async fn insert_topic_checked(
    conn: &mut SqliteConnection,
    feed_id: i64,
    name: &str,
) -> Result<Topic> {
    if feed_id <= 0 {
        return Err(Error::InvalidTopic(format!("invalid feed id {}", feed_id)));
    }
    check_topic_length(name).map_err(Error::InvalidTopic)?;

    let (current,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM topics WHERE feed_id = ?")
        .bind(feed_id)
        .fetch_one(&mut *conn)
        .await?;
    let limit = MAX_TOPICS_PER_FEED as i64;
    if current >= limit {
        return Err(Error::TopicLimitExceeded { limit });
    }

    sqlx::query_as::<_, Topic>(
        "INSERT INTO topics (feed_id, name) VALUES (?, ?) RETURNING id, feed_id, name",
    )
    .bind(feed_id)
    .bind(name)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            Error::DuplicateTopic(name.to_string())
        }
        sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
            Error::NotFound("Feed".to_string())
        }
        other => Error::Persistence(other),
    })
}

async fn stage_resources(
    conn: &mut SqliteConnection,
    topics: &[Topic],
    results: &[TopicResult],
) -> Result<Vec<Resource>> {
    let topic_ids: HashMap<&str, i64> = topics.iter().map(|t| (t.name.as_str(), t.id)).collect();

    let rows: Vec<NewResource> = results
        .iter()
        .filter_map(|result| {
            topic_ids
                .get(result.topic.as_str())
                .map(|topic_id| (*topic_id, result))
        })
        .flat_map(|(topic_id, result)| {
            result
                .data
                .items
                .iter()
                .map(move |item| NewResource::from_item(topic_id, item))
        })
        .collect();

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut batch = Connection::begin(&mut *conn).await?;
    let mut resources = Vec::with_capacity(rows.len());

    for chunk in rows.chunks(RESOURCE_BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO resources (topic_id, title, date, type, editorial, languages) ",
        );

        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.topic_id)
                .push_bind(&row.title)
                .push_bind(&row.date)
                .push_bind(&row.kind)
                .push_bind(&row.editorial)
                .push_bind(&row.languages);
        });
        builder.push(" RETURNING id, topic_id, title, date, type, editorial, languages");

        let mut inserted: Vec<Resource> =
            builder.build_query_as().fetch_all(&mut *batch).await?;
        resources.append(&mut inserted);
    }

    batch.commit().await?;

    resources.sort_by_key(|r| r.id);
    Ok(resources)
}

/// Add one topic to an existing feed owned by `owner_id`.
///
/// Touching the feed row first takes the write lock, so concurrent appends to
/// the same feed are serialized and cannot jointly pass the cap check.
pub async fn append_topic(
    db: &Database,
    feed_id: i64,
    owner_id: i64,
    name: &str,
) -> Result<Topic> {
    check_topic_length(name).map_err(Error::InvalidTopic)?;

    let mut tx = db.begin().await?;

    let touched = sqlx::query("UPDATE feeds SET updated_at = ? WHERE id = ? AND user_id = ?")
        .bind(now_timestamp())
        .bind(feed_id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

    if touched.rows_affected() == 0 {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&mut *tx)
            .await?;
        return Err(match exists {
            Some(_) => Error::Forbidden(
                "You do not have permission to modify this feed.".to_string(),
            ),
            None => Error::NotFound("Feed".to_string()),
        });
    }

    let topic = insert_topic_checked(&mut *tx, feed_id, name).await?;
    tx.commit().await?;

    info!("Appended topic '{}' to feed {}", name, feed_id);
    Ok(topic)
}
