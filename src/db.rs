use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{
    sqlite::SqlitePoolOptions, FromRow, QueryBuilder, Sqlite, SqlitePool, Transaction,
};

use crate::error::{Error, Result};
use crate::payload::validate_feed_name;

/// Resources shown per topic on the feed details page
pub const RESOURCES_PER_TOPIC: i64 = 20;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub last_login: Option<String>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Feed {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub is_public: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Topic {
    pub id: i64,
    pub feed_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Resource {
    pub id: i64,
    pub topic_id: i64,
    pub title: String,
    pub date: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub editorial: String,
    pub languages: String,
}

/// Which feeds a listing should include.
#[derive(Debug, Clone, Default)]
pub struct FeedFilter {
    pub user_id: Option<i64>,
    pub is_public: Option<bool>,
    /// Case-insensitive substring matched against topic names
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedSummary {
    pub id: i64,
    pub name: String,
    pub creator: Option<String>,
    pub is_public: bool,
    pub topics: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedPage {
    pub feeds: Vec<FeedSummary>,
    pub page: i64,
    pub pages: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedDetails {
    pub id: i64,
    pub name: String,
    pub is_public: bool,
    pub topics: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub resources: Vec<Resource>,
}

#[derive(Debug, FromRow)]
struct FeedListRow {
    id: i64,
    name: String,
    is_public: bool,
    created_at: String,
    updated_at: String,
    creator: String,
}

/// Current time as a fixed-width RFC 3339 string, so text ordering matches
/// chronological ordering.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to `:memory:` is a separate database, so keep one
        // connection alive for the lifetime of the pool.
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options.connect(database_url).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                last_login TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tokens (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                is_public INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                UNIQUE(feed_id, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                id INTEGER PRIMARY KEY,
                topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                date TEXT NOT NULL DEFAULT '',
                type TEXT NOT NULL DEFAULT '',
                editorial TEXT NOT NULL DEFAULT '',
                languages TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_feeds_updated
            ON feeds(updated_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_resources_topic
            ON resources(topic_id, date DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Users and sessions

    pub async fn create_user(&self, username: &str, password_hash: &str) -> Result<User> {
        let now = now_timestamp();
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash, last_login)
            VALUES (?, ?, ?)
            RETURNING id, username, password_hash, last_login
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                Error::Conflict(username.to_string())
            }
            other => Error::Persistence(other),
        })
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn update_last_login(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(now_timestamp())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_token(&self, token: &str, user_id: i64, expires_at: &str) -> Result<()> {
        sqlx::query("INSERT INTO tokens (id, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(token)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The user owning an unexpired token
    pub async fn get_user_for_token(&self, token: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.* FROM users u
            JOIN tokens t ON t.user_id = u.id
            WHERE t.id = ? AND t.expires_at > ?
            "#,
        )
        .bind(token)
        .bind(now_timestamp())
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn delete_token(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM tokens WHERE id = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_expired_tokens(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tokens WHERE expires_at <= ?")
            .bind(now_timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // Feeds

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn get_topics_for_feed(&self, feed_id: i64) -> Result<Vec<Topic>> {
        let topics =
            sqlx::query_as::<_, Topic>("SELECT * FROM topics WHERE feed_id = ? ORDER BY id")
                .bind(feed_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(topics)
    }

    pub async fn get_resources_for_topic(
        &self,
        topic_id: i64,
        limit: i64,
    ) -> Result<Vec<Resource>> {
        let resources = sqlx::query_as::<_, Resource>(
            r#"
            SELECT * FROM resources
            WHERE topic_id = ?
            ORDER BY date DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(topic_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(resources)
    }

    /// Fetch a feed the caller must own.
    pub async fn get_owned_feed(&self, feed_id: i64, owner_id: i64) -> Result<Feed> {
        let feed = self
            .get_feed(feed_id)
            .await?
            .ok_or_else(|| Error::NotFound("Feed".to_string()))?;

        if feed.user_id != owner_id {
            return Err(Error::Forbidden(
                "You do not have permission to modify this feed.".to_string(),
            ));
        }
        Ok(feed)
    }

    /// One page of feeds, most recently updated first.
    pub async fn list_feeds(
        &self,
        filter: &FeedFilter,
        page: i64,
        per_page: i64,
    ) -> Result<FeedPage> {
        let page = page.max(1);
        let per_page = per_page.max(1);

        let mut count_query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM feeds f");
        push_feed_filters(&mut count_query, filter);
        let (total,): (i64,) = count_query
            .build_query_as()
            .fetch_one(&self.pool)
            .await?;

        let mut rows_query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT f.id, f.name, f.is_public, f.created_at, f.updated_at, u.username AS creator \
             FROM feeds f JOIN users u ON u.id = f.user_id",
        );
        push_feed_filters(&mut rows_query, filter);
        rows_query
            .push(" ORDER BY f.updated_at DESC, f.id DESC LIMIT ")
            .push_bind(per_page)
            .push(" OFFSET ")
            .push_bind((page - 1).saturating_mul(per_page));

        let rows: Vec<FeedListRow> = rows_query
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut topics_by_feed = self.topic_names_for_feeds(&ids).await?;
        let show_creator = filter.is_public == Some(true);

        let feeds = rows
            .into_iter()
            .map(|row| FeedSummary {
                topics: topics_by_feed.remove(&row.id).unwrap_or_default(),
                id: row.id,
                name: row.name,
                creator: show_creator.then_some(row.creator),
                is_public: row.is_public,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
            .collect();

        Ok(FeedPage {
            feeds,
            page,
            pages: (total + per_page - 1) / per_page,
        })
    }

    async fn topic_names_for_feeds(&self, feed_ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
        let mut grouped: HashMap<i64, Vec<String>> = HashMap::new();
        if feed_ids.is_empty() {
            return Ok(grouped);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM topics WHERE feed_id IN (");
        let mut separated = builder.separated(", ");
        for id in feed_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id");

        let topics: Vec<Topic> = builder.build_query_as().fetch_all(&self.pool).await?;
        for topic in topics {
            grouped.entry(topic.feed_id).or_default().push(topic.name);
        }
        Ok(grouped)
    }

    /// A feed with its topics and most recent resources. Private feeds are
    /// only visible to their owner.
    pub async fn get_feed_details(
        &self,
        feed_id: i64,
        viewer_id: Option<i64>,
    ) -> Result<FeedDetails> {
        let feed = self
            .get_feed(feed_id)
            .await?
            .ok_or_else(|| Error::NotFound("Feed".to_string()))?;

        if !feed.is_public && viewer_id != Some(feed.user_id) {
            return Err(Error::Forbidden(
                "You do not have permission to view this feed.".to_string(),
            ));
        }

        let topics = self.get_topics_for_feed(feed.id).await?;
        let mut resources = Vec::new();
        for topic in &topics {
            resources.extend(
                self.get_resources_for_topic(topic.id, RESOURCES_PER_TOPIC)
                    .await?,
            );
        }

        Ok(FeedDetails {
            id: feed.id,
            name: feed.name,
            is_public: feed.is_public,
            topics: topics.into_iter().map(|t| t.name).collect(),
            created_at: feed.created_at,
            updated_at: feed.updated_at,
            resources,
        })
    }

    pub async fn update_feed(
        &self,
        feed_id: i64,
        owner_id: i64,
        name: Option<&str>,
        is_public: Option<bool>,
    ) -> Result<Feed> {
        if let Some(name) = name {
            validate_feed_name(name)?;
        }
        self.get_owned_feed(feed_id, owner_id).await?;

        let feed = sqlx::query_as::<_, Feed>(
            r#"
            UPDATE feeds
            SET name = COALESCE(?, name),
                is_public = COALESCE(?, is_public),
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(is_public)
        .bind(now_timestamp())
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(feed)
    }

    /// Delete a feed; its topics and resources go with it.
    pub async fn delete_feed(&self, feed_id: i64, owner_id: i64) -> Result<()> {
        self.get_owned_feed(feed_id, owner_id).await?;

        sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn push_feed_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &FeedFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(user_id) = filter.user_id {
        builder.push(" AND f.user_id = ").push_bind(user_id);
    }
    if let Some(is_public) = filter.is_public {
        builder.push(" AND f.is_public = ").push_bind(is_public);
    }
    if let Some(topic) = filter.topic.as_deref().filter(|t| !t.is_empty()) {
        builder
            .push(" AND EXISTS (SELECT 1 FROM topics t WHERE t.feed_id = f.id AND t.name LIKE ")
            .push_bind(format!("%{}%", escape_like(topic)))
            .push(" ESCAPE '\\')");
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
