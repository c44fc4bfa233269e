//! Kiosko - a news feed aggregation backend
//!
//! Users build feeds out of up to five topics. Creating a feed looks every
//! topic up in an external data service with one batched request, keeps the
//! topics that returned data and stores the feed, its topics and their
//! resources in a single transaction.

pub mod aggregate;
pub mod auth;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod handler;
pub mod payload;
pub mod persist;
pub mod routes;
