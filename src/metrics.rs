//! Per-database request counters.
//!
//! Counters are registered lazily on first use; registration is the only
//! synchronized step, increments afterwards are lock-free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use lazy_static::lazy_static;

lazy_static! {
    static ref DATABASE_REQUEST_COUNT: DashMap<String, Arc<AtomicU64>> = DashMap::new();
}

pub fn incr_database_request(database: &str) {
    let counter = DATABASE_REQUEST_COUNT
        .entry(database.to_string())
        .or_insert_with(|| Arc::new(AtomicU64::new(0)))
        .clone();
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn database_request_count(database: &str) -> u64 {
    DATABASE_REQUEST_COUNT
        .get(database)
        .map(|entry| entry.value().load(Ordering::Relaxed))
        .unwrap_or(0)
}
