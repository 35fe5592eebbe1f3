//! Integration tests for the Shoal gateway.
//!
//! These tests require a running gateway (with at least one healthy
//! backend bucket) at `localhost:8080`. They are marked `#[ignore]` so
//! they don't run during normal `cargo test`.
//!
//! Run them with:
//! ```text
//! cargo test -p shoal-integration -- --ignored
//! ```

mod test_control_plane;
mod test_placement;

/// Base URL of the gateway under test.
#[must_use]
pub fn base_url() -> String {
    std::env::var("SHOAL_ENDPOINT").unwrap_or_else(|_| "http://localhost:8080".to_owned())
}

/// A plain HTTP client.
#[must_use]
pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

/// Generate a unique object key for a test.
#[must_use]
pub fn test_key(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("integration/{prefix}/{id}")
}
