//! Shared HTTP plumbing for the object-store and etcd clients

use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client used for every outbound call
pub fn client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()
}
