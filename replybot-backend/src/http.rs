//! Shared HTTP client construction.

use std::time::Duration;

const USER_AGENT: &str = concat!("replybot/", env!("CARGO_PKG_VERSION"));

/// Build the client shared by every outbound collaborator.
///
/// `timeout` bounds each request end to end; the pipeline applies its own
/// per-step deadline on top of this.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .timeout(timeout)
        .build()
}
