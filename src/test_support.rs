//! Shared helpers for wiremock-backed integration tests.

#[cfg(test)]
pub(crate) mod socket_guard {
    use std::time::Duration;

    use wiremock::MockServer;

    /// Starts a wiremock server, or returns `None` if loopback sockets are
    /// unavailable in this environment (e.g. a sandboxed CI runner).
    ///
    /// Tests that depend on this helper should treat `None` as "skip", not
    /// "fail" — binding a local TCP listener is not always permitted.
    pub(crate) async fn start_mock_server_or_skip() -> Option<MockServer> {
        tokio::time::timeout(Duration::from_secs(5), MockServer::start())
            .await
            .ok()
    }
}
