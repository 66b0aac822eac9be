//! Client lifecycle: connect, disconnect, shut down.

use std::sync::Arc;

use nimbus_core::{ConnectionId, RealtimeError, Result};
use nimbus_settings::{NimbusSettings, RealtimeSettings};
use tracing::info;
use url::Url;

use crate::auth::TokenProvider;
use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::resources::{Channel, ChannelLogSource, Dataset, Fileset, Users};
use crate::transport::{ChannelConnector, WebSocketConnector};

/// Entry point to the real-time API.
///
/// Subscriptions survive [`disconnect`](Self::disconnect): the next
/// [`connect`](Self::connect) subscribes again, one command per resource,
/// and the same streams keep receiving events.
#[derive(Clone)]
pub struct RealtimeClient {
    coordinator: Coordinator,
    connector: Arc<dyn ChannelConnector>,
    settings: RealtimeSettings,
    log_source: Option<Arc<dyn ChannelLogSource>>,
}

impl RealtimeClient {
    /// Client over an arbitrary connector. Must be created inside a Tokio runtime.
    pub fn new(
        settings: RealtimeSettings,
        connector: Arc<dyn ChannelConnector>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let coordinator = Coordinator::new(CoordinatorConfig::from_settings(&settings), tokens);
        Self {
            coordinator,
            connector,
            settings,
            log_source: None,
        }
    }

    /// WebSocket client configured from `settings`.
    pub fn from_settings(settings: &NimbusSettings, tokens: Arc<dyn TokenProvider>) -> Self {
        let connector = Arc::new(WebSocketConnector::new(settings.realtime.inbound_buffer));
        Self::new(settings.realtime.clone(), connector, tokens)
    }

    /// Attach a channel history source used by [`Channel::get_log`].
    #[must_use]
    pub fn with_log_source(mut self, source: Arc<dyn ChannelLogSource>) -> Self {
        self.log_source = Some(source);
        self
    }

    /// Fetch a token, open the channel and bind it.
    ///
    /// Replaces any live channel.
    pub async fn connect(&self) -> Result<ConnectionId> {
        if self.coordinator.is_shut_down() {
            return Err(RealtimeError::ConnectionClosed);
        }
        let token = self
            .coordinator
            .token_provider()
            .get_token()
            .await
            .map_err(|err| match err {
                RealtimeError::Token(_) => err,
                other => RealtimeError::Token(other.to_string()),
            })?;
        let url = connection_url(&self.settings.ws_url, &self.settings.token_query_param, &token)?;
        info!(host = url.host_str().unwrap_or_default(), path = url.path(), "connecting");

        let duplex = self.connector.connect(url.as_str()).await?;
        self.coordinator.start(duplex)
    }

    /// Drop the live channel. Returns false if there was none.
    pub fn disconnect(&self) -> bool {
        self.coordinator.reset()
    }

    /// Disconnect for good: every stream completes and pending commands fail.
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }

    /// Whether a channel is bound.
    pub fn is_connected(&self) -> bool {
        self.coordinator.is_ready()
    }

    /// The underlying coordinator.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Dataset handle.
    pub fn dataset(&self, name: impl Into<String>) -> Dataset {
        Dataset::new(name, self.coordinator.clone())
    }

    /// Fileset handle.
    pub fn fileset(&self, name: impl Into<String>) -> Fileset {
        Fileset::new(name, self.coordinator.clone())
    }

    /// Users handle.
    pub fn users(&self, name: impl Into<String>) -> Users {
        Users::new(name, self.coordinator.clone())
    }

    /// Channel handle, with history access if a log source is attached.
    pub fn channel(&self, name: impl Into<String>) -> Channel {
        let channel = Channel::new(name, self.coordinator.clone());
        match &self.log_source {
            Some(source) => channel.with_log_source(Arc::clone(source)),
            None => channel,
        }
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("ws_url", &self.settings.ws_url)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

/// `base` with `token` set as the `param` query parameter.
///
/// An existing value for `param` is replaced; other parameters are kept.
pub fn connection_url(base: &str, param: &str, token: &str) -> Result<Url> {
    let mut url =
        Url::parse(base).map_err(|e| RealtimeError::Connect(format!("invalid endpoint {base:?}: {e}")))?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let _ = url
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(param, token);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn token_is_appended() {
        let url = connection_url("wss://api.example.com/rt", "token", "abc.def").unwrap();
        assert_eq!(url.as_str(), "wss://api.example.com/rt?token=abc.def");
    }

    #[test]
    fn existing_token_is_replaced_and_others_kept() {
        let url = connection_url("ws://h/rt?app=1&token=old", "token", "new").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("app".to_string(), "1".to_string()),
                ("token".to_string(), "new".to_string())
            ]
        );
    }

    #[test]
    fn token_is_percent_encoded() {
        let url = connection_url("ws://h/rt", "jwt", "a b&c").unwrap();
        assert_eq!(url.query(), Some("jwt=a+b%26c"));
    }

    #[test]
    fn invalid_base_is_connect_error() {
        assert_matches!(connection_url("not a url", "token", "t"), Err(RealtimeError::Connect(_)));
    }
}
