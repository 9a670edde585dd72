use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::warn;
use url::Url;

/// Stream of values put to a subscribed URL.
///
/// Dropping the subscription unregisters it; values already received are
/// unaffected.
#[derive(Debug)]
pub struct Subscription {
    url: Url,
    receiver: broadcast::Receiver<Bytes>,
}

impl Subscription {
    pub fn new(url: Url, receiver: broadcast::Receiver<Bytes>) -> Self {
        Self { url, receiver }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Next value, or `None` once the gateway side has gone away.
    ///
    /// A slow subscriber that falls behind skips the values it missed; the
    /// next value still reflects the latest state because meta puts carry
    /// the full frontier.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            match self.receiver.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(url = %self.url, skipped, "subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Bytes> {
        loop {
            match self.receiver.try_recv() {
                Ok(value) => return Some(value),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
