use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use lms_core::model::OutboundMessage;

use super::{PushConnection, PushTransport};
use crate::error::RemoteError;

/// WebSocket push channel carrying JSON text frames.
#[derive(Clone, Debug)]
pub struct WsPushTransport {
    url: Url,
    token: Option<String>,
}

impl WsPushTransport {
    #[must_use]
    pub fn new(url: Url, token: Option<String>) -> Self {
        Self { url, token }
    }

    /// The token rides along as a form-encoded `token` query pair.
    fn endpoint(&self) -> Url {
        let mut url = self.url.clone();
        if let Some(token) = self.token.as_deref() {
            url.query_pairs_mut().append_pair("token", token);
        }
        url
    }
}

#[async_trait]
impl PushTransport for WsPushTransport {
    async fn connect(&self) -> Result<Box<dyn PushConnection>, RemoteError> {
        let (stream, _) = connect_async(String::from(self.endpoint()))
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WsConnection {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), RemoteError> {
        self.stream
            .send(Message::Text(message.to_json().into()))
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, RemoteError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => return None,
                // Transport-level ping/pong is answered by tungstenite itself.
                Ok(_) => {}
                Err(err) => return Some(Err(RemoteError::Transport(err.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            tracing::debug!(error = %err, "push channel close failed");
        }
    }
}
