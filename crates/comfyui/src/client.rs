//! Opening the ComfyUI event socket.

use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type ComfyUIStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `{ws_url}/ws?clientId=<session>`.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
}

/// An open socket and the session id it was opened for.
pub struct ComfyUIConnection {
    pub client_id: String,
    pub ws_stream: ComfyUIStream,
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    /// The socket failed or was shut down after it was established.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ComfyUIClient {
    /// `ws_url` is the socket root, e.g. `ws://host:8188`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        let mut ws_url = ws_url.into();
        while ws_url.ends_with('/') {
            ws_url.pop();
        }
        Self { ws_url }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    fn endpoint(&self, client_id: &str) -> String {
        format!("{}/ws?clientId={client_id}", self.ws_url)
    }

    /// The server only routes a prompt's events to sockets opened with the
    /// `client_id` the prompt was submitted under.
    pub async fn connect(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let (ws_stream, _) = connect_async(self.endpoint(client_id))
            .await
            .map_err(|e| ComfyUIClientError::Connection(format!("{}: {e}", self.ws_url)))?;

        tracing::info!(client_id, ws_url = %self.ws_url, "Event socket connected");
        Ok(ComfyUIConnection {
            client_id: client_id.to_owned(),
            ws_stream,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_carries_client_id() {
        let client = ComfyUIClient::new("ws://gpu:8188/");
        assert_eq!(client.ws_url(), "ws://gpu:8188");
        assert_eq!(client.endpoint("abc"), "ws://gpu:8188/ws?clientId=abc");
    }
}
