//! Text-socket seam under the transport.

use futures::future::BoxFuture;

use crate::error::TransportError;

/// An open, text-oriented duplex socket.
pub trait FrameSocket: Send {
    /// Write one text message.
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>>;
    /// Next text message; `None` once the peer closed the socket.
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String, TransportError>>>;
    /// Close the socket; errors are informational.
    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Opens sockets for the transport's session loop.
pub trait SocketConnector: Send + Sync {
    /// Open a fresh socket to the configured endpoint.
    fn connect(&self) -> BoxFuture<'static, Result<Box<dyn FrameSocket>, TransportError>>;
}

#[cfg(feature = "ws-transport")]
pub use self::ws::WebSocketConnector;

#[cfg(feature = "ws-transport")]
mod ws {
    use std::sync::Arc;

    use futures::{FutureExt, SinkExt, StreamExt, future::BoxFuture};
    use tokio::net::TcpStream;
    use tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
    };
    use tracing::{trace, warn};

    use super::{FrameSocket, SocketConnector};
    use crate::error::TransportError;

    /// Connector opening `ws://` / `wss://` sockets with `tokio-tungstenite`.
    #[derive(Debug, Clone)]
    pub struct WebSocketConnector {
        url: Arc<str>,
    }

    impl WebSocketConnector {
        /// Connector for the push endpoint at `url`.
        pub fn new(url: impl Into<String>) -> Self {
            Self {
                url: Arc::from(url.into()),
            }
        }
    }

    impl SocketConnector for WebSocketConnector {
        fn connect(&self) -> BoxFuture<'static, Result<Box<dyn FrameSocket>, TransportError>> {
            let url = self.url.clone();
            async move {
                let (stream, response) =
                    connect_async(url.as_ref())
                        .await
                        .map_err(|source| TransportError::Connect {
                            url: url.to_string(),
                            source: Box::new(source),
                        })?;
                trace!(status = %response.status(), "websocket handshake complete");
                Ok(Box::new(WebSocketSocket { stream }) as Box<dyn FrameSocket>)
            }
            .boxed()
        }
    }

    struct WebSocketSocket {
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    }

    impl FrameSocket for WebSocketSocket {
        fn send(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
            async move {
                self.stream
                    .send(Message::Text(text.into()))
                    .await
                    .map_err(TransportError::socket)
            }
            .boxed()
        }

        fn recv(&mut self) -> BoxFuture<'_, Option<Result<String, TransportError>>> {
            async move {
                loop {
                    match self.stream.next().await? {
                        Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => return Some(Ok(text)),
                            Err(err) => warn!(error = %err, "dropping non-UTF-8 binary message"),
                        },
                        Ok(Message::Close(frame)) => {
                            trace!(?frame, "websocket closed by peer");
                            return None;
                        }
                        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                        Err(err) => return Some(Err(TransportError::socket(err))),
                    }
                }
            }
            .boxed()
        }

        fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
            async move { self.stream.close(None).await.map_err(TransportError::socket) }.boxed()
        }
    }
}
