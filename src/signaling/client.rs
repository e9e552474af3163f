use crate::connection::EventSink;
use crate::errors::LinkError;
use crate::signaling::message::SignalingMessage;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::connect_async;

/// Header carrying the shared secret on both the socket and uploads.
pub const SHARED_SECRET_HEADER: &str = "X-Ermete-PSK";

/// Upper bound on how long closing waits for the socket to flush.
pub const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Transport-level socket notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened { status: u16 },
    Message(String),
    Failed { error: String, status: Option<u16> },
    Closed { code: u16, reason: String },
}

enum Outbound {
    Text(String),
    Close,
}

/// Owned handle to one signaling socket.
///
/// The socket is driven by a single background task that connects, pumps
/// outbound frames and reports inbound ones as [`SocketEvent`]s. Frames sent
/// before the handshake finishes are queued.
pub struct SignalingChannel {
    outbound: mpsc::UnboundedSender<Outbound>,
    driver: JoinHandle<()>,
}

impl SignalingChannel {
    /// Start connecting to `url`, authenticating with `secret`.
    ///
    /// Returns once the request is built; the handshake outcome arrives as
    /// `Opened` or `Failed` on `events`.
    pub fn open(url: &str, secret: &str, events: EventSink) -> Result<Self, LinkError> {
        let request = build_request(url, secret)?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive_socket(request, outbound_rx, events));

        Ok(Self { outbound, driver })
    }

    pub fn send(&self, message: &SignalingMessage) -> Result<(), LinkError> {
        let text = message.to_json()?;
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| LinkError::SignalingError("signaling socket is closed".to_string()))
    }

    /// Send a normal-closure frame and stop the socket task.
    ///
    /// Waits at most [`CLOSE_GRACE`] for the close frame to go out, then
    /// aborts the task regardless.
    pub async fn close(self) {
        let SignalingChannel {
            outbound,
            mut driver,
        } = self;

        let _ = outbound.send(Outbound::Close);
        if tokio::time::timeout(CLOSE_GRACE, &mut driver).await.is_err() {
            log::debug!("Signaling socket did not close within grace period, aborting");
            driver.abort();
        }
    }
}

fn build_request(url: &str, secret: &str) -> Result<Request, LinkError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| LinkError::InvalidAddress(format!("{}: {}", url, e)))?;

    let name = HeaderName::from_bytes(SHARED_SECRET_HEADER.as_bytes())
        .map_err(|e| LinkError::SignalingError(e.to_string()))?;
    let value = HeaderValue::from_str(secret)
        .map_err(|_| LinkError::ConfigError("shared secret is not a valid header value".to_string()))?;
    request.headers_mut().insert(name, value);

    Ok(request)
}

async fn drive_socket(
    request: Request,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: EventSink,
) {
    let (stream, response) = match connect_async(request).await {
        Ok(connected) => connected,
        Err(err) => {
            let status = match &err {
                WsError::Http(response) => Some(response.status().as_u16()),
                _ => None,
            };
            events.socket(SocketEvent::Failed {
                error: err.to_string(),
                status,
            });
            return;
        }
    };

    events.socket(SocketEvent::Opened {
        status: response.status().as_u16(),
    });

    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(Outbound::Text(text)) => {
                    if let Err(err) = write.send(Message::Text(text)).await {
                        events.socket(SocketEvent::Failed { error: err.to_string(), status: None });
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "closing".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    let _ = write.close().await;
                    break;
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => events.socket(SocketEvent::Message(text)),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => events.socket(SocketEvent::Message(text)),
                    Err(_) => log::debug!("Ignoring non UTF-8 binary signaling frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((u16::from(CloseCode::Status), String::new()));
                    events.socket(SocketEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed)) | None => {
                    events.socket(SocketEvent::Closed {
                        code: u16::from(CloseCode::Abnormal),
                        reason: "connection closed".to_string(),
                    });
                    break;
                }
                Some(Err(err)) => {
                    events.socket(SocketEvent::Failed { error: err.to_string(), status: None });
                    break;
                }
            },
        }
    }
}

/// Whether a socket failure looks like TLS spoken to a plaintext server.
pub fn is_tls_mismatch(error: &str) -> bool {
    let lowered = error.to_ascii_lowercase();
    [
        "unable to parse tls packet header",
        "invalidcontenttype",
        "received corrupt message",
        "corrupt message",
    ]
    .iter()
    .any(|marker| lowered.contains(marker))
}
