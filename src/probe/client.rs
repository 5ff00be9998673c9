use futures_util::StreamExt;
use std::{
    io::Write,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    runtime::Handle,
    sync::{oneshot, watch},
};
use tokio_tungstenite::{
    connect_async_tls_with_config,
    tungstenite::{client::IntoClientRequest, handshake::client::Request, Message as WsMessage},
    Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};
use url::Url;

use crate::probe::{Connection, State, CONNECTED, CONNECTION_ERROR};

/// Failures detected before any network activity.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid websocket url")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported url scheme {0:?}, expected ws or wss")]
    UnsupportedScheme(String),
    #[error("failed to build websocket handshake request")]
    Request(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("probe must be started from within a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Any handshake failure: DNS, TCP, TLS or HTTP upgrade. Callers are not
/// told which.
#[derive(Error, Debug)]
#[error("connection error")]
pub struct ConnectionError(#[from] tokio_tungstenite::tungstenite::Error);

type Handler = Box<dyn FnOnce() + Send + 'static>;

/// Launches a single websocket handshake and reports the outcome through
/// the `on_open` or `on_error` handler.
#[derive(Default)]
pub struct ConnectionProbe {
    on_open: Option<Handler>,
    on_error: Option<Handler>,
    connector: Option<Connector>,
}

impl ConnectionProbe {
    pub fn new() -> ConnectionProbe {
        ConnectionProbe::default()
    }

    /// A probe that writes [`CONNECTED`] or [`CONNECTION_ERROR`] as a single
    /// line to `out`.
    pub fn reporting<W>(out: W) -> ConnectionProbe
    where
        W: Write + Send + 'static,
    {
        let out = Arc::new(Mutex::new(out));
        let error_out = out.clone();
        ConnectionProbe::new()
            .on_open(move || report(&out, CONNECTED))
            .on_error(move || report(&error_out, CONNECTION_ERROR))
    }

    pub fn on_open<F>(mut self, handler: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_open = Some(Box::new(handler));
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Use `connector` for `wss` handshakes instead of the system default,
    /// e.g. to trust an extra root certificate.
    pub fn tls_connector(mut self, connector: native_tls::TlsConnector) -> Self {
        self.connector = Some(Connector::NativeTls(connector));
        self
    }

    /// Validates `url` and starts the handshake in the background.
    ///
    /// A malformed url, a scheme other than `ws`/`wss`, or a missing tokio
    /// runtime is rejected here and no handler fires.
    pub fn start(self, url: &str) -> Result<Connection, ProbeError> {
        let url = parse_url(url)?;
        let request = url
            .as_str()
            .into_client_request()
            .map_err(ProbeError::Request)?;
        let runtime = Handle::try_current()?;

        let (state_tx, state_rx) = watch::channel(State::Connecting);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let processor = Processor {
            state: state_tx,
            outcome: Some(outcome_tx),
            on_open: self.on_open,
            on_error: self.on_error,
        };
        debug!(%url, "probe starting");
        let task = runtime.spawn(processor.run(request, self.connector));
        Ok(Connection::new(url, state_rx, outcome_rx, task))
    }
}

fn parse_url(url: &str) -> Result<Url, ProbeError> {
    let url = Url::parse(url)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ProbeError::UnsupportedScheme(other.to_string())),
    }
}

fn report<W: Write>(out: &Mutex<W>, line: &str) {
    let mut out = out.lock().expect("report writer poisoned");
    if let Err(err) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
        warn!(?err, "failed to write probe result");
    }
}

struct Processor {
    state: watch::Sender<State>,
    outcome: Option<oneshot::Sender<State>>,
    on_open: Option<Handler>,
    on_error: Option<Handler>,
}

impl Processor {
    async fn run(mut self, request: Request, connector: Option<Connector>) {
        let handshake = connect_async_tls_with_config(request, None, connector)
            .await
            .map_err(ConnectionError::from);
        match handshake {
            Ok((ws_stream, response)) => {
                debug!(status = %response.status(), "processor websocket connected");
                self.settle(State::Open);
                drain(ws_stream).await;
                let _ = self.state.send(State::Closed);
            }
            Err(err) => {
                debug!(?err, "processor websocket handshake failed");
                self.settle(State::Errored);
            }
        }
    }

    // Both slots are emptied on the first outcome, so only one handler ever
    // runs. The handler finishes before the outcome is published.
    fn settle(&mut self, state: State) {
        let on_open = self.on_open.take();
        let on_error = self.on_error.take();
        let handler = match state {
            State::Open => on_open,
            State::Errored => on_error,
            _ => None,
        };
        if let Some(handler) = handler {
            handler();
        }
        let _ = self.state.send(state);
        if let Some(outcome) = self.outcome.take() {
            let _ = outcome.send(state);
        }
    }
}

async fn drain(mut ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
    while let Some(message) = ws_stream.next().await {
        match message {
            // Ignore Ping, tungstenite will automatically Pong
            Ok(WsMessage::Ping(_)) => (),
            Ok(WsMessage::Close(frame)) => {
                debug!(?frame, "peer closed websocket");
                break;
            }
            Ok(message) => debug!(len = message.len(), "discarding websocket message"),
            Err(err) => {
                warn!(?err, "websocket stream failed after open");
                break;
            }
        }
    }
    debug!("processor stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ws_and_wss() {
        assert_eq!(parse_url("ws://127.0.0.1:9001").unwrap().scheme(), "ws");
        assert_eq!(parse_url("wss://ws.s0.b.hmny.io").unwrap().scheme(), "wss");
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(matches!(
            parse_url("ws.s0.b.hmny.io"),
            Err(ProbeError::InvalidUrl(_))
        ));
    }

    #[test]
    fn rejects_non_websocket_scheme() {
        match parse_url("https://ws.s0.b.hmny.io") {
            Err(ProbeError::UnsupportedScheme(scheme)) => assert_eq!(scheme, "https"),
            other => panic!("unexpected result: {:?}", other.map(|u| u.to_string())),
        }
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let result = ConnectionProbe::new()
            .on_open(|| panic!("open fired"))
            .on_error(|| panic!("error fired"))
            .start("ws://127.0.0.1:9001");
        assert!(matches!(result, Err(ProbeError::NoRuntime(_))));
    }

    #[test]
    fn report_writes_one_line() {
        let out = Mutex::new(Vec::new());
        report(&out, CONNECTION_ERROR);
        assert_eq!(out.into_inner().unwrap(), b"Connection Error\n");
    }

    #[tokio::test]
    async fn rejected_url_never_fires_handlers() {
        let result = ConnectionProbe::new()
            .on_open(|| panic!("open fired"))
            .on_error(|| panic!("error fired"))
            .start("not a url");
        assert!(result.is_err());
    }
}
