pub mod client;

use std::fmt;
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
};
use url::Url;

/// Printed when the handshake completes.
pub const CONNECTED: &str = "WebSocket Client Connected";
/// Printed when the handshake fails, whatever the cause.
pub const CONNECTION_ERROR: &str = "Connection Error";

/// Lifecycle of a single connection attempt.
///
/// `Connecting` moves to exactly one of `Open` or `Errored`. `Open` may later
/// become `Closed` when the peer goes away, but nothing reacts to that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connecting,
    Open,
    Errored,
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Connecting => "connecting",
            State::Open => "open",
            State::Errored => "errored",
            State::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One outbound websocket session started by
/// [`ConnectionProbe::start`](client::ConnectionProbe::start).
pub struct Connection {
    url: Url,
    state: watch::Receiver<State>,
    outcome: Option<oneshot::Receiver<State>>,
    settled: Option<State>,
    task: JoinHandle<()>,
}

impl Connection {
    pub(crate) fn new(
        url: Url,
        state: watch::Receiver<State>,
        outcome: oneshot::Receiver<State>,
        task: JoinHandle<()>,
    ) -> Self {
        Connection {
            url,
            state,
            outcome: Some(outcome),
            settled: None,
            task,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Waits for the first transition out of `Connecting` and returns it,
    /// even if the connection has since moved on to `Closed`.
    ///
    /// There is no timeout here; callers that need one wrap this future.
    pub async fn settled(&mut self) -> State {
        if let Some(outcome) = self.outcome.as_mut() {
            // The sender only drops unsettled if the task died in a handler.
            let state = match outcome.await {
                Ok(state) => state,
                Err(_) => self.state(),
            };
            self.outcome = None;
            self.settled = Some(state);
        }
        self.settled.unwrap_or_else(|| self.state())
    }

    /// Waits until the background task has nothing left to do. Once the
    /// connection is open this only returns after the peer closes it.
    pub async fn closed(self) {
        if let Err(err) = self.task.await {
            tracing::warn!(?err, "probe task did not finish cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_are_lowercase() {
        assert_eq!(State::Connecting.to_string(), "connecting");
        assert_eq!(State::Open.to_string(), "open");
        assert_eq!(State::Errored.to_string(), "errored");
        assert_eq!(State::Closed.to_string(), "closed");
    }
}
