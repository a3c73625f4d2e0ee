use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::{
    config::TransportConfig,
    events::RawEvent,
    protocol::{parse_binary_frame, parse_frame, ParseError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub current_backoff_delay: Duration,
}

/// Doubling reconnect delay between a floor and a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns the delay to wait now and doubles the one after it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

type EventHandler = Arc<dyn Fn(RawEvent) + Send + Sync>;

pub struct TransportChannel {
    config: TransportConfig,
    handler: Option<EventHandler>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl TransportChannel {
    pub fn new(config: TransportConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState {
            status: ConnectionStatus::Closed,
            current_backoff_delay: config.reconnect_floor(),
        });
        Self {
            config,
            handler: None,
            state_tx,
            state_rx,
            task: None,
        }
    }

    pub fn on_event<F>(&mut self, handler: F)
    where
        F: Fn(RawEvent) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Spawns the connection loop. Must be called from within a tokio runtime.
    pub fn connect(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("transport already running");
            return;
        }
        let handler = self.handler.clone().unwrap_or_else(|| {
            warn!("transport connected without an event handler; events will be dropped");
            Arc::new(|_| {})
        });
        let url = self.config.endpoint.clone();
        let backoff = Backoff::new(
            self.config.reconnect_floor(),
            self.config.reconnect_ceiling(),
        );
        let state_tx = self.state_tx.clone();
        self.task = Some(tokio::spawn(run_connection_loop(
            url, backoff, handler, state_tx,
        )));
    }

    /// Closes the channel and cancels any pending reconnect.
    pub fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let delay = self.state_rx.borrow().current_backoff_delay;
        let _ = self.state_tx.send(ConnectionState {
            status: ConnectionStatus::Closed,
            current_backoff_delay: delay,
        });
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_connection_loop(
    url: String,
    mut backoff: Backoff,
    handler: EventHandler,
    state_tx: watch::Sender<ConnectionState>,
) {
    loop {
        publish(&state_tx, ConnectionStatus::Connecting, backoff.current());
        match connect_async(url.as_str()).await {
            Ok((mut stream, _response)) => {
                backoff.reset();
                publish(&state_tx, ConnectionStatus::Open, backoff.current());
                info!(url = %url, "connected to event source");
                while let Some(next) = stream.next().await {
                    match next {
                        Ok(Message::Text(text)) => deliver(parse_frame(&text), &handler),
                        Ok(Message::Binary(bytes)) => deliver(parse_binary_frame(bytes), &handler),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(?err, "event source read error");
                            break;
                        }
                    }
                }
                warn!(url = %url, "event source disconnected");
            }
            Err(err) => {
                warn!(?err, url = %url, "failed to connect to event source");
            }
        }

        let delay = backoff.next_delay();
        publish(&state_tx, ConnectionStatus::Closed, delay);
        debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        sleep(delay).await;
    }
}

fn deliver(results: Vec<Result<RawEvent, ParseError>>, handler: &EventHandler) {
    for result in results {
        match result {
            Ok(event) => handler(event),
            Err(err) => warn!(%err, "discarding malformed payload"),
        }
    }
}

fn publish(state_tx: &watch::Sender<ConnectionState>, status: ConnectionStatus, delay: Duration) {
    let _ = state_tx.send(ConnectionState {
        status,
        current_backoff_delay: delay,
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::SinkExt;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message};

    use super::{Backoff, ConnectionStatus, TransportChannel};
    use crate::{config::TransportConfig, events::RawEvent};

    #[test]
    fn backoff_doubles_and_caps() {
        let d = Duration::from_millis(500);
        let mut backoff = Backoff::new(d, Duration::from_millis(3_000));
        assert_eq!(backoff.next_delay(), d);
        assert_eq!(backoff.next_delay(), d * 2);
        assert_eq!(backoff.next_delay(), d * 4);
        assert_eq!(backoff.next_delay(), Duration::from_millis(3_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(3_000));
    }

    #[test]
    fn backoff_resets_to_floor_after_open() {
        let d = Duration::from_millis(250);
        let mut backoff = Backoff::new(d, Duration::from_secs(30));
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), d);
    }

    #[tokio::test]
    async fn delivers_parsed_events_and_skips_malformed_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            ws.send(Message::Text(
                "{\"type\":\"level_up\",\"perk\":\"Axe\",\"level\":2}\n{broken".to_owned(),
            ))
            .await
            .expect("send");
            ws.send(Message::Binary(vec![0xff, 0xfe]))
                .await
                .expect("send");
            ws.send(Message::Text("{\"type\":\"zombie_kill\",\"weapon\":\"none\"}".to_owned()))
                .await
                .expect("send");
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let (tx, rx) = crossbeam_channel::unbounded::<RawEvent>();
        let mut channel = TransportChannel::new(TransportConfig {
            endpoint: format!("ws://{addr}"),
            reconnect_floor_ms: 50,
            reconnect_ceiling_ms: 200,
        });
        channel.on_event(move |event| {
            let _ = tx.send(event);
        });
        channel.connect();

        let (first, second, rx) = tokio::task::spawn_blocking(move || {
            let first = rx.recv_timeout(Duration::from_secs(5)).expect("first event");
            let second = rx.recv_timeout(Duration::from_secs(5)).expect("second event");
            (first, second, rx)
        })
        .await
        .expect("join");
        assert_eq!(first.kind(), "level_up");
        assert_eq!(second.kind(), "zombie_kill");
        assert!(rx.try_recv().is_err());

        channel.disconnect();
        assert_eq!(channel.state().borrow().status, ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_reconnect() {
        let mut channel = TransportChannel::new(TransportConfig {
            endpoint: "ws://127.0.0.1:9".to_owned(),
            reconnect_floor_ms: 60_000,
            reconnect_ceiling_ms: 60_000,
        });
        let state = channel.state();
        channel.connect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        channel.disconnect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.borrow().status, ConnectionStatus::Closed);
        assert!(channel.task.is_none());
    }

    #[tokio::test]
    async fn refused_endpoint_publishes_doubling_delays() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let d = Duration::from_millis(40);
        let mut channel = TransportChannel::new(TransportConfig {
            endpoint: format!("ws://{addr}"),
            reconnect_floor_ms: 40,
            reconnect_ceiling_ms: 10_000,
        });
        let mut state = channel.state();
        channel.connect();

        let mut delays = Vec::new();
        let collect = async {
            while delays.len() < 3 {
                state.changed().await.expect("transport alive");
                let current = *state.borrow_and_update();
                if current.status == ConnectionStatus::Closed {
                    delays.push(current.current_backoff_delay);
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), collect)
            .await
            .expect("three reconnect attempts");
        channel.disconnect();

        assert_eq!(delays, vec![d, d * 2, d * 4]);
    }
}
