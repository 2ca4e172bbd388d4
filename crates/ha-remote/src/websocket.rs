//! Event subscription over the websocket API
//!
//! The stream authenticates with a long-lived access token, subscribes
//! to the configured event types and fires every received event onto the
//! local bus. When the connection drops it reconnects after a delay;
//! a rejected token stops it for good.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use ha_core::events::STATE_CHANGED;
use ha_core::Event;
use ha_event_bus::EventBus;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use crate::error::{RemoteError, RemoteResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct EventStream {
    ws_url: String,
    token: String,
    event_types: Vec<String>,
    reconnect_delay: Duration,
    bus: Arc<EventBus>,
}

impl EventStream {
    /// Stream `state_changed` events from the instance at `base_url`
    pub fn new(base_url: &str, token: impl Into<String>, bus: Arc<EventBus>) -> Self {
        Self {
            ws_url: ws_url(base_url),
            token: token.into(),
            event_types: vec![STATE_CHANGED.to_string()],
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            bus,
        }
    }

    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = event_types;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Run in the background until the handle is stopped
    pub fn spawn(self) -> EventStreamHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(async move {
            if let Err(e) = self.run(shutdown_rx).await {
                error!(error = %e, "Event stream stopped");
            }
        });
        EventStreamHandle { shutdown_tx, task }
    }

    /// Connect, pump events and reconnect until shutdown
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> RemoteResult<()> {
        loop {
            tokio::select! {
                result = self.connect_and_pump() => match result {
                    Err(RemoteError::AuthInvalid(msg)) => {
                        return Err(RemoteError::AuthInvalid(msg));
                    }
                    Err(e) => warn!(error = %e, url = %self.ws_url, "Event stream disconnected"),
                    Ok(()) => warn!(url = %self.ws_url, "Event stream ended"),
                },
                _ = shutdown.recv() => {
                    info!("Event stream shutting down");
                    return Ok(());
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {
                    debug!("Reconnecting event stream");
                }
                _ = shutdown.recv() => {
                    info!("Event stream shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn connect_and_pump(&self) -> RemoteResult<()> {
        let (stream, _) = connect_async(self.ws_url.as_str()).await?;
        let (mut write, mut read) = stream.split();

        self.authenticate(&mut write, &mut read).await?;
        info!(url = %self.ws_url, "Connected to Home Assistant");

        for (id, event_type) in self.event_types.iter().enumerate() {
            let id = id + 1;
            send_json(
                &mut write,
                json!({"id": id, "type": "subscribe_events", "event_type": event_type}),
            )
            .await?;
            let response = recv_json(&mut read).await?;
            if response["success"] != json!(true) {
                return Err(RemoteError::Protocol(format!(
                    "subscribe_events for {} failed: {}",
                    event_type, response
                )));
            }
            debug!(event_type = %event_type, "Subscribed");
        }

        loop {
            let message = recv_json(&mut read).await?;
            match message["type"].as_str() {
                Some("event") => self.dispatch(message),
                Some(other) => trace!(message_type = other, "Ignoring message"),
                None => trace!("Ignoring untyped message"),
            }
        }
    }

    async fn authenticate(
        &self,
        write: &mut SplitSink<WsStream, Message>,
        read: &mut SplitStream<WsStream>,
    ) -> RemoteResult<()> {
        let hello = recv_json(read).await?;
        if hello["type"] != "auth_required" {
            return Err(RemoteError::Protocol(format!(
                "expected auth_required, got {}",
                hello
            )));
        }

        send_json(write, json!({"type": "auth", "access_token": self.token})).await?;

        let response = recv_json(read).await?;
        match response["type"].as_str() {
            Some("auth_ok") => Ok(()),
            Some("auth_invalid") => Err(RemoteError::AuthInvalid(
                response["message"].as_str().unwrap_or("invalid token").to_string(),
            )),
            _ => Err(RemoteError::Protocol(format!(
                "unexpected auth response {}",
                response
            ))),
        }
    }

    fn dispatch(&self, mut message: Value) {
        match serde_json::from_value::<Event>(message["event"].take()) {
            Ok(event) => {
                trace!(event_type = %event.event_type, "Received event");
                self.bus.fire(event);
            }
            Err(e) => warn!(error = %e, "Dropping malformed event"),
        }
    }
}

/// Handle to a spawned [`EventStream`]
pub struct EventStreamHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl EventStreamHandle {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Event stream task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn ws_url(base_url: &str) -> String {
    let url = base_url
        .trim_end_matches('/')
        .replace("http://", "ws://")
        .replace("https://", "wss://");
    format!("{}/api/websocket", url)
}

async fn send_json(write: &mut SplitSink<WsStream, Message>, value: Value) -> RemoteResult<()> {
    write.send(Message::Text(value.to_string())).await?;
    Ok(())
}

async fn recv_json(read: &mut SplitStream<WsStream>) -> RemoteResult<Value> {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(Message::Close(_))) | None => return Err(RemoteError::Closed),
            // Ping/pong frames are answered by tungstenite.
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
    use axum::routing::get;
    use axum::Router;
    use ha_core::events::StateChangedData;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    async fn next_json(socket: &mut WebSocket) -> Value {
        loop {
            match socket.recv().await {
                Some(Ok(AxumMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket closed: {:?}", other),
            }
        }
    }

    async fn send(socket: &mut WebSocket, value: Value) {
        socket
            .send(AxumMessage::Text(value.to_string()))
            .await
            .unwrap();
    }

    async fn fake_home_assistant(
        mut socket: WebSocket,
        valid_token: &'static str,
        drop_after_auth: bool,
    ) {
        send(&mut socket, json!({"type": "auth_required", "ha_version": "2026.1.1"})).await;
        let auth = next_json(&mut socket).await;
        if auth["access_token"] != valid_token {
            send(&mut socket, json!({"type": "auth_invalid", "message": "Invalid access token"}))
                .await;
            return;
        }
        send(&mut socket, json!({"type": "auth_ok", "ha_version": "2026.1.1"})).await;
        if drop_after_auth {
            let _ = socket.send(AxumMessage::Close(None)).await;
            return;
        }

        let sub = next_json(&mut socket).await;
        assert_eq!(sub["type"], "subscribe_events");
        assert_eq!(sub["event_type"], "state_changed");
        send(
            &mut socket,
            json!({"id": sub["id"], "type": "result", "success": true, "result": null}),
        )
        .await;

        send(
            &mut socket,
            json!({
                "id": sub["id"],
                "type": "event",
                "event": {
                    "event_type": "state_changed",
                    "data": {
                        "entity_id": "light.kitchen",
                        "old_state": null,
                        "new_state": {
                            "entity_id": "light.kitchen",
                            "state": "on",
                            "attributes": {"brightness": 200},
                            "last_changed": "2024-03-01T10:00:00.000000+00:00",
                            "last_updated": "2024-03-01T10:00:00.000000+00:00",
                            "context": {"id": "01HQ", "parent_id": null, "user_id": null}
                        }
                    },
                    "origin": "LOCAL",
                    "time_fired": "2024-03-01T10:00:00.000000+00:00",
                    "context": {"id": "01HQ", "parent_id": null, "user_id": null}
                }
            }),
        )
        .await;

        // Keep the connection open until the client goes away.
        while socket.recv().await.is_some() {}
    }

    /// Serve a fake instance; the first `drops` connections close right after auth
    async fn serve(valid_token: &'static str, drops: usize) -> (String, Arc<AtomicUsize>) {
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        let app = Router::new().route(
            "/api/websocket",
            get(move |ws: WebSocketUpgrade| {
                let drop_after_auth = counter.fetch_add(1, Ordering::SeqCst) < drops;
                async move {
                    ws.on_upgrade(move |socket| {
                        fake_home_assistant(socket, valid_token, drop_after_auth)
                    })
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), connections)
    }

    /// Collect `state_changed` payloads fired on the bus
    fn collect_state_changes(bus: &EventBus) -> mpsc::UnboundedReceiver<StateChangedData> {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.listen(STATE_CHANGED, move |event| {
            if let Ok(data) = serde_json::from_value(event.data.clone()) {
                let _ = tx.send(data);
            }
        });
        rx
    }

    #[test]
    fn test_ws_url() {
        assert_eq!(ws_url("http://localhost:8123"), "ws://localhost:8123/api/websocket");
        assert_eq!(ws_url("https://ha.example/"), "wss://ha.example/api/websocket");
    }

    #[tokio::test]
    async fn test_forwards_events_to_bus() {
        let (base_url, _) = serve("good-token", 0).await;
        let bus = Arc::new(EventBus::new());
        let mut rx = collect_state_changes(&bus);

        let handle = EventStream::new(&base_url, "good-token", bus.clone()).spawn();

        let data = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .unwrap();
        assert_eq!(data.entity_id.to_string(), "light.kitchen");
        assert_eq!(data.new_state.unwrap().state, "on");

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_dropped_connection() {
        let (base_url, connections) = serve("good-token", 1).await;
        let bus = Arc::new(EventBus::new());
        let mut rx = collect_state_changes(&bus);

        let handle = EventStream::new(&base_url, "good-token", bus.clone())
            .with_reconnect_delay(Duration::from_millis(10))
            .spawn();

        let data = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event after reconnect")
            .unwrap();
        assert_eq!(data.entity_id.to_string(), "light.kitchen");
        assert_eq!(connections.load(Ordering::SeqCst), 2);
        assert!(!handle.is_finished());

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_token_is_terminal() {
        let (base_url, connections) = serve("good-token", 0).await;
        let bus = Arc::new(EventBus::new());
        let stream = EventStream::new(&base_url, "bad-token", bus)
            .with_reconnect_delay(Duration::from_millis(10));

        let (_tx, rx) = broadcast::channel(1);
        let result = tokio::time::timeout(Duration::from_secs(5), stream.run(rx))
            .await
            .expect("run did not return");
        assert!(matches!(result, Err(RemoteError::AuthInvalid(_))));
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }
}
