//! Message broker.
//!
//! De-multiplexes one framed byte pipe into per-request response slots,
//! ordered event subscriptions, and reverse-request handlers. All broker
//! state lives behind short synchronous locks; nothing is held across an
//! await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::error::DapError;
use crate::protocol::{Event, Message, Request, Response};
use crate::transport::Transport;

/// Handler for an adapter-initiated (reverse) request. Returns the
/// response body; errors become failure responses carrying the error's
/// display text.
pub type ReverseRequestHandler =
    Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Option<Value>, DapError>> + Send + Sync>;

/// Handler for an adapter event. Errors are logged and never interrupt
/// delivery to later handlers.
pub type EventHandler =
    Arc<dyn Fn(Event) -> BoxFuture<'static, Result<(), DapError>> + Send + Sync>;

/// Multiplexer over a single [`Transport`].
pub struct MessageBroker {
    transport: Transport,
    next_seq: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<Response>>>,
    request_handlers: RwLock<HashMap<String, ReverseRequestHandler>>,
    event_handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    event_queue: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl MessageBroker {
    /// Create a broker over `transport`. Ingress does not flow until
    /// [`start`](Self::start) is called, so handlers registered in between
    /// cannot miss messages.
    pub fn new(transport: Transport) -> Arc<Self> {
        let (closed_tx, closed_rx) = watch::channel(false);
        Arc::new(Self {
            transport,
            next_seq: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            request_handlers: RwLock::new(HashMap::new()),
            event_handlers: RwLock::new(HashMap::new()),
            event_queue: Mutex::new(None),
            closed: AtomicBool::new(false),
            closed_tx,
            closed_rx,
        })
    }

    /// Begin routing ingress.
    ///
    /// Events are re-dispatched from a dedicated task so that a slow event
    /// subscriber never delays response correlation, while handlers for
    /// any one event still run strictly in registration order.
    pub fn start(self: &Arc<Self>) {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
        *self.event_queue.lock() = Some(event_tx);

        let broker = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                broker.dispatch_event(event).await;
            }
        });

        let broker = Arc::clone(self);
        self.transport.start_receiving(Box::new(move |item| {
            let broker = Arc::clone(&broker);
            Box::pin(async move {
                broker.route(item);
            })
        }));
    }

    /// Allocate the next outbound sequence number.
    fn alloc_seq(&self) -> i64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        debug_assert!(seq > 0, "sequence counter exhausted its 63-bit headroom");
        seq
    }

    /// Send a request and suspend until its response arrives or the broker
    /// closes.
    pub async fn send_request(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<Response, DapError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DapError::TransportFailure("broker is closed".into()));
        }

        let seq = self.alloc_seq();
        let (completion_tx, completion_rx) = oneshot::channel();
        self.pending.lock().insert(seq, completion_tx);

        let message = Message::Request(Request {
            seq,
            command: command.to_string(),
            arguments,
        });
        if let Err(err) = self.transport.send(&message).await {
            self.pending.lock().remove(&seq);
            return Err(err);
        }

        completion_rx.await.map_err(|_| {
            DapError::TransportFailure(format!("broker closed while awaiting {command} response"))
        })
    }

    /// Send an event. Fire-and-forget: nothing is tracked.
    pub async fn send_event(&self, event: &str, body: Option<Value>) -> Result<(), DapError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DapError::TransportFailure("broker is closed".into()));
        }
        let message = Message::Event(Event {
            seq: self.alloc_seq(),
            event: event.to_string(),
            body,
        });
        self.transport.send(&message).await
    }

    /// Install or replace the reverse-request handler for `command`.
    pub fn register_request_handler(&self, command: &str, handler: ReverseRequestHandler) {
        self.request_handlers
            .write()
            .insert(command.to_string(), handler);
    }

    /// Append an event handler for `event`. Handlers run in registration
    /// order.
    pub fn register_event_handler(&self, event: &str, handler: EventHandler) {
        self.event_handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Observe closure; the value flips to `true` exactly once.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    /// Close the broker: close the transport, fail every outstanding
    /// request with [`DapError::TransportFailure`], and drop all handler
    /// registrations. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transport.close();

        let outstanding: Vec<_> = self.pending.lock().drain().collect();
        if !outstanding.is_empty() {
            debug!(count = outstanding.len(), "failing pending requests on close");
        }
        drop(outstanding); // dropped senders complete the receivers with an error

        self.request_handlers.write().clear();
        self.event_handlers.write().clear();
        *self.event_queue.lock() = None;
        let _ = self.closed_tx.send(true);
    }

    /// Route one ingress item.
    fn route(self: &Arc<Self>, item: Result<Message, DapError>) {
        match item {
            Ok(Message::Response(response)) => self.route_response(response),
            Ok(Message::Request(request)) => self.route_reverse_request(request),
            Ok(Message::Event(event)) => {
                let queue = self.event_queue.lock();
                if let Some(tx) = queue.as_ref() {
                    let _ = tx.send(event);
                }
            }
            Err(DapError::TransportFailure(reason)) => {
                warn!(%reason, "transport failed, closing broker");
                self.close();
            }
            Err(err) => {
                // Framing-level noise the decoder already resynced past.
                warn!(error = %err, "discarding invalid ingress message");
            }
        }
    }

    fn route_response(&self, response: Response) {
        match self.pending.lock().remove(&response.request_seq) {
            Some(slot) => {
                let _ = slot.send(response);
            }
            None => {
                debug!(
                    request_seq = response.request_seq,
                    command = %response.command,
                    "dropping stale response with no pending request"
                );
            }
        }
    }

    fn route_reverse_request(self: &Arc<Self>, request: Request) {
        let handler = self.request_handlers.read().get(&request.command).cloned();
        let broker = Arc::clone(self);
        // Handlers run detached so reverse requests never block client
        // requests; responses go out in handler-completion order.
        tokio::spawn(async move {
            let response = match handler {
                Some(handler) => match handler(request.clone()).await {
                    Ok(body) => Response::success_for(broker.alloc_seq(), &request, body),
                    Err(err) => {
                        Response::failure_for(broker.alloc_seq(), &request, err.to_string())
                    }
                },
                None => Response::failure_for(
                    broker.alloc_seq(),
                    &request,
                    format!("Unsupported request: {}", request.command),
                ),
            };
            if let Err(err) = broker.transport.send(&Message::Response(response)).await {
                warn!(
                    command = %request.command,
                    error = %err,
                    "failed to send reverse-request response"
                );
            }
        });
    }

    async fn dispatch_event(&self, event: Event) {
        let handlers = self
            .event_handlers
            .read()
            .get(&event.event)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!(event = %event.event, "no handlers registered for event");
            return;
        }
        for handler in handlers {
            if let Err(err) = handler(event.clone()).await {
                warn!(event = %event.event, error = %err, "event handler failed");
            }
        }
    }
}

impl Drop for MessageBroker {
    fn drop(&mut self) {
        // Arc'd tasks keep the broker alive until close; this covers the
        // path where a broker is abandoned before start.
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{encode_message, FrameDecoder};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    /// Wire up a broker over an in-memory duplex; returns the far (adapter)
    /// side halves.
    fn broker_over_duplex() -> (Arc<MessageBroker>, ReadHalf<DuplexStream>, WriteHalf<DuplexStream>)
    {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let broker = MessageBroker::new(Transport::new(client_read, client_write));
        broker.start();
        let (server_read, server_write) = tokio::io::split(server);
        (broker, server_read, server_write)
    }

    async fn read_one_message(
        reader: &mut ReadHalf<DuplexStream>,
        decoder: &mut FrameDecoder,
    ) -> Message {
        let mut chunk = [0u8; 4096];
        loop {
            let n = reader.read(&mut chunk).await.expect("adapter side read");
            assert!(n > 0, "stream ended while awaiting a message");
            let mut items = decoder.feed(&chunk[..n]);
            if !items.is_empty() {
                return items.remove(0).expect("well-formed message");
            }
        }
    }

    async fn write_message(writer: &mut WriteHalf<DuplexStream>, message: &Message) {
        let frame = encode_message(message).unwrap();
        writer.write_all(&frame).await.unwrap();
        writer.flush().await.unwrap();
    }

    #[tokio::test]
    async fn send_request_correlates_response() {
        let (broker, mut server_read, mut server_write) = broker_over_duplex();
        let mut decoder = FrameDecoder::new();

        let broker_clone = Arc::clone(&broker);
        let request_task =
            tokio::spawn(async move { broker_clone.send_request("threads", None).await });

        let Message::Request(request) = read_one_message(&mut server_read, &mut decoder).await
        else {
            panic!("expected request");
        };
        assert_eq!(request.command, "threads");

        write_message(
            &mut server_write,
            &Message::Response(Response {
                seq: 1,
                request_seq: request.seq,
                success: true,
                command: "threads".into(),
                message: None,
                body: Some(json!({"threads": []})),
            }),
        )
        .await;

        let response = request_task.await.unwrap().unwrap();
        assert_eq!(response.request_seq, request.seq);
        assert!(response.success);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn responses_resolve_out_of_order() {
        let (broker, mut server_read, mut server_write) = broker_over_duplex();
        let mut decoder = FrameDecoder::new();

        let first = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.send_request("stackTrace", None).await })
        };
        let Message::Request(first_request) = read_one_message(&mut server_read, &mut decoder).await
        else {
            panic!("expected request");
        };
        let second = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.send_request("scopes", None).await })
        };
        let Message::Request(second_request) =
            read_one_message(&mut server_read, &mut decoder).await
        else {
            panic!("expected request");
        };

        // Sequence numbers strictly increase across requests.
        assert!(second_request.seq > first_request.seq);

        // Answer in reverse order.
        write_message(
            &mut server_write,
            &Message::Response(Response {
                seq: 1,
                request_seq: second_request.seq,
                success: true,
                command: "scopes".into(),
                message: None,
                body: None,
            }),
        )
        .await;
        write_message(
            &mut server_write,
            &Message::Response(Response {
                seq: 2,
                request_seq: first_request.seq,
                success: true,
                command: "stackTrace".into(),
                message: None,
                body: None,
            }),
        )
        .await;

        let first_response = first.await.unwrap().unwrap();
        let second_response = second.await.unwrap().unwrap();
        assert_eq!(first_response.request_seq, first_request.seq);
        assert_eq!(second_response.request_seq, second_request.seq);
    }

    #[tokio::test]
    async fn stale_response_is_dropped_without_side_effects() {
        let (broker, mut server_read, mut server_write) = broker_over_duplex();
        let mut decoder = FrameDecoder::new();

        // Unsolicited response first.
        write_message(
            &mut server_write,
            &Message::Response(Response {
                seq: 1,
                request_seq: 9999,
                success: true,
                command: "threads".into(),
                message: None,
                body: None,
            }),
        )
        .await;

        // A normal exchange still works afterwards.
        let broker_clone = Arc::clone(&broker);
        let request_task =
            tokio::spawn(async move { broker_clone.send_request("threads", None).await });
        let Message::Request(request) = read_one_message(&mut server_read, &mut decoder).await
        else {
            panic!("expected request");
        };
        write_message(
            &mut server_write,
            &Message::Response(Response {
                seq: 2,
                request_seq: request.seq,
                success: true,
                command: "threads".into(),
                message: None,
                body: None,
            }),
        )
        .await;
        assert!(request_task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unregistered_reverse_request_gets_failure_response() {
        let (_broker, mut server_read, mut server_write) = broker_over_duplex();
        let mut decoder = FrameDecoder::new();

        write_message(
            &mut server_write,
            &Message::Request(Request {
                seq: 41,
                command: "mysteryCommand".into(),
                arguments: None,
            }),
        )
        .await;

        let Message::Response(response) = read_one_message(&mut server_read, &mut decoder).await
        else {
            panic!("expected response");
        };
        assert!(!response.success);
        assert_eq!(response.request_seq, 41);
        assert_eq!(response.command, "mysteryCommand");
        assert_eq!(
            response.message.as_deref(),
            Some("Unsupported request: mysteryCommand")
        );
    }

    #[tokio::test]
    async fn reverse_request_handler_success_and_error() {
        let (broker, mut server_read, mut server_write) = broker_over_duplex();
        let mut decoder = FrameDecoder::new();

        broker.register_request_handler(
            "echoBody",
            Arc::new(|request| {
                Box::pin(async move { Ok(request.arguments) })
            }),
        );
        broker.register_request_handler(
            "alwaysFails",
            Arc::new(|_request| {
                Box::pin(async move {
                    Err(DapError::UnsupportedFeature("nope".into()))
                })
            }),
        );

        write_message(
            &mut server_write,
            &Message::Request(Request {
                seq: 7,
                command: "echoBody".into(),
                arguments: Some(json!({"x": 1})),
            }),
        )
        .await;
        let Message::Response(response) = read_one_message(&mut server_read, &mut decoder).await
        else {
            panic!("expected response");
        };
        assert!(response.success);
        assert_eq!(response.request_seq, 7);
        assert_eq!(response.body, Some(json!({"x": 1})));

        write_message(
            &mut server_write,
            &Message::Request(Request {
                seq: 8,
                command: "alwaysFails".into(),
                arguments: None,
            }),
        )
        .await;
        let Message::Response(response) = read_one_message(&mut server_read, &mut decoder).await
        else {
            panic!("expected response");
        };
        assert!(!response.success);
        assert!(response.message.as_deref().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn events_fan_out_in_registration_and_arrival_order() {
        let (broker, _server_read, mut server_write) = broker_over_duplex();

        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        for tag in ["first", "second"] {
            let log = Arc::clone(&log);
            broker.register_event_handler(
                "output",
                Arc::new(move |event| {
                    let log = Arc::clone(&log);
                    let tag = tag.to_string();
                    Box::pin(async move {
                        let text = event
                            .body
                            .as_ref()
                            .and_then(|b| b.get("output"))
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        log.lock().push(format!("{tag}:{text}"));
                        Ok(())
                    })
                }),
            );
        }

        for output in ["a", "b"] {
            write_message(
                &mut server_write,
                &Message::Event(Event {
                    seq: 1,
                    event: "output".into(),
                    body: Some(json!({"output": output})),
                }),
            )
            .await;
        }

        // Delivery is asynchronous; poll until both events fanned out.
        for _ in 0..100 {
            if log.lock().len() == 4 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let entries = log.lock().clone();
        assert_eq!(
            entries,
            vec!["first:a", "second:a", "first:b", "second:b"]
        );
    }

    #[tokio::test]
    async fn event_handler_error_does_not_stop_later_handlers() {
        let (broker, _server_read, mut server_write) = broker_over_duplex();

        let reached = Arc::new(AtomicBool::new(false));
        broker.register_event_handler(
            "stopped",
            Arc::new(|_event| {
                Box::pin(async move { Err(DapError::InvalidMessage("bad body".into())) })
            }),
        );
        {
            let reached = Arc::clone(&reached);
            broker.register_event_handler(
                "stopped",
                Arc::new(move |_event| {
                    let reached = Arc::clone(&reached);
                    Box::pin(async move {
                        reached.store(true, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            );
        }

        write_message(
            &mut server_write,
            &Message::Event(Event {
                seq: 1,
                event: "stopped".into(),
                body: None,
            }),
        )
        .await;

        for _ in 0..100 {
            if reached.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(reached.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn close_fails_all_pending_requests() {
        let (broker, mut server_read, _server_write) = broker_over_duplex();
        let mut decoder = FrameDecoder::new();

        let pending = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.send_request("threads", None).await })
        };
        // Wait until the request is on the wire so the slot is installed.
        let _ = read_one_message(&mut server_read, &mut decoder).await;

        broker.close();
        broker.close(); // idempotent

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, DapError::TransportFailure(_)));
        assert!(broker.is_closed());
        assert!(*broker.closed_signal().borrow());

        let err = broker.send_request("threads", None).await.unwrap_err();
        assert!(matches!(err, DapError::TransportFailure(_)));
    }

    #[tokio::test]
    async fn adapter_disconnect_closes_broker() {
        let (broker, server_read, server_write) = broker_over_duplex();
        drop(server_read);
        drop(server_write);

        let mut closed = broker.closed_signal();
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !*closed.borrow() {
                closed.changed().await.unwrap();
            }
        })
        .await
        .expect("broker should observe the dead transport");
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn send_event_writes_event_message() {
        let (broker, mut server_read, _server_write) = broker_over_duplex();
        let mut decoder = FrameDecoder::new();

        broker
            .send_event("memory", Some(json!({"memoryReference": "0x10"})))
            .await
            .unwrap();

        let Message::Event(event) = read_one_message(&mut server_read, &mut decoder).await else {
            panic!("expected event");
        };
        assert_eq!(event.event, "memory");
        assert!(event.seq >= 1);
    }
}
