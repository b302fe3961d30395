use crate::client::proxy::DriverProxy;
use crate::client::{ClientError, ClientResult};
use crate::concurrent::broadcast::CopyBroadcastReceiver;
use crate::protocol::control::{
    response, ErrorResponseMessage, InactiveConnectionMessage, NewConnectionMessage,
    NewPublicationMessage, OperationSucceededMessage,
};
use ion::time::timestamp_millis;
use std::thread;
use std::time::Duration;

/// Everything the driver can say to a client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    NewPublication(NewPublicationMessage),
    NewConnection(NewConnectionMessage),
    InactiveConnection(InactiveConnectionMessage),
    OperationSucceeded(OperationSucceededMessage),
    Error(ErrorResponseMessage),
}

/// Client-side reader of the to-clients broadcast. Request/response pairs
/// are matched on the active correlation id; connection events fan out to
/// every registered listener regardless of correlation. Responses for
/// correlation ids nobody is waiting on are discarded.
pub struct ClientConductor {
    receiver: CopyBroadcastReceiver,
    listeners: Vec<Box<dyn FnMut(&ClientEvent) + Send>>,
    driver_timeout_ms: u64,
}

impl ClientConductor {
    pub fn new(receiver: CopyBroadcastReceiver) -> ClientConductor {
        ClientConductor {
            receiver,
            listeners: Vec::new(),
            driver_timeout_ms: 10_000,
        }
    }

    pub fn set_driver_timeout_ms(&mut self, timeout_ms: u64) {
        self.driver_timeout_ms = timeout_ms;
    }

    /// Registers a callback for connection lifecycle events.
    pub fn add_listener<F: FnMut(&ClientEvent) + Send + 'static>(&mut self, listener: F) {
        self.listeners.push(Box::new(listener));
    }

    fn decode(msg_type: i32, data: &[u8]) -> Option<ClientEvent> {
        match msg_type {
            response::ON_NEW_PUBLICATION => NewPublicationMessage::decode(data)
                .ok()
                .map(ClientEvent::NewPublication),
            response::ON_NEW_CONNECTED_SUBSCRIPTION => NewConnectionMessage::decode(data)
                .ok()
                .map(ClientEvent::NewConnection),
            response::ON_INACTIVE_CONNECTION => InactiveConnectionMessage::decode(data)
                .ok()
                .map(ClientEvent::InactiveConnection),
            response::ON_OPERATION_SUCCEEDED => OperationSucceededMessage::decode(data)
                .ok()
                .map(ClientEvent::OperationSucceeded),
            response::ON_ERROR_RESPONSE => ErrorResponseMessage::decode(data)
                .ok()
                .map(ClientEvent::Error),
            _ => None,
        }
    }

    /// Drains at most one broadcast record. Connection events are fanned
    /// out; a response matching `active_correlation_id` is returned.
    pub fn poll(&mut self, active_correlation_id: Option<i64>) -> Option<ClientEvent> {
        let mut matched = None;
        let listeners = &mut self.listeners;

        self.receiver.receive(|msg_type, data| {
            let event = match Self::decode(msg_type, data) {
                Some(event) => event,
                None => return,
            };

            match &event {
                ClientEvent::NewConnection(_) | ClientEvent::InactiveConnection(_) => {
                    for listener in listeners.iter_mut() {
                        listener(&event);
                    }
                    // Connected-subscription events also answer the pending
                    // subscriber, correlation permitting.
                    if let ClientEvent::NewConnection(msg) = &event {
                        if Some(msg.correlation_id) == active_correlation_id {
                            matched = Some(event.clone());
                        }
                    }
                }
                ClientEvent::NewPublication(msg) => {
                    if Some(msg.correlation_id) == active_correlation_id {
                        matched = Some(event.clone());
                    }
                }
                ClientEvent::OperationSucceeded(msg) => {
                    if Some(msg.correlation_id) == active_correlation_id {
                        matched = Some(event.clone());
                    }
                }
                ClientEvent::Error(msg) => {
                    if Some(msg.offending_correlation_id) == active_correlation_id {
                        matched = Some(event.clone());
                    }
                }
            }
        });

        matched
    }

    /// Spins on the broadcast until the response for `correlation_id`
    /// arrives. Raises `DriverTimeout` when the deadline passes or the
    /// driver's heartbeat goes stale, and maps an error response onto
    /// `Rejected`.
    pub fn await_response(
        &mut self,
        proxy: &DriverProxy,
        correlation_id: i64,
    ) -> ClientResult<ClientEvent> {
        let deadline = timestamp_millis() + self.driver_timeout_ms;

        loop {
            if let Some(event) = self.poll(Some(correlation_id)) {
                return match event {
                    ClientEvent::Error(response) => Err(ClientError::Rejected(response)),
                    event => Ok(event),
                };
            }

            let now = timestamp_millis();
            if now >= deadline {
                return Err(ClientError::DriverTimeout);
            }

            let heartbeat = proxy.driver_heartbeat_ms();
            if heartbeat > 0 && now.saturating_sub(heartbeat as u64) > self.driver_timeout_ms {
                return Err(ClientError::DriverTimeout);
            }

            thread::sleep(Duration::from_millis(1));
        }
    }
}
