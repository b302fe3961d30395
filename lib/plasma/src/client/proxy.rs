use crate::client::{ClientError, ClientResult};
use crate::concurrent::ringbuffer::ManyToOneRingBuffer;
use crate::protocol::control::{command, ChannelMessage, CorrelatedMessage, RemoveMessage};

/// Client-side writer of the to-driver ring. Each request draws a fresh
/// correlation id from the ring's shared counter; the caller watches the
/// broadcast for the answer carrying the same id.
pub struct DriverProxy {
    ring: ManyToOneRingBuffer,
    client_id: i64,
}

impl DriverProxy {
    pub fn new(ring: ManyToOneRingBuffer) -> DriverProxy {
        let client_id = ring.next_correlation_id();
        DriverProxy { ring, client_id }
    }

    #[inline]
    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    /// Milliseconds-past-epoch stamp of the Conductor's most recent duty
    /// cycle; the liveness input for `DriverTimeout`.
    #[inline]
    pub fn driver_heartbeat_ms(&self) -> i64 {
        self.ring.consumer_heartbeat_time()
    }

    pub fn add_publication(&self, channel: &str, stream_id: u32) -> ClientResult<i64> {
        let correlation_id = self.ring.next_correlation_id();
        let msg = ChannelMessage {
            client_id: self.client_id,
            correlation_id,
            stream_id,
            channel: channel.to_string(),
        };

        self.write(command::ADD_PUBLICATION, &msg.encode())?;
        Ok(correlation_id)
    }

    pub fn remove_publication(&self, registration_id: i64) -> ClientResult<i64> {
        let correlation_id = self.ring.next_correlation_id();
        let msg = RemoveMessage {
            client_id: self.client_id,
            correlation_id,
            registration_id,
        };

        self.write(command::REMOVE_PUBLICATION, &msg.encode())?;
        Ok(correlation_id)
    }

    pub fn add_subscription(&self, channel: &str, stream_id: u32) -> ClientResult<i64> {
        let correlation_id = self.ring.next_correlation_id();
        let msg = ChannelMessage {
            client_id: self.client_id,
            correlation_id,
            stream_id,
            channel: channel.to_string(),
        };

        self.write(command::ADD_SUBSCRIPTION, &msg.encode())?;
        Ok(correlation_id)
    }

    pub fn remove_subscription(&self, registration_id: i64) -> ClientResult<i64> {
        let correlation_id = self.ring.next_correlation_id();
        let msg = RemoveMessage {
            client_id: self.client_id,
            correlation_id,
            registration_id,
        };

        self.write(command::REMOVE_SUBSCRIPTION, &msg.encode())?;
        Ok(correlation_id)
    }

    /// Tells the driver this client is still alive; silent clients have
    /// their resources reaped.
    pub fn send_keepalive(&self) -> ClientResult<()> {
        let msg = CorrelatedMessage {
            client_id: self.client_id,
            correlation_id: 0,
        };

        self.write(command::CLIENT_KEEPALIVE, &msg.encode())
    }

    fn write(&self, msg_type: i32, payload: &[u8]) -> ClientResult<()> {
        if self.ring.write(msg_type, payload) {
            Ok(())
        } else {
            Err(ClientError::BackPressure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::ringbuffer::descriptor;
    use crate::concurrent::AtomicBuffer;
    use crate::protocol::control::ChannelMessage;

    fn ring(backing: &mut Vec<u8>) -> ManyToOneRingBuffer {
        ManyToOneRingBuffer::new(AtomicBuffer::wrap(backing))
    }

    #[test]
    fn test_commands_carry_unique_correlation_ids() {
        let mut backing = vec![0u8; 4096 + descriptor::TRAILER_LENGTH];
        let proxy = DriverProxy::new(ring(&mut backing));
        let consumer = ring(&mut backing);

        let first = proxy.add_publication("udp://127.0.0.1:40123", 10).unwrap();
        let second = proxy.add_subscription("udp://127.0.0.1:40123", 10).unwrap();
        assert_ne!(first, second);

        let mut seen = Vec::new();
        consumer.read(
            |msg_type, data| {
                seen.push((msg_type, ChannelMessage::decode(data).unwrap()));
            },
            10,
        );

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, command::ADD_PUBLICATION);
        assert_eq!(seen[0].1.correlation_id, first);
        assert_eq!(seen[0].1.client_id, proxy.client_id());
        assert_eq!(seen[1].0, command::ADD_SUBSCRIPTION);
        assert_eq!(seen[1].1.correlation_id, second);
    }

    #[test]
    fn test_back_pressure_when_ring_full() {
        let mut backing = vec![0u8; 1024 + descriptor::TRAILER_LENGTH];
        let proxy = DriverProxy::new(ring(&mut backing));

        let channel = "udp://127.0.0.1:40123";
        let mut outcome = Ok(0);
        for _ in 0..100 {
            outcome = proxy.add_publication(channel, 10);
            if outcome.is_err() {
                break;
            }
        }

        assert!(matches!(outcome, Err(ClientError::BackPressure)));
    }
}
