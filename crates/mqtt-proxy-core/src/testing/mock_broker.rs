//! Mock MQTT broker for integration testing.
//!
//! A lightweight mock broker that:
//! - Accepts MQTT connections of any protocol level
//! - Records every packet received
//! - Acknowledges CONNECT, SUBSCRIBE, UNSUBSCRIBE, PINGREQ and QoS 1/2 PUBLISH
//! - Pushes PUBLISH packets to connected clients on demand

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::network::codec::MqttCodec;
use crate::packet::{Packet, PacketType, ProtocolVersion, Publish, QoS, RawPacket};

/// Mock MQTT broker for testing.
pub struct MockBroker {
    address: String,
    shutdown: CancellationToken,
    received: Arc<RwLock<Vec<Packet>>>,
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<Packet>>>>,
}

impl MockBroker {
    /// Create a new mock broker that will bind to the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            shutdown: CancellationToken::new(),
            received: Arc::new(RwLock::new(Vec::new())),
            clients: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start the mock broker.
    ///
    /// Returns the actual address the broker is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn start(&mut self) -> std::io::Result<String> {
        let listener = TcpListener::bind(&self.address).await?;
        let actual_address = listener.local_addr()?.to_string();
        self.address.clone_from(&actual_address);

        let shutdown = self.shutdown.clone();
        let received = Arc::clone(&self.received);
        let clients = Arc::clone(&self.clients);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = listener.accept() => {
                        let Ok((stream, _addr)) = result else { break };

                        let (tx, rx) = mpsc::unbounded_channel();
                        clients.lock().await.push(tx);

                        let received = Arc::clone(&received);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            Self::handle_connection(stream, received, rx, shutdown).await;
                        });
                    }
                }
            }
        });

        Ok(actual_address)
    }

    /// Stop the mock broker and close every connection.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Get the broker address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// All packets received so far, in arrival order.
    pub async fn received(&self) -> Vec<Packet> {
        self.received.read().await.clone()
    }

    /// Received packets of one type.
    pub async fn received_of(&self, packet_type: PacketType) -> Vec<Packet> {
        self.received
            .read()
            .await
            .iter()
            .filter(|p| p.packet_type() == packet_type)
            .cloned()
            .collect()
    }

    /// Waits until at least `count` packets of `packet_type` have arrived.
    ///
    /// Returns what was received when the timeout elapses.
    pub async fn wait_for(
        &self,
        packet_type: PacketType,
        count: usize,
        timeout: Duration,
    ) -> Vec<Packet> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let packets = self.received_of(packet_type).await;
            if packets.len() >= count || tokio::time::Instant::now() >= deadline {
                return packets;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Clear the record of received packets.
    pub async fn clear(&self) {
        self.received.write().await.clear();
    }

    /// Sends a PUBLISH to every connected client.
    ///
    /// Returns how many connections it was queued for.
    pub async fn publish(&self, publish: Publish) -> usize {
        let mut clients = self.clients.lock().await;
        clients.retain(|tx| !tx.is_closed());
        clients
            .iter()
            .filter(|tx| tx.send(Packet::Publish(publish.clone())).is_ok())
            .count()
    }

    /// Number of open client connections.
    pub async fn connections(&self) -> usize {
        let mut clients = self.clients.lock().await;
        clients.retain(|tx| !tx.is_closed());
        clients.len()
    }

    async fn handle_connection(
        stream: TcpStream,
        received: Arc<RwLock<Vec<Packet>>>,
        mut outbound: mpsc::UnboundedReceiver<Packet>,
        shutdown: CancellationToken,
    ) {
        let codec = MqttCodec::new();
        let mut framed = Framed::new(stream, codec.clone());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(packet) = outbound.recv() => {
                    if framed.send(&packet).await.is_err() {
                        break;
                    }
                }
                next = framed.next() => {
                    let Some(Ok(packet)) = next else { break };
                    received.write().await.push(packet.clone());

                    if packet.packet_type() == PacketType::Disconnect {
                        break;
                    }
                    if let Some(reply) = Self::reply(&packet, codec.protocol_version()) {
                        if framed.send(&reply).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// The acknowledgement a real broker would send for `packet`.
    fn reply(packet: &Packet, version: ProtocolVersion) -> Option<Packet> {
        let v5 = version.is_v5();
        let (packet_type, body) = match packet {
            Packet::Connect(_) => {
                // session present = 0, return/reason code = success
                let body: &[u8] = if v5 { &[0, 0, 0] } else { &[0, 0] };
                (PacketType::Connack, Bytes::copy_from_slice(body))
            }
            Packet::Subscribe(subscribe) => {
                let mut body = BytesMut::new();
                body.put_u16(subscribe.packet_id);
                if v5 {
                    body.put_u8(0);
                }
                for subscription in &subscribe.subscriptions {
                    body.put_u8(subscription.options.qos() as u8);
                }
                (PacketType::Suback, body.freeze())
            }
            Packet::Unsubscribe(unsubscribe) => {
                let mut body = BytesMut::new();
                body.put_u16(unsubscribe.packet_id);
                if v5 {
                    body.put_u8(0);
                    body.put_bytes(0, unsubscribe.topics.len());
                }
                (PacketType::Unsuback, body.freeze())
            }
            Packet::Publish(publish) => {
                let packet_id = publish.packet_id?;
                let packet_type = match publish.qos {
                    QoS::AtMostOnce => return None,
                    QoS::AtLeastOnce => PacketType::Puback,
                    QoS::ExactlyOnce => PacketType::Pubrec,
                };
                (packet_type, Bytes::copy_from_slice(&packet_id.to_be_bytes()))
            }
            Packet::Other(raw) => match raw.packet_type {
                PacketType::Pingreq => (PacketType::Pingresp, Bytes::new()),
                // PUBREL carries the packet id in its first two bytes
                PacketType::Pubrel if raw.body.len() >= 2 => {
                    (PacketType::Pubcomp, raw.body.slice(..2))
                }
                _ => return None,
            },
            Packet::Disconnect(_) => return None,
        };

        Some(Packet::Other(RawPacket {
            packet_type,
            flags: 0,
            body,
        }))
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Connect, Subscribe, Subscription};

    async fn connected(broker: &MockBroker, version: ProtocolVersion) -> Framed<TcpStream, MqttCodec> {
        let stream = TcpStream::connect(broker.address()).await.unwrap();
        let mut framed = Framed::new(stream, MqttCodec::new());
        framed
            .send(&Packet::Connect(Connect::new(version, "mock-test")))
            .await
            .unwrap();
        let connack = framed.next().await.unwrap().unwrap();
        assert_eq!(connack.packet_type(), PacketType::Connack);
        framed
    }

    #[tokio::test]
    async fn test_connack_and_record() {
        let mut broker = MockBroker::new("127.0.0.1:0");
        broker.start().await.unwrap();

        let _client = connected(&broker, ProtocolVersion::V3_1_1).await;

        let connects = broker.received_of(PacketType::Connect).await;
        assert_eq!(connects.len(), 1);
        let Packet::Connect(connect) = &connects[0] else {
            panic!("expected CONNECT");
        };
        assert_eq!(connect.client_id, "mock-test");
    }

    #[tokio::test]
    async fn test_suback_grants_requested_qos() {
        let mut broker = MockBroker::new("127.0.0.1:0");
        broker.start().await.unwrap();
        let mut client = connected(&broker, ProtocolVersion::V5).await;

        let subscribe = Subscribe {
            packet_id: 7,
            properties: Default::default(),
            subscriptions: vec![
                Subscription::new("a", QoS::AtMostOnce),
                Subscription::new("b", QoS::AtLeastOnce),
            ],
        };
        client.send(&Packet::Subscribe(subscribe)).await.unwrap();

        let Packet::Other(suback) = client.next().await.unwrap().unwrap() else {
            panic!("expected SUBACK");
        };
        assert_eq!(suback.packet_type, PacketType::Suback);
        assert_eq!(&suback.body[..], &[0x00, 0x07, 0x00, 0x00, 0x01]);
    }

    #[tokio::test]
    async fn test_push_publish() {
        let mut broker = MockBroker::new("127.0.0.1:0");
        broker.start().await.unwrap();
        let mut client = connected(&broker, ProtocolVersion::V3_1_1).await;

        let queued = broker
            .publish(Publish::new("news", Bytes::from_static(b"hi")))
            .await;
        assert_eq!(queued, 1);

        let Packet::Publish(publish) = client.next().await.unwrap().unwrap() else {
            panic!("expected PUBLISH");
        };
        assert_eq!(publish.topic, "news");
        assert_eq!(&publish.payload[..], b"hi");
    }
}
