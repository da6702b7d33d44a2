//! TCP transports.
//!
//! Three listeners, mirroring the negotiate/subscribe/push split the
//! client protocol expects:
//!
//! - **connector** — line-based request/reply used to probe the engine
//!   and register clients
//! - **publisher** — every connected subscriber receives each framed
//!   engine message; subscribers filter by the client index mask in
//!   the message header
//! - **collector** — clients push framed instructions which are queued
//!   for the next controller tick
//!
//! Frames on the publisher and collector are length-prefixed with a
//! little-endian `u32`.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed, LinesCodec};
use tracing::{debug, info, warn};

use glimpse_core::wire::SessionId;
use glimpse_core::{EngineError, EngineGateway, Instruction, InstructionHeader, MessageSink};

/// Upper bound on a single frame in either direction.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

// ── Frame codec ──────────────────────────────────────────────────

/// Length-prefixed binary frames: `u32` little-endian length followed
/// by that many bytes.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = EngineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let length = u32::from_le_bytes(src[0..4].try_into().unwrap_or([0; 4])) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(EngineError::MalformedFrame("frame length exceeds limit"));
        }
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }
        src.advance(4);
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = EngineError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_FRAME_SIZE {
            return Err(EngineError::MalformedFrame("frame length exceeds limit"));
        }
        dst.reserve(4 + item.len());
        dst.put_u32_le(item.len() as u32);
        dst.put_slice(&item);
        Ok(())
    }
}

// ── Publisher ────────────────────────────────────────────────────

/// Fan-out hub: every engine frame goes to every live subscriber.
pub struct PublisherHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Bytes>>>,
}

impl PublisherHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for PublisherHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSink for PublisherHub {
    async fn publish(&self, frame: Bytes) -> Result<(), EngineError> {
        // Dead subscribers are dropped on the way through.
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(frame.clone()).is_ok());
        Ok(())
    }
}

/// Accept subscribers and stream published frames at them until they
/// hang up.
pub async fn run_publisher_listener(listener: TcpListener, hub: Arc<PublisherHub>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "publisher accept failed");
                continue;
            }
        };
        debug!(%peer, "subscriber connected");
        let mut rx = hub.subscribe();
        tokio::spawn(async move {
            let mut framed = Framed::new(stream, FrameCodec);
            while let Some(frame) = rx.recv().await {
                if framed.send(frame).await.is_err() {
                    break;
                }
            }
            debug!(%peer, "subscriber disconnected");
        });
    }
}

// ── Collector ────────────────────────────────────────────────────

/// Accept instruction pushers and queue every valid instruction on
/// the gateway.
pub async fn run_collector(
    listener: TcpListener,
    gateway: Arc<EngineGateway>,
    session_id: SessionId,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "collector accept failed");
                continue;
            }
        };
        debug!(%peer, "instruction pusher connected");
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            let mut framed = Framed::new(stream, FrameCodec);
            while let Some(result) = framed.next().await {
                let frame = match result {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(%peer, error = %e, "dropping instruction connection");
                        break;
                    }
                };
                match InstructionHeader::decode(&mut frame.clone()) {
                    Ok(header) if header.session_id != session_id => {
                        warn!(%peer, "instruction for a different session");
                        continue;
                    }
                    Err(e) => {
                        debug!(%peer, error = %e, "undecodable instruction header");
                        continue;
                    }
                    Ok(_) => {}
                }
                match Instruction::decode(frame) {
                    Ok(instruction) => gateway.submit(instruction),
                    Err(e) => debug!(%peer, error = %e, "undecodable instruction"),
                }
            }
            debug!(%peer, "instruction pusher disconnected");
        });
    }
}

// ── Connector ────────────────────────────────────────────────────

/// Ports the connector hands out to clients.
#[derive(Debug, Clone, Copy)]
pub struct ConnectorPorts {
    pub publisher_port: u16,
    pub collector_port: u16,
}

/// Accept request/reply connections speaking the line protocol:
///
/// ```text
/// ping                      -> pong
/// comm                      -> <publisherPort>,<collectorPort>
/// connect,<sessionHex>      -> <clientId:08x>,<clientIndex:016x>
/// disconnect,<clientId:08x> -> ok
/// anything else             -> error,<reason>
/// ```
pub async fn run_connector(
    listener: TcpListener,
    gateway: Arc<EngineGateway>,
    session_id: SessionId,
    ports: ConnectorPorts,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "connector accept failed");
                continue;
            }
        };
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            if let Err(e) = serve_connector(stream, gateway, session_id, ports).await {
                debug!(%peer, error = %e, "connector session ended");
            }
        });
    }
}

async fn serve_connector(
    stream: TcpStream,
    gateway: Arc<EngineGateway>,
    session_id: SessionId,
    ports: ConnectorPorts,
) -> Result<(), EngineError> {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(256));
    while let Some(line) = framed.next().await {
        let line = line.map_err(|_| EngineError::MalformedFrame("connector line too long"))?;
        let reply = handle_connector_request(line.trim(), &gateway, session_id, ports);
        framed
            .send(reply)
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
    }
    Ok(())
}

fn handle_connector_request(
    request: &str,
    gateway: &EngineGateway,
    session_id: SessionId,
    ports: ConnectorPorts,
) -> String {
    match request {
        "ping" => "pong".to_string(),
        "comm" => format!("{},{}", ports.publisher_port, ports.collector_port),
        _ => match request.split_once(',') {
            Some(("connect", hex)) => {
                if !session_matches(hex, session_id) {
                    return "error,invalid session".to_string();
                }
                match gateway.connect_client() {
                    Ok((client_id, client_index)) => {
                        info!(
                            client_id = format_args!("{client_id:#010x}"),
                            client_index = format_args!("{client_index:#018x}"),
                            "client connected"
                        );
                        format!("{client_id:08x},{client_index:016x}")
                    }
                    Err(e) => {
                        warn!(error = %e, "connection refused");
                        "error,no capacity".to_string()
                    }
                }
            }
            Some(("disconnect", hex)) => match u32::from_str_radix(hex, 16) {
                Ok(client_id) => match gateway.disconnect_client(client_id) {
                    Ok(()) => {
                        info!(
                            client_id = format_args!("{client_id:#010x}"),
                            "client disconnected"
                        );
                        "ok".to_string()
                    }
                    Err(_) => "error,unknown client".to_string(),
                },
                Err(_) => "error,bad client id".to_string(),
            },
            _ => "error,unknown request".to_string(),
        },
    }
}

fn session_matches(hex: &str, session_id: SessionId) -> bool {
    if hex.len() != 32 {
        return false;
    }
    let mut parsed = [0u8; 16];
    for (i, byte) in parsed.iter_mut().enumerate() {
        match hex
            .get(2 * i..2 * i + 2)
            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
        {
            Some(value) => *byte = value,
            None => return false,
        }
    }
    parsed == session_id
}

/// Render a session id the way the connector expects it back.
pub fn session_hex(session_id: SessionId) -> String {
    session_id.iter().map(|b| format!("{b:02x}")).collect()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use glimpse_core::wire::InstructionKind;
    use glimpse_core::{ClientRegistry, QualitySettings};

    const SESSION_ID: SessionId = [3; 16];

    fn gateway() -> (Arc<EngineGateway>, mpsc::UnboundedReceiver<Bytes>) {
        let registry = Arc::new(Mutex::new(ClientRegistry::new(
            QualitySettings::default(),
            Instant::now(),
        )));
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(EngineGateway::new(registry, tx)), rx)
    }

    // ── Frame codec ──────────────────────────────────────────────

    #[test]
    fn frame_codec_roundtrip() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"hello"), &mut buf)
            .unwrap();
        assert_eq!(&buf[0..4], &5u32.to_le_bytes());
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Bytes::from_static(b"hello"));
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_waits_for_a_full_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u32_le(10);
        buf.put_slice(b"half");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.put_slice(b"-frame");
        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap(),
            Bytes::from_static(b"half-frame")
        );
    }

    #[test]
    fn frame_codec_rejects_oversized_frames() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u32_le(u32::MAX);
        assert!(codec.decode(&mut buf).is_err());
    }

    // ── Connector protocol ───────────────────────────────────────

    #[test]
    fn connector_answers_ping_and_comm() {
        let (gateway, _rx) = gateway();
        let ports = ConnectorPorts {
            publisher_port: 5556,
            collector_port: 5557,
        };
        assert_eq!(
            handle_connector_request("ping", &gateway, SESSION_ID, ports),
            "pong"
        );
        assert_eq!(
            handle_connector_request("comm", &gateway, SESSION_ID, ports),
            "5556,5557"
        );
    }

    #[test]
    fn connector_registers_and_releases_clients() {
        let (gateway, _rx) = gateway();
        let ports = ConnectorPorts {
            publisher_port: 1,
            collector_port: 2,
        };

        let reply =
            handle_connector_request(&format!("connect,{}", session_hex(SESSION_ID)), &gateway, SESSION_ID, ports);
        let (id_hex, index_hex) = reply.split_once(',').expect("id,index reply");
        let client_id = u32::from_str_radix(id_hex, 16).unwrap();
        assert_eq!(u64::from_str_radix(index_hex, 16).unwrap(), 1);

        let reply = handle_connector_request(
            &format!("disconnect,{client_id:08x}"),
            &gateway,
            SESSION_ID,
            ports,
        );
        assert_eq!(reply, "ok");
    }

    #[test]
    fn connector_rejects_a_wrong_session() {
        let (gateway, _rx) = gateway();
        let ports = ConnectorPorts {
            publisher_port: 1,
            collector_port: 2,
        };
        let reply = handle_connector_request(
            &format!("connect,{}", session_hex([9; 16])),
            &gateway,
            SESSION_ID,
            ports,
        );
        assert_eq!(reply, "error,invalid session");
        assert_eq!(
            handle_connector_request("nonsense", &gateway, SESSION_ID, ports),
            "error,unknown request"
        );
    }

    // ── Listeners over localhost ─────────────────────────────────

    #[tokio::test]
    async fn publisher_fans_out_to_every_subscriber() {
        let hub = Arc::new(PublisherHub::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run_publisher_listener(listener, Arc::clone(&hub)));

        let mut first = Framed::new(TcpStream::connect(addr).await.unwrap(), FrameCodec);
        let mut second = Framed::new(TcpStream::connect(addr).await.unwrap(), FrameCodec);

        // Both subscriptions have to be live before publishing.
        while hub.subscriber_count() < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        hub.publish(Bytes::from_static(b"frame")).await.unwrap();
        assert_eq!(first.next().await.unwrap().unwrap(), &b"frame"[..]);
        assert_eq!(second.next().await.unwrap().unwrap(), &b"frame"[..]);
    }

    #[tokio::test]
    async fn collector_queues_pushed_instructions() {
        let (gateway, _rx) = gateway();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run_collector(listener, Arc::clone(&gateway), SESSION_ID));

        let instruction = Instruction {
            client_id: 0xABCD,
            id: 12,
            synchronous: false,
            kind: InstructionKind::Windows,
        };
        let mut pusher = Framed::new(TcpStream::connect(addr).await.unwrap(), FrameCodec);
        pusher.send(instruction.encode(SESSION_ID)).await.unwrap();
        // An instruction for another session never reaches the queue.
        pusher.send(instruction.encode([9; 16])).await.unwrap();
        pusher.flush().await.unwrap();

        let drained = loop {
            let drained = gateway.drain_instructions();
            if !drained.is_empty() {
                break drained;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        };
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].client_id, 0xABCD);
        assert_eq!(drained[0].id, 12);
    }

    #[tokio::test]
    async fn connector_speaks_lines_over_tcp() {
        let (gateway, _rx) = gateway();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run_connector(
            listener,
            gateway,
            SESSION_ID,
            ConnectorPorts {
                publisher_port: 7001,
                collector_port: 7002,
            },
        ));

        let mut lines = Framed::new(
            TcpStream::connect(addr).await.unwrap(),
            LinesCodec::new(),
        );
        lines.send("ping".to_string()).await.unwrap();
        assert_eq!(lines.next().await.unwrap().unwrap(), "pong");
        lines.send("comm".to_string()).await.unwrap();
        assert_eq!(lines.next().await.unwrap().unwrap(), "7001,7002");
    }
}
