//! Outbound contract to the cluster master.

use async_trait::async_trait;
use drover_proto::codec::{Codec, FrameHeader, MessageType, FRAME_HEADER_SIZE};
use drover_proto::{FrameworkId, MasterCall, MasterEvent, StreamId};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{HostMgrError, Result};

/// Sends calls to the cluster master.
///
/// Implementations must be safe to call concurrently; the pool invokes
/// declines while placement rounds run in parallel.
#[async_trait]
pub trait MasterClient: Send + Sync {
    async fn call(&self, call: MasterCall) -> Result<()>;
}

/// Supplies the framework registration and the current event-stream id.
///
/// Both are refreshed when the master reissues them after a failover;
/// readers always see the latest pair.
pub trait FrameworkInfoProvider: Send + Sync {
    fn framework_id(&self) -> FrameworkId;
    fn stream_id(&self) -> StreamId;
}

/// Framework info held in memory and refreshed on re-registration.
#[derive(Debug)]
pub struct FrameworkInfo {
    inner: RwLock<(FrameworkId, StreamId)>,
}

impl FrameworkInfo {
    #[must_use]
    pub fn new(framework_id: FrameworkId) -> Self {
        Self {
            inner: RwLock::new((framework_id, StreamId::new())),
        }
    }

    /// Replaces the stream id after a (re)subscription.
    pub fn refresh_stream(&self, stream_id: StreamId) {
        self.inner.write().1 = stream_id;
    }
}

impl FrameworkInfoProvider for FrameworkInfo {
    fn framework_id(&self) -> FrameworkId {
        self.inner.read().0.clone()
    }

    fn stream_id(&self) -> StreamId {
        self.inner.read().1
    }
}

/// Master client speaking the framed wire protocol over TCP.
///
/// The connection is established lazily and dropped on any error; the
/// next call reconnects.
pub struct TcpMasterClient {
    addr: String,
    conn: tokio::sync::Mutex<Option<TcpStream>>,
}

impl TcpMasterClient {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: tokio::sync::Mutex::new(None),
        }
    }

    async fn send(&self, frame: &[u8]) -> std::io::Result<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let stream = TcpStream::connect(&self.addr).await?;
            debug!(addr = %self.addr, "connected to master");
            *guard = Some(stream);
        }
        let stream = guard.as_mut().expect("connection just established");
        match stream.write_all(frame).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // Drop the broken connection; the next call reconnects.
                *guard = None;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl MasterClient for TcpMasterClient {
    async fn call(&self, call: MasterCall) -> Result<()> {
        let mut codec = Codec::new();
        let frame = codec
            .encode(&call, MessageType::Call)
            .map_err(|e| HostMgrError::Internal(e.to_string()))?
            .to_vec();
        self.send(&frame)
            .await
            .map_err(|e| HostMgrError::Unavailable(e.to_string()))
    }
}

/// In-memory master client that records every call.
///
/// Serves tests and local runs without a master.
#[derive(Debug, Default)]
pub struct RecordingMasterClient {
    calls: Mutex<Vec<MasterCall>>,
}

impl RecordingMasterClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies out the calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MasterCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MasterClient for RecordingMasterClient {
    async fn call(&self, call: MasterCall) -> Result<()> {
        self.calls.lock().push(call);
        Ok(())
    }
}

/// Reads framed master events from a stream into a channel until the
/// stream closes or the receiver goes away.
pub async fn read_events(mut stream: TcpStream, tx: mpsc::Sender<MasterEvent>) {
    loop {
        let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
        if stream.read_exact(&mut header_bytes).await.is_err() {
            warn!("master event stream closed");
            return;
        }
        let header = match FrameHeader::parse(&header_bytes) {
            Ok(header) if header.kind == MessageType::Event => header,
            Ok(header) => {
                warn!(kind = ?header.kind, "unexpected frame on event stream");
                return;
            }
            Err(err) => {
                warn!(error = %err, "malformed frame header on event stream");
                return;
            }
        };
        if header.check_body_len().is_err() || !header.version_supported() {
            warn!(body_len = header.body_len, version = header.version, "rejecting frame");
            return;
        }

        let mut body = vec![0u8; header.body_len as usize];
        if stream.read_exact(&mut body).await.is_err() {
            warn!("master event stream closed mid-frame");
            return;
        }
        match Codec::decode::<MasterEvent>(&body) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            Err(err) => warn!(error = %err, "dropping undecodable master event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_proto::OfferId;

    #[tokio::test]
    async fn recording_client_captures_calls() {
        let client = RecordingMasterClient::new();
        let call = MasterCall::Decline {
            framework_id: FrameworkId::from("fw"),
            stream_id: StreamId::new(),
            offer_ids: vec![OfferId::from("o1")],
        };
        client.call(call.clone()).await.unwrap();
        assert_eq!(client.calls(), vec![call]);
    }

    #[test]
    fn framework_info_refreshes_stream() {
        let info = FrameworkInfo::new(FrameworkId::from("fw"));
        let first = info.stream_id();
        let next = StreamId::new();
        info.refresh_stream(next);
        assert_ne!(info.stream_id(), first);
        assert_eq!(info.stream_id(), next);
    }
}
