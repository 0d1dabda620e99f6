//! Shredstream gRPC Transport
//!
//! Client for the shredstream proxy's `SubscribeEntries` server stream. The
//! two messages involved are small enough to declare by hand with prost.

use async_trait::async_trait;
use tonic::codec::{ProstCodec, Streaming};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use crate::dispatcher::RawFrame;
use crate::stream::{validate_endpoint, FeedConnector, FrameStream, StreamConfig, TransportError};

/// Fully qualified method path of the entry subscription
pub const SUBSCRIBE_ENTRIES_PATH: &str = "/shredstream.ShredstreamProxy/SubscribeEntries";

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeEntriesRequest {}

/// One batch of serialized entries for a slot
#[derive(Clone, PartialEq, prost::Message)]
pub struct EntryMessage {
    #[prost(uint64, tag = "1")]
    pub slot: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub entries: Vec<u8>,
}

/// Thin client over a tonic channel
#[derive(Debug, Clone)]
pub struct ShredstreamClient {
    inner: tonic::client::Grpc<Channel>,
}

impl ShredstreamClient {
    pub fn new(channel: Channel, max_message_size: usize) -> Self {
        let inner = tonic::client::Grpc::new(channel).max_decoding_message_size(max_message_size);
        Self { inner }
    }

    pub async fn subscribe_entries(
        &mut self,
        request: SubscribeEntriesRequest,
    ) -> Result<Streaming<EntryMessage>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("Service was not ready: {}", e)))?;
        let codec: ProstCodec<SubscribeEntriesRequest, EntryMessage> = ProstCodec::default();
        let path = PathAndQuery::from_static(SUBSCRIBE_ENTRIES_PATH);
        let response = self
            .inner
            .server_streaming(tonic::Request::new(request), path, codec)
            .await?;
        Ok(response.into_inner())
    }
}

/// Build the tonic endpoint with timeouts and keep-alive from `config`
pub fn build_endpoint(config: &StreamConfig) -> Result<Endpoint, TransportError> {
    validate_endpoint(&config.endpoint)?;
    let endpoint = Endpoint::from_shared(config.endpoint.clone())
        .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", config.endpoint, e)))?
        .connect_timeout(config.connect_timeout)
        .http2_keep_alive_interval(config.keepalive_interval)
        .keep_alive_timeout(config.keepalive_timeout)
        .keep_alive_while_idle(true);
    Ok(endpoint)
}

/// Connects to a shredstream proxy over gRPC
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    config: StreamConfig,
}

impl GrpcConnector {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

#[async_trait]
impl FeedConnector for GrpcConnector {
    async fn subscribe(&self) -> Result<Box<dyn FrameStream>, TransportError> {
        let channel = build_endpoint(&self.config)?
            .connect()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        info!("Connected to shredstream proxy at {}", self.config.endpoint);

        let mut client = ShredstreamClient::new(channel, self.config.max_message_size);
        let inner = client
            .subscribe_entries(SubscribeEntriesRequest {})
            .await
            .map_err(|status| TransportError::SubscriptionFailed(status.to_string()))?;

        Ok(Box::new(GrpcFrameStream { inner }))
    }
}

/// Entry subscription backed by a tonic response stream
pub struct GrpcFrameStream {
    inner: Streaming<EntryMessage>,
}

#[async_trait]
impl FrameStream for GrpcFrameStream {
    async fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError> {
        match self.inner.message().await {
            // prost hands over an owned buffer, so it moves in without a copy
            Ok(Some(message)) => {
                debug!(slot = message.slot, bytes = message.entries.len(), "Received entry");
                Ok(Some(RawFrame::new(message.slot, message.entries)))
            }
            Ok(None) => Ok(None),
            Err(status) => Err(TransportError::Stream(status.to_string())),
        }
    }
}
