//! gRPC event stream for enforcers
//!
//! Each `StreamEvents` call registers the caller in the [`FanOut`] registry
//! and returns its channel as a server stream. The client id comes from the
//! request body, falling back to the `x-client-id` metadata header. Dropping
//! the stream, as tonic does when the enforcer hangs up, releases the
//! registration.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use crate::proto::event_stream_service_server::{EventStreamService, EventStreamServiceServer};
use crate::proto::{self, Event};
use crate::{Error, Result};

use super::{FanOut, SharedFanOut};

/// Metadata header carrying the client id when the request body has none
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// gRPC server streaming store changes to enforcers
pub struct EventStreamServer {
    fanout: SharedFanOut,
}

impl EventStreamServer {
    /// Create a server over an existing registry
    pub fn new(fanout: SharedFanOut) -> Self {
        Self { fanout }
    }

    /// Create a server with a fresh registry
    pub fn with_new_registry() -> (Self, SharedFanOut) {
        let fanout = Arc::new(FanOut::new());
        (Self::new(fanout.clone()), fanout)
    }

    /// Convert to a tonic service
    pub fn into_service(self) -> EventStreamServiceServer<Self> {
        EventStreamServiceServer::new(self)
    }

    /// Serve on `addr` until `shutdown` resolves
    pub async fn serve(
        fanout: SharedFanOut,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<()> {
        info!(%addr, "Starting enforcer event stream");

        Server::builder()
            .add_service(Self::new(fanout).into_service())
            .serve_with_shutdown(addr, shutdown)
            .await
            .map_err(|e| Error::internal_with_context(e.to_string(), "grpc"))
    }
}

/// One enforcer's outbound stream
struct ClientStream {
    inner: ReceiverStream<Event>,
    fanout: SharedFanOut,
    client_id: String,
}

impl Stream for ClientStream {
    type Item = std::result::Result<Event, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|event| event.map(Ok))
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        // the sender only reports closed once the receiver is
        self.inner.close();
        self.fanout.release(&self.client_id);
    }
}

fn client_id<T>(request: &Request<T>, body_id: &str) -> Option<String> {
    if !body_id.is_empty() {
        return Some(body_id.to_string());
    }
    request
        .metadata()
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[tonic::async_trait]
impl EventStreamService for EventStreamServer {
    type StreamEventsStream = Pin<Box<dyn Stream<Item = std::result::Result<Event, Status>> + Send + 'static>>;

    #[instrument(skip(self, request))]
    async fn stream_events(
        &self,
        request: Request<proto::Request>,
    ) -> std::result::Result<Response<Self::StreamEventsStream>, Status> {
        let remote_addr = request.remote_addr();
        let id = client_id(&request, &request.get_ref().client_id)
            .ok_or_else(|| Status::invalid_argument("client id is required"))?;
        info!(client_id = %id, ?remote_addr, "New enforcer stream");

        let outbound = ClientStream {
            inner: ReceiverStream::new(self.fanout.connect(&id)),
            fanout: self.fanout.clone(),
            client_id: id,
        };
        Ok(Response::new(Box::pin(outbound)))
    }
}
