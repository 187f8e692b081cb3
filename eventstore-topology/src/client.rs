use std::sync::Arc;

use futures::Future;
use tonic::Status;

use crate::grpc::{handle_error, GrpcClient};
use crate::operations::gossip::{GossipClient, MemberInfo};
use crate::options::retry::RetryOptions;
use crate::selector::Handle;
use crate::{ClientSettings, Endpoint};

/// Represents a client to an EventStoreDB node or cluster.
///
/// Many threads can use an EventStoreDB client at the same time or a single thread can make
/// many asynchronous requests. Every call is routed to the node picked by the client's
/// [`NodeSelector`](crate::NodeSelector).
#[derive(Clone)]
pub struct Client {
    inner: GrpcClient,
}

impl Client {
    /// Creates a gRPC client to an EventStoreDB database.
    pub fn new(settings: ClientSettings) -> crate::Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| crate::Error::InitializationError(e.to_string()))?;

        Client::with_runtime_handle(handle, settings)
    }

    /// Creates a gRPC client to an EventStoreDB database using an existing tokio runtime.
    pub fn with_runtime_handle(
        handle: tokio::runtime::Handle,
        settings: ClientSettings,
    ) -> crate::Result<Self> {
        let inner = GrpcClient::create(handle, settings)?;

        Ok(Client { inner })
    }

    /// Creates a client that discovers the cluster through a custom gossip implementation.
    pub fn with_gossip_client(
        handle: tokio::runtime::Handle,
        settings: ClientSettings,
        gossip: Arc<dyn GossipClient>,
    ) -> crate::Result<Self> {
        let inner = GrpcClient::with_gossip_client(handle, settings, gossip)?;

        Ok(Client { inner })
    }

    /// Sets how calls react to the selected node failing underneath them.
    pub fn with_retry_options(self, retry: RetryOptions) -> Self {
        Client {
            inner: self.inner.with_retry_options(retry),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        self.inner.connection_settings()
    }

    pub async fn current_selected_node(&self) -> crate::Result<Endpoint> {
        let handle = self.inner.current_selected_node().await?;

        Ok(handle.endpoint)
    }

    /// Reads the cluster members as seen by the selected node.
    pub async fn read_gossip(&self) -> crate::Result<Vec<MemberInfo>> {
        let handle = self.inner.current_selected_node().await?;
        let timeout = self.settings().gossip_timeout();

        let outcome =
            match tokio::time::timeout(timeout, self.inner.gossip().read(&handle.endpoint, timeout))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(crate::operations::gossip::GossipError::Timeout),
            };

        outcome.map_err(|e| {
            let e = crate::Error::from(e);
            handle_error(self.inner.selector(), &handle, &e);
            e
        })
    }

    /// Runs a gRPC call against the selected node.
    ///
    /// If the node is unavailable or isn't the leader anymore, node selection is updated and the
    /// call replayed once (see [`RetryOptions`]). Other errors are returned as-is.
    pub async fn execute<F, Fut, A>(&self, action: F) -> crate::Result<A>
    where
        F: Fn(Handle) -> Fut,
        Fut: Future<Output = Result<A, Status>>,
    {
        self.inner.execute(action).await
    }
}
