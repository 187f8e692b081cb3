use std::sync::Arc;

use futures::Future;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tonic::Status;

use crate::operations::gossip::{GossipClient, GrpcGossipClient};
use crate::options::retry::RetryOptions;
use crate::selector::{Handle, NodeSelector};
use crate::ClientSettings;

#[derive(Clone)]
pub(crate) struct GrpcClient {
    selector: NodeSelector,
    gossip: Arc<dyn GossipClient>,
    connection_settings: ClientSettings,
    retry: RetryOptions,
}

impl GrpcClient {
    pub(crate) fn create(
        handle: tokio::runtime::Handle,
        connection_settings: ClientSettings,
    ) -> crate::Result<Self> {
        let gossip = Arc::new(GrpcGossipClient::new(connection_settings.clone()));

        GrpcClient::with_gossip_client(handle, connection_settings, gossip)
    }

    pub(crate) fn with_gossip_client(
        handle: tokio::runtime::Handle,
        connection_settings: ClientSettings,
        gossip: Arc<dyn GossipClient>,
    ) -> crate::Result<Self> {
        let selector = NodeSelector::with_runtime_handle(
            handle,
            connection_settings.clone(),
            gossip.clone(),
            SmallRng::from_entropy(),
        )?;

        Ok(GrpcClient {
            selector,
            gossip,
            connection_settings,
            retry: RetryOptions::default(),
        })
    }

    pub(crate) fn with_retry_options(self, retry: RetryOptions) -> Self {
        Self { retry, ..self }
    }

    /// Runs `action` against the selected node. When the node turns out to be unavailable or
    /// not the leader, the selection is updated and the action replayed, up to the retry limit.
    pub(crate) async fn execute<F, Fut, A>(&self, action: F) -> crate::Result<A>
    where
        F: Fn(Handle) -> Fut,
        Fut: Future<Output = Result<A, Status>>,
    {
        let mut attempts = 0usize;

        loop {
            debug!("Sending node selection request...");
            let handle = self.current_selected_node().await?;
            debug!("Node {} selected", handle.endpoint());

            let e = match action(handle.clone()).await {
                Ok(a) => return Ok(a),
                Err(status) => crate::Error::from_grpc(status),
            };

            handle_error(&self.selector, &handle, &e);

            if !e.is_node_failure() || attempts >= self.retry.limit {
                return Err(e);
            }

            attempts += 1;
            debug!(
                "Retrying operation on a new node. attempt {}/{}",
                attempts, self.retry.limit
            );

            tokio::time::sleep(self.retry.delay).await;
        }
    }

    pub(crate) async fn current_selected_node(&self) -> crate::Result<Handle> {
        self.selector.select().await
    }

    pub(crate) fn selector(&self) -> &NodeSelector {
        &self.selector
    }

    pub(crate) fn gossip(&self) -> &dyn GossipClient {
        self.gossip.as_ref()
    }

    pub(crate) fn connection_settings(&self) -> &ClientSettings {
        &self.connection_settings
    }
}

pub(crate) fn handle_error(selector: &NodeSelector, handle: &Handle, err: &crate::Error) {
    if let crate::Error::ServerError(ref message) = err {
        error!(
            "Current selected EventStoreDB node gone unavailable. Starting node selection process: {}",
            message
        );

        selector.invalidate(handle);
    } else if let crate::Error::NotLeaderException(ref leader) = err {
        selector.redirect(handle, leader.clone());

        warn!(
            "NotLeaderException found. Start reconnection process on: {}",
            leader
        );
    } else if let crate::Error::Grpc(ref status) = err {
        debug!(
            "Operation unexpected error: code: {}, message: {}",
            status.code(),
            status.message()
        );
    }
}
