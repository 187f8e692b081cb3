use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::operations::gossip::{GossipClient, MemberInfo, VNodeState};
use crate::settings::{ClientSettings, TopologyClusterMode};
use crate::types::{Endpoint, NodePreference};

/// A node picked by a [`NodeSelector`].
///
/// Every selection gets its own id, so failures reported against an outdated selection don't
/// throw away a newer one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handle {
    id: Uuid,
    pub(crate) endpoint: Endpoint,
}

impl Handle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn url(&self) -> String {
        self.endpoint.url()
    }
}

/// Decides which node the next call goes to.
///
/// In standalone mode the configured node is returned as-is. Otherwise the selection is owned
/// by a background task that reads gossip from the seeds, ranks the members according to the
/// node preference and caches the winner for the discovery interval. Concurrent callers asking
/// for a node while a discovery is running all receive that discovery's outcome.
#[derive(Clone)]
pub struct NodeSelector {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Standalone(Handle),
    Cluster(UnboundedSender<Msg>),
}

impl NodeSelector {
    /// Creates a node selector on the current tokio runtime.
    pub fn new(settings: ClientSettings, gossip: Arc<dyn GossipClient>) -> crate::Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| crate::Error::InitializationError(e.to_string()))?;

        NodeSelector::with_runtime_handle(handle, settings, gossip, SmallRng::from_entropy())
    }

    /// Creates a node selector on the given runtime, breaking ties between equally ranked
    /// members with `rng`.
    pub fn with_runtime_handle(
        handle: tokio::runtime::Handle,
        settings: ClientSettings,
        gossip: Arc<dyn GossipClient>,
        rng: SmallRng,
    ) -> crate::Result<Self> {
        settings.validate()?;

        if let TopologyClusterMode::Standalone(endpoint) = settings.cluster_mode() {
            let handle = Handle {
                id: Uuid::nil(),
                endpoint: endpoint.clone(),
            };

            return Ok(NodeSelector {
                inner: Inner::Standalone(handle),
            });
        }

        let sender = topology_state_machine(handle, Topology::new(settings, gossip, rng));

        Ok(NodeSelector {
            inner: Inner::Cluster(sender),
        })
    }

    pub async fn select(&self) -> crate::Result<Handle> {
        match &self.inner {
            Inner::Standalone(handle) => Ok(handle.clone()),
            Inner::Cluster(sender) => {
                let (resp, consumer) = oneshot::channel();

                if sender.send(Msg::Select(resp)).is_err() {
                    return Err(crate::Error::ConnectionClosed);
                }

                match consumer.await {
                    Ok(outcome) => outcome.map_err(|e| {
                        crate::Error::MaxDiscoveryAttemptReached(e.attempts)
                    }),
                    Err(_) => Err(crate::Error::ConnectionClosed),
                }
            }
        }
    }

    /// Drops the selection if `handle` is still the current one, so the next call goes through
    /// discovery again.
    pub fn invalidate(&self, handle: &Handle) {
        if let Inner::Cluster(sender) = &self.inner {
            let _ = sender.send(Msg::Invalidate(handle.id));
        }
    }

    /// Replaces the selection made through `handle` by `leader`.
    pub fn redirect(&self, handle: &Handle, leader: Endpoint) {
        if let Inner::Cluster(sender) = &self.inner {
            let _ = sender.send(Msg::Redirect(handle.id, leader));
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct DiscoveryExhausted {
    attempts: usize,
}

type Outcome = Result<Handle, DiscoveryExhausted>;

enum Msg {
    Select(oneshot::Sender<Outcome>),
    Invalidate(Uuid),
    Redirect(Uuid, Endpoint),
}

impl std::fmt::Debug for Msg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Msg::Select(_) => write!(f, "Msg::Select"),
            Msg::Invalidate(id) => write!(f, "Msg::Invalidate({})", id),
            Msg::Redirect(id, endpoint) => write!(f, "Msg::Redirect({}, {})", id, endpoint),
        }
    }
}

fn topology_state_machine(
    handle: tokio::runtime::Handle,
    mut topology: Topology,
) -> UnboundedSender<Msg> {
    let (sender, mut consumer) = tokio::sync::mpsc::unbounded_channel::<Msg>();

    handle.spawn(async move {
        while let Some(msg) = consumer.recv().await {
            match msg {
                Msg::Select(resp) => {
                    let outcome = topology.select().await;
                    let others = share_outcome(&mut consumer, &outcome);

                    let _ = resp.send(outcome);

                    for msg in others {
                        topology.handle(msg);
                    }
                }

                msg => topology.handle(msg),
            }
        }

        debug!("Node selector stopped");
    });

    sender
}

/// Answers every selection request that queued up during a selection with its outcome. Other
/// messages are handed back, in order.
fn share_outcome(consumer: &mut UnboundedReceiver<Msg>, outcome: &Outcome) -> Vec<Msg> {
    let mut others = Vec::new();
    let mut shared = 0usize;

    while let Ok(msg) = consumer.try_recv() {
        match msg {
            Msg::Select(resp) => {
                shared += 1;
                let _ = resp.send(outcome.clone());
            }

            msg => others.push(msg),
        }
    }

    if shared > 0 {
        debug!("Node selection outcome shared with {} waiting callers", shared);
    }

    others
}

struct Selected {
    handle: Handle,
    fetched_at: Instant,
}

struct Topology {
    settings: ClientSettings,
    gossip: Arc<dyn GossipClient>,
    rng: SmallRng,
    selected: Option<Selected>,
    last_members: Option<Vec<MemberInfo>>,
    failed_endpoint: Option<Endpoint>,
}

impl Topology {
    fn new(settings: ClientSettings, gossip: Arc<dyn GossipClient>, rng: SmallRng) -> Self {
        Self {
            settings,
            gossip,
            rng,
            selected: None,
            last_members: None,
            failed_endpoint: None,
        }
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Invalidate(id) => self.invalidate(id),
            Msg::Redirect(id, endpoint) => self.redirect(id, endpoint),
            Msg::Select(_) => error!("Selection requests must go through the state machine"),
        }
    }

    async fn select(&mut self) -> Outcome {
        if let Some(selected) = self.selected.as_ref() {
            if selected.fetched_at.elapsed() <= self.settings.discovery_interval() {
                return Ok(selected.handle.clone());
            }

            debug!(
                "Selection of {} is older than the discovery interval",
                selected.handle.endpoint
            );
        }

        self.selected = None;

        match self.discover().await {
            Ok(endpoint) => {
                let handle = Handle {
                    id: Uuid::new_v4(),
                    endpoint,
                };

                debug!("Node {} selected", handle.endpoint);

                self.failed_endpoint = None;
                self.selected = Some(Selected {
                    handle: handle.clone(),
                    fetched_at: Instant::now(),
                });

                Ok(handle)
            }

            Err(e) => {
                error!(
                    "Node selection failed after {} discovery attempts",
                    e.attempts
                );

                Err(e)
            }
        }
    }

    fn invalidate(&mut self, id: Uuid) {
        match self.selected.take() {
            Some(selected) if selected.handle.id == id => {
                warn!(
                    "Selected node {} is no longer usable. Starting node selection process on next call",
                    selected.handle.endpoint
                );

                self.failed_endpoint = Some(selected.handle.endpoint);
            }

            current => {
                debug!("Ignoring invalidation of outdated selection {}", id);
                self.selected = current;
            }
        }
    }

    /// Only the current selection can be redirected. Once it was invalidated or replaced, every
    /// handle issued so far is outdated.
    fn redirect(&mut self, id: Uuid, endpoint: Endpoint) {
        match self.selected.as_ref() {
            Some(selected) if selected.handle.id == id => {}
            _ => {
                debug!("Ignoring redirection of outdated selection {}", id);
                return;
            }
        }

        info!("Redirecting node selection to {}", endpoint);

        self.selected = Some(Selected {
            handle: Handle {
                id: Uuid::new_v4(),
                endpoint,
            },
            fetched_at: Instant::now(),
        });
    }

    async fn discover(&mut self) -> Result<Endpoint, DiscoveryExhausted> {
        let max_attempts = self.settings.max_discover_attempts();
        let mut previous_candidates = self.candidates_from_old_gossip();

        for attempt in 1..=max_attempts {
            let candidates = previous_candidates
                .take()
                .unwrap_or_else(|| self.settings.cluster_mode().seeds());

            debug!(
                "Discovery attempt {}/{}. List of candidates: {:?}",
                attempt, max_attempts, candidates
            );

            if let Some(endpoint) = self.discovery_round(candidates).await {
                return Ok(endpoint);
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.settings.discovery_interval()).await;
            }
        }

        debug!("Reached maximum discovery attempt count");

        Err(DiscoveryExhausted {
            attempts: max_attempts,
        })
    }

    /// Goes through the candidates until one of them answers with gossip. The first answer
    /// decides the outcome of the round.
    async fn discovery_round(&mut self, candidates: Vec<Endpoint>) -> Option<Endpoint> {
        let timeout = self.settings.gossip_timeout();

        for candidate in candidates {
            debug!("Calling gossip endpoint on: {}", candidate);

            let members =
                match tokio::time::timeout(timeout, self.gossip.read(&candidate, timeout)).await {
                    Ok(Ok(members)) => members,

                    Ok(Err(e)) => {
                        debug!(
                            "Failed to retrieve gossip information from candidate {}: {}",
                            candidate, e
                        );

                        continue;
                    }

                    Err(_) => {
                        warn!("Gossip request timeout for candidate: {}", candidate);
                        continue;
                    }
                };

            debug!("Candidate {} gossip info: {:?}", candidate, members);

            let selected = determine_best_node(
                &mut self.rng,
                self.settings.node_preference(),
                members.as_slice(),
            )
            .map(|member| member.http_end_point.clone());

            if selected.is_none() {
                warn!(
                    "Gossip from {} doesn't have any node we can connect to",
                    candidate
                );
            }

            self.last_members = Some(members);

            return selected;
        }

        None
    }

    /// When the selected node failed, the members we learnt about last time are asked for
    /// gossip first, followed by the seeds.
    fn candidates_from_old_gossip(&mut self) -> Option<Vec<Endpoint>> {
        let failed_endpoint = self.failed_endpoint.as_ref()?;
        let members = self.last_members.as_ref()?;

        let mut nodes = Vec::new();
        let mut managers = Vec::new();

        for member in members {
            if !member.is_alive || member.http_end_point == *failed_endpoint {
                continue;
            }

            if let VNodeState::Manager = member.state {
                managers.push(member.http_end_point.clone());
            } else {
                nodes.push(member.http_end_point.clone());
            }
        }

        nodes.shuffle(&mut self.rng);
        managers.shuffle(&mut self.rng);
        nodes.extend(managers);

        for seed in self.settings.cluster_mode().seeds() {
            if !nodes.contains(&seed) {
                nodes.push(seed);
            }
        }

        Some(nodes)
    }
}

/// Picks the member the next calls should go to: alive, not on its way out, best ranked by the
/// node preference. Members sharing the best rank are picked uniformly at random.
pub(crate) fn determine_best_node<'a, R>(
    rng: &mut R,
    preference: NodePreference,
    members: &'a [MemberInfo],
) -> Option<&'a MemberInfo>
where
    R: Rng + ?Sized,
{
    fn allowed_states(state: VNodeState) -> bool {
        !matches!(
            state,
            VNodeState::Manager | VNodeState::ShuttingDown | VNodeState::Shutdown
        )
    }

    let eligible = members
        .iter()
        .filter(|member| member.is_alive)
        .filter(|member| allowed_states(member.state))
        .collect::<Vec<_>>();

    let best = eligible
        .iter()
        .map(|member| preference.priority(member.state))
        .min()?;

    let tied = eligible
        .into_iter()
        .filter(|member| preference.priority(member.state) == best)
        .collect::<Vec<_>>();

    let member = tied.choose(rng).copied()?;

    info!(
        "Discovering: found best choice {} ({:?})",
        member.http_end_point, member.state
    );

    Some(member)
}
