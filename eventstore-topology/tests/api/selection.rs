use crate::common::{member, scripted_selector, seed, Reply, ScriptedGossip};
use eventstore_topology::{
    ClientSettings, Endpoint, Error, NodePreference, NodeSelector, VNodeState,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const ALL_STATES: [VNodeState; 16] = [
    VNodeState::Initializing,
    VNodeState::DiscoverLeader,
    VNodeState::Unknown,
    VNodeState::PreReplica,
    VNodeState::CatchingUp,
    VNodeState::Clone,
    VNodeState::Follower,
    VNodeState::PreLeader,
    VNodeState::Leader,
    VNodeState::Manager,
    VNodeState::ShuttingDown,
    VNodeState::Shutdown,
    VNodeState::ReadOnlyLeaderless,
    VNodeState::PreReadOnlyReplica,
    VNodeState::ReadOnlyReplica,
    VNodeState::ResigningLeader,
];

fn host_of(state: VNodeState) -> String {
    format!("{:?}", state).to_lowercase()
}

#[tokio::test(start_paused = true)]
async fn standalone_always_returns_configured_node() -> eyre::Result<()> {
    crate::init_logging();

    let node = Endpoint::new("localhost", 2_113);

    for pref in [
        NodePreference::Leader,
        NodePreference::Follower,
        NodePreference::ReadOnlyReplica,
        NodePreference::Random,
    ] {
        let gossip = ScriptedGossip::new();
        let setts = ClientSettings::standalone(node.clone()).with_node_preference(pref);
        let selector = scripted_selector(setts, &gossip);

        for _ in 0..5 {
            let handle = selector.select().await?;
            assert_eq!(handle.endpoint(), &node);

            selector.invalidate(&handle);
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        assert_eq!(gossip.calls(), 0);
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn best_ranked_member_is_selected() -> eyre::Result<()> {
    crate::init_logging();

    let expected = [
        (NodePreference::Leader, VNodeState::Leader),
        (NodePreference::Follower, VNodeState::Follower),
        (NodePreference::ReadOnlyReplica, VNodeState::ReadOnlyReplica),
    ];

    let members = ALL_STATES
        .iter()
        .map(|state| member(host_of(*state).as_str(), *state, true))
        .collect::<Vec<_>>();

    for (pref, state) in expected {
        let gossip = ScriptedGossip::new();
        let seed = seed("a");
        gossip.reply(&seed, Reply::Members(members.clone()));

        let selector = scripted_selector(
            ClientSettings::seeds(vec![seed]).with_node_preference(pref),
            &gossip,
        );

        let handle = selector.select().await?;
        assert_eq!(handle.endpoint(), &Endpoint::from_host(host_of(state)));
    }

    // Random never picks a node on its way out.
    let gossip = ScriptedGossip::new();
    let seed = seed("a");
    gossip.reply(&seed, Reply::Members(members));

    let selector = scripted_selector(
        ClientSettings::seeds(vec![seed]).with_node_preference(NodePreference::Random),
        &gossip,
    );

    let handle = selector.select().await?;
    for state in [
        VNodeState::Manager,
        VNodeState::ShuttingDown,
        VNodeState::Shutdown,
    ] {
        assert_ne!(handle.endpoint(), &Endpoint::from_host(host_of(state)));
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dead_members_are_never_selected() -> eyre::Result<()> {
    crate::init_logging();

    let gossip = ScriptedGossip::new();
    let seed = seed("a");
    gossip.reply(
        &seed,
        Reply::Members(vec![
            member("leader", VNodeState::Leader, false),
            member("follower", VNodeState::Follower, true),
        ]),
    );

    let selector = scripted_selector(ClientSettings::seeds(vec![seed.clone()]), &gossip);
    let handle = selector.select().await?;

    assert_eq!(handle.endpoint(), &Endpoint::from_host("follower"));

    let gossip = ScriptedGossip::new();
    gossip.reply(
        &seed,
        Reply::Members(vec![member("leader", VNodeState::Leader, false)]),
    );

    let selector = scripted_selector(
        ClientSettings::seeds(vec![seed.clone()]).with_max_discover_attempts(3),
        &gossip,
    );

    match selector.select().await {
        Err(Error::MaxDiscoveryAttemptReached(3)) => {}
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(gossip.calls_to(&seed), 3);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn selection_is_cached_for_the_discovery_interval() -> eyre::Result<()> {
    crate::init_logging();

    let gossip = ScriptedGossip::new();
    let seed = seed("a");
    gossip.reply(
        &seed,
        Reply::Members(vec![member("leader", VNodeState::Leader, true)]),
    );

    let selector = scripted_selector(
        ClientSettings::seeds(vec![seed]).with_discovery_interval(Duration::from_millis(100)),
        &gossip,
    );

    let first = selector.select().await?;
    tokio::time::advance(Duration::from_millis(50)).await;
    let second = selector.select().await?;

    assert_eq!(first, second);
    assert_eq!(gossip.calls(), 1);

    tokio::time::advance(Duration::from_millis(150)).await;
    let third = selector.select().await?;

    assert_eq!(third.endpoint(), first.endpoint());
    assert_ne!(third.id(), first.id());
    assert_eq!(gossip.calls(), 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn next_seed_is_tried_when_gossip_times_out() -> eyre::Result<()> {
    crate::init_logging();

    let gossip = ScriptedGossip::new();
    let (a, b) = (seed("a"), seed("b"));
    gossip.reply(&a, Reply::Hang);
    gossip.reply(
        &b,
        Reply::Members(vec![member("follower", VNodeState::Follower, true)]),
    );

    let selector = scripted_selector(ClientSettings::seeds(vec![a.clone(), b.clone()]), &gossip);
    let handle = selector.select().await?;

    assert_eq!(handle.endpoint(), &Endpoint::from_host("follower"));
    assert_eq!(gossip.call_log(), vec![a, b]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn discovery_gives_up_after_max_attempts() -> eyre::Result<()> {
    crate::init_logging();

    let gossip = ScriptedGossip::new();
    let seeds = vec![seed("a"), seed("b"), seed("c")];
    let interval = Duration::from_millis(200);

    let selector = scripted_selector(
        ClientSettings::seeds(seeds.clone())
            .with_max_discover_attempts(4)
            .with_discovery_interval(interval),
        &gossip,
    );

    let started = tokio::time::Instant::now();

    match selector.select().await {
        Err(Error::MaxDiscoveryAttemptReached(4)) => {}
        other => panic!("unexpected outcome: {:?}", other),
    }

    // Three pauses between four rounds.
    assert!(started.elapsed() >= interval * 3);
    assert!(started.elapsed() < interval * 4);
    assert_eq!(gossip.calls(), 12);

    for seed in seeds.iter() {
        assert_eq!(gossip.calls_to(seed), 4);
    }

    // The selector stays usable once the cluster comes back.
    gossip.reply(
        &seeds[2],
        Reply::Members(vec![member("leader", VNodeState::Leader, true)]),
    );

    let handle = selector.select().await?;
    assert_eq!(handle.endpoint(), &Endpoint::from_host("leader"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_discovery() -> eyre::Result<()> {
    crate::init_logging();

    let gossip = ScriptedGossip::new();
    let seed = seed("a");
    gossip.reply(
        &seed,
        Reply::Slow(
            Duration::from_secs(1),
            vec![
                member("follower1", VNodeState::Follower, true),
                member("follower2", VNodeState::Follower, true),
            ],
        ),
    );

    let selector = scripted_selector(
        ClientSettings::seeds(vec![seed]).with_node_preference(NodePreference::Follower),
        &gossip,
    );

    let calls = (0..10)
        .map(|_| {
            let selector = selector.clone();
            async move { selector.select().await }
        })
        .collect::<Vec<_>>();

    let handles = futures::future::join_all(calls)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    assert_eq!(gossip.calls(), 1);
    assert!(handles.iter().all(|h| *h == handles[0]));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn abandoned_caller_does_not_cancel_discovery() -> eyre::Result<()> {
    crate::init_logging();

    let gossip = ScriptedGossip::new();
    let seed = seed("a");
    gossip.reply(
        &seed,
        Reply::Slow(
            Duration::from_secs(1),
            vec![member("leader", VNodeState::Leader, true)],
        ),
    );

    let selector = scripted_selector(ClientSettings::seeds(vec![seed]), &gossip);

    let abandoned = tokio::time::timeout(Duration::from_millis(10), selector.select()).await;
    assert!(abandoned.is_err());

    let handle = selector.select().await?;

    assert_eq!(handle.endpoint(), &Endpoint::from_host("leader"));
    assert_eq!(gossip.calls(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn random_preference_spreads_selections() -> eyre::Result<()> {
    crate::init_logging();

    let gossip = ScriptedGossip::new();
    let seed = seed("a");
    let interval = Duration::from_millis(100);
    gossip.reply(
        &seed,
        Reply::Members(vec![
            member("node1", VNodeState::Leader, true),
            member("node2", VNodeState::Follower, true),
            member("node3", VNodeState::ReadOnlyReplica, true),
        ]),
    );

    let selector = scripted_selector(
        ClientSettings::seeds(vec![seed])
            .with_node_preference(NodePreference::Random)
            .with_discovery_interval(interval),
        &gossip,
    );

    let mut hits = HashMap::new();

    for _ in 0..300 {
        let handle = selector.select().await?;
        *hits.entry(handle.endpoint().host.clone()).or_insert(0usize) += 1;
        tokio::time::advance(interval * 2).await;
    }

    debug!("Random selection distribution: {:?}", hits);

    assert_eq!(hits.len(), 3);
    for count in hits.values() {
        assert!((60..=140).contains(count), "skewed selection: {:?}", hits);
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn invalidated_selection_triggers_rediscovery() -> eyre::Result<()> {
    crate::init_logging();

    let gossip = ScriptedGossip::new();
    let seed = seed("a");
    let leader = member("leader", VNodeState::Leader, true);
    let follower = member("follower", VNodeState::Follower, true);
    gossip.reply(
        &seed,
        Reply::Members(vec![leader.clone(), follower.clone()]),
    );

    let selector = scripted_selector(ClientSettings::seeds(vec![seed.clone()]), &gossip);

    let first = selector.select().await?;
    assert_eq!(first.endpoint(), &leader.http_end_point);

    // The leader went away, the follower got promoted.
    let promoted = member("follower", VNodeState::Leader, true);
    gossip.reply(
        &follower.http_end_point,
        Reply::Members(vec![promoted.clone()]),
    );

    selector.invalidate(&first);
    let second = selector.select().await?;

    assert_eq!(second.endpoint(), &promoted.http_end_point);
    // Members learnt from the previous gossip are asked before the seeds, minus the failed node.
    assert_eq!(
        gossip.call_log(),
        vec![seed.clone(), follower.http_end_point.clone()]
    );

    // Reporting the first selection again is ignored.
    selector.invalidate(&first);
    let third = selector.select().await?;

    assert_eq!(third, second);
    assert_eq!(gossip.calls(), 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn redirection_replaces_selection() -> eyre::Result<()> {
    crate::init_logging();

    let gossip = ScriptedGossip::new();
    let seed = seed("a");
    gossip.reply(
        &seed,
        Reply::Members(vec![member("follower", VNodeState::Follower, true)]),
    );

    let selector = scripted_selector(ClientSettings::seeds(vec![seed]), &gossip);

    let first = selector.select().await?;
    let leader = Endpoint::new("leader", 2_114);

    selector.redirect(&first, leader.clone());
    let second = selector.select().await?;

    assert_eq!(second.endpoint(), &leader);
    assert_eq!(gossip.calls(), 1);

    // Outdated redirection.
    selector.redirect(&first, Endpoint::new("elsewhere", 2_113));
    assert_eq!(selector.select().await?, second);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn redirection_of_invalidated_selection_is_ignored() -> eyre::Result<()> {
    crate::init_logging();

    let gossip = ScriptedGossip::new();
    let seed = seed("a");
    gossip.reply(
        &seed,
        Reply::Members(vec![member("leader", VNodeState::Leader, true)]),
    );

    let selector = scripted_selector(ClientSettings::seeds(vec![seed.clone()]), &gossip);

    let first = selector.select().await?;
    selector.invalidate(&first);
    selector.redirect(&first, Endpoint::new("elsewhere", 9_999));

    let second = selector.select().await?;

    assert_eq!(second.endpoint(), &Endpoint::from_host("leader"));
    assert_ne!(second.id(), first.id());
    assert_eq!(gossip.calls_to(&seed), 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dns_discovery_reads_gossip_through_domain() -> eyre::Result<()> {
    crate::init_logging();

    let gossip = ScriptedGossip::new();
    let domain = Endpoint::from_host("cluster.eventstore.local");
    gossip.reply(
        &domain,
        Reply::Members(vec![member("leader", VNodeState::Leader, true)]),
    );

    let selector = scripted_selector(ClientSettings::dns(domain.clone()), &gossip);
    let handle = selector.select().await?;

    assert_eq!(handle.endpoint(), &Endpoint::from_host("leader"));
    assert_eq!(gossip.call_log(), vec![domain]);

    Ok(())
}

#[tokio::test]
async fn empty_seed_list_is_rejected() {
    let gossip = ScriptedGossip::new();

    let outcome = NodeSelector::new(ClientSettings::seeds(vec![]), Arc::new(gossip));

    assert!(matches!(outcome, Err(Error::EmptySeeds)));
}

#[tokio::test]
async fn zero_discover_attempts_are_rejected() {
    let gossip = ScriptedGossip::new();
    let setts = ClientSettings::seeds(vec![seed("a")]).with_max_discover_attempts(0);

    let outcome = NodeSelector::new(setts, Arc::new(gossip.clone()));

    assert!(matches!(outcome, Err(Error::InvalidSettings(_))));
    assert_eq!(gossip.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cluster_scenario() -> eyre::Result<()> {
    crate::init_logging();

    let gossip = ScriptedGossip::new();
    let (a, b, c) = (seed("a"), seed("b"), seed("c"));
    let leader = member("leader", VNodeState::Leader, true);
    let follower = member("follower", VNodeState::Follower, true);

    gossip.reply(&a, Reply::Hang);
    gossip.reply(
        &b,
        Reply::Members(vec![
            follower.clone(),
            leader.clone(),
            member("shutdown", VNodeState::Shutdown, false),
        ]),
    );

    let selector = scripted_selector(
        ClientSettings::seeds(vec![a.clone(), b.clone(), c.clone()])
            .with_node_preference(NodePreference::Leader)
            .with_discovery_interval(Duration::from_millis(100)),
        &gossip,
    );

    let handle = selector.select().await?;
    assert_eq!(handle.endpoint(), &leader.http_end_point);

    tokio::time::advance(Duration::from_secs(1)).await;
    gossip.reply(&b, Reply::Members(vec![follower.clone()]));

    let handle = selector.select().await?;
    assert_eq!(handle.endpoint(), &follower.http_end_point);

    assert_eq!(gossip.calls_to(&a), 2);
    assert_eq!(gossip.calls_to(&b), 2);
    assert_eq!(gossip.calls_to(&c), 0);

    Ok(())
}
