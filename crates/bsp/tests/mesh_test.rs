//! Integration tests for the ZeroMQ mesh runtime and the barrier conductor.
//!
//! Each test runs its own conductor on a dedicated TCP port range so the
//! tests can execute in parallel.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use lockstep_bsp::{
    BarrierClient, ClusterConfig, Conductor, ConductorConfig, Message, PeerId, PeerNetwork,
    Transport, ZmqMesh,
};

const TIMEOUT: Duration = Duration::from_secs(10);
const SETTLE: Duration = Duration::from_millis(100);

fn two_peer_cluster(base_port: u16) -> ClusterConfig {
    ClusterConfig::distributed("127.0.0.1", base_port, 2)
}

async fn spawn_conductor(
    cluster: &ClusterConfig,
) -> (Arc<Conductor>, tokio::task::JoinHandle<()>) {
    let config = ConductorConfig::from_cluster(cluster).unwrap();
    let conductor = Arc::new(Conductor::new(config));
    let runner = conductor.clone();
    let handle = tokio::spawn(async move {
        runner.run().await.unwrap();
    });
    tokio::time::sleep(SETTLE).await;
    (conductor, handle)
}

#[tokio::test]
async fn two_peer_mesh_exchanges_tagged_messages() {
    let cluster = two_peer_cluster(17400);
    let (conductor, conductor_handle) = spawn_conductor(&cluster).await;

    let run_peer = |cluster: ClusterConfig, id: u32| {
        tokio::spawn(async move {
            let mesh = ZmqMesh::join(&cluster, PeerId(id)).await.unwrap();
            assert_eq!(mesh.superstep(), 0);

            // Broadcast one tagged message to every peer, self included.
            for to in mesh.peers() {
                let msg = Message::new(id, &format!("from-{id}")).unwrap();
                mesh.send(to, msg).await.unwrap();
            }
            mesh.sync().await.unwrap();
            assert_eq!(mesh.superstep(), 1);

            let mut got = Vec::new();
            while let Some(msg) = mesh.recv_next().await.unwrap() {
                assert_eq!(msg.superstep, 0, "drain must only yield the closed superstep");
                got.push((msg.from, msg.tag, msg.decode::<String>().unwrap()));
            }
            got.sort();

            // One more sync before teardown so neither peer closes its
            // sockets while the other is still draining.
            mesh.sync().await.unwrap();
            got
        })
    };

    let a = run_peer(cluster.clone(), 0);
    let b = run_peer(cluster.clone(), 1);

    let got_a = timeout(TIMEOUT, a).await.unwrap().unwrap();
    let got_b = timeout(TIMEOUT, b).await.unwrap().unwrap();

    let expected = vec![
        (PeerId(0), 0, "from-0".to_string()),
        (PeerId(1), 1, "from-1".to_string()),
    ];
    assert_eq!(got_a, expected, "peer 0 should hear every peer exactly once");
    assert_eq!(got_b, expected, "peer 1 should hear every peer exactly once");

    conductor.shutdown();
    let _ = timeout(TIMEOUT, conductor_handle).await;
}

#[tokio::test]
async fn barrier_holds_until_all_peers_enter() {
    let endpoint = Transport::tcp("127.0.0.1", 17410);
    let conductor = Arc::new(Conductor::new(ConductorConfig {
        endpoint: endpoint.clone(),
        peers: 2,
    }));
    let runner = conductor.clone();
    let conductor_handle = tokio::spawn(async move {
        runner.run().await.unwrap();
    });
    tokio::time::sleep(SETTLE).await;

    let first = BarrierClient::connect(&endpoint, PeerId(0)).await.unwrap();
    let second = BarrierClient::connect(&endpoint, PeerId(1)).await.unwrap();

    let waiting = tokio::spawn(async move {
        first.enter(0).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        !waiting.is_finished(),
        "one peer alone must not get past the barrier"
    );
    assert_eq!(conductor.rounds(), 0);

    second.enter(0).await.unwrap();
    timeout(TIMEOUT, waiting).await.unwrap().unwrap();
    assert_eq!(conductor.rounds(), 1);

    conductor.shutdown();
    let _ = timeout(TIMEOUT, conductor_handle).await;
}

#[tokio::test]
async fn empty_drain_terminates_and_stays_isolated() {
    let cluster = two_peer_cluster(17420);
    let (conductor, conductor_handle) = spawn_conductor(&cluster).await;

    let run_peer = |cluster: ClusterConfig, id: u32| {
        tokio::spawn(async move {
            let mesh = ZmqMesh::join(&cluster, PeerId(id)).await.unwrap();

            // Superstep 0: nobody sends anything.
            mesh.sync().await.unwrap();
            assert!(
                mesh.recv_next().await.unwrap().is_none(),
                "empty superstep must drain to None once all markers arrive"
            );
            assert!(
                mesh.recv_next().await.unwrap().is_none(),
                "a drained superstep stays drained"
            );

            // Superstep 1: only peer 0 sends, only peer 1 receives.
            if id == 0 {
                let msg = Message::new(9, &"late".to_string()).unwrap();
                mesh.send(PeerId(1), msg).await.unwrap();
            }
            mesh.sync().await.unwrap();

            let mut drained = Vec::new();
            while let Some(msg) = mesh.recv_next().await.unwrap() {
                assert_eq!(msg.superstep, 1);
                drained.push(msg.decode::<String>().unwrap());
            }

            // One more sync before teardown so neither peer closes its
            // sockets while the other is still draining.
            mesh.sync().await.unwrap();
            drained
        })
    };

    let a = run_peer(cluster.clone(), 0);
    let b = run_peer(cluster.clone(), 1);

    let drained_a = timeout(TIMEOUT, a).await.unwrap().unwrap();
    let drained_b = timeout(TIMEOUT, b).await.unwrap().unwrap();

    assert!(drained_a.is_empty(), "peer 0 addressed nothing to itself");
    assert_eq!(drained_b, vec!["late".to_string()]);

    conductor.shutdown();
    let _ = timeout(TIMEOUT, conductor_handle).await;
}
