//! Full pipeline on the seeded devnet: reconciler -> executor -> coordinator
//! -> storage, plus direct GET and publish operations.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use trellis_chain::traits::Blockchain;
use trellis_node::config::NodeConfig;
use trellis_node::dev::{self, DEV_BLOCKCHAIN, DEV_STORAGE_CONTRACT};
use trellis_node::error::NodeError;
use trellis_node::node::{Collaborators, Node};
use trellis_protocol::service::FetchMode;
use trellis_storage::knowledge::TripleStore;
use trellis_storage::traits::ParanetKcRepository;
use trellis_types::operation::{Assertion, OperationResult, OperationStatus};
use trellis_types::paranet::{Paranet, StoragePartition};
use trellis_types::ual::Ual;

const COLLECTIONS: u64 = 3;

struct Running {
    node: Arc<Node>,
    chain: Arc<dyn Blockchain>,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<Result<(), trellis_node::error::NodeError>>,
}

fn devnet_config(devnet: &dev::DevNet, max_workers: usize) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.executor.max_workers = max_workers;
    config.executor.poll_interval_ms = 10;
    config.paranet.paranets = devnet.paranets.clone();
    config.paranet.poll_interval_ms = 10;
    config.paranet.poll_attempts = 500;
    config.metrics.refresh_interval_ms = 50;
    config
}

fn start() -> Running {
    start_with_workers(100)
}

fn start_with_workers(max_workers: usize) -> Running {
    let devnet = dev::seed(4, COLLECTIONS);
    let config = devnet_config(&devnet, max_workers);

    let chain: Arc<dyn Blockchain> = devnet.chain.clone();
    let node = Arc::new(
        Node::new(
            config,
            Collaborators {
                chain: chain.clone(),
                network: devnet.network,
            },
        )
        .unwrap(),
    );
    let (shutdown, rx) = watch::channel(false);
    let handle = {
        let node = node.clone();
        tokio::spawn(async move { node.run(rx).await })
    };
    Running {
        node,
        chain,
        shutdown,
        handle,
    }
}

impl Running {
    async fn stop(self) -> Arc<Node> {
        self.shutdown.send(true).unwrap();
        self.handle.await.unwrap().unwrap();
        self.node
    }
}

async fn wait_until_synced(running: &Running, paranets: &[Paranet]) -> bool {
    for _ in 0..500 {
        let done = paranets.iter().all(|p| {
            running
                .node
                .paranet_records()
                .paranet_kc_synced_count(&p.ual)
                .unwrap()
                == COLLECTIONS
        });
        if done {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_devnet_paranets_fully_synced() {
    let running = start();
    let paranets = dev::seed(4, COLLECTIONS).paranets;

    assert!(
        wait_until_synced(&running, &paranets).await,
        "paranets did not sync in time"
    );

    // Every state of every member landed in its paranet's partition.
    for (paranet, first_token) in paranets.iter().zip([1, COLLECTIONS + 1]) {
        let partition = StoragePartition::Paranet(paranet.ual.clone());
        for token in first_token..first_token + COLLECTIONS {
            let ual = Ual::derive(DEV_BLOCKCHAIN, DEV_STORAGE_CONTRACT, token);
            let roots = running
                .chain
                .collection_merkle_roots(DEV_BLOCKCHAIN, DEV_STORAGE_CONTRACT, token)
                .await
                .unwrap();
            for root in roots {
                let stored = running
                    .node
                    .store()
                    .get(&partition, &ual, &root)
                    .await
                    .unwrap();
                assert_eq!(stored, Some(dev::dev_assertion(&ual, &root)));
            }
        }
    }

    let node = running.stop().await;
    assert_eq!(node.metrics().paranet_rows_synced.get(), 2 * COLLECTIONS);
    assert_eq!(node.metrics().paranet_rows_failed.get(), 0);
    assert!(node
        .metrics()
        .encode()
        .contains("trellis_paranet_rows_synced"));
}

#[test]
fn test_worker_pool_smaller_than_paranets_rejected() {
    let devnet = dev::seed(4, COLLECTIONS);
    let config = devnet_config(&devnet, devnet.paranets.len());
    let result = Node::new(
        config,
        Collaborators {
            chain: devnet.chain,
            network: devnet.network,
        },
    );
    assert!(matches!(result, Err(NodeError::ConfigError { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_minimal_worker_pool_syncs_every_paranet() {
    let paranets = dev::seed(4, COLLECTIONS).paranets;
    let running = start_with_workers(paranets.len() + 1);

    assert!(
        wait_until_synced(&running, &paranets).await,
        "paranets did not sync with one spare worker"
    );
    for (paranet, first_token) in paranets.iter().zip([1, COLLECTIONS + 1]) {
        for token in first_token..first_token + COLLECTIONS {
            let ual = Ual::derive(DEV_BLOCKCHAIN, DEV_STORAGE_CONTRACT, token);
            let record = running
                .node
                .paranet_records()
                .paranet_kc_record(&paranet.ual, &ual)
                .unwrap()
                .unwrap();
            assert!(record.is_synced);
            assert_eq!(record.retries, 0);
        }
    }

    let node = running.stop().await;
    assert_eq!(node.metrics().paranet_rows_synced.get(), 2 * COLLECTIONS);
    assert_eq!(node.metrics().paranet_rows_failed.get(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_get_and_publish_through_service() {
    let running = start();
    let service = running.node.service().clone();

    let ual = Ual::derive(DEV_BLOCKCHAIN, DEV_STORAGE_CONTRACT, 1);
    let root = running
        .chain
        .collection_merkle_roots(DEV_BLOCKCHAIN, DEV_STORAGE_CONTRACT, 1)
        .await
        .unwrap()
        .remove(0);
    let get = service
        .start_get(DEV_BLOCKCHAIN, &ual, &root, FetchMode::Network, None)
        .unwrap();
    let settled = service
        .await_terminal(&get, 500, Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.status, OperationStatus::Completed);
    assert_eq!(
        service.result(&get).unwrap(),
        Some(OperationResult::Found {
            assertion: dev::dev_assertion(&ual, &root)
        })
    );

    let fresh = Ual::derive(DEV_BLOCKCHAIN, DEV_STORAGE_CONTRACT, 999);
    let publish = service
        .start_publish(
            DEV_BLOCKCHAIN,
            &fresh,
            "0xnew",
            Assertion::new(vec!["<a> <b> <c> .".to_string()]),
        )
        .unwrap();
    service
        .await_terminal(&publish, 500, Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    match service.result(&publish).unwrap() {
        Some(OperationResult::Acknowledged { acks }) => assert!(acks >= 3),
        other => panic!("unexpected publish result: {:?}", other),
    }
    assert!(running
        .node
        .store()
        .get(&StoragePartition::Dkg, &fresh, "0xnew")
        .await
        .unwrap()
        .is_some());

    let node = running.stop().await;
    assert!(node.metrics().operations_completed.get() >= 2);
}
