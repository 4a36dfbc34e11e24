//! Integration tests for deduplicated block polling across clients

use std::sync::Arc;
use std::time::Duration;
use thorload::chain::memory::InMemoryChain;
use thorload::client::Client;
use thorload::config::{ClientOptions, FundingConfig};
use thorload::metrics::{CollectingSink, MetricSink, BLOCK, BLOCK_TIME, GAS_USED, TPS};
use thorload::session::{Session, SessionConfig};

fn options() -> ClientOptions {
    ClientOptions {
        accounts: 2,
        ..Default::default()
    }
}

fn session(sink: &Arc<CollectingSink>, config: SessionConfig) -> Session {
    Session::new(config, Arc::clone(sink) as Arc<dyn MetricSink>)
}

#[tokio::test(start_paused = true)]
async fn test_many_clients_report_each_block_once() {
    let chain = Arc::new(InMemoryChain::new("http://localhost:8669"));
    let sink = Arc::new(CollectingSink::new());
    let session = session(&sink, SessionConfig::default());

    let clients: Vec<Client> = (0..8)
        .map(|_| Client::connect(options(), &chain, &session, &FundingConfig::default()).unwrap())
        .collect();
    assert_eq!(session.poller_count(), clients.len());

    tokio::time::sleep(Duration::from_millis(100)).await;
    for _ in 0..3 {
        chain.produce_block();
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    let reports = session.shutdown().await;

    let blocks: Vec<f64> = sink.samples_of(BLOCK).iter().map(|s| s.value).collect();
    assert_eq!(blocks, vec![1.0, 2.0, 3.0]);

    for group in sink.groups().iter().filter(|g| g.iter().any(|s| s.metric == BLOCK)) {
        let metrics: Vec<_> = group.iter().map(|s| s.metric).collect();
        assert_eq!(metrics, vec![BLOCK, GAS_USED, TPS, BLOCK_TIME]);
        assert_eq!(group[3].tags.get("block_timestamp_diff"), Some("10s"));
    }

    let emitted: u64 = reports.iter().map(|r| r.stats.emitted).sum();
    let duplicates: u64 = reports.iter().map(|r| r.stats.duplicates).sum();
    assert_eq!(emitted, 3);
    assert_eq!(duplicates, 3 * 7);
}

#[tokio::test(start_paused = true)]
async fn test_endpoints_are_deduplicated_separately() {
    let first = Arc::new(InMemoryChain::new("mem://first"));
    let second = Arc::new(InMemoryChain::new("mem://second"));
    let sink = Arc::new(CollectingSink::new());
    let session = session(&sink, SessionConfig::default());

    for chain in [&first, &second] {
        for _ in 0..2 {
            Client::connect(options(), chain, &session, &FundingConfig::default()).unwrap();
        }
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    first.produce_block();
    second.produce_block();
    tokio::time::sleep(Duration::from_millis(500)).await;
    session.shutdown().await;

    assert_eq!(sink.samples_of(BLOCK).len(), 2);
    assert_eq!(session.registry().endpoint_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_more_endpoints_than_limit_still_report_once() {
    let chains: Vec<Arc<InMemoryChain>> = ["mem://a", "mem://b", "mem://c"]
        .into_iter()
        .map(|url| Arc::new(InMemoryChain::new(url)))
        .collect();
    let sink = Arc::new(CollectingSink::new());
    let config = SessionConfig {
        max_endpoints: 2,
        ..Default::default()
    };
    let session = session(&sink, config);

    let mut clients = Vec::new();
    for _ in 0..2 {
        for chain in &chains {
            clients.push(Client::connect(options(), chain, &session, &FundingConfig::default()).unwrap());
        }
    }
    assert_eq!(session.registry().leases("mem://a"), 2);

    tokio::time::sleep(Duration::from_millis(100)).await;
    for chain in &chains {
        chain.produce_block();
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    let reports = session.shutdown().await;

    let blocks: Vec<f64> = sink.samples_of(BLOCK).iter().map(|s| s.value).collect();
    assert_eq!(blocks, vec![1.0, 1.0, 1.0]);
    let emitted: u64 = reports.iter().map(|r| r.stats.emitted).sum();
    assert_eq!(emitted, 3);
    assert_eq!(session.registry().leases("mem://a"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_reporting() {
    let chain = Arc::new(InMemoryChain::new("mem://shutdown"));
    let sink = Arc::new(CollectingSink::new());
    let session = session(&sink, SessionConfig::default());
    let _client = Client::connect(options(), &chain, &session, &FundingConfig::default()).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    chain.produce_block();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let reports = session.shutdown().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(session.poller_count(), 0);

    chain.produce_block();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sink.samples_of(BLOCK).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_registry_memory_stays_bounded() {
    let chain = Arc::new(InMemoryChain::new("mem://bounded"));
    let sink = Arc::new(CollectingSink::new());
    let config = SessionConfig {
        dedup_window: 4,
        ..Default::default()
    };
    let session = session(&sink, config);
    for _ in 0..3 {
        Client::connect(options(), &chain, &session, &FundingConfig::default()).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    for _ in 0..20 {
        chain.produce_block();
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    session.shutdown().await;

    assert_eq!(sink.samples_of(BLOCK).len(), 20);
    assert_eq!(session.registry().tracked("mem://bounded"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_poller_survives_read_outage() {
    let chain = Arc::new(InMemoryChain::new("mem://outage"));
    let sink = Arc::new(CollectingSink::new());
    let session = session(&sink, SessionConfig::default());
    let _client = Client::connect(options(), &chain, &session, &FundingConfig::default()).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    chain.set_fail_reads(true);
    chain.produce_block();
    chain.produce_block();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(sink.samples_of(BLOCK).is_empty());

    chain.set_fail_reads(false);
    tokio::time::sleep(Duration::from_millis(500)).await;
    let reports = session.shutdown().await;

    // the outage collapses two blocks into one transition
    let blocks: Vec<f64> = sink.samples_of(BLOCK).iter().map(|s| s.value).collect();
    assert_eq!(blocks, vec![2.0]);
    assert_eq!(sink.samples_of(BLOCK_TIME)[0].tags.get("block_timestamp_diff"), Some("20s"));
    assert!(reports[0].stats.read_failures >= 3);
}
