//! Two-node cleanup: each node's sweeps reach the other's cleanup endpoint over
//! real HTTP.

mod common;

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};

use common::TestHarness;
use mc_core::config::Config;
use mc_core::NodeLocation;
use mc_db::queries::jobs;
use mc_server::cleanup;
use mc_server::peer::HttpPeerClient;

fn node_config(role: NodeLocation, peer_url: String) -> Config {
    let mut config = Config::default();
    config.node.role = role;
    config.node.peer_url = peer_url;
    config.node.peer_timeout_secs = 5;
    config
}

/// Node A with a real HTTP peer client pointed at `peer_url`.
fn node_a(peer_url: String) -> TestHarness {
    let config = node_config(NodeLocation::ServerA, peer_url);
    let client = Arc::new(HttpPeerClient::new(&config.node));
    let mut a = TestHarness::with_config(config);
    a.set_peer(client);
    a
}

#[tokio::test]
async fn worker_submissions_are_purged_on_master_after_expiry() {
    let (a, a_addr) =
        TestHarness::with_server_config(node_config(NodeLocation::ServerA, String::new())).await;

    // B converts for A, so its uploads are recorded as living on A.
    let mut config = node_config(NodeLocation::ServerB, format!("http://{a_addr}"));
    config.node.artifact_location = Some(NodeLocation::ServerA);
    let client = Arc::new(HttpPeerClient::new(&config.node));
    let mut b = TestHarness::with_config(config);
    b.set_peer(client);

    let now = Utc::now();
    let job = b.submit_at("clip.mov", "mp4", now - Duration::hours(30));
    assert_eq!(job.location, NodeLocation::ServerA);
    jobs::create_job(&a.conn(), &job).unwrap();

    let report = cleanup::routine_sweep(&b.ctx, now).await.unwrap();
    assert_eq!(report.cleaned, 1);
    assert_eq!(report.errors, 0);

    assert!(b.job(job.id).is_none());
    assert!(a.job(job.id).is_none());
    assert!(!Path::new(job.source_path.as_deref().unwrap()).exists());
}

#[tokio::test]
async fn sweep_on_a_purges_replica_on_b() {
    let (b, b_addr) =
        TestHarness::with_server_config(node_config(NodeLocation::ServerB, String::new())).await;
    let a = node_a(format!("http://{b_addr}"));

    // B holds the artifacts; A holds a copy of the record.
    let now = Utc::now();
    let job = b.submit_at("clip.mov", "mp4", now - Duration::hours(30));
    assert_eq!(job.location, NodeLocation::ServerB);
    jobs::create_job(&a.conn(), &job).unwrap();

    let report = cleanup::routine_sweep(&a.ctx, now).await.unwrap();
    assert_eq!(report.cleaned, 1);
    assert_eq!(report.errors, 0);

    assert!(a.job(job.id).is_none());
    assert!(b.job(job.id).is_none());
    assert!(!Path::new(job.source_path.as_deref().unwrap()).exists());
    // B purged on request and did not call anyone back.
    assert!(b.peer.calls.lock().is_empty());
}

#[tokio::test]
async fn local_jobs_never_reach_the_peer() {
    let (b, b_addr) =
        TestHarness::with_server_config(node_config(NodeLocation::ServerB, String::new())).await;
    let a = node_a(format!("http://{b_addr}"));

    // Same id on both nodes, but the record on A says the job lives on A.
    let now = Utc::now();
    let job = a.insert_job(now - Duration::hours(30), NodeLocation::ServerA);
    jobs::create_job(&b.conn(), &job).unwrap();

    assert_eq!(cleanup::routine_sweep(&a.ctx, now).await.unwrap().cleaned, 1);
    assert!(a.job(job.id).is_none());
    assert!(b.job(job.id).is_some());
}

#[tokio::test]
async fn unreachable_peer_leaves_local_cleanup_intact() {
    // Nothing listens on the discard port.
    let a = node_a("http://127.0.0.1:9".into());

    let now = Utc::now();
    let remote = a.insert_job(now - Duration::hours(30), NodeLocation::ServerB);
    let local = a.insert_job(now - Duration::hours(29), NodeLocation::ServerA);

    let report = cleanup::routine_sweep(&a.ctx, now).await.unwrap();
    assert_eq!(report.cleaned, 2);
    assert_eq!(report.errors, 0);
    assert!(a.job(remote.id).is_none());
    assert!(a.job(local.id).is_none());
}

#[tokio::test]
async fn emergency_sweep_also_notifies_peer() {
    let (b, b_addr) =
        TestHarness::with_server_config(node_config(NodeLocation::ServerB, String::new())).await;
    let a = node_a(format!("http://{b_addr}"));

    let now = Utc::now();
    let job = b.insert_job(now - Duration::hours(60), NodeLocation::ServerB);
    jobs::create_job(&a.conn(), &job).unwrap();

    let report = cleanup::emergency_sweep(&a.ctx, now).await.unwrap();
    assert_eq!(report.cleaned, 1);
    assert!(b.job(job.id).is_none());
}
