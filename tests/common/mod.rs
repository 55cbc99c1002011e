//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates a throwaway SQLite DB, temporary
//! artifact directories, a scripted [`FakeTranscoder`] and a
//! [`RecordingPeer`], wired into a full [`AppContext`]. The
//! [`TestHarness::with_server`] constructor also starts an HTTP server on a
//! random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use mc_av::Transcoder;
use mc_core::config::Config;
use mc_core::{Error, JobId, NodeLocation, Result, TranscodeFailure};
use mc_db::models::{Job, NewJob};
use mc_db::pool::{get_conn, init_pool, DbPool, PooledConnection};
use mc_server::context::AppContext;
use mc_server::lifecycle::{self, Upload};
use mc_server::peer::PeerNotifier;
use mc_server::router::build_router;

// ---------------------------------------------------------------------------
// FakeTranscoder
// ---------------------------------------------------------------------------

/// What the fake transcoder does when called.
#[derive(Clone)]
pub enum Script {
    /// Write `bytes` to the output path and succeed.
    Succeed(Vec<u8>),
    /// Report success without writing anything.
    SucceedWithoutOutput,
    /// Write a partial output, then fail.
    PartialThenFail(TranscodeFailure),
    /// Fail without writing.
    Fail(TranscodeFailure),
    /// Wait until released, then write `bytes` and succeed.
    WaitThenSucceed(Arc<Notify>, Vec<u8>),
    /// Panic inside the conversion task.
    Panic,
}

pub struct FakeTranscoder {
    script: Mutex<Script>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeTranscoder {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock() = script;
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        self.calls.lock().push((
            input.to_string_lossy().to_string(),
            output.to_string_lossy().to_string(),
        ));
        let script = self.script.lock().clone();
        match script {
            Script::Succeed(bytes) => {
                std::fs::write(output, bytes)?;
                Ok(())
            }
            Script::SucceedWithoutOutput => Ok(()),
            Script::PartialThenFail(failure) => {
                std::fs::write(output, b"partial")?;
                Err(failure.into())
            }
            Script::Fail(failure) => Err(failure.into()),
            Script::WaitThenSucceed(gate, bytes) => {
                gate.notified().await;
                std::fs::write(output, bytes)?;
                Ok(())
            }
            Script::Panic => panic!("transcoder crashed"),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingPeer
// ---------------------------------------------------------------------------

/// Peer notifier that records every call and can be told to fail.
pub struct RecordingPeer {
    local: NodeLocation,
    fail: Mutex<bool>,
    pub calls: Mutex<Vec<(JobId, NodeLocation)>>,
}

impl RecordingPeer {
    pub fn new(local: NodeLocation) -> Arc<Self> {
        Arc::new(Self {
            local,
            fail: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Calls that targeted the other node.
    pub fn remote_calls(&self) -> Vec<JobId> {
        self.calls
            .lock()
            .iter()
            .filter(|(_, loc)| *loc != self.local)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[async_trait]
impl PeerNotifier for RecordingPeer {
    async fn notify(&self, job_id: JobId, location: NodeLocation) -> Result<()> {
        self.calls.lock().push((job_id, location));
        if location == self.local {
            return Ok(());
        }
        if *self.fail.lock() {
            return Err(Error::PeerUnreachable("connection refused".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

/// Test harness wrapping a fully-constructed [`AppContext`] backed by a
/// temporary database and temporary storage directories.
pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub transcoder: Arc<FakeTranscoder>,
    pub peer: Arc<RecordingPeer>,
    _dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new harness with default configuration and a transcoder that
    /// always succeeds.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a new harness with a custom configuration. Storage paths are
    /// redirected into a temporary directory.
    pub fn with_config(mut config: Config) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        config.storage.original_dir = dir.path().join("original");
        config.storage.converted_dir = dir.path().join("converted");
        // File-backed so executor writes and test reads share the busy timeout.
        config.server.db_path = dir.path().join("jobs.db");

        let db = init_pool(&config.server.db_path.to_string_lossy())
            .expect("failed to create test pool");
        let transcoder = FakeTranscoder::new(Script::Succeed(b"converted".to_vec()));
        let peer = RecordingPeer::new(config.node.role);

        let ctx = AppContext::new(db.clone(), config)
            .with_transcoder(transcoder.clone())
            .with_peer(peer.clone());

        Self {
            ctx,
            db,
            transcoder,
            peer,
            _dir: dir,
        }
    }

    /// Create a harness and start an HTTP server on a random port.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::with_server_config(Config::default()).await
    }

    /// Create a harness with custom config and start an HTTP server.
    pub async fn with_server_config(config: Config) -> (Self, SocketAddr) {
        let harness = Self::with_config(config);
        let addr = harness.serve().await;
        (harness, addr)
    }

    /// Serve this harness's router on a random local port.
    pub async fn serve(&self) -> SocketAddr {
        let app = build_router(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        addr
    }

    /// Get a raw DB connection.
    pub fn conn(&self) -> PooledConnection {
        get_conn(&self.db).expect("failed to get connection")
    }

    /// Submit an upload through the lifecycle at `now`.
    pub fn submit_at(&self, filename: &str, target: &str, now: DateTime<Utc>) -> Job {
        lifecycle::submit(
            &self.ctx,
            Upload {
                filename: filename.to_string(),
                target_format: target.to_string(),
                data: Bytes::from_static(b"source-bytes"),
            },
            now,
        )
        .expect("submit failed")
    }

    pub fn submit(&self, filename: &str, target: &str) -> Job {
        self.submit_at(filename, target, Utc::now())
    }

    /// Insert a job row directly, bypassing upload validation.
    pub fn insert_job(&self, created_at: DateTime<Utc>, location: NodeLocation) -> Job {
        let job = NewJob {
            id: JobId::new(),
            original_filename: "clip.mov".into(),
            source_format: "mov".into(),
            target_format: "mp4".into(),
            media_kind: mc_core::MediaKind::Video,
            location,
            source_path: None,
            file_size: 10,
        }
        .into_job(created_at, self.ctx.config.retention.window().unwrap())
        .expect("expiry out of range");
        mc_db::queries::jobs::create_job(&self.conn(), &job).expect("insert failed");
        job
    }

    /// Fetch a job straight from the store.
    pub fn job(&self, id: JobId) -> Option<Job> {
        mc_db::queries::jobs::find_job(&self.conn(), id).expect("query failed")
    }

    /// Replace the peer notifier, e.g. with a real HTTP client.
    pub fn set_peer(&mut self, peer: Arc<dyn PeerNotifier>) {
        self.ctx = self.ctx.clone().with_peer(peer);
    }
}
