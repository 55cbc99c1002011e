//! Service-oriented application context.
//!
//! [`AppContext`] is the central struct shared by route handlers (via Axum
//! state), the conversion executor and the cleanup scheduler. It wraps the
//! job store pool, the immutable configuration and the two external seams
//! (transcoder and peer notifier) in `Arc`s.

use std::sync::Arc;

use mc_av::{FfmpegTranscoder, Transcoder};
use mc_core::config::Config;
use mc_core::events::EventBus;
use mc_db::pool::DbPool;

use crate::peer::{HttpPeerClient, PeerNotifier};

/// Application context shared across the server.
///
/// This is cheaply cloneable because it only holds `Arc`s.
#[derive(Clone)]
pub struct AppContext {
    /// Job store connection pool.
    pub db: DbPool,
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    /// Broadcast event bus for push-style job updates.
    pub event_bus: Arc<EventBus>,
    /// External conversion tool.
    pub transcoder: Arc<dyn Transcoder>,
    /// Client for the cooperating node's cleanup endpoint.
    pub peer: Arc<dyn PeerNotifier>,
}

impl AppContext {
    /// Build a context with the production ffmpeg transcoder and HTTP peer
    /// client derived from `config`.
    pub fn new(db: DbPool, config: Config) -> Self {
        let transcoder = Arc::new(FfmpegTranscoder::from_config(&config.tools));
        let peer = Arc::new(HttpPeerClient::new(&config.node));
        Self {
            db,
            config: Arc::new(config),
            event_bus: Arc::new(EventBus::default()),
            transcoder,
            peer,
        }
    }

    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn with_peer(mut self, peer: Arc<dyn PeerNotifier>) -> Self {
        self.peer = peer;
        self
    }
}
