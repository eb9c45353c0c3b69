//! Top-level orchestrator: owns the bounded peer-endpoint queue, a
//! fixed pool of peer sessions draining it, and the periodic
//! re-announce loop that refills it.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;

use crate::peer::Session;
use crate::piece::{PieceError, PieceManager};
use crate::torrent::TorrentFile;
use crate::tracker::{Client as TrackerClient, TrackerError};

/// How often the orchestrator wakes to check the stop flag and whether
/// a re-announce is due.
const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Re-announce interval used when the tracker doesn't supply one.
const DEFAULT_REANNOUNCE_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// Capacity of the shared peer-endpoint queue.
const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("piece manager error: {0}")]
    Piece(#[from] PieceError),
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

pub struct Orchestrator {
    torrent: Arc<TorrentFile>,
    tracker: TrackerClient,
    piece_manager: Arc<Mutex<PieceManager>>,
    num_sessions: usize,
    port: u16,
}

impl Orchestrator {
    #[tracing::instrument(skip(torrent), level = "debug")]
    pub fn new(
        torrent: Arc<TorrentFile>,
        output_dir: &std::path::Path,
        port: u16,
        num_sessions: usize,
    ) -> OrchestratorResult<Self> {
        let piece_manager = PieceManager::new(&torrent, output_dir)?;
        Ok(Self {
            tracker: TrackerClient::new(port),
            torrent,
            piece_manager: Arc::new(Mutex::new(piece_manager)),
            num_sessions,
            port,
        })
    }

    /// Runs until every piece is downloaded and verified.
    pub async fn run(&self) -> OrchestratorResult<()> {
        let (tx, rx) = mpsc::channel::<SocketAddr>(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        let stop = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(self.num_sessions);
        for _ in 0..self.num_sessions {
            let session = Session::new(
                self.torrent.info_hash,
                self.tracker.peer_id(),
                Arc::clone(&self.piece_manager),
                Arc::clone(&rx),
                Arc::clone(&stop),
            );
            handles.push(tokio::spawn(session.run()));
        }

        let mut next_announce = Instant::now();
        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            if self.piece_manager.lock().await.complete() {
                tracing::info!("all pieces verified and written");
                break;
            }

            if Instant::now() >= next_announce {
                next_announce = Instant::now()
                    + self
                        .announce_once(&tx)
                        .await
                        .unwrap_or(POLL_INTERVAL);
            }

            sleep(POLL_INTERVAL).await;
        }

        stop.store(true, Ordering::SeqCst);
        drop(tx);
        for handle in handles {
            let _ = handle.await;
        }

        Ok(())
    }

    /// Performs one announce cycle, enqueuing any peers returned.
    /// Returns the delay to wait before the next announce, or `None` on
    /// failure (in which case the caller falls back to the poll
    /// interval and the next cycle rotates the announce URL).
    async fn announce_once(&self, tx: &mpsc::Sender<SocketAddr>) -> Option<Duration> {
        let downloaded = self.piece_manager.lock().await.bytes_downloaded() as i64;
        match self.tracker.announce(&self.torrent, 0, downloaded).await {
            Ok(response) => {
                tracing::info!(
                    peers = response.peers.len(),
                    interval = response.interval,
                    complete = response.complete,
                    incomplete = response.incomplete,
                    "tracker announce succeeded"
                );
                for peer in response.peers {
                    let addr = SocketAddr::new(peer.ip, peer.port);
                    if tx.try_send(addr).is_err() {
                        tracing::debug!(%addr, "peer queue full or closed, dropping endpoint");
                    }
                }
                if response.interval > 0 {
                    Some(Duration::from_secs(response.interval as u64))
                } else {
                    Some(DEFAULT_REANNOUNCE_INTERVAL)
                }
            }
            Err(err) => {
                self.log_tracker_failure(&err);
                self.torrent.get_announce(true);
                None
            }
        }
    }

    fn log_tracker_failure(&self, err: &TrackerError) {
        tracing::warn!(error = %err, "tracker announce failed, rotating to next announce URL");
    }

    pub fn piece_manager(&self) -> Arc<Mutex<PieceManager>> {
        Arc::clone(&self.piece_manager)
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
