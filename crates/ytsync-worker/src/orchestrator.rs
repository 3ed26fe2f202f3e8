//! Orchestrator: owns the schedules and routes work between stages.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::context::{SyncContext, VideoKey};
use crate::creator::ChainCreator;
use crate::downloader::Downloader;
use crate::error::SyncResult;
use crate::poller::MetadataPoller;
use crate::uploader::Uploader;

/// Capacity of each inter-stage queue. Messages carry only video keys, so
/// drops are harmless: the stage sweeps re-discover the work.
const QUEUE_CAPACITY: usize = 1024;

/// Period of the per-stage store sweeps that catch dropped or recovered
/// work.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Time until the next UTC midnight, padded past the boundary.
fn until_utc_midnight(now: DateTime<Utc>) -> Duration {
    let next_day = (now.date_naive() + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_utc();
    (next_day - now)
        .to_std()
        .unwrap_or(Duration::from_secs(1))
        .saturating_add(Duration::from_secs(1))
}

/// Top-level scheduler for the pipeline.
pub struct Orchestrator {
    ctx: Arc<SyncContext>,
    poller: Arc<MetadataPoller>,
    downloader: Arc<Downloader>,
    creator: Arc<ChainCreator>,
    uploader: Arc<Uploader>,
    dl_rx: mpsc::Receiver<VideoKey>,
    oc_rx: mpsc::Receiver<VideoKey>,
    up_rx: mpsc::Receiver<VideoKey>,
    shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        let (dl_tx, dl_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (oc_tx, oc_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (up_tx, up_rx) = mpsc::channel(QUEUE_CAPACITY);

        let poller = Arc::new(MetadataPoller::new(ctx.clone(), dl_tx));
        let downloader = Arc::new(Downloader::new(ctx.clone(), oc_tx, up_tx.clone()));
        let creator = Arc::new(ChainCreator::new(ctx.clone(), up_tx));
        let uploader = Arc::new(Uploader::new(ctx.clone()));
        let (shutdown, _) = watch::channel(false);

        Self {
            ctx,
            poller,
            downloader,
            creator,
            uploader,
            dl_rx,
            oc_rx,
            up_rx,
            shutdown,
        }
    }

    /// Handle used by signal handlers to request a graceful stop.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Run until shutdown, then drain stages in reverse pipeline order.
    pub async fn run(self) -> SyncResult<()> {
        let Orchestrator {
            ctx,
            poller,
            downloader,
            creator,
            uploader,
            mut dl_rx,
            mut oc_rx,
            mut up_rx,
            shutdown,
        } = self;

        let grace = ctx.config.shutdown_grace();
        info!("Orchestrator starting");

        // Metadata poll schedule. Refreshing channels also lifts the
        // creator's voucher halts.
        let poll_handle = {
            let poller = poller.clone();
            let creator = creator.clone();
            let mut rx = shutdown.subscribe();
            let period = ctx.config.polling_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = rx.changed() => if *rx.borrow() { break },
                        _ = ticker.tick() => {
                            creator.clear_halts();
                            if let Err(e) = poller.run_cycle().await {
                                error!("Metadata poll cycle failed: {e}");
                            }
                        }
                    }
                }
                debug!("Poller loop stopped");
            })
        };

        let dl_handle = {
            let downloader = downloader.clone();
            let mut rx = shutdown.subscribe();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = rx.changed() => if *rx.borrow() { break },
                        _ = ticker.tick() => {
                            if let Err(e) = downloader.run_cycle().await {
                                error!("Download sweep failed: {e}");
                            }
                        }
                        key = dl_rx.recv() => match key {
                            Some(key) => downloader.handle_key(key).await,
                            None => break,
                        }
                    }
                }
                debug!("Downloader loop stopped");
            })
        };

        let oc_handle = {
            let creator = creator.clone();
            let mut rx = shutdown.subscribe();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = rx.changed() => if *rx.borrow() { break },
                        _ = ticker.tick() => {
                            if let Err(e) = creator.run_cycle().await {
                                error!("Creation sweep failed: {e}");
                            }
                        }
                        key = oc_rx.recv() => match key {
                            Some(key) => creator.handle_key(key).await,
                            None => break,
                        }
                    }
                }
                debug!("Creator loop stopped");
            })
        };

        let up_handle = {
            let uploader = uploader.clone();
            let mut rx = shutdown.subscribe();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = rx.changed() => if *rx.borrow() { break },
                        _ = ticker.tick() => {
                            if let Err(e) = uploader.run_cycle().await {
                                error!("Upload sweep failed: {e}");
                            }
                        }
                        key = up_rx.recv() => match key {
                            Some(key) => uploader.handle_key(key).await,
                            None => break,
                        }
                    }
                }
                debug!("Uploader loop stopped");
            })
        };

        // Storage-node response-time probe.
        let probe_handle = {
            let ctx = ctx.clone();
            let mut rx = shutdown.subscribe();
            let period = ctx.config.probe_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = rx.changed() => if *rx.borrow() { break },
                        _ = ticker.tick() => probe_storage_nodes(&ctx).await,
                    }
                }
            })
        };

        // Daily quota reset at UTC midnight.
        let quota_handle = {
            let ctx = ctx.clone();
            let mut rx = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    let wait = until_utc_midnight(Utc::now());
                    tokio::select! {
                        _ = rx.changed() => if *rx.borrow() { break },
                        _ = tokio::time::sleep(wait) => ctx.quota.roll_day(Utc::now()),
                    }
                }
            })
        };

        // Block until a shutdown is requested.
        let mut rx = shutdown.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        info!("Shutdown requested, draining stages");

        // No new admissions: the schedules exit on the watch flag; stages
        // drain in reverse pipeline order within the grace budget.
        probe_handle.abort();
        quota_handle.abort();
        for (name, handle) in [
            ("uploader", up_handle),
            ("creator", oc_handle),
            ("downloader", dl_handle),
            ("poller", poll_handle),
        ] {
            match tokio::time::timeout(grace, handle).await {
                Ok(_) => debug!(stage = name, "Stage drained"),
                Err(_) => warn!(stage = name, "Stage did not drain in time, abandoning"),
            }
        }

        info!("Orchestrator stopped");
        Ok(())
    }
}

/// Measure every active bucket's response time, feeding the uploader's
/// tertiary ranking key.
async fn probe_storage_nodes(ctx: &SyncContext) {
    let buckets = match ctx.query_node.active_storage_buckets().await {
        Ok(buckets) => buckets,
        Err(e) => {
            warn!("Storage probe skipped, query node unavailable: {e}");
            return;
        }
    };
    for bucket in buckets {
        match ctx.storage_nodes.response_time(&bucket.endpoint).await {
            Ok(elapsed) => {
                ctx.latency
                    .observe(&bucket.id, elapsed.as_secs_f64() * 1_000.0);
            }
            Err(e) => {
                debug!(bucket = %bucket.id, "Probe failed: {e}");
                ctx.latency.penalize(&bucket.id);
            }
        }
    }
}
