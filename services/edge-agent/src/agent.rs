//! Ties the reading engine (C3-C6) together with the queue (C8/C9) and
//! publisher (C10) into the per-cycle and process-lifecycle flow.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use edge_model::{Config, DriverRegistry};
use edge_output::{evaluate_outputs, Context};
use edge_queue::{DurableQueue, QueueItem, SpillController, VolatileQueue, VOLATILE_QUEUE_MAXSIZE};
use edge_reader_pool::ReaderPool;
use edge_resolver::HostResolver;

use crate::config_watch::ConfigStatusSource;
use crate::publisher::{self, PublisherConfig};
use crate::scheduler;

/// The on-disk/cache locations a config reload re-reads from — the same
/// three sources `main` consults at startup (A1).
pub struct ConfigPaths {
    pub base_config: PathBuf,
    pub driver_dir: PathBuf,
    pub redis_url: String,
}

pub struct Agent {
    pub config: RwLock<Config>,
    pub drivers: RwLock<DriverRegistry>,
    pub pool: RwLock<ReaderPool>,
    paths: ConfigPaths,
    resolver: Option<Arc<HostResolver>>,
    pub volatile: Arc<VolatileQueue>,
    pub shutdown: Arc<AtomicBool>,
    pub reload_pending: Arc<AtomicBool>,
    pub config_id_cell: Arc<RwLock<Option<String>>>,
}

impl Agent {
    pub fn new(
        config: Config,
        drivers: DriverRegistry,
        queue_db: &std::path::Path,
        paths: ConfigPaths,
        resolver: Option<Arc<HostResolver>>,
    ) -> Result<(Self, DurableQueue), edge_queue::DurableQueueError> {
        let mut pool = ReaderPool::new(&config);
        if let Some(resolver) = &resolver {
            pool = pool.with_resolver(resolver.clone());
        }
        let durable = DurableQueue::open(queue_db)?;
        let agent = Agent {
            config: RwLock::new(config),
            drivers: RwLock::new(drivers),
            pool: RwLock::new(pool),
            paths,
            resolver,
            volatile: Arc::new(VolatileQueue::new(VOLATILE_QUEUE_MAXSIZE)),
            shutdown: Arc::new(AtomicBool::new(false)),
            reload_pending: Arc::new(AtomicBool::new(false)),
            config_id_cell: Arc::new(RwLock::new(None)),
        };
        Ok((agent, durable))
    }

    /// Re-read the base config, driver files, and cached cloud drivers
    /// from disk/cache and swap them in atomically. Only ever called at a
    /// cycle boundary (§5: "configuration... readers sample once at cycle
    /// start and carry the snapshot through the cycle").
    fn reload(&self) {
        let base_config = match crate::config::load_base_config(&self.paths.base_config) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "config reload failed, keeping current configuration");
                return;
            }
        };
        let base_drivers = match crate::config::load_driver_dir(&self.paths.driver_dir) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "driver reload failed, keeping current configuration");
                return;
            }
        };
        let cached_drivers = crate::config::load_cached_driver_registry(&self.paths.redis_url);
        let drivers = crate::config::merged_driver_registry(&base_drivers, cached_drivers.as_ref(), &base_config);

        let mut pool = ReaderPool::new(&base_config);
        if let Some(resolver) = &self.resolver {
            pool = pool.with_resolver(resolver.clone());
        }

        match crate::config_watch::config_id(&base_config) {
            Ok(id) => *self.config_id_cell.write().unwrap() = Some(id),
            Err(e) => tracing::warn!(error = %e, "failed to compute digest for reloaded config"),
        }

        *self.config.write().unwrap() = base_config;
        *self.drivers.write().unwrap() = drivers;
        *self.pool.write().unwrap() = pool;
        tracing::info!("configuration reloaded at cycle boundary");
    }

    /// One reading cycle: plan, read, evaluate outputs, enqueue.
    pub fn run_cycle(&self) {
        if self.reload_pending.swap(false, Ordering::SeqCst) {
            self.reload();
        }

        let started = Instant::now();
        let cycle_start = now_unix();

        let config = self.config.read().unwrap();
        let drivers = self.drivers.read().unwrap();
        let plan = edge_planner::plan(&config, &drivers);
        let pool = self.pool.read().unwrap();
        let mut devices = pool.run_cycle(&config, &plan);
        drop(pool);

        let ctx = Context { devices: &devices };
        let calculated = evaluate_outputs(&config.output, &ctx, &config.calc_vendor_id);
        for (device_id, field, value) in calculated {
            devices
                .entry(device_id.clone())
                .or_insert_with(|| edge_model::DeviceReading::new(&device_id))
                .fields
                .insert(field, value);
        }
        drop(drivers);
        drop(config);

        let readout = edge_model::Readout {
            t: cycle_start,
            r: devices.into_values().collect(),
            m: edge_model::Metadata {
                snap_rev: std::env::var("SNAP_REVISION").ok().and_then(|s| s.parse().ok()),
                reading_duration: started.elapsed().as_secs_f64(),
                config_id: self.config_id_cell.read().unwrap().clone(),
                reading_offset: None,
            },
        };

        self.volatile.put(QueueItem::Readout(readout));
    }

    /// Run the scheduler loop on the current thread until shutdown.
    pub fn run_scheduler(&self) {
        let (mode, interval) = {
            let config = self.config.read().unwrap();
            let mode = if config.read_roundtime { scheduler::Mode::RoundTime } else { scheduler::Mode::FreeInterval };
            (mode, config.read_interval.map(Duration::from_secs_f64))
        };
        scheduler::run(mode, interval, self.shutdown.clone(), || self.run_cycle());
        self.volatile.put(QueueItem::Shutdown);
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Spawn the spill controller, publisher, and config watcher threads and
/// run the scheduler to completion on the calling thread (blocking until
/// shutdown, or once in one-shot mode).
pub fn run_to_completion(agent: Arc<Agent>, durable: DurableQueue, publisher_cfg: PublisherConfig, config_source: Box<dyn ConfigStatusSource>) {
    let publish_in_progress = Arc::new(AtomicBool::new(false));

    let controller = SpillController::new(
        agent.volatile.clone(),
        durable,
        publish_in_progress.clone(),
        edge_queue::controller::DEFAULT_VOLATILE_Q_SIZE,
        agent.shutdown.clone(),
    );
    let controller_handle = std::thread::spawn(move || controller.run());

    let publisher_volatile = agent.volatile.clone();
    let publisher_config_id = agent.config_id_cell.clone();
    let publisher_shutdown = agent.shutdown.clone();
    let publisher_handle = std::thread::spawn(move || {
        publisher::run(&publisher_cfg, &publisher_volatile, &publisher_config_id, &publish_in_progress, &publisher_shutdown)
    });

    let watcher_config_id = agent.config_id_cell.clone();
    let watcher_reload_pending = agent.reload_pending.clone();
    let watcher_shutdown = agent.shutdown.clone();
    let watcher_handle = std::thread::spawn(move || crate::config_watch::run(config_source, watcher_config_id, watcher_reload_pending, watcher_shutdown));

    agent.run_scheduler();

    let _ = publisher_handle.join();
    let _ = controller_handle.join();
    let _ = watcher_handle.join();
}
