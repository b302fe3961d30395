pub mod agent;
pub mod conductor;
pub mod context;
pub mod error;
pub mod flow;
pub mod image;
pub mod loss;
pub mod proxies;
pub mod publication;
pub mod receiver;
pub mod retransmit;
pub mod sender;
pub mod udp;

use crate::concurrent::broadcast::BroadcastTransmitter;
use crate::concurrent::counters::CountersManager;
use crate::concurrent::idle::BackoffIdleStrategy;
use crate::concurrent::ringbuffer::ManyToOneRingBuffer;
use crate::concurrent::spsc::OneToOneQueue;
use crate::concurrent::MappedFile;
use crate::driver::agent::AgentRunner;
use crate::driver::conductor::DriverConductor;
use crate::driver::context::DriverContext;
use crate::driver::error::DriverResult;
use crate::driver::receiver::{Receiver, ReceiverStats};
use crate::driver::sender::{Sender, SenderStats};
use ion::logging::{self, Logger};
use ion::time::NanoClock;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// The assembled media driver: three agents over shared admin buffers.
/// Launching creates the shared-memory files and spawns the agent threads;
/// shutdown flips the running flag, joins them and (when configured) removes
/// every file the driver created.
pub struct MediaDriver {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    _admin_files: Vec<MappedFile>,
    base_dir: PathBuf,
    delete_dirs: bool,
    log: Logger,
}

impl MediaDriver {
    pub fn launch(context: DriverContext, log: &Logger) -> DriverResult<MediaDriver> {
        context.conclude()?;

        let admin_dir = context.admin_dir();
        fs::create_dir_all(admin_dir.join("counters"))?;
        fs::create_dir_all(context.publications_dir())?;
        fs::create_dir_all(context.subscriptions_dir())?;

        let mut to_driver = MappedFile::create(
            context::to_driver_path(&admin_dir),
            context.to_driver_file_length(),
        )?;
        let mut to_clients = MappedFile::create(
            context::to_clients_path(&admin_dir),
            context.to_clients_file_length(),
        )?;
        let mut labels = MappedFile::create(
            context::counter_labels_path(&admin_dir),
            context.counters_size * 2,
        )?;
        let mut values = MappedFile::create(
            context::counter_values_path(&admin_dir),
            context.counters_size,
        )?;

        for file in [&mut to_driver, &mut to_clients, &mut labels, &mut values].iter_mut() {
            file.set_delete_on_drop(context.dirs_delete_on_exit);
        }

        let ring = ManyToOneRingBuffer::new(to_driver.buffer());
        let broadcast = BroadcastTransmitter::new(to_clients.buffer());
        let mut counters = CountersManager::new(labels.buffer(), values.buffer());

        let sender_stats = SenderStats {
            short_sends: stat(&mut counters, "driver: short sends")?,
            heartbeats_sent: stat(&mut counters, "driver: heartbeats sent")?,
            naks_received: stat(&mut counters, "driver: naks received")?,
            sms_received: stat(&mut counters, "driver: status messages received")?,
        };
        let receiver_stats = ReceiverStats {
            naks_sent: stat(&mut counters, "driver: naks sent")?,
            sms_sent: stat(&mut counters, "driver: status messages sent")?,
            invalid_frames: stat(&mut counters, "driver: invalid frames")?,
        };

        let sender_commands = Arc::new(OneToOneQueue::with_capacity(context.command_queue_capacity));
        let receiver_commands =
            Arc::new(OneToOneQueue::with_capacity(context.command_queue_capacity));
        let conductor_events = Arc::new(OneToOneQueue::with_capacity(context.command_queue_capacity));

        let clock = NanoClock::new();
        let running = Arc::new(AtomicBool::new(true));

        let sender = Sender::new(
            &context,
            Arc::clone(&sender_commands),
            clock,
            sender_stats,
            log.new(logging::o!("agent" => "sender")),
        )?;
        let receiver = Receiver::new(
            &context,
            Arc::clone(&receiver_commands),
            Arc::clone(&conductor_events),
            clock,
            receiver_stats,
            log.new(logging::o!("agent" => "receiver")),
        )?;

        let base_dir = context.base_dir.clone();
        let delete_dirs = context.dirs_delete_on_exit;

        let conductor = DriverConductor::new(
            context,
            ring,
            broadcast,
            counters,
            sender_commands,
            receiver_commands,
            conductor_events,
            clock,
            log.new(logging::o!("agent" => "conductor")),
        );

        let handles = vec![
            AgentRunner::start(
                conductor,
                BackoffIdleStrategy::default_strategy(),
                Arc::clone(&running),
                log,
            ),
            AgentRunner::start(
                sender,
                BackoffIdleStrategy::default_strategy(),
                Arc::clone(&running),
                log,
            ),
            AgentRunner::start(
                receiver,
                BackoffIdleStrategy::default_strategy(),
                Arc::clone(&running),
                log,
            ),
        ];

        logging::info!(log, "media driver launched"; "context" => "launch", "dir" => %base_dir.display());

        Ok(MediaDriver {
            running,
            handles,
            _admin_files: vec![to_driver, to_clients, labels, values],
            base_dir,
            delete_dirs,
            log: log.clone(),
        })
    }

    /// Shared flag the agents watch; external shutdown (signal handlers)
    /// flips it.
    #[inline]
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    #[inline]
    pub fn admin_dir(&self) -> PathBuf {
        self.base_dir.join("admin")
    }

    /// Blocks until the running flag goes false and every agent has parked.
    pub fn wait(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Stops the agents and reclaims the shared-memory files.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);

        if !self.handles.is_empty() {
            self.wait();
            logging::info!(self.log, "media driver stopped"; "context" => "shutdown");
        }
    }
}

impl Drop for MediaDriver {
    fn drop(&mut self) {
        self.shutdown();

        if self.delete_dirs {
            let _ = fs::remove_dir_all(&self.base_dir);
        }
    }
}

fn stat(
    counters: &mut CountersManager,
    label: &str,
) -> DriverResult<crate::concurrent::counters::Position> {
    counters
        .allocate(label)
        .map(|id| counters.position(id))
        .ok_or_else(|| error::DriverError::Config("counters file too small".to_string()))
}
