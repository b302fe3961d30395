use crate::concurrent::bits::is_power_of_two;
use crate::concurrent::logbuffer::descriptor;
use crate::concurrent::{broadcast, ringbuffer};
use crate::driver::error::{DriverError, DriverResult};
use ion::events;
use ion::properties;
use std::env;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Recognized property names, resolvable from the environment either
/// verbatim or in shell-safe form (`AERON_RCV_BUFFER_SIZE`).
pub const DIR_PROP: &str = "aeron.dir";
pub const RCV_BUFFER_SIZE_PROP: &str = "aeron.rcv.buffer.size";
pub const COMMAND_BUFFER_SIZE_PROP: &str = "aeron.command.buffer.size";
pub const CONDUCTOR_BUFFER_SIZE_PROP: &str = "aeron.conductor.buffer.size";
pub const CLIENTS_BUFFER_SIZE_PROP: &str = "aeron.clients.buffer.size";
pub const COUNTERS_SIZE_PROP: &str = "aeron.dir.counters.size";
pub const MULTICAST_INTERFACE_PROP: &str = "aeron.multicast.default.interface";
pub const TERM_BUFFER_SIZE_PROP: &str = "aeron.term.buffer.size";
pub const MTU_LENGTH_PROP: &str = "aeron.mtu.length";
pub const DELETE_DIRS_PROP: &str = "aeron.dir.delete.on.exit";
pub const EVENT_LOG_PROP: &str = "aeron.event.log";
pub const CLIENT_LIVENESS_TIMEOUT_PROP: &str = "aeron.client.liveness.timeout";
pub const IMAGE_LIVENESS_TIMEOUT_PROP: &str = "aeron.image.liveness.timeout";
pub const PUBLICATION_LINGER_PROP: &str = "aeron.publication.linger.timeout";

pub const DEFAULT_RCV_BUFFER_SIZE: u64 = 4 * 1024;
pub const DEFAULT_COMMAND_BUFFER_SIZE: u64 = 64 * 1024;
pub const DEFAULT_CONDUCTOR_BUFFER_SIZE: u64 = 64 * 1024;
pub const DEFAULT_CLIENTS_BUFFER_SIZE: u64 = 64 * 1024;
pub const DEFAULT_COUNTERS_SIZE: u64 = 64 * 1024;
pub const DEFAULT_TERM_BUFFER_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_MTU_LENGTH: u64 = 4096;
pub const DEFAULT_CLIENT_LIVENESS_TIMEOUT_NS: u64 = 5_000_000_000;
pub const DEFAULT_IMAGE_LIVENESS_TIMEOUT_NS: u64 = 10_000_000_000;
pub const DEFAULT_PUBLICATION_LINGER_NS: u64 = 5_000_000_000;

/// Driver configuration: a plain struct with defaults, overridable from
/// properties, validated once by `conclude` before the driver materializes
/// any buffers from it.
#[derive(Clone)]
pub struct DriverContext {
    /// Root under which the admin and data directories live.
    pub base_dir: PathBuf,
    pub dirs_delete_on_exit: bool,

    /// Per-socket read buffer.
    pub rcv_buffer_size: usize,
    /// Capacity, in entries, of each inter-agent command queue.
    pub command_queue_capacity: usize,
    /// Payload capacity of the to-driver ring (trailer added on top).
    pub to_driver_buffer_size: usize,
    /// Payload capacity of the to-clients broadcast (trailer added on top).
    pub to_clients_buffer_size: usize,
    /// Size of each of the counters value and label files.
    pub counters_size: usize,

    pub multicast_interface: Option<Ipv4Addr>,

    pub term_length: u32,
    pub mtu_length: u32,
    /// Receiver window advertised in status messages.
    pub initial_window: u32,

    pub timer_tick_ns: u64,
    pub timer_wheel_slots: usize,

    pub client_liveness_timeout_ns: u64,
    pub image_liveness_timeout_ns: u64,
    pub publication_linger_ns: u64,
    /// Flow control evicts a multicast receiver silent for this long.
    pub flow_receiver_timeout_ns: u64,
    /// Status message cadence.
    pub sm_timeout_ns: u64,
    pub setup_interval_ns: u64,
    pub heartbeat_interval_ns: u64,

    /// NAK backoff inputs.
    pub nak_grtt_ns: u64,
    pub nak_group_size: u32,
    pub nak_max_backoff_ns: u64,
    pub nak_retry_ns: u64,

    pub retransmit_linger_ns: u64,
    pub max_retransmits: usize,

    /// Tag bit-set of enabled diagnostic event codes.
    pub event_tags: u64,
}

impl Default for DriverContext {
    fn default() -> DriverContext {
        DriverContext {
            base_dir: env::temp_dir().join("plasma"),
            dirs_delete_on_exit: true,
            rcv_buffer_size: DEFAULT_RCV_BUFFER_SIZE as usize,
            command_queue_capacity: 1024,
            to_driver_buffer_size: DEFAULT_CONDUCTOR_BUFFER_SIZE as usize,
            to_clients_buffer_size: DEFAULT_CLIENTS_BUFFER_SIZE as usize,
            counters_size: DEFAULT_COUNTERS_SIZE as usize,
            multicast_interface: None,
            term_length: DEFAULT_TERM_BUFFER_SIZE as u32,
            mtu_length: DEFAULT_MTU_LENGTH as u32,
            initial_window: 128 * 1024,
            timer_tick_ns: 10_000_000,
            timer_wheel_slots: 1024,
            client_liveness_timeout_ns: DEFAULT_CLIENT_LIVENESS_TIMEOUT_NS,
            image_liveness_timeout_ns: DEFAULT_IMAGE_LIVENESS_TIMEOUT_NS,
            publication_linger_ns: DEFAULT_PUBLICATION_LINGER_NS,
            flow_receiver_timeout_ns: 2_000_000_000,
            sm_timeout_ns: 200_000_000,
            setup_interval_ns: 100_000_000,
            heartbeat_interval_ns: 200_000_000,
            nak_grtt_ns: 10_000_000,
            nak_group_size: 8,
            nak_max_backoff_ns: 60_000_000,
            nak_retry_ns: 60_000_000,
            retransmit_linger_ns: 40_000_000,
            max_retransmits: 16,
            event_tags: 0,
        }
    }
}

impl DriverContext {
    /// Builds a context from the environment, starting from defaults.
    pub fn from_properties() -> DriverResult<DriverContext> {
        let mut context = DriverContext::default();

        if let Some(dir) = properties::get_property(DIR_PROP) {
            context.base_dir = PathBuf::from(dir);
        }

        context.rcv_buffer_size =
            properties::sized_property(RCV_BUFFER_SIZE_PROP, DEFAULT_RCV_BUFFER_SIZE)? as usize;
        context.command_queue_capacity =
            (properties::sized_property(COMMAND_BUFFER_SIZE_PROP, DEFAULT_COMMAND_BUFFER_SIZE)?
                as usize
                / 64)
                .next_power_of_two();
        context.to_driver_buffer_size =
            properties::sized_property(CONDUCTOR_BUFFER_SIZE_PROP, DEFAULT_CONDUCTOR_BUFFER_SIZE)?
                as usize;
        context.to_clients_buffer_size =
            properties::sized_property(CLIENTS_BUFFER_SIZE_PROP, DEFAULT_CLIENTS_BUFFER_SIZE)?
                as usize;
        context.counters_size =
            properties::sized_property(COUNTERS_SIZE_PROP, DEFAULT_COUNTERS_SIZE)? as usize;
        context.term_length =
            properties::sized_property(TERM_BUFFER_SIZE_PROP, DEFAULT_TERM_BUFFER_SIZE)? as u32;
        context.mtu_length =
            properties::sized_property(MTU_LENGTH_PROP, DEFAULT_MTU_LENGTH)? as u32;
        context.client_liveness_timeout_ns = properties::duration_property(
            CLIENT_LIVENESS_TIMEOUT_PROP,
            DEFAULT_CLIENT_LIVENESS_TIMEOUT_NS,
        )?;
        context.image_liveness_timeout_ns = properties::duration_property(
            IMAGE_LIVENESS_TIMEOUT_PROP,
            DEFAULT_IMAGE_LIVENESS_TIMEOUT_NS,
        )?;
        context.publication_linger_ns = properties::duration_property(
            PUBLICATION_LINGER_PROP,
            DEFAULT_PUBLICATION_LINGER_NS,
        )?;

        if let Some(value) = properties::get_property(MULTICAST_INTERFACE_PROP) {
            context.multicast_interface = value.parse().ok();
        }

        if let Some(value) = properties::get_property(DELETE_DIRS_PROP) {
            context.dirs_delete_on_exit = value == "true" || value == "1";
        }

        if let Some(value) = properties::get_property(EVENT_LOG_PROP) {
            context.event_tags = events::tag_mask(&events::enabled_event_codes(&value));
        }

        Ok(context)
    }

    /// Validates the configuration. Called once at launch; failures are
    /// fatal to the driver process.
    pub fn conclude(&self) -> DriverResult<()> {
        descriptor::check_term_length(self.term_length).map_err(DriverError::Config)?;

        if !is_power_of_two(self.to_driver_buffer_size as u64) {
            return Err(DriverError::Config(format!(
                "{} must be a power of two, got {}",
                CONDUCTOR_BUFFER_SIZE_PROP, self.to_driver_buffer_size
            )));
        }
        if !is_power_of_two(self.to_clients_buffer_size as u64) {
            return Err(DriverError::Config(format!(
                "{} must be a power of two, got {}",
                CLIENTS_BUFFER_SIZE_PROP, self.to_clients_buffer_size
            )));
        }
        if !is_power_of_two(self.command_queue_capacity as u64) {
            return Err(DriverError::Config(format!(
                "{} must resolve to a power of two queue capacity, got {}",
                COMMAND_BUFFER_SIZE_PROP, self.command_queue_capacity
            )));
        }
        if self.mtu_length < 64 || self.mtu_length as usize > 64 * 1024 {
            return Err(DriverError::Config(format!(
                "{} out of range: {}",
                MTU_LENGTH_PROP, self.mtu_length
            )));
        }
        if !is_power_of_two(self.timer_wheel_slots as u64) {
            return Err(DriverError::Config(format!(
                "timer wheel slots must be a power of two, got {}",
                self.timer_wheel_slots
            )));
        }

        Ok(())
    }

    #[inline]
    pub fn admin_dir(&self) -> PathBuf {
        self.base_dir.join("admin")
    }

    #[inline]
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    #[inline]
    pub fn publications_dir(&self) -> PathBuf {
        self.data_dir().join("publications")
    }

    #[inline]
    pub fn subscriptions_dir(&self) -> PathBuf {
        self.data_dir().join("subscriptions")
    }

    /// Length of the to-driver ring file, trailer included.
    #[inline]
    pub fn to_driver_file_length(&self) -> usize {
        self.to_driver_buffer_size + ringbuffer::descriptor::TRAILER_LENGTH
    }

    /// Length of the to-clients broadcast file, trailer included.
    #[inline]
    pub fn to_clients_file_length(&self) -> usize {
        self.to_clients_buffer_size + broadcast::descriptor::TRAILER_LENGTH
    }
}

/// Admin file locations shared between the driver and its clients.
pub fn to_driver_path(admin_dir: &Path) -> PathBuf {
    admin_dir.join("to-driver")
}

pub fn to_clients_path(admin_dir: &Path) -> PathBuf {
    admin_dir.join("to-clients")
}

pub fn counter_labels_path(admin_dir: &Path) -> PathBuf {
    admin_dir.join("counters").join("labels")
}

pub fn counter_values_path(admin_dir: &Path) -> PathBuf {
    admin_dir.join("counters").join("values")
}
