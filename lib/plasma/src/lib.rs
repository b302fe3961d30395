#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

//! A publish/subscribe messaging transport built around a stand-alone media
//! driver process and in-process clients. The driver owns the sockets and the
//! shared-memory log buffers; clients read and write those buffers directly
//! and talk to the driver only for control-plane operations.

pub mod client;
pub mod concurrent;
pub mod driver;
pub mod protocol;
