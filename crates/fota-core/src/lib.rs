//! FOTA-Core: hawkBit-style firmware-over-the-air update client.
//!
//! This crate implements the device side of a DDI polling update flow:
//! poll an update server, judge pending deployments against a persisted
//! action-id pair, stream accepted artifacts into the secondary flash
//! bank, and hand the swap to the bootloader.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Transport**: blocking connect/send/recv over a push-style network
//!   driver (tcp, mock)
//! - **HTTP**: minimal request building and incremental response parsing
//! - **JSON**: bounded tokenizer plus schema walkers for the two server
//!   resources
//! - **Flash**: block-buffered writer with read-back verify, simulated
//!   device for tests
//! - **Acid**: the persisted `{current, update}` action-id record
//! - **Boot**: bootloader and reboot collaborator traits
//! - **Events**: observer pattern for UI decoupling
//! - **Client**: the poll/decide/install state machine
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use fota_core::client::UpdateClient;
//! use fota_core::config::ClientConfig;
//! use fota_core::flash::{FlashLayout, SimFlash};
//! use fota_core::transport::TcpNetDriver;
//! # use fota_core::boot::{BootError, Bootloader, ImageVersion, Reboot};
//! # struct NoBoot;
//! # impl Bootloader for NoBoot {
//! #     fn read_bank_header(&mut self, _: usize) -> Result<ImageVersion, BootError> { Err(BootError::InvalidImage) }
//! #     fn is_image_confirmed(&mut self) -> bool { true }
//! #     fn confirm_image(&mut self) -> Result<(), BootError> { Ok(()) }
//! #     fn request_upgrade(&mut self) -> Result<(), BootError> { Ok(()) }
//! #     fn erase_secondary_bank(&mut self) -> Result<(), BootError> { Ok(()) }
//! # }
//! # struct NoReboot;
//! # impl Reboot for NoReboot { fn reboot(&self) {} }
//!
//! let config = ClientConfig {
//!     server_host: "hawkbit.local".into(),
//!     ..Default::default()
//! };
//! let layout = FlashLayout {
//!     state_offset: 0x0,
//!     state_size: 0x1000,
//!     bank_offset: 0x1000,
//!     bank_size: 0x60000,
//! };
//! let driver = TcpNetDriver::new(Duration::from_secs(5));
//! let flash = SimFlash::new(0x61000);
//!
//! let mut client = UpdateClient::new(config, driver, flash, layout, NoBoot, NoReboot);
//! client.start().expect("startup failed");
//! client.run().expect("update loop failed");
//! ```

pub mod acid;
pub mod boot;
pub mod client;
pub mod config;
pub mod events;
pub mod flash;
pub mod http;
pub mod json;
pub mod transport;

// Re-exports for convenience
pub use acid::{ACID_UNSET, AcidField, AcidStore, DeviceAcid};
pub use boot::{BootError, Bootloader, ImageVersion, Reboot};
pub use client::{CycleOutcome, MAX_SERVER_FAILURES, UpdateClient};
pub use config::ClientConfig;
pub use events::{FotaEvent, FotaObserver, TracingObserver, UpdatePhase};
pub use flash::{BLOCK_SIZE, BlockWriter, FlashDevice, FlashError, FlashLayout, SimFlash};
pub use http::HttpError;
pub use json::{Deployment, JsonError, PollResource, UpdateAction};
pub use transport::{
    ConnectionRole, MockNetDriver, NetDriver, TcpNetDriver, Transport, TransportError,
};
