//! Platform-agnostic types for the wolweb wake and ping client.
//!
//! This crate provides the data model shared by the client engine
//! (wolweb-core) and any front end that renders it.
//!
//! # Features
//!
//! - Device inventory types with the service's wire naming
//! - Per-device action state and failure reasons
//! - Display state produced by the dwell debouncer
//! - Request and response bodies plus endpoint paths (`serde` feature)
//!
//! # Example
//!
//! ```
//! use wolweb_types::{ActionStatus, Device, DeviceAddress};
//!
//! let device = Device::new(DeviceAddress::new("AA:BB:CC:DD:EE:FF").unwrap(), "nas")
//!     .with_host("192.168.1.20");
//! assert!(device.is_pingable());
//! assert_eq!(ActionStatus::default(), ActionStatus::Idle);
//! ```

pub mod error;
pub mod types;
#[cfg(feature = "serde")]
pub mod wire;

pub use error::{ParseError, ParseResult};
pub use types::{
    ActionKind, ActionStatus, Device, DeviceAddress, DisplayStatus, FailureReason,
    GENERIC_FAILURE,
};
