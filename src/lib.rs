//! # SensorLink RS
//!
//! A Rust library for acquiring scalar sensor readings from serial-attached
//! microcontrollers, over direct USB or a Bluetooth-to-serial bridge.
//!
//! The device side is as dumb as it gets: one decimal reading per line of
//! ASCII text. This library covers everything on the host side of that wire:
//! finding the right port, opening it, collecting readings in the background
//! and handing consistent snapshots to whoever wants to display them.
//!
//! ## Features
//!
//! - **Cross-platform device discovery**: uses `serialport` enumeration with
//!   per-family selectors (hardware id or description patterns)
//! - **Line-oriented connections**: bounded-timeout reads of newline-delimited
//!   records, with partial lines surviving across timeouts
//! - **Background acquisition**: a cancellable loop feeding a thread-safe,
//!   order-preserving buffer of timestamped readings
//! - **Bounded failure recovery**: transient read failures retry with backoff
//!   up to a budget, then the session reports itself failed instead of
//!   spinning on a dead device
//! - **Type safety**: strong typing and error handling throughout
//!
//! ## Examples
//!
//! ### End-to-end acquisition
//!
//! ```rust,no_run
//! use sensorlink_rs::{AcquisitionSession, DeviceFamily};
//! use std::time::Duration;
//!
//! // Discover and open a USB microcontroller, then collect for two seconds
//! let mut session = AcquisitionSession::open(DeviceFamily::UsbMicrocontroller, None)?;
//! session.start();
//! std::thread::sleep(Duration::from_secs(2));
//!
//! for reading in session.snapshot() {
//!     println!("{:?}: {}", reading.timestamp, reading.value);
//! }
//!
//! // Stop and wait until the loop has exited and the port is closed
//! session.stop();
//! session.join();
//! # Ok::<(), sensorlink_rs::ConnectorError>(())
//! ```
//!
//! ### Device discovery
//!
//! ```rust,no_run
//! use sensorlink_rs::{find_port, DeviceFamily, SensorConnector};
//!
//! // List everything the host can see
//! for descriptor in SensorConnector::available_ports()? {
//!     println!("{} - {}", descriptor.device, descriptor.description);
//! }
//!
//! // Or match a family's selector against a fixed list
//! let descriptors = SensorConnector::available_ports()?;
//! match find_port(&descriptors, &DeviceFamily::BluetoothBridge.selector()) {
//!     Some(descriptor) => println!("Bridge at {}", descriptor.device),
//!     None => println!("No bridge paired"),
//! }
//! # Ok::<(), sensorlink_rs::ConnectorError>(())
//! ```
//!
//! ### Manual port override
//!
//! ```rust,no_run
//! use sensorlink_rs::{AcquisitionSession, DeviceFamily};
//!
//! // Skip discovery and open a known port at the family's baud rate
//! let session = AcquisitionSession::open(DeviceFamily::BluetoothBridge, Some("COM6"))?;
//! # Ok::<(), sensorlink_rs::ConnectorError>(())
//! ```

pub mod acquisition;
pub mod connector;
pub mod sensor_link;

// Re-export the main types for convenience
pub use acquisition::{
    AcquisitionSession, Reading, ReadingBuffer, RetryPolicy, SessionState, WorkerExit,
};

pub use connector::{
    find_port, ConnectorError, DeviceFamily, PortDescriptor, SensorConnector, TargetSelector,
    DEFAULT_READ_TIMEOUT,
};

pub use sensor_link::{LineSource, LinkError, SensorLink};
