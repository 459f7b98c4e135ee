//! A library for the soil nutrient (NPK) field telemetry node.
//!
//! The node polls an RS485 Modbus NPK sensor over a half-duplex bus, reads a
//! capacitive moisture sensor through an ADC and uplinks both to a cloud
//! time-series channel.
//!
//! The crate is layered bottom-up:
//!
//! 1.  [`protocol`]: builds the request frame and validates the 11 byte
//!     response frame (Modbus CRC-16).
//! 2.  [`direction`] and [`timing`]: transceiver direction control with the
//!     settle and turnaround delays, all waits behind a [`timing::Clock`].
//! 3.  [`transaction`]: one request/response exchange as an explicit state
//!     machine with a response deadline.
//! 4.  [`calibration`]: two-point linear mapping of raw moisture samples.
//! 5.  [`cycle`]: the acquisition loop that merges everything into a
//!     [`cycle::Reading`] and hands it to an [`uplink::Uplink`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use npk_node_lib::{
//!     protocol::{self, BaudRate},
//!     serial,
//!     timing::{BusTiming, SystemClock},
//!     transaction::Transceiver,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (bus, lines) = serial::open("/dev/ttyUSB0", &BaudRate::B9600)?;
//!     let mut transceiver = Transceiver::new(bus, lines, SystemClock, BusTiming::default());
//!
//!     let reading = transceiver.execute(&protocol::nutrient_request())?;
//!     println!("{reading}");
//!
//!     Ok(())
//! }
//! ```

pub mod calibration;
pub mod cycle;
pub mod direction;
pub mod iio;
pub mod network;
pub mod protocol;
pub mod timing;
pub mod transaction;
pub mod uplink;

#[cfg_attr(docsrs, doc(cfg(feature = "serial")))]
#[cfg(feature = "serial")]
pub mod serial;

#[cfg_attr(docsrs, doc(cfg(feature = "thingspeak")))]
#[cfg(feature = "thingspeak")]
pub mod thingspeak;
