//! Frame codec for the RS485 soil nutrient (NPK) sensor.
//!
//! The sensor speaks Modbus RTU. One request reads three consecutive holding
//! registers (nitrogen, phosphorus, potassium) and the sensor answers with a
//! fixed 11 byte frame:
//!
//! ```text
//! request:  [addr:1][func:1][start:2 BE][count:2 BE][crc16:2 LE]            8 bytes
//! response: [addr:1][func:1][byte count:1][n:2 BE][p:2 BE][k:2 BE][crc16:2 LE] 11 bytes
//! ```
//!
//! Both directions are protected by the Modbus CRC-16 (polynomial `0xA001`
//! reflected, initial value `0xFFFF`), transmitted low byte first.
use crc::{Crc, CRC_16_MODBUS};
use std::fmt;

/// Modbus CRC-16 used for request and response frames.
const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Modbus function code "read holding registers".
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

pub const FACTORY_DEFAULT_ADDRESS: u8 = 0x01;
pub const FACTORY_DEFAULT_BAUD_RATE: &BaudRate = &BaudRate::B9600;

pub const NUTRIENT_REG_ADDR: u16 = 0x001E;
pub const NUTRIENT_REG_QUAN: u16 = 3;

/// Length of an encoded [`RequestFrame`].
pub const REQUEST_LEN: usize = 8;
/// Length of a complete nutrient response frame.
pub const RESPONSE_LEN: usize = 11;
const CHECKSUM_LEN: usize = 2;

const NITROGEN_OFFSET: usize = 3;
const PHOSPHORUS_OFFSET: usize = 5;
const POTASSIUM_OFFSET: usize = 7;

/// Value range errors for the strongly typed protocol values.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The device address is outside of `ADDRESS_MIN..=ADDRESS_MAX`.
    #[error("The address value {0} is outside the valid range of 1 to 247")]
    AddressOutOfRange(u8),

    /// The sensor does not support the requested baud rate.
    #[error("Unsupported baud rate value: {0}. Supported values are 2400, 4800 and 9600")]
    UnsupportedBaudRate(u16),

    /// Dry and wet calibration points must differ.
    #[error("Calibration dry point and wet point must differ, both are {0}")]
    DegenerateCalibration(u16),
}

/// Reasons a response buffer could not be turned into a [`NutrientReading`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The buffer does not hold exactly one response frame.
    #[error("Incomplete frame: expected {expected} bytes, got {received}")]
    IncompleteFrame { expected: usize, received: usize },

    /// The trailing checksum does not match the payload.
    #[error("Checksum invalid: computed {expected:#06x}, received {received:#06x}")]
    ChecksumInvalid { expected: u16, received: u16 },
}

/// Serial baud rates supported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaudRate {
    B2400,
    B4800,
    #[default]
    B9600,
}

impl TryFrom<u16> for BaudRate {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            2400 => Ok(BaudRate::B2400),
            4800 => Ok(BaudRate::B4800),
            9600 => Ok(BaudRate::B9600),
            _ => Err(Error::UnsupportedBaudRate(value)),
        }
    }
}

impl From<&BaudRate> for u16 {
    fn from(baud_rate: &BaudRate) -> u16 {
        match baud_rate {
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
        }
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u16::from(self))
    }
}

/// A Modbus RTU slave address in `1..=247`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address(u8);

impl Address {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 247;
}

impl Default for Address {
    fn default() -> Self {
        Self(FACTORY_DEFAULT_ADDRESS)
    }
}

impl std::ops::Deref for Address {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u8> for Address {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::AddressOutOfRange(value))
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Computes the Modbus CRC-16 over `bytes`.
pub fn checksum(bytes: &[u8]) -> u16 {
    CRC.checksum(bytes)
}

/// An encoded "read holding registers" request.
///
/// Built once per transaction and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame([u8; REQUEST_LEN]);

impl RequestFrame {
    /// The raw bytes as they go out on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for RequestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

/// Builds the request frame for reading `register_count` holding registers
/// starting at `start_register` from the device at `address`.
pub fn build_request(address: Address, start_register: u16, register_count: u16) -> RequestFrame {
    let mut frame = [0u8; REQUEST_LEN];
    frame[0] = *address;
    frame[1] = READ_HOLDING_REGISTERS;
    frame[2..4].copy_from_slice(&start_register.to_be_bytes());
    frame[4..6].copy_from_slice(&register_count.to_be_bytes());
    let crc = checksum(&frame[..REQUEST_LEN - CHECKSUM_LEN]);
    frame[REQUEST_LEN - CHECKSUM_LEN..].copy_from_slice(&crc.to_le_bytes());
    RequestFrame(frame)
}

/// The request for the fixed device profile: address `0x01`, registers
/// `0x001e..0x0021`.
pub fn nutrient_request() -> RequestFrame {
    build_request(Address::default(), NUTRIENT_REG_ADDR, NUTRIENT_REG_QUAN)
}

/// Nitrogen, phosphorus and potassium as reported by the sensor (mg/kg).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NutrientReading {
    pub nitrogen: u16,
    pub phosphorus: u16,
    pub potassium: u16,
}

impl NutrientReading {
    pub const ZERO: NutrientReading = NutrientReading {
        nitrogen: 0,
        phosphorus: 0,
        potassium: 0,
    };
}

impl fmt::Display for NutrientReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "N: {}, P: {}, K: {}",
            self.nitrogen, self.phosphorus, self.potassium
        )
    }
}

fn be_u16(buffer: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buffer[offset], buffer[offset + 1]])
}

/// Validates a complete response frame and extracts the nutrient values.
///
/// Parsing is all-or-nothing: the buffer must be exactly [`RESPONSE_LEN`]
/// bytes long and its trailing checksum must match. The address, function
/// and byte count echo in the first three bytes are not surfaced.
pub fn try_parse_response(buffer: &[u8]) -> Result<NutrientReading, ParseError> {
    if buffer.len() != RESPONSE_LEN {
        return Err(ParseError::IncompleteFrame {
            expected: RESPONSE_LEN,
            received: buffer.len(),
        });
    }
    let (payload, trailer) = buffer.split_at(RESPONSE_LEN - CHECKSUM_LEN);
    let expected = checksum(payload);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    if expected != received {
        return Err(ParseError::ChecksumInvalid { expected, received });
    }
    Ok(NutrientReading {
        nitrogen: be_u16(buffer, NITROGEN_OFFSET),
        phosphorus: be_u16(buffer, PHOSPHORUS_OFFSET),
        potassium: be_u16(buffer, POTASSIUM_OFFSET),
    })
}

pub(crate) struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, self.0)
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{byte:02x}")?;
    }
    Ok(())
}
