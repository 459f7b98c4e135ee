//! Serial port plumbing on top of `tokio-serial`.
//!
//! The RS485 adapter's DE input is wired to RTS and its RE input to DTR.
//! Data and control lines share one device, so the port is cloned into a
//! [`SerialBus`] for the bytes and [`SerialLines`] for the direction.
use crate::direction::DirectionLines;
use crate::protocol as proto;
use crate::transaction::BusPort;
use log::*;
use std::io::{self, Read, Write};
use std::time::Duration;
use tokio_serial::{ClearBuffer, SerialPort};

/// The parity used for serial communication.
pub const PARITY: &tokio_serial::Parity = &tokio_serial::Parity::None;
/// The number of stop bits used for serial communication.
pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
/// The number of data bits used for serial communication.
pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;

/// Read timeout of the underlying device. Reads only ever ask for bytes
/// that are already buffered, so this is a safety net.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Creates a `tokio_serial::SerialPortBuilder` with the specified settings.
///
/// # Arguments
///
/// * `device` - The path to the serial port device (e.g., `/dev/ttyUSB0`).
/// * `baud_rate` - The baud rate for the serial communication.
pub fn serial_port_builder(
    device: &str,
    baud_rate: &proto::BaudRate,
) -> tokio_serial::SerialPortBuilder {
    tokio_serial::new(device, u16::from(baud_rate) as u32)
        .parity(*PARITY)
        .stop_bits(*STOP_BITS)
        .data_bits(*DATA_BITS)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(READ_TIMEOUT)
}

/// Opens `device` and splits it into data and direction handles.
pub fn open(device: &str, baud_rate: &proto::BaudRate) -> io::Result<(SerialBus, SerialLines)> {
    let port = serial_port_builder(device, baud_rate).open()?;
    let control = port.try_clone()?;
    Ok((SerialBus(port), SerialLines(control)))
}

/// Data side of the serial port.
pub struct SerialBus(Box<dyn SerialPort>);

impl BusPort for SerialBus {
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(self.0.clear(ClearBuffer::Input)?)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.0, bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(&mut self.0)
    }

    fn read_available(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let pending = self.0.bytes_to_read()? as usize;
        if pending == 0 || buffer.is_empty() {
            return Ok(0);
        }
        let count = pending.min(buffer.len());
        match self.0.read(&mut buffer[..count]) {
            Ok(count) => Ok(count),
            Err(error) if error.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(error) => Err(error),
        }
    }
}

/// Direction side of the serial port: RTS drives DE, DTR drives RE.
pub struct SerialLines(Box<dyn SerialPort>);

impl DirectionLines for SerialLines {
    fn set_driver_enable(&mut self, asserted: bool) {
        if let Err(error) = self.0.write_request_to_send(asserted) {
            warn!("Cannot set RTS (DE) to {asserted}: {error}");
        }
    }

    fn set_receiver_disable(&mut self, asserted: bool) {
        if let Err(error) = self.0.write_data_terminal_ready(asserted) {
            warn!("Cannot set DTR (RE) to {asserted}: {error}");
        }
    }
}
