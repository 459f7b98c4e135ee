//! One request/response exchange on the half-duplex bus.
//!
//! A transaction walks `Idle -> Transmitting -> AwaitingResponse` and ends
//! in either `Validated` or `Failed`. There are no retries; the caller
//! decides what to do with a failure.
use crate::direction::{DirectionController, DirectionLines};
use crate::protocol::{self as proto, Hex, NutrientReading, RequestFrame, RESPONSE_LEN};
use crate::timing::{BusTiming, Clock, RESPONSE_POLL_STEP};
use log::*;
use std::fmt;
use std::io;
use std::time::{Duration, Instant};

/// Why a transaction failed.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The response window closed before a full frame arrived.
    #[error("No complete response within {window:?}: received {received} of {expected} bytes")]
    Timeout {
        window: Duration,
        received: usize,
        expected: usize,
    },

    /// A full frame arrived but failed validation.
    #[error(transparent)]
    Frame(#[from] proto::ParseError),

    /// The serial device reported an error.
    #[error("Bus I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The failure reasons a transaction can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    IncompleteFrame,
    ChecksumInvalid,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureReason::Timeout => "Timeout",
            FailureReason::IncompleteFrame => "IncompleteFrame",
            FailureReason::ChecksumInvalid => "ChecksumInvalid",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Maps the error onto its failure reason. A device I/O error means no
    /// response could be read, so it counts as a timeout.
    pub fn reason(&self) -> FailureReason {
        match self {
            Error::Timeout { .. } | Error::Io(..) => FailureReason::Timeout,
            Error::Frame(proto::ParseError::IncompleteFrame { .. }) => {
                FailureReason::IncompleteFrame
            }
            Error::Frame(proto::ParseError::ChecksumInvalid { .. }) => {
                FailureReason::ChecksumInvalid
            }
        }
    }
}

/// Byte level access to the serial line.
pub trait BusPort {
    /// Drops any bytes that are already waiting in the inbound buffer.
    fn discard_input(&mut self) -> io::Result<()>;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Blocks until all written bytes have physically left the port.
    fn flush(&mut self) -> io::Result<()>;

    /// Copies already received bytes into `buffer` without waiting.
    /// Returns `Ok(0)` when nothing is pending.
    fn read_available(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
}

/// Anything that can turn a request into a validated nutrient reading.
pub trait BusExchange {
    fn exchange(&mut self, request: &RequestFrame) -> Result<NutrientReading, Error>;
}

/// How far the response frame has arrived.
///
/// Only the transceiver creates values of this type, so `received` is
/// always below [`RESPONSE_LEN`] and matches the bytes in its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    deadline: Instant,
    received: usize,
}

impl Progress {
    /// The instant the response window closes.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn received(&self) -> usize {
        self.received
    }
}

/// Transaction progress.
#[derive(Debug)]
pub enum TransactionState {
    Idle,
    Transmitting,
    AwaitingResponse(Progress),
    Validated(NutrientReading),
    Failed(Error),
}

impl TransactionState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Validated(..) | TransactionState::Failed(..)
        )
    }
}

/// The bus transaction executor.
///
/// Owns the serial port, the direction lines and the response buffer, so
/// nothing else can touch the bus while a transaction runs.
#[derive(Debug)]
pub struct Transceiver<P, L, C> {
    port: P,
    direction: DirectionController<L, C>,
    buffer: [u8; RESPONSE_LEN],
}

impl<P, L, C> Transceiver<P, L, C>
where
    P: BusPort,
    L: DirectionLines,
    C: Clock,
{
    pub fn new(port: P, lines: L, clock: C, timing: BusTiming) -> Self {
        Self {
            port,
            direction: DirectionController::new(lines, clock, timing),
            buffer: [0; RESPONSE_LEN],
        }
    }

    pub fn timing(&self) -> &BusTiming {
        self.direction.timing()
    }

    /// Runs one transaction to completion.
    pub fn execute(&mut self, request: &RequestFrame) -> Result<NutrientReading, Error> {
        let mut state = TransactionState::Idle;
        while !state.is_terminal() {
            state = self.step(state, request);
        }
        match state {
            TransactionState::Validated(reading) => Ok(reading),
            TransactionState::Failed(error) => Err(error),
            _ => unreachable!("loop only exits on a terminal state"),
        }
    }

    /// Advances the state machine by one transition.
    pub fn step(&mut self, state: TransactionState, request: &RequestFrame) -> TransactionState {
        let next = match state {
            TransactionState::Idle => self.start(),
            TransactionState::Transmitting => self.transmit(request),
            TransactionState::AwaitingResponse(progress) => self.await_response(progress),
            terminal => terminal,
        };
        trace!("Transaction state: {next:?}");
        next
    }

    fn start(&mut self) -> TransactionState {
        if let Err(error) = self.port.discard_input() {
            return TransactionState::Failed(error.into());
        }
        self.direction.enter_transmit_mode();
        TransactionState::Transmitting
    }

    fn transmit(&mut self, request: &RequestFrame) -> TransactionState {
        trace!("TX: {request}");
        let sent = self
            .port
            .write_all(request.as_bytes())
            .and_then(|_| self.port.flush());
        // Release the bus even when the write failed.
        self.direction.enter_receive_mode();
        match sent {
            Ok(()) => TransactionState::AwaitingResponse(Progress {
                deadline: self.direction.clock().now() + self.timing().response_window,
                received: 0,
            }),
            Err(error) => TransactionState::Failed(error.into()),
        }
    }

    fn await_response(&mut self, progress: Progress) -> TransactionState {
        let Progress { deadline, received } = progress;
        let received = match self.port.read_available(&mut self.buffer[received..]) {
            Ok(count) => received + count,
            Err(error) => return TransactionState::Failed(error.into()),
        };

        if received == RESPONSE_LEN {
            trace!("RX: {}", Hex(&self.buffer));
            return match proto::try_parse_response(&self.buffer) {
                Ok(reading) => TransactionState::Validated(reading),
                Err(error) => TransactionState::Failed(error.into()),
            };
        }

        let now = self.direction.clock().now();
        if now >= deadline {
            if received > 0 {
                trace!("RX (partial): {}", Hex(&self.buffer[..received]));
            }
            return TransactionState::Failed(Error::Timeout {
                window: self.timing().response_window,
                received,
                expected: RESPONSE_LEN,
            });
        }

        self.direction
            .clock()
            .sleep(RESPONSE_POLL_STEP.min(deadline - now));
        TransactionState::AwaitingResponse(Progress { deadline, received })
    }
}

impl<P, L, C> BusExchange for Transceiver<P, L, C>
where
    P: BusPort,
    L: DirectionLines,
    C: Clock,
{
    fn exchange(&mut self, request: &RequestFrame) -> Result<NutrientReading, Error> {
        self.execute(request)
    }
}
