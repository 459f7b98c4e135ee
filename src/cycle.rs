//! The acquisition loop of the node.
//!
//! One cycle makes sure the network is up, runs one bus transaction, samples
//! the moisture sensor, merges both into a [`Reading`] and hands it to the
//! uplink. Nothing that goes wrong inside a cycle stops the loop.
use crate::calibration::{AnalogInput, Calibration, MoistureReading};
use crate::network::{Credentials, Network, NetworkError};
use crate::protocol::{self as proto, NutrientReading, RequestFrame};
use crate::timing::Clock;
use crate::transaction::{self, BusExchange};
use crate::uplink::{Uplink, UplinkChannel, UplinkError, UplinkFields, STATUS_OK};
use log::*;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(20);

/// What to send upstream for the nutrient fields when the bus transaction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum NutrientFallback {
    /// Leave the nutrient fields out of the write.
    #[default]
    Unavailable,
    /// Send zeros, like the original field firmware.
    Zero,
}

/// The merged result of one cycle.
///
/// `nutrients` is `None` when no valid frame was received, which is distinct
/// from a measured zero.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    pub nutrients: Option<NutrientReading>,
    pub moisture: MoistureReading,
}

impl Reading {
    pub fn uplink_fields(&self, fallback: NutrientFallback) -> UplinkFields {
        let nutrients = match (self.nutrients, fallback) {
            (Some(nutrients), _) => Some(nutrients),
            (None, NutrientFallback::Zero) => Some(NutrientReading::ZERO),
            (None, NutrientFallback::Unavailable) => None,
        };
        UplinkFields {
            nitrogen: nutrients.map(|n| f32::from(n.nitrogen)),
            phosphorus: nutrients.map(|n| f32::from(n.phosphorus)),
            potassium: nutrients.map(|n| f32::from(n.potassium)),
            moisture: Some(self.moisture.percentage),
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.nutrients {
            Some(nutrients) => write!(f, "{nutrients}")?,
            None => f.write_str("N: n/a, P: n/a, K: n/a")?,
        }
        write!(f, ", Moisture: {}", self.moisture)
    }
}

/// Fixed parameters of the acquisition loop.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub request: RequestFrame,
    pub interval: Duration,
    pub calibration: Calibration,
    pub credentials: Credentials,
    pub channel: UplinkChannel,
    pub fallback: NutrientFallback,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            request: proto::nutrient_request(),
            interval: DEFAULT_INTERVAL,
            calibration: Calibration::default(),
            credentials: Credentials::default(),
            channel: UplinkChannel::default(),
            fallback: NutrientFallback::default(),
        }
    }
}

/// Everything that happened during one cycle.
#[derive(Debug)]
pub struct CycleOutcome {
    pub reading: Reading,
    pub network_error: Option<NetworkError>,
    pub bus_error: Option<transaction::Error>,
    pub uplink_error: Option<UplinkError>,
}

impl CycleOutcome {
    pub fn is_clean(&self) -> bool {
        self.network_error.is_none() && self.bus_error.is_none() && self.uplink_error.is_none()
    }
}

/// The acquisition cycle scheduler. Owns every collaborator exclusively.
pub struct AcquisitionCycle<B, A, N, U, C> {
    bus: B,
    analog: A,
    network: N,
    uplink: U,
    clock: C,
    settings: CycleSettings,
}

impl<B, A, N, U, C> AcquisitionCycle<B, A, N, U, C>
where
    B: BusExchange,
    A: AnalogInput,
    N: Network,
    U: Uplink,
    C: Clock,
{
    pub fn new(
        bus: B,
        analog: A,
        network: N,
        uplink: U,
        clock: C,
        settings: CycleSettings,
    ) -> Self {
        Self {
            bus,
            analog,
            network,
            uplink,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    fn ensure_network(&mut self) -> Option<NetworkError> {
        if self.network.is_connected() {
            return None;
        }
        match self.network.connect(&self.settings.credentials) {
            Ok(()) => None,
            Err(error) => {
                warn!("{error}");
                Some(error)
            }
        }
    }

    fn read_nutrients(&mut self) -> Result<NutrientReading, transaction::Error> {
        self.bus.exchange(&self.settings.request).inspect_err(|error| {
            warn!("Nutrient read failed ({}): {error}", error.reason());
        })
    }

    fn forward(&mut self, reading: &Reading) -> Option<UplinkError> {
        let fields = reading.uplink_fields(self.settings.fallback);
        let result = match self.uplink.write_fields(&self.settings.channel, &fields) {
            Ok(STATUS_OK) => Ok(()),
            Ok(status) => Err(UplinkError::Rejected { status }),
            Err(error) => Err(error),
        };
        match result {
            Ok(()) => {
                debug!("Uplink update: OK (channel {})", self.settings.channel.id);
                None
            }
            Err(error) => {
                warn!("{error}");
                Some(error)
            }
        }
    }

    /// Runs one cycle without the trailing sleep.
    pub fn run_once(&mut self) -> CycleOutcome {
        let network_error = self.ensure_network();

        let (nutrients, bus_error) = match self.read_nutrients() {
            Ok(nutrients) => (Some(nutrients), None),
            Err(error) => (None, Some(error)),
        };

        let moisture = self.settings.calibration.apply(self.analog.sample());

        let reading = Reading {
            nutrients,
            moisture,
        };
        let uplink_error = self.forward(&reading);

        info!("{reading}");
        CycleOutcome {
            reading,
            network_error,
            bus_error,
            uplink_error,
        }
    }

    /// Runs one cycle, then sleeps the configured interval.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = self.run_once();
        trace!("Cycle outcome: {outcome:?}");
        self.clock.sleep(self.settings.interval);
        outcome
    }

    /// Runs cycles for the lifetime of the process.
    pub fn run(&mut self) -> ! {
        info!("Acquisition started, interval {:?}", self.settings.interval);
        loop {
            self.run_cycle();
        }
    }
}
