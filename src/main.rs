//! NPK Node CLI
//!
//! Runs the field telemetry node: polls the RS485 soil nutrient sensor,
//! samples the capacitive moisture sensor and uploads the merged reading
//! to a ThingSpeak channel.
//!
//! Besides the endless `daemon` loop the tool can:
//! - run a single acquisition cycle,
//! - perform a single bus transaction,
//! - take a single moisture sample,
//! - print the request frame for an address and register range.

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use npk_node_lib::{
    calibration::AnalogInput,
    cycle::AcquisitionCycle,
    direction::{AutoDirection, DirectionLines},
    iio::IioAnalogInput,
    network::{AssumeConnected, Network, TcpProbeNetwork},
    protocol as proto,
    serial::{self, SerialBus},
    thingspeak::ThingSpeak,
    timing::SystemClock,
    transaction::Transceiver,
};
use std::panic;

mod commandline;
mod config;

use config::{Config, DirectionControl};

type NodeTransceiver = Transceiver<SerialBus, Box<dyn DirectionLines>, SystemClock>;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

fn create_transceiver(config: &Config) -> Result<NodeTransceiver> {
    let baud_rate = config.baud_rate()?;
    let device = &config.bus.device;
    info!(
        "Opening RS485 bus on {device} (Address: {}, Baud: {baud_rate}, direction: {:?})...",
        config.address()?,
        config.bus.direction_control
    );
    let (bus, lines) = serial::open(device, &baud_rate)
        .with_context(|| format!("Cannot open serial port {device} at baud {baud_rate}"))?;
    let lines: Box<dyn DirectionLines> = match config.bus.direction_control {
        DirectionControl::RtsDtr => Box::new(lines),
        DirectionControl::Auto => Box::new(AutoDirection),
    };
    Ok(Transceiver::new(bus, lines, SystemClock, config.bus_timing()))
}

fn create_analog(config: &Config) -> Result<IioAnalogInput> {
    let path = &config.moisture.iio_path;
    IioAnalogInput::open(path).with_context(|| format!("Cannot open analog input {path:?}"))
}

fn create_network(config: &Config) -> Box<dyn Network> {
    match &config.network.probe {
        Some(probe) => Box::new(
            TcpProbeNetwork::new(probe.clone(), SystemClock)
                .with_timeout(config.network.probe_timeout)
                .with_retry(config.network.retry_interval, config.network.max_attempts),
        ),
        None => Box::new(AssumeConnected),
    }
}

fn create_uplink(config: &Config) -> Result<ThingSpeak> {
    ThingSpeak::new(config.uplink.url.clone(), config.uplink.timeout)
        .with_context(|| format!("Cannot create uplink client for {}", config.uplink.url))
}

type NodeCycle =
    AcquisitionCycle<NodeTransceiver, IioAnalogInput, Box<dyn Network>, ThingSpeak, SystemClock>;

fn create_cycle(config: &Config) -> Result<NodeCycle> {
    Ok(AcquisitionCycle::new(
        create_transceiver(config)?,
        create_analog(config)?,
        create_network(config),
        create_uplink(config)?,
        SystemClock,
        config.cycle_settings()?,
    ))
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "NPK Node started. Log level: {}",
        args.verbose.log_level_filter()
    );

    // 2. The frame command works without configuration
    if let commandline::CliCommands::Frame {
        address,
        start,
        count,
    } = &args.command
    {
        println!("{}", proto::build_request(*address, *start, *count));
        return Ok(());
    }

    // 3. Everything else needs the node configuration
    let mut config = Config::load(&args.config)?;

    // 4. Execute the command
    match args.command {
        commandline::CliCommands::Daemon { interval } => {
            if let Some(interval) = interval {
                config.cycle.interval = interval;
                config.validate()?;
            }
            let mut cycle = create_cycle(&config)?;
            cycle.run();
        }
        commandline::CliCommands::Cycle => {
            info!("Executing: Single acquisition cycle");
            let mut cycle = create_cycle(&config)?;
            let outcome = cycle.run_once();
            println!("{}", outcome.reading);
            if let Some(error) = &outcome.bus_error {
                println!("Nutrients unavailable: {} ({error})", error.reason());
            }
        }
        commandline::CliCommands::Read => {
            info!("Executing: Read nutrients");
            let request = config.request_frame()?;
            let mut transceiver = create_transceiver(&config)?;
            let nutrients = transceiver
                .execute(&request)
                .with_context(|| "Cannot read nutrients")?;
            println!("{nutrients}");
        }
        commandline::CliCommands::Moisture => {
            info!("Executing: Read moisture");
            let calibration = config.calibration()?;
            let mut analog = create_analog(&config)?;
            let moisture = calibration.apply(analog.sample());
            println!("Moisture: {moisture} (raw {})", moisture.raw);
        }
        commandline::CliCommands::Frame { .. } => unreachable!("Frame is handled earlier."),
    }

    Ok(())
}
