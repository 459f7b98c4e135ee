use crate::config::DEFAULT_CONFIG_FILE;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use npk_node_lib::protocol as proto;
use std::path::PathBuf;
use std::time::Duration;

fn parse_address(s: &str) -> Result<proto::Address, String> {
    let address_val =
        clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid address format: {e}"))?;
    proto::Address::try_from(address_val).map_err(|e| e.to_string())
}

fn parse_register(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid register format: {e}"))
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Run the acquisition loop forever: read the NPK sensor and the
    /// moisture sensor, then upload the reading, once per interval.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Override the configured cycle interval (e.g., "20s", "1m")
        #[arg(value_parser = humantime::parse_duration, short, long, verbatim_doc_comment)]
        interval: Option<Duration>,
    },

    /// Run exactly one acquisition cycle, including the upload, and print the reading.
    Cycle,

    /// Perform a single bus transaction and print nitrogen, phosphorus and potassium.
    Read,

    /// Take a single moisture sample and print the raw value and the percentage.
    Moisture,

    /// Print the request frame for the given device address and register range.
    /// Numbers can be given in decimal or hexadecimal (e.g., "0x1e").
    #[clap(verbatim_doc_comment)]
    Frame {
        /// The Modbus RTU device address (1 to 247).
        #[arg(short, long, default_value_t = proto::Address::default(), value_parser = parse_address)]
        address: proto::Address,

        /// First holding register to read.
        #[arg(short, long, default_value_t = proto::NUTRIENT_REG_ADDR, value_parser = parse_register)]
        start: u16,

        /// Number of registers to read.
        #[arg(short = 'n', long, default_value_t = proto::NUTRIENT_REG_QUAN, value_parser = parse_register)]
        count: u16,
    },
}

const fn about_text() -> &'static str {
    "NPK Node - Soil nutrient and moisture acquisition over RS485 with cloud uplink."
}

#[derive(Parser, Debug)]
#[command(name="npknode", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warn.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Path of the YAML configuration file.
    #[arg(global = true, short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: CliCommands,
}
