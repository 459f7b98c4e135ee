use anyhow::{Context, Result, bail};
use npk_node_lib::{
    calibration::{self, Calibration},
    cycle::{self, CycleSettings, NutrientFallback},
    iio,
    network::{self, Credentials},
    protocol::{self as proto, Address, BaudRate, RequestFrame},
    thingspeak,
    timing::{self, BusTiming},
    uplink::UplinkChannel,
};
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "npknode.yml";

/// Environment variable overriding `network.password`.
pub const ENV_NETWORK_PASSWORD: &str = "NPKNODE_NETWORK_PASSWORD";
/// Environment variable overriding `uplink.write_key`.
pub const ENV_WRITE_KEY: &str = "NPKNODE_WRITE_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    /// `host:port` that must be reachable; `null` means always online.
    #[serde(default = "default_probe")]
    pub probe: Option<String>,
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_probe() -> Option<String> {
    Some(String::from("api.thingspeak.com:80"))
}

fn default_probe_timeout() -> Duration {
    network::DEFAULT_PROBE_TIMEOUT
}

fn default_retry_interval() -> Duration {
    network::DEFAULT_RETRY_INTERVAL
}

fn default_max_attempts() -> u32 {
    network::DEFAULT_MAX_ATTEMPTS
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            probe: default_probe(),
            probe_timeout: default_probe_timeout(),
            retry_interval: default_retry_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UplinkConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub channel_id: u64,
    #[serde(default)]
    pub write_key: String,
    #[serde(default = "default_uplink_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_url() -> String {
    String::from(thingspeak::DEFAULT_UPDATE_URL)
}

fn default_uplink_timeout() -> Duration {
    thingspeak::DEFAULT_TIMEOUT
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            channel_id: 0,
            write_key: String::new(),
            timeout: default_uplink_timeout(),
        }
    }
}

/// How the transceiver direction is switched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DirectionControl {
    /// RTS drives DE, DTR drives RE.
    #[default]
    RtsDtr,
    /// The adapter switches on its own.
    Auto,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u16,
    #[serde(default = "default_address")]
    pub address: u8,
    #[serde(default = "default_start_register")]
    pub start_register: u16,
    #[serde(default = "default_register_count")]
    pub register_count: u16,
    #[serde(default)]
    pub direction_control: DirectionControl,
    #[serde(default = "default_settle", with = "humantime_serde")]
    pub settle: Duration,
    #[serde(default = "default_turnaround", with = "humantime_serde")]
    pub turnaround: Duration,
    #[serde(default = "default_response_window", with = "humantime_serde")]
    pub response_window: Duration,
}

fn default_device() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn default_baud_rate() -> u16 {
    u16::from(proto::FACTORY_DEFAULT_BAUD_RATE)
}

fn default_address() -> u8 {
    proto::FACTORY_DEFAULT_ADDRESS
}

fn default_start_register() -> u16 {
    proto::NUTRIENT_REG_ADDR
}

fn default_register_count() -> u16 {
    proto::NUTRIENT_REG_QUAN
}

fn default_settle() -> Duration {
    timing::PRE_TRANSMIT_SETTLE_MIN
}

fn default_turnaround() -> Duration {
    timing::POST_TRANSMIT_TURNAROUND_MIN
}

fn default_response_window() -> Duration {
    timing::RESPONSE_WINDOW_DEFAULT
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud_rate: default_baud_rate(),
            address: default_address(),
            start_register: default_start_register(),
            register_count: default_register_count(),
            direction_control: DirectionControl::default(),
            settle: default_settle(),
            turnaround: default_turnaround(),
            response_window: default_response_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoistureConfig {
    #[serde(default = "default_iio_path")]
    pub iio_path: PathBuf,
    #[serde(default = "default_dry_point")]
    pub dry_point: u16,
    #[serde(default = "default_wet_point")]
    pub wet_point: u16,
}

fn default_iio_path() -> PathBuf {
    PathBuf::from(iio::DEFAULT_IIO_PATH)
}

fn default_dry_point() -> u16 {
    calibration::DEFAULT_DRY_POINT
}

fn default_wet_point() -> u16 {
    calibration::DEFAULT_WET_POINT
}

impl Default for MoistureConfig {
    fn default() -> Self {
        Self {
            iio_path: default_iio_path(),
            dry_point: default_dry_point(),
            wet_point: default_wet_point(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CycleConfig {
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default)]
    pub nutrient_fallback: NutrientFallback,
}

fn default_interval() -> Duration {
    cycle::DEFAULT_INTERVAL
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            nutrient_fallback: NutrientFallback::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub uplink: UplinkConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub moisture: MoistureConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
}

impl Config {
    /// Loads, overrides from the environment and validates the config file.
    pub fn load(path: &Path) -> Result<Self> {
        log::debug!("Loading config file from {path:?}");
        let config_file =
            File::open(path).with_context(|| format!("Cannot open config file {path:?}"))?;
        let mut config: Config = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot parse config file {path:?}"))?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Replaces secrets with the values found by `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup(ENV_NETWORK_PASSWORD) {
            self.network.password = password;
        }
        if let Some(write_key) = lookup(ENV_WRITE_KEY) {
            self.uplink.write_key = write_key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.baud_rate()?;
        self.request_frame()?;
        self.calibration()?;
        if self.cycle.interval.is_zero() {
            bail!("cycle.interval must not be zero");
        }
        if self.uplink.write_key.is_empty() {
            log::warn!("uplink.write_key is empty, uplink writes will be rejected");
        }
        Ok(())
    }

    pub fn baud_rate(&self) -> Result<BaudRate> {
        BaudRate::try_from(self.bus.baud_rate).context("Invalid bus.baud_rate")
    }

    pub fn address(&self) -> Result<Address> {
        Address::try_from(self.bus.address).context("Invalid bus.address")
    }

    pub fn request_frame(&self) -> Result<RequestFrame> {
        Ok(proto::build_request(
            self.address()?,
            self.bus.start_register,
            self.bus.register_count,
        ))
    }

    pub fn bus_timing(&self) -> BusTiming {
        BusTiming::new(
            self.bus.settle,
            self.bus.turnaround,
            self.bus.response_window,
        )
    }

    pub fn calibration(&self) -> Result<Calibration> {
        Calibration::new(self.moisture.dry_point, self.moisture.wet_point)
            .context("Invalid moisture calibration")
    }

    pub fn cycle_settings(&self) -> Result<CycleSettings> {
        Ok(CycleSettings {
            request: self.request_frame()?,
            interval: self.cycle.interval,
            calibration: self.calibration()?,
            credentials: Credentials {
                ssid: self.network.ssid.clone(),
                password: self.network.password.clone(),
            },
            channel: UplinkChannel {
                id: self.uplink.channel_id,
                write_key: self.uplink.write_key.clone(),
            },
            fallback: self.cycle.nutrient_fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = parse("{}");
        assert_eq!(config.bus.baud_rate, 9600);
        assert_eq!(config.bus.address, 0x01);
        assert_eq!(config.bus.direction_control, DirectionControl::RtsDtr);
        assert_eq!(config.cycle.interval, Duration::from_secs(20));
        assert_eq!(config.cycle.nutrient_fallback, NutrientFallback::Unavailable);
        assert_eq!(config.network.probe.as_deref(), Some("api.thingspeak.com:80"));
        assert_eq!(config.moisture.dry_point, 3200);
        assert_eq!(config.moisture.wet_point, 1500);
        assert_eq!(
            config.request_frame().unwrap(),
            proto::nutrient_request()
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_document() {
        let config = parse(
            r#"
network:
  ssid: field-ap
  password: secret
  probe: null
  retry_interval: 1s
uplink:
  channel_id: 123456
  write_key: ABCDEF
  timeout: 5s
bus:
  device: /dev/ttyAMA0
  baud_rate: 4800
  address: 0x02
  direction_control: auto
  settle: 2ms
  turnaround: 150ms
  response_window: 1s
moisture:
  iio_path: /tmp/in_voltage3_raw
  dry_point: 1000
  wet_point: 3000
cycle:
  interval: 1m
  nutrient_fallback: zero
"#,
        );
        assert_eq!(config.network.probe, None);
        assert_eq!(config.network.retry_interval, Duration::from_secs(1));
        assert_eq!(config.baud_rate().unwrap(), BaudRate::B4800);
        assert_eq!(*config.address().unwrap(), 2);
        assert_eq!(config.bus.direction_control, DirectionControl::Auto);
        let bus_timing = config.bus_timing();
        assert_eq!(bus_timing.settle, timing::PRE_TRANSMIT_SETTLE_MIN);
        assert_eq!(bus_timing.turnaround, Duration::from_millis(150));
        assert_eq!(bus_timing.response_window, Duration::from_secs(1));

        let settings = config.cycle_settings().unwrap();
        assert_eq!(settings.interval, Duration::from_secs(60));
        assert_eq!(settings.fallback, NutrientFallback::Zero);
        assert_eq!(settings.calibration.wet_point(), 3000);
        assert_eq!(settings.channel.id, 123456);
        assert_eq!(settings.credentials.ssid, "field-ap");
    }

    #[test]
    fn invalid_values_fail_validation() {
        assert!(parse("bus: { baud_rate: 19200 }").validate().is_err());
        assert!(parse("bus: { address: 0 }").validate().is_err());
        assert!(parse("moisture: { dry_point: 10, wet_point: 10 }")
            .validate()
            .is_err());
        assert!(parse("cycle: { interval: 0s }").validate().is_err());
    }

    #[test]
    fn environment_overrides_secrets() {
        let mut config = parse("uplink: { write_key: FROMFILE }");
        config.apply_overrides(|name| match name {
            ENV_WRITE_KEY => Some("FROMENV".to_string()),
            _ => None,
        });
        assert_eq!(config.uplink.write_key, "FROMENV");
        assert_eq!(config.network.password, "");
    }

    #[test]
    fn missing_file() {
        assert!(Config::load(Path::new("/nonexistent/npknode.yml")).is_err());
    }
}
