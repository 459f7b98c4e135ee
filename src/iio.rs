//! Analog input from a Linux Industrial I/O channel (`in_voltageN_raw`).
use crate::calibration::AnalogInput;
use log::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_IIO_PATH: &str = "/sys/bus/iio/devices/iio:device0/in_voltage0_raw";

/// Reads raw ADC counts from a sysfs attribute.
///
/// The channel is read once when opening, so a wrong path fails at startup.
/// Later read failures are logged and answered with the last good sample.
#[derive(Debug)]
pub struct IioAnalogInput {
    path: PathBuf,
    last: u16,
}

fn read_raw(path: &Path) -> io::Result<u16> {
    let text = fs::read_to_string(path)?;
    text.trim()
        .parse::<u16>()
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
}

impl IioAnalogInput {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let last = read_raw(&path)?;
        debug!("Opened analog input {path:?}, first sample {last}");
        Ok(Self { path, last })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AnalogInput for IioAnalogInput {
    fn sample(&mut self) -> u16 {
        match read_raw(&self.path) {
            Ok(raw) => self.last = raw,
            Err(error) => warn!(
                "Cannot read analog input {:?}: {error}, reusing last sample {}",
                self.path, self.last
            ),
        }
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribute(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("npk_node_iio_{}_{name}", std::process::id()));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn reads_sysfs_value() {
        let path = attribute("ok", "2048\n");
        let mut input = IioAnalogInput::open(&path).unwrap();
        assert_eq!(input.sample(), 2048);
        fs::write(&path, "1999\n").unwrap();
        assert_eq!(input.sample(), 1999);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn keeps_last_sample_on_failure() {
        let path = attribute("vanish", "3100");
        let mut input = IioAnalogInput::open(&path).unwrap();
        fs::write(&path, "garbage").unwrap();
        assert_eq!(input.sample(), 3100);
        fs::remove_file(&path).unwrap();
        assert_eq!(input.sample(), 3100);
    }

    #[test]
    fn open_fails_on_missing_channel() {
        assert!(IioAnalogInput::open("/nonexistent/in_voltage0_raw").is_err());
    }
}
