//! Network availability, as seen by the acquisition cycle.
//!
//! The cycle only needs two things: "are we online?" and "get online".
//! Association itself is the platform's business.
use crate::timing::Clock;
use log::*;
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

#[derive(thiserror::Error, Debug)]
pub enum NetworkError {
    /// Still offline after all connect attempts.
    #[error("Network unavailable after {attempts} attempts")]
    Unavailable { attempts: u32 },
}

/// Credentials handed to the network on connect.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

// Keeps the password out of the logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"***")
            .finish()
    }
}

pub trait Network {
    fn is_connected(&mut self) -> bool;

    /// Blocks until connected or the own retry budget is exhausted.
    fn connect(&mut self, credentials: &Credentials) -> Result<(), NetworkError>;
}

impl<N: Network + ?Sized> Network for Box<N> {
    fn is_connected(&mut self) -> bool {
        (**self).is_connected()
    }

    fn connect(&mut self, credentials: &Credentials) -> Result<(), NetworkError> {
        (**self).connect(credentials)
    }
}

/// For wired nodes that are always online.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeConnected;

impl Network for AssumeConnected {
    fn is_connected(&mut self) -> bool {
        true
    }

    fn connect(&mut self, _credentials: &Credentials) -> Result<(), NetworkError> {
        Ok(())
    }
}

/// Considers the node online when a TCP connection to `probe` succeeds.
#[derive(Debug)]
pub struct TcpProbeNetwork<C> {
    probe: String,
    timeout: Duration,
    retry_interval: Duration,
    max_attempts: u32,
    clock: C,
}

impl<C: Clock> TcpProbeNetwork<C> {
    pub fn new(probe: impl Into<String>, clock: C) -> Self {
        Self {
            probe: probe.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            clock,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry_interval: Duration, max_attempts: u32) -> Self {
        self.retry_interval = retry_interval;
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        Ok(self.probe.to_socket_addrs()?.collect())
    }

    fn probe(&self) -> io::Result<()> {
        let mut last_error = None;
        for addr in self.resolve()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_) => return Ok(()),
                Err(error) => last_error = Some(error),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "probe resolved to no address")
        }))
    }
}

impl<C: Clock> Network for TcpProbeNetwork<C> {
    fn is_connected(&mut self) -> bool {
        match self.probe() {
            Ok(()) => true,
            Err(error) => {
                debug!("Network probe {} failed: {error}", self.probe);
                false
            }
        }
    }

    fn connect(&mut self, credentials: &Credentials) -> Result<(), NetworkError> {
        info!("Waiting for network '{}'...", credentials.ssid);
        for attempt in 1..=self.max_attempts {
            if self.is_connected() {
                info!("Network available after {attempt} attempt(s)");
                return Ok(());
            }
            trace!("Network attempt {attempt}/{} failed", self.max_attempts);
            if attempt < self.max_attempts {
                self.clock.sleep(self.retry_interval);
            }
        }
        Err(NetworkError::Unavailable {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ManualClock;
    use assert_matches::assert_matches;
    use std::net::TcpListener;

    #[test]
    fn probe_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let probe = listener.local_addr().unwrap().to_string();
        let mut network = TcpProbeNetwork::new(probe, ManualClock::new());
        assert!(network.is_connected());
        assert_matches!(network.connect(&Credentials::default()), Ok(()));
    }

    #[test]
    fn closed_port_exhausts_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let probe = listener.local_addr().unwrap().to_string();
        drop(listener);

        let clock = ManualClock::new();
        let mut network = TcpProbeNetwork::new(probe, clock.clone())
            .with_timeout(Duration::from_millis(200))
            .with_retry(Duration::from_millis(500), 3);
        assert!(!network.is_connected());
        assert_matches!(
            network.connect(&Credentials::default()),
            Err(NetworkError::Unavailable { attempts: 3 })
        );
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(500); 2]);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let credentials = Credentials {
            ssid: "field".to_string(),
            password: "hunter2".to_string(),
        };
        let printed = format!("{credentials:?}");
        assert!(printed.contains("field"));
        assert!(!printed.contains("hunter2"));
    }
}
