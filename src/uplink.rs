//! Contract of the cloud time-series sink.
use std::fmt;

/// Status code that signals an accepted write.
pub const STATUS_OK: u16 = 200;

#[derive(thiserror::Error, Debug)]
pub enum UplinkError {
    /// The endpoint answered with a status other than 200.
    #[error("Uplink rejected the write with status {status}")]
    Rejected { status: u16 },

    /// Accepted on the HTTP level but no entry was created (rate limit, bad key).
    #[error("Uplink accepted the request but did not insert an entry")]
    NotInserted,

    #[error("Uplink transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Destination channel and its write key.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct UplinkChannel {
    pub id: u64,
    pub write_key: String,
}

impl fmt::Debug for UplinkChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UplinkChannel")
            .field("id", &self.id)
            .field("write_key", &"***")
            .finish()
    }
}

/// Up to four named fields of one write. `None` fields are left out.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UplinkFields {
    pub nitrogen: Option<f32>,
    pub phosphorus: Option<f32>,
    pub potassium: Option<f32>,
    pub moisture: Option<f32>,
}

impl UplinkFields {
    /// The fields in channel order (field1..field4) with their values.
    pub fn numbered(&self) -> impl Iterator<Item = (u8, f32)> + '_ {
        [self.nitrogen, self.phosphorus, self.potassium, self.moisture]
            .into_iter()
            .zip(1u8..)
            .filter_map(|(value, number)| value.map(|value| (number, value)))
    }
}

/// A sink for readings. Returns the status code of the write.
pub trait Uplink {
    fn write_fields(
        &mut self,
        channel: &UplinkChannel,
        fields: &UplinkFields,
    ) -> Result<u16, UplinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_skips_missing_fields() {
        let fields = UplinkFields {
            nitrogen: None,
            phosphorus: Some(2.0),
            potassium: None,
            moisture: Some(41.5),
        };
        assert_eq!(fields.numbered().collect::<Vec<_>>(), vec![(2, 2.0), (4, 41.5)]);
        assert_eq!(UplinkFields::default().numbered().count(), 0);
    }

    #[test]
    fn channel_debug_hides_key() {
        let channel = UplinkChannel {
            id: 42,
            write_key: "SECRETKEY".to_string(),
        };
        assert!(!format!("{channel:?}").contains("SECRETKEY"));
    }
}
