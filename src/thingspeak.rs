//! ThingSpeak channel update over HTTP.
//!
//! A write is a form POST of `api_key` and `field1..field4` to the update
//! endpoint. The endpoint answers with the new entry id, `0` meaning the
//! entry was not created (most often the 15 s rate limit).
use crate::uplink::{Uplink, UplinkChannel, UplinkError, UplinkFields, STATUS_OK};
use log::*;
use std::time::Duration;

pub const DEFAULT_UPDATE_URL: &str = "https://api.thingspeak.com/update";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct ThingSpeak {
    client: reqwest::blocking::Client,
    url: String,
}

fn transport(error: reqwest::Error) -> UplinkError {
    UplinkError::Transport(Box::new(error))
}

impl ThingSpeak {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, UplinkError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self::with_client(client, url))
    }

    /// Uses an already configured client, e.g. one with custom proxy settings.
    pub fn with_client(client: reqwest::blocking::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

/// Form parameters of one update request.
pub fn update_form(channel: &UplinkChannel, fields: &UplinkFields) -> Vec<(String, String)> {
    let mut form = vec![("api_key".to_string(), channel.write_key.clone())];
    form.extend(
        fields
            .numbered()
            .map(|(number, value)| (format!("field{number}"), value.to_string())),
    );
    form
}

/// Interprets the body of a 200 response.
pub fn entry_id(body: &str) -> Option<u64> {
    match body.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(id) => Some(id),
    }
}

impl Uplink for ThingSpeak {
    fn write_fields(
        &mut self,
        channel: &UplinkChannel,
        fields: &UplinkFields,
    ) -> Result<u16, UplinkError> {
        let form = update_form(channel, fields);
        debug!(
            "ThingSpeak update for channel {}: {} field(s)",
            channel.id,
            form.len() - 1
        );
        let response = self
            .client
            .post(&self.url)
            .form(&form)
            .send()
            .map_err(transport)?;
        let status = response.status().as_u16();
        if status != STATUS_OK {
            return Ok(status);
        }
        let body = response.text().map_err(transport)?;
        match entry_id(&body) {
            Some(id) => {
                trace!("ThingSpeak entry {id} created");
                Ok(status)
            }
            None => Err(UplinkError::NotInserted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn read_request(stream: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let count = stream.read(&mut chunk).unwrap();
            if count == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..count]);
            let text = String::from_utf8_lossy(&data);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        line.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|value| value.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8(data).unwrap()
    }

    /// Answers a single request with `response` and hands back what was received.
    fn serve_once(response: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/update", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            stream.write_all(response.as_bytes()).unwrap();
            request
        });
        (url, handle)
    }

    fn local_uplink(url: String) -> ThingSpeak {
        let client = reqwest::blocking::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        ThingSpeak::with_client(client, url)
    }

    fn channel() -> UplinkChannel {
        UplinkChannel {
            id: 7,
            write_key: "KEY".to_string(),
        }
    }

    fn fields() -> UplinkFields {
        UplinkFields {
            nitrogen: Some(12.0),
            moisture: Some(47.5),
            ..Default::default()
        }
    }

    #[test]
    fn form_contains_key_and_present_fields() {
        let channel = UplinkChannel {
            id: 7,
            write_key: "KEY".to_string(),
        };
        let fields = UplinkFields {
            nitrogen: Some(12.0),
            phosphorus: None,
            potassium: Some(3.0),
            moisture: Some(47.5),
        };
        let form = update_form(&channel, &fields);
        let pairs: Vec<(&str, &str)> = form
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("api_key", "KEY"),
                ("field1", "12"),
                ("field3", "3"),
                ("field4", "47.5"),
            ]
        );
    }

    #[test]
    fn entry_ids() {
        assert_eq!(entry_id("1832\n"), Some(1832));
        assert_eq!(entry_id("0"), None);
        assert_eq!(entry_id("-1"), None);
        assert_eq!(entry_id(""), None);
    }

    #[test]
    fn created_entry_is_accepted() {
        let (url, server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\n1832");
        let mut uplink = local_uplink(url);
        assert_matches!(uplink.write_fields(&channel(), &fields()), Ok(200));

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /update"));
        assert!(request.contains("api_key=KEY"));
        assert!(request.contains("field1=12"));
        assert!(request.contains("field4=47.5"));
        assert!(!request.contains("field2"));
    }

    #[test]
    fn zero_entry_is_not_inserted() {
        let (url, server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 1\r\nConnection: close\r\n\r\n0");
        let mut uplink = local_uplink(url);
        assert_matches!(
            uplink.write_fields(&channel(), &fields()),
            Err(UplinkError::NotInserted)
        );
        server.join().unwrap();
    }

    #[test]
    fn error_status_is_returned_as_is() {
        let (url, server) = serve_once(
            "HTTP/1.1 400 Bad Request\r\nContent-Length: 1\r\nConnection: close\r\n\r\n0",
        );
        let mut uplink = local_uplink(url);
        assert_matches!(uplink.write_fields(&channel(), &fields()), Ok(400));
        server.join().unwrap();
    }

    #[test]
    fn unreachable_endpoint_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/update", listener.local_addr().unwrap());
        drop(listener);
        let mut uplink = local_uplink(url);
        assert_matches!(
            uplink.write_fields(&channel(), &fields()),
            Err(UplinkError::Transport(..))
        );
    }
}
