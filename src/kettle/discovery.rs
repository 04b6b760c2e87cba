//! UDP broadcast probe used to locate the kettle or coax it awake.
//!
//! The kettle answers a `Probe#<timestamp>` broadcast with a `#` separated record:
//! field 0 is the IMEI, field 3 the firmware version and field 6 a JSON object
//! with the access point name, router SSID and a status string.

use std::net::{IpAddr, SocketAddr};

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::{AppError, Result};

const BEACON_PREFIX: &str = "Probe#";
const FIELD_IMEI: usize = 0;
const FIELD_VERSION: usize = 3;
const FIELD_JSON: usize = 6;

/// Kettle details from a discovery reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAdvertisement {
    pub imei: String,
    pub version: String,
    pub address: IpAddr,
    #[serde(rename = "AP_ssid")]
    pub ap_ssid: String,
    #[serde(rename = "devRouter")]
    pub dev_router: String,
    /// Same format as the STAT message.
    #[serde(rename = "deviceStatus")]
    pub device_status: String,
    /// Remaining JSON fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Beacon text for the current local time, e.g. `Probe#2020-05-05-10-47-15`.
pub fn beacon() -> String {
    Local::now().format("Probe#%Y-%m-%d-%H-%M-%S").to_string()
}

/// Parse a discovery reply received from `sender`.
pub fn parse_advertisement(reply: &str, sender: IpAddr) -> Result<DeviceAdvertisement> {
    let fields: Vec<&str> = reply.split('#').collect();
    if fields.len() <= FIELD_JSON {
        return Err(AppError::discovery(format!(
            "expected at least {} fields, got {}",
            FIELD_JSON + 1,
            fields.len()
        )));
    }

    let mut json: Map<String, Value> = serde_json::from_str(fields[FIELD_JSON])?;
    let mut take = |key: &str| -> Result<String> {
        match json.remove(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Ok(other.to_string()),
            None => Err(AppError::discovery(format!("reply has no '{key}'"))),
        }
    };

    let ap_ssid = take("AP_ssid")?;
    let dev_router = take("devRouter")?;
    let device_status = take("deviceStatus")?;

    Ok(DeviceAdvertisement {
        imei: fields[FIELD_IMEI].to_string(),
        version: fields[FIELD_VERSION].to_string(),
        address: sender,
        ap_ssid,
        dev_router,
        device_status,
        extra: json,
    })
}

/// Broadcast beacons and wait for a kettle to answer.
///
/// Returns `Ok(None)` when every round times out. Sockets are closed before returning.
pub async fn probe(config: &DiscoveryConfig) -> Result<Option<DeviceAdvertisement>> {
    let target = SocketAddr::from((config.broadcast_addr, config.port));

    for round in 1..=config.rounds {
        // Listen before sending so a quick reply is not missed.
        let listener = UdpSocket::bind(("0.0.0.0", config.port)).await?;
        let sender = UdpSocket::bind(("0.0.0.0", 0)).await?;
        sender.set_broadcast(true)?;

        for _ in 0..config.beacons_per_round {
            sender.send_to(beacon().as_bytes(), target).await?;
        }
        drop(sender);
        debug!("Sent broadcast messages, waiting to hear back from kettle... {round}");

        if let Some(found) = listen(&listener, Instant::now() + config.listen_timeout()).await {
            info!(
                "Discovered kettle '{}' at {} (imei={}, router={}, version={})",
                found.ap_ssid, found.address, found.imei, found.dev_router, found.version
            );
            debug!("Device status: {}", found.device_status);
            return Ok(Some(found));
        }
    }

    info!("No kettle answered the discovery probe");
    Ok(None)
}

async fn listen(socket: &UdpSocket, deadline: Instant) -> Option<DeviceAdvertisement> {
    let mut buf = [0u8; 1024];

    loop {
        let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                warn!("Discovery receive failed: {e}");
                return None;
            }
            Err(_) => return None,
        };

        let Ok(reply) = std::str::from_utf8(&buf[..len]) else {
            debug!("Ignoring non-text datagram from {from}");
            continue;
        };

        // Our own beacons arrive on the same port.
        if reply.starts_with(BEACON_PREFIX) {
            continue;
        }

        match parse_advertisement(reply, from.ip()) {
            Ok(found) => return Some(found),
            Err(e) => warn!("Unparsed discovery reply from {from}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const REPLY: &str = concat!(
        "GD0-12300-35aa#0#12#V1.1.1#1#1#",
        r#"{"AP_ssid":"AppKettle_35aa","devRouter":"HomeWifi","deviceStatus":"aa001803000000000000009b360000c800030000505004b30000f1","mac":"AC:CF"}"#,
        "#end"
    );

    #[test]
    fn test_beacon_format() {
        let beacon = beacon();
        assert!(beacon.starts_with("Probe#"));
        // Probe# + YYYY-mm-dd-HH-MM-SS
        assert_eq!(beacon.len(), 6 + 19);
    }

    #[test]
    fn test_parse_advertisement() {
        let sender = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 50));
        let found = parse_advertisement(REPLY, sender).unwrap();

        assert_eq!(found.imei, "GD0-12300-35aa");
        assert_eq!(found.version, "V1.1.1");
        assert_eq!(found.address, sender);
        assert_eq!(found.ap_ssid, "AppKettle_35aa");
        assert_eq!(found.dev_router, "HomeWifi");
        assert!(found.device_status.starts_with("aa0018"));
        assert_eq!(found.extra["mac"], "AC:CF");
    }

    #[test]
    fn test_parse_advertisement_too_few_fields() {
        let sender = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let result = parse_advertisement("GD0#0#12", sender);
        assert!(matches!(result, Err(AppError::Discovery(_))));
    }

    #[test]
    fn test_parse_advertisement_missing_key() {
        let sender = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let reply = r#"GD0#0#12#V1#1#1#{"AP_ssid":"x","devRouter":"y"}"#;
        assert!(matches!(parse_advertisement(reply, sender), Err(AppError::Discovery(_))));
    }

    #[test]
    fn test_parse_advertisement_bad_json() {
        let sender = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let reply = "GD0#0#12#V1#1#1#not json";
        assert!(matches!(parse_advertisement(reply, sender), Err(AppError::Json(_))));
    }

    async fn free_port() -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.local_addr().unwrap().port()
    }

    fn loopback_config(port: u16, rounds: u32) -> DiscoveryConfig {
        DiscoveryConfig {
            broadcast_addr: Ipv4Addr::LOCALHOST,
            port,
            beacons_per_round: 2,
            rounds,
            listen_timeout_secs: 1,
            probe_on_connect_failure: false,
        }
    }

    #[tokio::test]
    async fn test_discovery_finds_answering_kettle() {
        let port = free_port().await;

        // Fake kettle answering on the discovery port until someone listens.
        let kettle = tokio::spawn(async move {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            for _ in 0..40 {
                socket.send_to(REPLY.as_bytes(), ("127.0.0.1", port)).await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        });

        let found = probe(&loopback_config(port, 2)).await.unwrap().expect("kettle answered");
        kettle.abort();

        assert_eq!(found.imei, "GD0-12300-35aa");
        assert_eq!(found.version, "V1.1.1");
        assert_eq!(found.address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(found.ap_ssid, "AppKettle_35aa");
    }

    #[tokio::test]
    async fn test_discovery_without_answer_times_out() {
        let port = free_port().await;
        let started = Instant::now();

        // Only our own beacons reach the listener.
        let found = probe(&loopback_config(port, 2)).await.unwrap();

        assert_eq!(found, None);
        assert!(started.elapsed() >= std::time::Duration::from_secs(2));
    }
}
