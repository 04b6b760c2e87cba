//! Local mirror of the kettle and the commands that drive it.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::checksum::{Checksum, SumComplement};
use super::command::{CommandRecord, Inbound, app_command_json, classify, encode_off, encode_on, encode_wake};
use super::connection::KettleConnection;
use super::transport::Received;
use super::types::{Command, KettleStatus, Power};
use crate::config::AppConfig;
use crate::error::Result;

/// Last known kettle state plus the user's intended settings.
#[derive(Debug, Clone, PartialEq)]
pub struct KettleState {
    /// Last command seen from the kettle.
    pub cmd: Option<Command>,
    /// `None` until the first heartbeat.
    pub status: Option<KettleStatus>,
    pub power: Power,
    pub keep_warm_secs: u16,
    pub keep_warm_onoff: bool,
    pub temperature: u8,
    pub target_temp: u8,
    /// Target used by `turn_on` when none is given.
    pub set_target_temp: u8,
    pub volume: u16,
    pub seq: u8,
}

impl Default for KettleState {
    fn default() -> Self {
        Self {
            cmd: None,
            status: None,
            power: Power::Off,
            keep_warm_secs: 0,
            keep_warm_onoff: false,
            temperature: 0,
            target_temp: 0,
            set_target_temp: 100,
            volume: 0,
            seq: 0,
        }
    }
}

impl KettleState {
    /// Advance the sequence counter. Wraps modulo 0xFF, so 254 is followed by 0.
    pub fn next_seq(&mut self) -> u8 {
        self.seq = ((u16::from(self.seq) + 1) % 0xFF) as u8;
        self.seq
    }

    /// Merge a record sent by the kettle.
    pub fn apply(&mut self, record: &CommandRecord) {
        self.cmd = Some(record.command);
        // Keep counting from the kettle's sequence.
        self.seq = record.header.seq;

        if let Some(status) = record.status {
            self.status = Some(status);
        }
        if let Some(power) = record.power {
            self.power = power;
        }
        if let Some(secs) = record.keep_warm_secs() {
            self.keep_warm_secs = secs;
        }
        if let Some(temperature) = record.temperature() {
            self.temperature = temperature;
        }
        if let Some(target) = record.target_temp() {
            self.target_temp = target;
        }
        if let Some(volume) = record.volume() {
            self.volume = volume;
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == Some(KettleStatus::Ready)
    }
}

impl fmt::Display for KettleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status.map_or("unk", KettleStatus::label);
        write!(
            f,
            "{status} | power {} | {}C -> {}C | {}ml | keep warm {}s",
            self.power, self.temperature, self.target_temp, self.volume, self.keep_warm_secs
        )
    }
}

/// A kettle session: the connection plus its mirrored state.
pub struct Kettle {
    connection: KettleConnection,
    state: KettleState,
    checksum: Box<dyn Checksum>,
    imei: String,
    send_encrypted: bool,
    keep_warm_mins: u8,
    keep_alive_interval: Duration,
    last_keep_alive: Instant,
}

impl Kettle {
    pub fn new(connection: KettleConnection, imei: impl Into<String>) -> Self {
        let defaults = AppConfig::default();
        Self {
            connection,
            state: KettleState::default(),
            checksum: Box::new(SumComplement),
            imei: imei.into(),
            send_encrypted: defaults.device.send_encrypted,
            keep_warm_mins: defaults.device.keep_warm_mins,
            keep_alive_interval: defaults.device.keep_alive_interval(),
            last_keep_alive: Instant::now(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let connection = KettleConnection::from_config(config)?;
        Ok(Self::new(connection, config.device.imei.clone())
            .with_encryption(config.device.send_encrypted)
            .with_keep_warm_mins(config.device.keep_warm_mins)
            .with_keep_alive_interval(config.device.keep_alive_interval()))
    }

    pub fn with_checksum(mut self, checksum: impl Checksum + 'static) -> Self {
        self.checksum = Box::new(checksum);
        self
    }

    pub fn with_encryption(mut self, send_encrypted: bool) -> Self {
        self.send_encrypted = send_encrypted;
        self
    }

    pub fn with_keep_warm_mins(mut self, mins: u8) -> Self {
        self.keep_warm_mins = mins;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn state(&self) -> &KettleState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut KettleState {
        &mut self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.connection.connect().await?;
        self.last_keep_alive = Instant::now();
        Ok(())
    }

    pub fn close(&mut self) {
        self.connection.close();
    }

    pub fn set_target_temp(&mut self, temp: u8) {
        self.state.set_target_temp = temp;
    }

    pub fn set_keep_warm(&mut self, on: bool) {
        self.state.keep_warm_onoff = on;
    }

    /// Turn the kettle on, waking it first unless it is already Ready.
    pub async fn turn_on(&mut self, temp: Option<u8>) -> Result<()> {
        if !self.state.is_ready() {
            self.wake().await?;
        }

        let temp = temp.unwrap_or(self.state.set_target_temp);
        let keep_warm = if self.state.keep_warm_onoff { self.keep_warm_mins } else { 0 };
        let seq = self.state.next_seq();

        info!("Turning kettle on: {temp}C, keep warm {keep_warm} min");
        let msg = encode_on(self.checksum.as_ref(), seq, temp, keep_warm)?;
        self.send_command(&msg).await
    }

    /// Wake the kettle: display on, status goes to Ready.
    pub async fn wake(&mut self) -> Result<()> {
        let seq = self.state.next_seq();
        debug!("Waking kettle");
        let msg = encode_wake(self.checksum.as_ref(), seq)?;
        self.send_command(&msg).await
    }

    pub async fn turn_off(&mut self) -> Result<()> {
        let seq = self.state.next_seq();
        info!("Turning kettle off");
        let msg = encode_off(self.checksum.as_ref(), seq)?;
        self.send_command(&msg).await
    }

    async fn send_command(&mut self, data2: &str) -> Result<()> {
        let content = app_command_json(&self.imei, data2)?;
        debug!("A: {data2}");
        self.connection.send(content.as_bytes(), self.send_encrypted).await
    }

    /// Send a KeepConnect when the interval has elapsed.
    pub async fn keep_alive_if_due(&mut self) -> Result<()> {
        if self.last_keep_alive.elapsed() >= self.keep_alive_interval {
            self.connection.keep_connect().await?;
            self.last_keep_alive = Instant::now();
        }
        Ok(())
    }

    /// Receive one envelope and merge it into the state.
    pub async fn poll(&mut self) -> Option<Inbound> {
        let received = self.connection.receive().await;
        self.update_status(&received)
    }

    /// Merge a received envelope. Only kettle messages change the state;
    /// echoes of app traffic and rejected frames leave it untouched.
    pub fn update_status(&mut self, received: &Received) -> Option<Inbound> {
        let inbound = match classify(received, self.checksum.as_ref()) {
            Ok(inbound) => inbound?,
            Err(e) if e.is_validation() => {
                warn!("Rejected frame: {e}");
                return None;
            }
            Err(e) => {
                error!("Ignoring message: {e}");
                return None;
            }
        };

        match &inbound {
            Inbound::Device(record) => {
                self.state.apply(record);
                // Heartbeats arrive every second.
                if record.command == Command::Status {
                    trace!("K: {record}");
                } else {
                    info!("K: {} {record}", record.command);
                }
            }
            Inbound::Echo(record) => debug!("A (echo): {} {record}", record.command),
            Inbound::KeepAlive => debug!("KeepConnect"),
            Inbound::Unrecognised(text) => warn!("Unparsed message: {text}"),
        }

        Some(inbound)
    }
}
