//! Building outgoing commands and decoding incoming ones.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::checksum::{Checksum, append_checksum_hex};
use super::codec::{FieldMap, FieldValue, unpack};
use super::types::{
    ACK_OK, Command, FrameLayout, HEADER_LAYOUT, HEADER_SIZE, KEEP_CONNECT_TEXT, KettleStatus, LENGTH_PREFIX,
    MIN_LEN_WITH_ACK, MIN_LEN_WITH_PAYLOAD, Power,
};
use super::transport::Received;
use crate::error::{AppError, Result};

/// Direction marker value the app uses for `app_cmd`.
const APP_CMD: &str = "62";

/// Outbound envelope content. Field order matches the official app.
#[derive(Debug, Serialize)]
struct AppCommand<'a> {
    app_cmd: &'a str,
    imei: &'a str,
    #[serde(rename = "SubDev")]
    sub_dev: &'a str,
    data2: &'a str,
}

/// JSON content carrying a `data2` command to the kettle.
pub fn app_command_json(imei: &str, data2: &str) -> Result<String> {
    Ok(serde_json::to_string(&AppCommand {
        app_cmd: APP_CMD,
        imei,
        sub_dev: "",
        data2,
    })?)
}

/// Hex for "turn on", checksum included.
pub fn encode_on(checksum: &dyn Checksum, seq: u8, target_temp: u8, keep_warm_mins: u8) -> Result<String> {
    let msg = format!("AA001200000000000003B7{seq:02X}39000000{target_temp:02X}{keep_warm_mins:02X}0000");
    finish(checksum, &msg)
}

/// Hex for "wake": display on, status moves to Ready.
pub fn encode_wake(checksum: &dyn Checksum, seq: u8) -> Result<String> {
    finish(checksum, &format!("AA000D00000000000003B7{seq:02X}410000"))
}

/// Hex for "turn off".
pub fn encode_off(checksum: &dyn Checksum, seq: u8) -> Result<String> {
    finish(checksum, &format!("AA000D00000000000003B7{seq:02X}3A0000"))
}

fn finish(checksum: &dyn Checksum, msg: &str) -> Result<String> {
    append_checksum_hex(checksum, msg).map_err(|e| AppError::decode(format!("bad command template: {e}")))
}

/// Fixed header fields of a decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub head: u8,
    /// Bytes after the first three, checksum included.
    pub length: u16,
    pub b03: u8,
    pub b090a: u16,
    pub seq: u8,
    pub cmd: u8,
}

impl MessageHeader {
    fn from_fields(fields: &FieldMap) -> Result<Self> {
        let u8_field = |name: &str| {
            fields
                .get(name)
                .and_then(FieldValue::as_u8)
                .ok_or_else(|| AppError::decode(format!("header field '{name}' missing")))
        };
        let u16_field = |name: &str| {
            fields
                .get(name)
                .and_then(FieldValue::as_u16)
                .ok_or_else(|| AppError::decode(format!("header field '{name}' missing")))
        };

        Ok(Self {
            head: u8_field("head")?,
            length: u16_field("length")?,
            b03: u8_field("b03")?,
            b090a: u16_field("b090a")?,
            seq: u8_field("seq")?,
            cmd: u8_field("cmd")?,
        })
    }
}

/// Decoded command message.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub header: MessageHeader,
    pub command: Command,
    pub ack: Option<u8>,
    /// Payload fields by layout name.
    pub fields: FieldMap,
    /// Payload of commands without a known layout.
    pub opaque: Option<Vec<u8>>,
    pub status: Option<KettleStatus>,
    pub power: Option<Power>,
    /// The whole message, checksum included.
    pub raw: Vec<u8>,
}

impl CommandRecord {
    pub fn ack_ok(&self) -> bool {
        self.ack == Some(ACK_OK)
    }

    fn field_u8(&self, name: &str) -> Option<u8> {
        self.fields.get(name).and_then(FieldValue::as_u8)
    }

    fn field_u16(&self, name: &str) -> Option<u16> {
        self.fields.get(name).and_then(FieldValue::as_u16)
    }

    pub fn keep_warm_secs(&self) -> Option<u16> {
        self.field_u16("keep_warm_secs")
    }

    pub fn keep_warm_mins(&self) -> Option<u8> {
        self.field_u8("keep_warm_mins")
    }

    pub fn temperature(&self) -> Option<u8> {
        self.field_u8("temperature")
    }

    pub fn target_temp(&self) -> Option<u8> {
        self.field_u8("target_temp")
    }

    pub fn volume(&self) -> Option<u16> {
        self.field_u16("volume")
    }
}

/// Hex grouped by layout field: header, ack, payload, checksum.
///
/// `aa 000d 00 0000000000 03b7 28 3a 0000 d6`
impl fmt::Display for CommandRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some((checksum, body)) = self.raw.split_last() else {
            return Ok(());
        };

        let mut widths: Vec<usize> = HEADER_LAYOUT.iter().map(|field| field.ty.width()).collect();
        if self.ack.is_some() {
            widths.push(1);
        }
        if let FrameLayout::Fields(layout) = self.command.layout() {
            widths.extend(layout.iter().map(|field| field.ty.width()));
        }

        let mut rest = body;
        for width in widths {
            let (group, tail) = rest.split_at(width.min(rest.len()));
            if !group.is_empty() {
                write!(f, "{} ", hex::encode(group))?;
            }
            rest = tail;
        }
        // Opaque payloads stay in one group.
        if !rest.is_empty() {
            write!(f, "{} ", hex::encode(rest))?;
        }
        write!(f, "{checksum:02x}")
    }
}

/// Decode an inner command given as a hex string.
///
/// Rejects frames whose size disagrees with the header or whose checksum is wrong.
pub fn decode_command(msg_hex: &str, checksum: &dyn Checksum) -> Result<CommandRecord> {
    let bytes = hex::decode(msg_hex.trim()).map_err(|e| AppError::decode(format!("invalid hex: {e}")))?;

    if bytes.len() < HEADER_SIZE {
        return Err(AppError::decode(format!(
            "message of {} bytes is shorter than the {HEADER_SIZE}-byte header",
            bytes.len()
        )));
    }

    let header = MessageHeader::from_fields(&unpack(&bytes[..HEADER_SIZE], HEADER_LAYOUT)?)?;

    // The head byte and the length field itself are not counted.
    let declared = usize::from(header.length) + LENGTH_PREFIX;
    if bytes.len() != declared {
        return Err(AppError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }

    if !checksum.verify(&bytes) {
        let (&actual, body) = bytes
            .split_last()
            .ok_or_else(|| AppError::decode("empty message"))?;
        return Err(AppError::Checksum {
            expected: checksum.compute(body),
            actual,
        });
    }

    let command = Command::from_code(header.cmd);

    let ack = (header.length >= MIN_LEN_WITH_ACK).then(|| bytes[HEADER_SIZE]);

    let mut fields = FieldMap::new();
    let mut opaque = None;
    if header.length >= MIN_LEN_WITH_PAYLOAD {
        let payload = &bytes[HEADER_SIZE + 1..bytes.len() - 1];
        match command.layout() {
            FrameLayout::Fields(layout) => fields = unpack(payload, layout)?,
            FrameLayout::Opaque => opaque = Some(payload.to_vec()),
            FrameLayout::None => {
                return Err(AppError::decode(format!("{command} does not carry a payload")));
            }
        }
    }

    let status = fields
        .get("status")
        .and_then(FieldValue::as_u8)
        .map(KettleStatus::try_from)
        .transpose()?;

    // On/off commands have no status byte, their name is the power state.
    let power = match command {
        Command::On => Some(Power::On),
        Command::Off => Some(Power::Off),
        _ => status.map(KettleStatus::power),
    };

    Ok(CommandRecord {
        header,
        command,
        ack,
        fields,
        opaque,
        status,
        power,
        raw: bytes,
    })
}

/// What a received envelope turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    KeepAlive,
    /// `wifi_cmd` message sent by the kettle.
    Device(CommandRecord),
    /// `app_cmd` message, i.e. app traffic seen again (e.g. in a capture).
    Echo(CommandRecord),
    Unrecognised(String),
}

/// Classify a received envelope and decode the command it carries.
///
/// Returns `Ok(None)` for [`Received::NoFrame`].
pub fn classify(received: &Received, checksum: &dyn Checksum) -> Result<Option<Inbound>> {
    let inbound = match received {
        Received::NoFrame => return Ok(None),
        Received::RawText(text) if text == KEEP_CONNECT_TEXT => Inbound::KeepAlive,
        Received::RawText(text) => Inbound::Unrecognised(text.clone()),
        Received::Structured(map) => {
            if map.contains_key("wifi_cmd") {
                Inbound::Device(decode_command(hex_field(map, "data3")?, checksum)?)
            } else if map.contains_key("app_cmd") {
                Inbound::Echo(decode_command(hex_field(map, "data2")?, checksum)?)
            } else {
                Inbound::Unrecognised(Value::Object(map.clone()).to_string())
            }
        }
    };

    debug!("Inbound: {inbound:?}");
    Ok(Some(inbound))
}

fn hex_field<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::decode(format!("message has no '{key}' string")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kettle::checksum::SumComplement;

    const STATUS_READY: &str = "aa001803000000000000009b360000c800030000505004b30000f1";
    const ACK_ON: &str = "aa000e00000000000003b715390000c821";
    const APP_ON: &str = "AA001200000000000003B70c390000006402000088";
    const INIT: &str = "aa000d010000000000000096a40000b7000200004164011e00008c";

    #[test]
    fn test_decode_status_heartbeat() {
        let record = decode_command(STATUS_READY, &SumComplement).unwrap();

        assert_eq!(record.command, Command::Status);
        assert_eq!(record.header.length, 0x18);
        assert_eq!(record.header.seq, 0x9b);
        assert!(record.ack_ok());
        assert_eq!(record.status, Some(KettleStatus::Ready));
        assert_eq!(record.power, Some(Power::Off));
        assert_eq!(record.keep_warm_secs(), Some(0));
        assert_eq!(record.temperature(), Some(0x50));
        assert_eq!(record.target_temp(), Some(0x50));
        assert_eq!(record.volume(), Some(0x04b3));
    }

    #[test]
    fn test_decode_on_ack_forces_power() {
        let record = decode_command(ACK_ON, &SumComplement).unwrap();
        assert_eq!(record.command, Command::On);
        assert!(record.ack_ok());
        assert!(record.fields.is_empty());
        assert_eq!(record.power, Some(Power::On));
    }

    #[test]
    fn test_decode_app_on_command_payload() {
        let record = decode_command(APP_ON, &SumComplement).unwrap();
        assert_eq!(record.ack, Some(0x00));
        assert_eq!(record.target_temp(), Some(100));
        assert_eq!(record.keep_warm_mins(), Some(2));
    }

    #[test]
    fn test_decode_short_command_has_no_ack() {
        let record = decode_command("AA000D00000000000003B7283A0000D6", &SumComplement).unwrap();
        assert_eq!(record.command, Command::Off);
        assert_eq!(record.ack, None);
        assert_eq!(record.power, Some(Power::Off));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        // INIT frame declares 0x0d but carries more bytes.
        let result = decode_command(INIT, &SumComplement);
        assert!(matches!(result, Err(AppError::LengthMismatch { declared: 16, actual: 27 })));
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let result = decode_command("aa000e00000000000003b715390000c822", &SumComplement);
        assert!(matches!(
            result,
            Err(AppError::Checksum {
                expected: 0x21,
                actual: 0x22
            })
        ));
    }

    #[test]
    fn test_decode_rejects_short_and_non_hex() {
        assert!(matches!(decode_command("aa00", &SumComplement), Err(AppError::Decode(_))));
        assert!(matches!(decode_command("zz", &SumComplement), Err(AppError::Decode(_))));
    }

    #[test]
    fn test_encode_on_embeds_fields() {
        let hex = encode_on(&SumComplement, 0x0B, 90, 30).unwrap();
        assert_eq!(&hex[..40], "AA001200000000000003B70B390000005A1E0000");

        let record = decode_command(&hex, &SumComplement).unwrap();
        assert_eq!(record.header.seq, 0x0B);
        assert_eq!(record.target_temp(), Some(90));
        assert_eq!(record.keep_warm_mins(), Some(30));
    }

    #[test]
    fn test_encode_off_matches_capture() {
        assert_eq!(encode_off(&SumComplement, 0x28).unwrap(), "AA000D00000000000003B7283A0000D6");
    }

    #[test]
    fn test_encode_wake_decodes() {
        let record = decode_command(&encode_wake(&SumComplement, 0xFE).unwrap(), &SumComplement).unwrap();
        assert_eq!(record.command, Command::Wake);
        assert_eq!(record.header.seq, 0xFE);
    }

    #[test]
    fn test_display_groups_by_layout() {
        let status = decode_command(STATUS_READY, &SumComplement).unwrap();
        assert_eq!(
            status.to_string(),
            "aa 0018 03 0000000000 0000 9b 36 0000 c8 00 03 0000 50 50 04b3 0000 f1"
        );

        let off = decode_command("AA000D00000000000003B7283A0000D6", &SumComplement).unwrap();
        assert_eq!(off.to_string(), "aa 000d 00 0000000000 03b7 28 3a 0000 d6");

        // Payload without a layout is printed as one group.
        let timer_hex = append_checksum_hex(&SumComplement, "aa001100000000000003b70a430000c80102").unwrap();
        let timer = decode_command(&timer_hex, &SumComplement).unwrap();
        assert_eq!(timer.opaque.as_deref(), Some(&[0x01, 0x02][..]));
        assert_eq!(
            timer.to_string(),
            format!("aa 0011 00 0000000000 03b7 0a 43 0000 c8 0102 {:02x}", timer.raw[19])
        );
    }

    #[test]
    fn test_app_command_json_key_order() {
        let json = app_command_json("GD0-1", "AA00").unwrap();
        assert_eq!(json, r#"{"app_cmd":"62","imei":"GD0-1","SubDev":"","data2":"AA00"}"#);
    }

    #[test]
    fn test_classify_device_and_echo() {
        let device: Map<String, Value> =
            serde_json::from_value(serde_json::json!({ "wifi_cmd": "62", "imei": "GD0", "data3": STATUS_READY }))
                .unwrap();
        let echo: Map<String, Value> =
            serde_json::from_str(&app_command_json("GD0", APP_ON).unwrap()).unwrap();

        assert!(matches!(
            classify(&Received::Structured(device), &SumComplement).unwrap(),
            Some(Inbound::Device(_))
        ));
        assert!(matches!(
            classify(&Received::Structured(echo), &SumComplement).unwrap(),
            Some(Inbound::Echo(_))
        ));
    }

    #[test]
    fn test_classify_text() {
        assert_eq!(
            classify(&Received::RawText("KeepConnect".into()), &SumComplement).unwrap(),
            Some(Inbound::KeepAlive)
        );
        assert_eq!(
            classify(&Received::RawText("hello".into()), &SumComplement).unwrap(),
            Some(Inbound::Unrecognised("hello".into()))
        );
        assert_eq!(classify(&Received::NoFrame, &SumComplement).unwrap(), None);
    }
}
