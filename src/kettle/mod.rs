//! AppKettle network protocol driver.
//!
//! The kettle listens on TCP port 6002. Each socket message is an envelope
//! (`##00`/`##80` tag, hex length, content, `&&`) whose content is a JSON object
//! carrying a hex encoded binary command under `data2` (app) or `data3` (kettle).
//! Content may be AES-128-CBC encrypted; the kettle also accepts plain commands.
//!
//! Inner command layout:
//!
//! ```text
//! 0x00    head    0xAA
//! 0x01-02 length  bytes following the length field, checksum included
//! 0x03    b03     0x00 (0x03 in some status messages)
//! 0x04-08 padding
//! 0x09-0A b090a   0x0000 or 0x03B7
//! 0x0B    seq     sequence number
//! 0x0C    cmd     command code
//! 0x0D-0E padding
//! 0x0F    ack     only when length >= 14; 0xC8 = success
//! 0x10-.. payload only when length >= 16
//! last    checksum
//! ```

mod checksum;
mod cipher;
mod codec;
mod command;
mod connection;
mod device;
mod discovery;
mod transport;
mod types;


// Re-export public API
pub use checksum::{Checksum, SumComplement};
pub use cipher::KettleCipher;
pub use codec::{Field, FieldMap, FieldType, FieldValue, pack, unpack};
pub use command::{CommandRecord, Inbound, MessageHeader, classify, decode_command, encode_off, encode_on, encode_wake};
pub use connection::{ConnectionState, KettleConnection};
pub use device::{Kettle, KettleState};
pub use discovery::{DeviceAdvertisement, parse_advertisement, probe};
pub use transport::{Received, encode_envelope, open_envelope};
pub use types::{Command, DEFAULT_IV, DEFAULT_KEY, KettleStatus, Power};
