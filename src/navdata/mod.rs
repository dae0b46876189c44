//! Navdata (sensor telemetry) wire format.
//!
//! A navdata datagram is a 16 byte header followed by tagged option records:
//!
//! - [`decode_navdata`] turns one datagram into a [`Navdata`] record
//! - [`DroneState`] unpacks the status bitmask into named flags
//! - [`NavdataOption`] holds either the decoded demo option or raw bytes for
//!   any other tag
//!
//! ```rust
//! use dronewire::navdata::decode_navdata;
//!
//! let mut packet = Vec::new();
//! for word in [0x5566_7788u32, 1, 42, 0] {
//!     packet.extend_from_slice(&word.to_le_bytes());
//! }
//!
//! let navdata = decode_navdata(&packet).unwrap();
//! assert!(navdata.state.flying);
//! assert_eq!(navdata.sequence, 42);
//! ```

mod decode;
mod options;
mod state;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use decode::{NAVDATA_HEADER_SIZE, decode_navdata};
pub use options::{
    DEMO_PAYLOAD_SIZE, DemoData, NAVDATA_CKS_TAG, NAVDATA_DEMO_TAG, NavdataOption,
    OPTION_HEADER_SIZE, millidegrees_to_degrees,
};
pub use state::{DroneState, StateFlag, UNUSED_STATE_BITS};

/// One fully decoded navdata datagram.
///
/// Built fresh by [`decode_navdata`] and never mutated afterwards; the next
/// packet replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Navdata {
    /// Format magic, passed through as received.
    pub header: u32,

    /// Status flags.
    pub state: DroneState,

    /// Sender sequence number. Not checked for ordering.
    pub sequence: u32,

    pub vision_flag: u32,

    /// Option records keyed by tag.
    pub options: HashMap<u16, NavdataOption>,
}

impl Navdata {
    /// Demo option, if the packet carried a well-formed one.
    pub fn demo(&self) -> Option<&DemoData> {
        self.options.get(&NAVDATA_DEMO_TAG).and_then(NavdataOption::as_demo)
    }

    pub fn option(&self, tag: u16) -> Option<&NavdataOption> {
        self.options.get(&tag)
    }

    /// Raw payload for a non-demo tag.
    pub fn raw_option(&self, tag: u16) -> Option<&[u8]> {
        self.options.get(&tag).and_then(NavdataOption::as_raw)
    }

    /// Value carried by the checksum option. Not verified.
    pub fn checksum(&self) -> Option<u32> {
        self.raw_option(NAVDATA_CKS_TAG)
            .and_then(|bytes| decode::parse_u32_le(bytes, 0).ok())
    }
}
