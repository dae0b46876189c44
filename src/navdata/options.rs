//! Navdata option records
//!
//! After the fixed header a navdata packet carries a sequence of self-describing
//! option records `{tag: u16, size: u16, payload: size - 4 bytes}`. Only the demo
//! option is decoded into a structure; every other tag is kept as raw bytes so
//! unknown or newer options survive untouched.

use serde::{Deserialize, Serialize};

use super::decode::{parse_f32_le, parse_u32_le};
use crate::Result;

/// Demo option: summarised flight state.
pub const NAVDATA_DEMO_TAG: u16 = 0;

/// Checksum option, sent last in full navdata mode.
pub const NAVDATA_CKS_TAG: u16 = 0xFFFF;

/// Size of the option record header (`tag` + `size`).
pub const OPTION_HEADER_SIZE: usize = 4;

/// Size of the demo payload on the wire.
pub const DEMO_PAYLOAD_SIZE: usize = 40;

/// One decoded option record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NavdataOption {
    /// Tag [`NAVDATA_DEMO_TAG`].
    Demo(DemoData),
    /// Any other tag, payload stored verbatim.
    Raw(Vec<u8>),
}

impl NavdataOption {
    pub fn as_demo(&self) -> Option<&DemoData> {
        match self {
            NavdataOption::Demo(demo) => Some(demo),
            NavdataOption::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            NavdataOption::Demo(_) => None,
            NavdataOption::Raw(bytes) => Some(bytes),
        }
    }
}

/// Demo navdata payload.
///
/// Orientation angles arrive as float millidegrees and are stored as whole
/// degrees truncated toward zero, so `-1999` becomes `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemoData {
    /// Flight controller state.
    pub ctrl_state: u32,
    /// Battery charge in percent.
    pub battery: u32,
    /// Pitch in degrees.
    pub theta: i32,
    /// Roll in degrees.
    pub phi: i32,
    /// Yaw in degrees.
    pub psi: i32,
    pub altitude: f32,
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    /// Frames processed by the drone.
    pub num_frames: u32,
}

impl DemoData {
    /// Decode a demo payload. Bytes past the 40 byte layout are ignored.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        // Layout: u32 ctrl_state, u32 battery, f32 theta, f32 phi, f32 psi,
        //         f32 altitude, f32 vx, f32 vy, f32 vz, u32 num_frames
        Ok(Self {
            ctrl_state: parse_u32_le(payload, 0)?,
            battery: parse_u32_le(payload, 4)?,
            theta: millidegrees_to_degrees(parse_f32_le(payload, 8)?),
            phi: millidegrees_to_degrees(parse_f32_le(payload, 12)?),
            psi: millidegrees_to_degrees(parse_f32_le(payload, 16)?),
            altitude: parse_f32_le(payload, 20)?,
            vx: parse_f32_le(payload, 24)?,
            vy: parse_f32_le(payload, 28)?,
            vz: parse_f32_le(payload, 32)?,
            num_frames: parse_u32_le(payload, 36)?,
        })
    }
}

/// Whole degrees, truncated toward zero. NaN maps to 0.
pub fn millidegrees_to_degrees(raw: f32) -> i32 {
    (raw / 1000.0) as i32
}
