//! Navdata packet decoding
//!
//! Wire layout (little-endian):
//!
//! | Offset | Field |
//! |---|---|
//! | 0 | header `u32` |
//! | 4 | state `u32` bitmask |
//! | 8 | sequence `u32` |
//! | 12 | vision flag `u32` |
//! | 16.. | option records `{tag: u16, size: u16, payload: size - 4}` |
//!
//! Decoding is total over anything holding a full header. Option parsing stops
//! quietly when fewer than four bytes remain or a record claims more bytes than
//! the packet has; a truncated tail is the normal end of a packet.

use std::collections::HashMap;
use tracing::{debug, trace, warn};

use super::Navdata;
use super::options::{DemoData, NAVDATA_DEMO_TAG, NavdataOption, OPTION_HEADER_SIZE};
use super::state::DroneState;
use crate::{Result, TelemetryError};

/// Size of the fixed navdata header.
pub const NAVDATA_HEADER_SIZE: usize = 16;

/// Decode one navdata datagram.
///
/// Fails only when `packet` is shorter than the 16 byte header. Malformed
/// option records are logged and skipped without failing the packet.
pub fn decode_navdata(packet: &[u8]) -> Result<Navdata> {
    if packet.len() < NAVDATA_HEADER_SIZE {
        return Err(TelemetryError::decode(
            "navdata header",
            format!("need {} bytes, have {}", NAVDATA_HEADER_SIZE, packet.len()),
        ));
    }

    let header = parse_u32_le(packet, 0)?;
    let state_word = parse_u32_le(packet, 4)?;
    let sequence = parse_u32_le(packet, 8)?;
    let vision_flag = parse_u32_le(packet, 12)?;

    let mut options = HashMap::new();
    let mut offset = NAVDATA_HEADER_SIZE;

    while packet.len() - offset >= OPTION_HEADER_SIZE {
        let tag = parse_u16_le(packet, offset)?;
        let size = parse_u16_le(packet, offset + 2)? as usize;
        let body_start = offset + OPTION_HEADER_SIZE;

        if size < OPTION_HEADER_SIZE {
            // Negative payload length: drop the record, step over its header only.
            warn!(tag, size, offset, "Option record smaller than its own header, skipping");
            offset = body_start;
            continue;
        }

        let body_end = offset + size;
        if body_end > packet.len() {
            debug!(
                tag,
                size,
                remaining = packet.len() - offset,
                "Option record runs past end of packet, stopping"
            );
            break;
        }

        let payload = &packet[body_start..body_end];
        offset = body_end;

        if tag == NAVDATA_DEMO_TAG {
            match DemoData::parse(payload) {
                Ok(demo) => {
                    options.insert(tag, NavdataOption::Demo(demo));
                }
                Err(e) => warn!(tag, "Dropping malformed demo option: {}", e),
            }
        } else {
            options.insert(tag, NavdataOption::Raw(payload.to_vec()));
        }
    }

    trace!(sequence, options = options.len(), bytes = packet.len(), "Decoded navdata packet");

    Ok(Navdata {
        header,
        state: DroneState::from_word(state_word),
        sequence,
        vision_flag,
        options,
    })
}

pub(crate) fn parse_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    let bytes = read_array::<2>(data, offset, "u16")?;
    Ok(u16::from_le_bytes(bytes))
}

pub(crate) fn parse_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = read_array::<4>(data, offset, "u32")?;
    Ok(u32::from_le_bytes(bytes))
}

pub(crate) fn parse_f32_le(data: &[u8], offset: usize) -> Result<f32> {
    let bytes = read_array::<4>(data, offset, "f32")?;
    Ok(f32::from_le_bytes(bytes))
}

fn read_array<const N: usize>(data: &[u8], offset: usize, kind: &str) -> Result<[u8; N]> {
    data.get(offset..offset.saturating_add(N))
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| {
            TelemetryError::decode(
                format!("{} parsing", kind),
                format!(
                    "insufficient data at offset {} (need {} bytes, have {})",
                    offset,
                    N,
                    data.len().saturating_sub(offset)
                ),
            )
        })
}
