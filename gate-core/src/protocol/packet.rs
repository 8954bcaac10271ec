use serde_derive::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Max permitted framed body size, both directions.
pub const MAX_BODY_SIZE: i32 = 16384;

/// Module id reserved for system-level traffic (handshake, heartbeat).
pub const MODULE_ID_SYSTEM: i32 = 0;
/// Module id routed to the room tunnel by default; everything else goes to the player tunnel.
pub const MODULE_ID_ROOM: i32 = 1;

pub const SYSTEM_SEQ_HANDSHAKE: i32 = 1;
pub const SYSTEM_SEQ_HEARTBEAT: i32 = 2;

/// Client-facing wire message. See SPEC_FULL.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub ver: i32,
    pub index: i32,
    pub compress: bool,
    #[serde(rename = "module")]
    pub module: i32,
    pub seq: i32,
    pub obj: i64,
    pub data_version: i32,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new(module: i32, seq: i32, obj: i64, data: Vec<u8>) -> Packet {
        Packet {
            ver: 1,
            index: 0,
            compress: false,
            module,
            seq,
            obj,
            data_version: 0,
            data,
        }
    }

    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.module == MODULE_ID_SYSTEM && self.seq == SYSTEM_SEQ_HEARTBEAT
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|_| GateError::Protocol("packet encode failed"))
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet> {
        bincode::deserialize(bytes).map_err(|_| GateError::Protocol("packet decode failed"))
    }

    /// Decompresses `data` in place if `compress` is set, clearing the flag afterwards.
    pub fn decompress_in_place(&mut self) -> Result<()> {
        if self.compress {
            self.data = super::compress::decompress(&self.data)?;
            self.compress = false;
        }
        Ok(())
    }

    /// Compresses `data` in place, setting `compress` when it was worth it.
    pub fn compress_in_place(&mut self) -> Result<()> {
        let (out, flag) = super::compress::compress(&self.data)?;
        self.data = out;
        self.compress = flag;
        Ok(())
    }
}
