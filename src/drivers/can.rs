//! CAN frames and the controller's four-byte identifier layout.
//!
//! The MCP2515 stores an identifier as SIDH, SIDL, EID8, EID0. Standard
//! 11-bit identifiers use SIDH and the top three bits of SIDL. Extended
//! 29-bit identifiers additionally set IDE (SIDL bit 3) and spread the
//! remaining 18 bits over SIDL[1:0], EID8 and EID0.

use core::fmt;

pub const MAX_DATA_LENGTH: u8 = 8;

pub const STANDARD_ID_MASK: u32 = 0x7ff;
pub const EXTENDED_ID_MASK: u32 = 0x1fff_ffff;

// SIDL bits
pub const SIDL_IDE: u8 = 0x08;
pub const SIDL_SRR: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    /// Remote transmission request, no payload
    pub rtr: bool,
    /// 29-bit identifier
    pub extended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub identifier: u32,
    pub flags: Flags,
    pub length: u8,
    pub data: [u8; 8],
}

impl Message {
    pub const fn new(identifier: u32) -> Self {
        Self {
            identifier,
            flags: Flags {
                rtr: false,
                extended: false,
            },
            length: 0,
            data: [0; 8],
        }
    }

    /// Data frame; payload beyond 8 bytes is cut off.
    pub fn with_data(identifier: u32, extended: bool, payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_DATA_LENGTH as usize);
        let mut data = [0; 8];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            identifier,
            flags: Flags {
                rtr: false,
                extended,
            },
            length: len as u8,
            data,
        }
    }

    pub fn remote(identifier: u32, extended: bool, length: u8) -> Self {
        Self {
            identifier,
            flags: Flags {
                rtr: true,
                extended,
            },
            length: length.min(MAX_DATA_LENGTH),
            data: [0; 8],
        }
    }

    pub fn is_extended(&self) -> bool {
        self.flags.extended
    }

    pub fn is_remote(&self) -> bool {
        self.flags.rtr
    }

    /// Identifier fits its format and the length fits a classic frame.
    pub fn is_valid(&self) -> bool {
        let mask = if self.flags.extended {
            EXTENDED_ID_MASK
        } else {
            STANDARD_ID_MASK
        };
        self.identifier & !mask == 0 && self.length <= MAX_DATA_LENGTH
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.length.min(MAX_DATA_LENGTH))]
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flags.extended {
            write!(f, "{:08x}", self.identifier)?;
        } else {
            write!(f, "{:03x}", self.identifier)?;
        }
        if self.flags.rtr {
            return write!(f, " R[{}]", self.length);
        }
        write!(f, " [{}]", self.length)?;
        for byte in self.payload() {
            write!(f, " {:02x}", byte)?;
        }
        Ok(())
    }
}

/// SIDH, SIDL, EID8, EID0 for `identifier`.
pub const fn encode_identifier(identifier: u32, extended: bool) -> [u8; 4] {
    if extended {
        [
            (identifier >> 21) as u8,
            (((identifier >> 13) & 0xe0) as u8) | SIDL_IDE | (((identifier >> 16) & 0x03) as u8),
            (identifier >> 8) as u8,
            identifier as u8,
        ]
    } else {
        [(identifier >> 3) as u8, (identifier << 5) as u8, 0, 0]
    }
}

/// Identifier and extended flag from SIDH, SIDL, EID8, EID0.
pub const fn decode_identifier(raw: [u8; 4]) -> (u32, bool) {
    let [sidh, sidl, eid8, eid0] = raw;
    if sidl & SIDL_IDE != 0 {
        let id = ((sidh as u32) << 21)
            | (((sidl as u32) & 0xe0) << 13)
            | (((sidl as u32) & 0x03) << 16)
            | ((eid8 as u32) << 8)
            | eid0 as u32;
        (id, true)
    } else {
        (((sidh as u32) << 3) | ((sidl as u32) >> 5), false)
    }
}
