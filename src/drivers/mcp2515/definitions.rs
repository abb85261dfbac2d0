// MCP2515 SPI instructions, register addresses and bit masks
// (Microchip DS20001801)

pub mod cmd {
    pub const RESET: u8 = 0xc0;
    pub const READ: u8 = 0x03;
    pub const WRITE: u8 = 0x02;
    /// | 0x00 for RXB0SIDH, | 0x04 for RXB1SIDH
    pub const READ_RX: u8 = 0x90;
    /// | 0x00, 0x02, 0x04 for TXB0SIDH, TXB1SIDH, TXB2SIDH
    pub const LOAD_TX: u8 = 0x40;
    /// | 0x01, 0x02, 0x04 for TXB0, TXB1, TXB2
    pub const RTS: u8 = 0x80;
    pub const READ_STATUS: u8 = 0xa0;
    pub const RX_STATUS: u8 = 0xb0;
    pub const BIT_MODIFY: u8 = 0x05;
}

pub mod reg {
    pub const RXF0SIDH: u8 = 0x00;
    pub const RXF3SIDH: u8 = 0x10;
    pub const RXM0SIDH: u8 = 0x20;
    pub const BFPCTRL: u8 = 0x0c;
    pub const CANSTAT: u8 = 0x0e;
    pub const CANCTRL: u8 = 0x0f;
    pub const CNF3: u8 = 0x28;
    pub const CNF2: u8 = 0x29;
    pub const CNF1: u8 = 0x2a;
    pub const CANINTE: u8 = 0x2b;
    pub const CANINTF: u8 = 0x2c;
    pub const RXB0CTRL: u8 = 0x60;
    pub const RXB1CTRL: u8 = 0x70;
}

// CANCTRL / CANSTAT
pub const REQOP_MASK: u8 = 0xe0;
pub const REQOP2: u8 = 0x80;
pub const REQOP1: u8 = 0x40;
pub const REQOP0: u8 = 0x20;

// CANINTE
pub const RX0IE: u8 = 0x01;
pub const RX1IE: u8 = 0x02;

// CNF2
pub const BTLMODE: u8 = 0x80;

// RXB0CTRL
pub const BUKT: u8 = 0x04;

// TXBnDLC
pub const DLC_RTR: u8 = 0x40;
pub const DLC_MASK: u8 = 0x0f;

// READ STATUS response
pub mod status {
    pub const RX0IF: u8 = 1 << 0;
    pub const RX1IF: u8 = 1 << 1;
    pub const TXB0_TXREQ: u8 = 1 << 2;
    pub const TXB1_TXREQ: u8 = 1 << 4;
    pub const TXB2_TXREQ: u8 = 1 << 6;
}

/// Transmit buffers as (TXREQ bit in READ STATUS, LOAD TX offset, RTS bit).
pub static TX_BUFFERS: [(u8, u8, u8); 3] = [
    (status::TXB0_TXREQ, 0x00, 0x01),
    (status::TXB1_TXREQ, 0x02, 0x02),
    (status::TXB2_TXREQ, 0x04, 0x04),
];

/// Receive buffers as (flag in READ STATUS, READ RX offset).
pub static RX_BUFFERS: [(u8, u8); 2] = [(status::RX0IF, 0x00), (status::RX1IF, 0x04)];
