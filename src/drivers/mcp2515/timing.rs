// CAN bit timing for the MCP2515
//
// A bit is SYNC (1 TQ) + PROP + PS1 + PS2 time quanta; TQ = 2 * (BRP + 1)
// oscillator periods. The solver walks the total quanta count from 25
// down to 4 and takes the first split that hits the bitrate exactly with
// an even prescaler in 2..=128 and a sample point between 75 and 80 %.

use core::fmt;

use super::definitions::BTLMODE;

const MAX_QUANTA: u32 = 25;
const MIN_QUANTA: u32 = 4;
const MAX_SEGMENT: u32 = 8;
const MAX_PRESCALER: u32 = 128;

// sample point window, per mille of a bit
const SAMPLE_MIN: u32 = 750;
const SAMPLE_MAX: u32 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingError {
    ZeroRate,
    NoSolution,
    OutOfTolerance,
}

impl fmt::Display for TimingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingError::ZeroRate => write!(f, "clock and bitrate must be non-zero"),
            TimingError::NoSolution => write!(f, "no bit timing for this clock and bitrate"),
            TimingError::OutOfTolerance => write!(f, "bitrate error above tolerance"),
        }
    }
}

impl core::error::Error for TimingError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    pub sjw: u8,
    pub prop: u8,
    pub ps1: u8,
    pub ps2: u8,
    /// Oscillator periods per time quantum, even, 2..=128
    pub prescaler: u8,
}

impl BitTiming {
    pub const fn solve(clock_hz: u32, bitrate: u32) -> Result<Self, TimingError> {
        if clock_hz == 0 || bitrate == 0 {
            return Err(TimingError::ZeroRate);
        }
        let mut quanta = MAX_QUANTA;
        while quanta >= MIN_QUANTA {
            if let Some(timing) = Self::with_quanta(clock_hz, bitrate, quanta) {
                return Ok(timing);
            }
            quanta -= 1;
        }
        Err(TimingError::NoSolution)
    }

    /// Like `solve`, and the resulting bitrate may deviate by at most
    /// `tolerance` per mille.
    pub const fn solve_within(
        clock_hz: u32,
        bitrate: u32,
        tolerance: u16,
    ) -> Result<Self, TimingError> {
        match Self::solve(clock_hz, bitrate) {
            Ok(timing) => {
                if timing.error_permille(clock_hz, bitrate) > tolerance as u32 {
                    Err(TimingError::OutOfTolerance)
                } else {
                    Ok(timing)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Compile-time variant: fails the build when no timing exists.
    pub const fn checked<const CLOCK: u32, const BITRATE: u32, const TOLERANCE: u16>() -> Self {
        match Self::solve_within(CLOCK, BITRATE, TOLERANCE) {
            Ok(timing) => timing,
            Err(TimingError::ZeroRate) => panic!("clock and bitrate must be non-zero"),
            Err(TimingError::NoSolution) => panic!("no bit timing for this clock and bitrate"),
            Err(TimingError::OutOfTolerance) => panic!("bitrate error above tolerance"),
        }
    }

    const fn with_quanta(clock_hz: u32, bitrate: u32, quanta: u32) -> Option<Self> {
        let unit = match bitrate.checked_mul(quanta) {
            Some(unit) => unit,
            None => return None,
        };
        if clock_hz % unit != 0 {
            return None;
        }
        let prescaler = clock_hz / unit;
        if prescaler < 2 || prescaler > MAX_PRESCALER || prescaler % 2 != 0 {
            return None;
        }
        let ps2 = quanta / 4;
        let rest = quanta - 1 - ps2;
        let ps1 = if rest - 1 < MAX_SEGMENT { rest - 1 } else { MAX_SEGMENT };
        let prop = rest - ps1;
        if prop > MAX_SEGMENT {
            return None;
        }
        let sample = (quanta - ps2) * 1000 / quanta;
        if sample < SAMPLE_MIN || sample > SAMPLE_MAX {
            return None;
        }
        Some(Self {
            sjw: 1,
            prop: prop as u8,
            ps1: ps1 as u8,
            ps2: ps2 as u8,
            prescaler: prescaler as u8,
        })
    }

    pub const fn quanta(&self) -> u32 {
        1 + self.prop as u32 + self.ps1 as u32 + self.ps2 as u32
    }

    pub const fn sample_point_permille(&self) -> u32 {
        (self.quanta() - self.ps2 as u32) * 1000 / self.quanta()
    }

    pub const fn bitrate(&self, clock_hz: u32) -> u32 {
        clock_hz / (self.prescaler as u32 * self.quanta())
    }

    pub const fn error_permille(&self, clock_hz: u32, bitrate: u32) -> u32 {
        self.bitrate(clock_hz).abs_diff(bitrate) * 1000 / bitrate
    }

    /// CNF1, CNF2, CNF3 register values.
    pub const fn registers(&self) -> [u8; 3] {
        let cnf1 = ((self.sjw - 1) << 6) | ((self.prescaler / 2 - 1) & 0x3f);
        let cnf2 = BTLMODE | ((self.ps1 - 1) << 3) | (self.prop - 1);
        let cnf3 = self.ps2 - 1;
        [cnf1, cnf2, cnf3]
    }
}
