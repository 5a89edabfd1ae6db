//! SinoWealth-specific JTAG operations on top of the TAP.
//!
//! The vendor TAP multiplexes a handful of private registers behind a
//! 4-bit instruction register: CODESCAN reads flash through a 30-bit data
//! register, CONFIG exposes the debug subsystem's control registers, and
//! DEBUG/HALT drive the 8051 core itself. All of it sits behind an unlock
//! sequence that must run once after entering JTAG mode before flash is
//! readable.

use embedded_hal::delay::DelayNs;
use num_enum::IntoPrimitive;

use crate::bits::{reverse16, reverse8, reverse_field};
use crate::io::JtagIo;
use crate::tap::{State, Tap};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IDCODE read {0:#06X}; target did not enter debug mode")]
    Idcode(u16),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// IDCODE of the SH79F6484 reference target.
pub const SH79F6484_IDCODE: u16 = 0xC14C;

/// Instruction register codes recognised by the SinoWealth TAP.
///
/// Any other value selects bypass.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive)]
#[repr(u8)]
pub enum Instruction {
    /// Flash read through the 30-bit CODESCAN register.
    Codescan = 0x00,
    /// 4-bit debug control register.
    Debug = 0x02,
    /// Debug subsystem configuration registers (23-bit write, 64-bit read).
    Config = 0x03,
    /// Resume the core.
    Run = 0x04,
    /// Halt the core and accept injected opcodes through an 8-bit DR.
    Halt = 0x0C,
    /// 16-bit device identification register.
    Idcode = 0x0E,
}

/// DEBUG register: enable the debug subsystem.
const DEBUG_ENABLE: u8 = 0x04;
/// DEBUG register: halt the core.
const DEBUG_HALT: u8 = 0x01;
const DEBUG_BITS: u8 = 4;

/// CONFIG address of the debug control register.
const CFG_DEBUG_CTRL: u8 = 0x40;
const SUBSYS_ENABLE: u16 = 0x3000;
const DBGEN_FULL: u16 = 0x2000;

/// CONFIG addresses cleared during the unlock sequence. Each maps to the
/// SFR at `addr + 0x80`: P2CR, PWMLO, P2PCR, P0OS, IB_CON2, XPAGE,
/// IB_OFFSET and the debug control register itself.
const SFR_CLEAR: [u8; 8] = [0x63, 0x67, 0x6B, 0x6F, 0x73, 0x77, 0x7B, 0x7F];

/// 8051 opcodes injected under IR=HALT to gate the flash debug interface:
/// `MOV 0xFF, #0x80` sets bit 7 of SFR 0xFF.
const FLASH_GATE_OPCODES: [u8; 3] = [0x75, 0xFF, 0x80];

/// Settle time after enabling the debug subsystem. Empirical; shorter
/// values fail intermittently.
const SUBSYS_SETTLE_US: u32 = 50;

const CODESCAN_BITS: u8 = 30;
/// Nominal 6-bit CODESCAN control value for a flash read. The only
/// documented control value.
const CODESCAN_READ: u32 = 0x04;

const CONFIG_WRITE_BITS: u8 = 23;
const CONFIG_READ_BITS: u8 = 64;

/// Pack a CODESCAN read request for `address`.
///
/// The address and control fields are MSB-first on the wire, so both are
/// bit-reversed into the LSB-first shift word: address in bits `[15:0]`,
/// control in `[21:16]`, with the data field `[29:22]` left clear.
pub(crate) fn codescan_request(address: u16) -> u32 {
    reverse16(address) as u32 | reverse_field(CODESCAN_READ, 6) << 16
}

/// Extract the flash byte from a captured CODESCAN word.
pub(crate) fn codescan_data(dr_in: u32) -> u8 {
    reverse8((dr_in >> 22 & 0xFF) as u8)
}

/// Pack a CONFIG write: data in bits `[15:0]`, register address in
/// `[22:16]`.
pub(crate) fn config_word(address: u8, data: u16) -> u32 {
    (address as u32) << 16 | data as u32
}

/// Decoded 64-bit CONFIG readback.
///
/// The layout is irregular: the four status bits are split across bits
/// `[1:0]` and `[11:10]`, an 8-bit datum sits in `[9:2]`, and bits
/// `[63:16]` carry six response payload bytes, low-index first.
#[derive(Copy, Clone, Debug)]
pub struct ConfigReadback(pub u64);

impl ConfigReadback {
    /// The 4-bit status nibble.
    pub fn status(&self) -> u8 {
        (self.0 & 0b11 | (self.0 >> 10 & 0b11) << 2) as u8
    }

    /// Status bit 0: the requested operation has completed.
    pub fn op_complete(&self) -> bool {
        self.0 & 1 != 0
    }

    /// Status bit 3: the target asks the host to extend its wait.
    pub fn wait_extend(&self) -> bool {
        self.status() & 0x08 != 0
    }

    /// The 8-bit read datum.
    pub fn datum(&self) -> u8 {
        (self.0 >> 2 & 0xFF) as u8
    }

    /// The six payload bytes, low-index first.
    pub fn payload(&self) -> [u8; 6] {
        let mut bytes = [0; 6];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (self.0 >> (16 + 8 * i)) as u8;
        }
        bytes
    }
}

/// SinoWealth debug-mode operations over a TAP view.
pub struct Jtag<'a, IO, D> {
    tap: Tap<'a, IO, D>,
}

impl<'a, IO: JtagIo, D: DelayNs> Jtag<'a, IO, D> {
    pub(crate) fn new(tap: Tap<'a, IO, D>) -> Self {
        Jtag { tap }
    }

    /// Unlock the debug interface after JTAG entry.
    ///
    /// Enables and halts the debug subsystem, clears the SFRs the boot
    /// state leaves dirty, injects the flash-gate opcode sequence, and
    /// verifies the target responds with a plausible IDCODE. An all-zeros
    /// or all-ones IDCODE means the target never reached debug mode.
    pub fn debug_unlock(&mut self) -> Result<u16> {
        log::debug!("unlocking SinoWealth debug interface");
        self.tap.goto_state(State::RunTestIdle);
        self.tap.idle_clocks(2);

        self.tap.ir_scan(Instruction::Debug.into());
        self.tap.dr_scan(DEBUG_ENABLE as u32, DEBUG_BITS);
        self.tap.idle_clocks(1);

        self.tap.ir_scan(Instruction::Config.into());
        self.config_dr(CFG_DEBUG_CTRL, SUBSYS_ENABLE);
        self.tap.link().phy().delay_us(SUBSYS_SETTLE_US);
        self.config_dr(CFG_DEBUG_CTRL, DBGEN_FULL);
        self.config_dr(CFG_DEBUG_CTRL, 0x0000);
        for address in SFR_CLEAR {
            self.config_dr(address, 0x0000);
        }

        self.tap.ir_scan(Instruction::Debug.into());
        self.tap.dr_scan(DEBUG_HALT as u32, DEBUG_BITS);
        self.tap.idle_clocks(1);

        self.tap.ir_scan(Instruction::Halt.into());
        for opcode in FLASH_GATE_OPCODES {
            self.tap.dr_scan(reverse8(opcode) as u32, 8);
        }

        let id = self.read_idcode();
        if id == 0x0000 || id == 0xFFFF {
            return Err(Error::Idcode(id));
        }
        log::debug!("debug interface up, IDCODE {id:#06X}");
        Ok(id)
    }

    /// Read the 16-bit device identification register.
    pub fn read_idcode(&mut self) -> u16 {
        self.tap.ir_scan(Instruction::Idcode.into());
        self.tap.dr_scan(0, 16) as u16
    }

    /// Read one flash byte through CODESCAN.
    ///
    /// CODESCAN data lags the requested address by one scan, so a single
    /// byte costs two scans: the first primes the address, the second
    /// returns its data.
    pub fn codescan_read(&mut self, address: u16) -> u8 {
        self.tap.ir_scan(Instruction::Codescan.into());
        let request = codescan_request(address);
        self.tap.dr_scan(request, CODESCAN_BITS);
        self.tap.idle_clocks(2);
        let dr_in = self.tap.dr_scan(request, CODESCAN_BITS);
        self.tap.idle_clocks(2);
        codescan_data(dr_in)
    }

    /// Begin a streaming flash read at `address`.
    pub fn codescan_cursor(self, address: u16) -> CodescanCursor<'a, IO, D> {
        CodescanCursor::new(self.tap, address)
    }

    /// Write a debug subsystem configuration register.
    pub fn config_write(&mut self, address: u8, data: u16) {
        self.tap.ir_scan(Instruction::Config.into());
        self.config_dr(address, data);
    }

    /// Read back the 64-bit CONFIG response register.
    pub fn config_read(&mut self) -> ConfigReadback {
        self.tap.ir_scan(Instruction::Config.into());
        ConfigReadback(self.tap.dr_scan_wide(0, CONFIG_READ_BITS))
    }

    fn config_dr(&mut self, address: u8, data: u16) {
        self.tap.dr_scan(config_word(address, data), CONFIG_WRITE_BITS);
        self.tap.idle_clocks(1);
    }
}

/// Streaming flash reader over CODESCAN.
///
/// CODESCAN returns the byte for the *previous* request, so the cursor
/// primes itself with two scans at construction: afterwards the internal
/// request pointer is two ahead of the byte exposed by [`current`].
/// Every scan is followed by two idle clocks; reads corrupt without them.
///
/// [`current`]: CodescanCursor::current
pub struct CodescanCursor<'a, IO, D> {
    tap: Tap<'a, IO, D>,
    addr: u16,
    data: u8,
}

impl<'a, IO: JtagIo, D: DelayNs> CodescanCursor<'a, IO, D> {
    fn new(mut tap: Tap<'a, IO, D>, address: u16) -> Self {
        tap.ir_scan(Instruction::Codescan.into());
        let mut cursor = CodescanCursor {
            tap,
            addr: address,
            data: 0,
        };
        cursor.read_next();
        cursor.read_next();
        cursor
    }

    /// The byte at [`address`](CodescanCursor::address).
    pub fn current(&self) -> u8 {
        self.data
    }

    /// Address of the byte returned by [`current`](CodescanCursor::current).
    pub fn address(&self) -> u16 {
        self.addr.wrapping_sub(2)
    }

    /// Return the current byte and advance to the next address.
    pub fn next(&mut self) -> u8 {
        let data = self.data;
        self.read_next();
        data
    }

    fn read_next(&mut self) {
        let dr_in = self.tap.dr_scan(codescan_request(self.addr), CODESCAN_BITS);
        self.tap.idle_clocks(2);
        self.data = codescan_data(dr_in);
        self.addr = self.addr.wrapping_add(1);
    }
}
