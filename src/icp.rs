//! In-circuit programming protocol.
//!
//! ICP repurposes the four JTAG wires as a byte-serial command channel: no
//! TAP is active, commands go out MSB-first with one extra trailing clock
//! per byte, and responses come back LSB-first. It is the only path that
//! can erase and program flash; JTAG mode can merely read it.

use embedded_hal::delay::DelayNs;
use num_enum::IntoPrimitive;

use crate::bits::reverse8;
use crate::io::JtagIo;
use crate::link::Link;

/// Granularity of a flash erase on the reference target.
pub const ERASE_BLOCK_SIZE: usize = 1024;

/// ICP command bytes.
#[derive(Copy, Clone, Debug, IntoPrimitive)]
#[repr(u8)]
#[allow(unused)]
enum Command {
    SetIbOffsetL = 0x40,
    SetIbOffsetH = 0x41,
    SetIbData = 0x42,
    GetIbOffset = 0x43,
    ReadFlash = 0x44,
    SetExtended = 0x46,
    Ping = 0x49,
    ReadCustom = 0x4A,
    SetXpage = 0x4C,
    WriteUnlock = 0x6E,
    EraseUnlock = 0xE6,
}

/// Fixed unlock preamble shared by write and erase.
const PREAMBLE: [u8; 4] = [0x15, 0x0A, 0x09, 0x06];

/// Fixed write termination sequence.
const WRITE_TERM: [u8; 4] = [0x00, 0xAA, 0x00, 0x00];

/// Target settling time after the ICP mode byte.
const SETTLE_US: u32 = 800;

/// Delay between a data byte and its pad byte during writes.
const PAD_DELAY_US: u32 = 5;

/// In-target erase time.
const ERASE_WAIT_MS: u32 = 300;

/// ICP operations over the link.
pub struct Icp<'a, IO, D> {
    link: &'a mut Link<IO, D>,
}

impl<'a, IO: JtagIo, D: DelayNs> Icp<'a, IO, D> {
    pub(crate) fn new(link: &'a mut Link<IO, D>) -> Self {
        Icp { link }
    }

    /// Settle after mode entry and ping the target.
    pub fn init(&mut self) {
        self.link.phy().delay_us(SETTLE_US);
        self.ping();
    }

    /// Send the ping command.
    pub fn ping(&mut self) {
        self.send_byte(Command::Ping.into());
        self.send_byte(0xFF);
    }

    /// Check the target is responding by reading back a known address.
    ///
    /// Sets the internal-bus offset to `0xFF69` and reads it back; a live
    /// target echoes the low byte.
    pub fn verify(&mut self) -> bool {
        self.set_address(0xFF69);

        self.send_byte(Command::GetIbOffset.into());
        let low = self.receive_byte();
        let _ = self.receive_byte(); // discard high byte

        low == 0x69
    }

    /// Set the 16-bit flash address for subsequent operations.
    pub fn set_address(&mut self, address: u16) {
        self.send_byte(Command::SetIbOffsetL.into());
        self.send_byte(address as u8);
        self.send_byte(Command::SetIbOffsetH.into());
        self.send_byte((address >> 8) as u8);
    }

    /// Read `buffer.len()` bytes of flash starting at `address`.
    pub fn read_flash(&mut self, address: u16, buffer: &mut [u8]) {
        log::debug!("ICP read of {} bytes at {address:#06X}", buffer.len());
        self.set_address(address);
        self.send_byte(Command::ReadFlash.into());

        for byte in buffer.iter_mut() {
            *byte = self.receive_byte();
        }
    }

    /// Program `data` into flash starting at `address`.
    ///
    /// The flash must already be erased. Empty buffers are rejected
    /// without any wire traffic. Returns true once the termination
    /// sequence has been sent.
    pub fn write_flash(&mut self, address: u16, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }
        log::debug!("ICP write of {} bytes at {address:#06X}", data.len());
        self.set_address(address);

        self.send_byte(Command::SetIbData.into());
        self.send_byte(data[0]);

        self.send_byte(Command::WriteUnlock.into());
        for byte in PREAMBLE {
            self.send_byte(byte);
        }

        // Remaining bytes each take a pad byte after a short delay.
        for &byte in &data[1..] {
            self.send_byte(byte);
            self.link.phy().delay_us(PAD_DELAY_US);
            self.send_byte(0x00);
        }

        for byte in WRITE_TERM {
            self.send_byte(byte);
        }
        self.link.phy().delay_us(PAD_DELAY_US);

        true
    }

    /// Erase the flash block containing `address`.
    ///
    /// Returns the target's status output, sampled once on TDO at the end
    /// of the post-erase sequence.
    pub fn erase_flash(&mut self, address: u16) -> bool {
        log::debug!("ICP erase at {address:#06X}");
        self.set_address(address);

        self.send_byte(Command::SetIbData.into());
        self.send_byte(0x00);

        self.send_byte(Command::EraseUnlock.into());
        for byte in PREAMBLE {
            self.send_byte(byte);
        }

        self.send_byte(0x00);
        self.link.phy().delay_ms(ERASE_WAIT_MS);
        self.send_byte(0x00);
        let status = self.link.phy().sample_tdo();
        self.send_byte(0x00);

        status
    }

    /// Send one byte, MSB-first with a trailing clock.
    fn send_byte(&mut self, byte: u8) {
        self.link.phy().stream_bits(reverse8(byte) as u32, 8, false);
        self.link.phy().next_state(false);
    }

    /// Receive one byte; the target answers LSB-first.
    fn receive_byte(&mut self) -> u8 {
        let byte = self.link.phy().stream_bits(0, 8, false) as u8;
        self.link.phy().next_state(false);
        byte
    }
}
