//! Wire-level JTAG primitives and the vendor power-on handshake.
//!
//! The PHY is the only component that touches pins. It provides the small
//! set of primitives everything else is built from: a single TMS-qualified
//! clock ([`Phy::next_state`]), an LSB-first bit shifter
//! ([`Phy::stream_bits`]), the mode-byte send, and the undocumented "magic
//! sequence" that moves a powered SinoWealth target from reset into the
//! state where the next byte on TDI selects a wire protocol.

use embedded_hal::delay::DelayNs;

use crate::bits::reverse8;
use crate::io::JtagIo;

/// TCK half-period in microseconds.
///
/// One microsecond per half-period gives a 250-500 kHz TCK on a 16 MHz
/// host once loop overhead is counted. The magic-sequence timings below
/// are absolute durations and must not be scaled with this.
pub const TCK_HALF_PERIOD_US: u32 = 1;

/// VREF polling interval while waiting for target power.
const VREF_POLL_US: u32 = 200;

// Magic sequence timings and edge counts, reverse-engineered from the
// vendor's SinoLink programmer. The order and counts are load-bearing.
const MAGIC_SETTLE_US: u32 = 500;
const MAGIC_TCK_DIP_US: u32 = 1;
const MAGIC_POST_DIP_US: u32 = 50;
const MAGIC_TOGGLE_HALF_US: u32 = 2;
const MAGIC_TMS_TOGGLES: u16 = 165;
const MAGIC_TDI_TOGGLES: u16 = 105;
const MAGIC_TCK_TOGGLES: u16 = 90;
const MAGIC_TMS_TOGGLES_LONG: u16 = 25600;
const MAGIC_TAIL_US: u32 = 8;

/// Bit-level driver for the four JTAG wires.
pub struct Phy<IO, D> {
    io: IO,
    delay: D,
}

impl<IO: JtagIo, D: DelayNs> Phy<IO, D> {
    /// Wrap a pin driver and delay provider. No pin activity occurs until
    /// [`Phy::power_up`].
    pub fn new(io: IO, delay: D) -> Self {
        Phy { io, delay }
    }

    /// Release all lines to high impedance.
    pub fn tristate(&mut self) {
        self.io.tristate();
    }

    /// Bring the interface up from power-on: tristate, optionally block
    /// until VREF reports target power, enable the outputs and emit the
    /// magic sequence. On return the target is awaiting a mode byte.
    pub fn power_up(&mut self, wait_vref: bool) {
        self.io.tristate();

        if wait_vref {
            log::debug!("waiting for target power on VREF");
            let mut led = false;
            let mut count = 0u8;
            while !self.io.vref() {
                count = count.wrapping_add(1);
                if count == 0 {
                    led = !led;
                    self.io.set_led(led);
                }
                self.delay.delay_us(VREF_POLL_US);
            }
            self.io.set_led(false);
        }

        self.io.enable_outputs();
        self.io.set_tck(true);
        self.io.set_tdi(true);
        self.io.set_tms(true);

        self.magic_sequence();
        log::debug!("magic sequence complete, target awaiting mode byte");
    }

    /// Apply one TCK pulse with the given TMS level.
    pub fn next_state(&mut self, tms: bool) {
        self.io.set_tms(tms);
        self.io.set_tck(false);
        self.delay_half();
        self.io.set_tck(true);
        self.delay_half();
        self.io.set_tck(false);
    }

    /// Shift up to 32 bits LSB-first, sampling TDO on each clock.
    ///
    /// When `exit` is set, TMS is raised for the final bit so the shift
    /// leaves Shift-IR/Shift-DR through Exit1. TDO is sampled between the
    /// rising and falling TCK edge of each bit. `bits == 0` returns zero
    /// without touching the wires.
    pub fn stream_bits(&mut self, out: u32, bits: u8, exit: bool) -> u32 {
        debug_assert!(bits <= 32);
        if bits == 0 {
            return 0;
        }

        let mut out = out;
        let mut capture = 0u32;
        for i in 0..bits {
            let is_last = i + 1 == bits;
            self.io.set_tms(exit && is_last);
            self.io.set_tdi(out & 1 != 0);

            self.io.set_tck(false);
            self.delay_half();
            self.io.set_tck(true);
            self.delay_half();

            if self.io.tdo() {
                capture |= 1 << i;
            }

            self.io.set_tck(false);
            out >>= 1;
        }
        capture
    }

    /// Send a protocol-select byte to a target in the ready state.
    ///
    /// The byte is defined MSB-first on the wire, so it is bit-reversed
    /// before the LSB-first shift; two trailing TMS=0 clocks complete the
    /// handshake.
    pub fn send_mode_byte(&mut self, byte: u8) {
        self.stream_bits(reverse8(byte) as u32, 8, false);
        self.next_state(false);
        self.next_state(false);
    }

    /// Sample TDO without clocking.
    pub fn sample_tdo(&mut self) -> bool {
        self.io.tdo()
    }

    #[cfg(test)]
    pub(crate) fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    pub(crate) fn drive_tck(&mut self, level: bool) {
        self.io.set_tck(level);
    }

    pub(crate) fn drive_tms(&mut self, level: bool) {
        self.io.set_tms(level);
    }

    pub(crate) fn delay_half(&mut self) {
        self.delay.delay_us(TCK_HALF_PERIOD_US);
    }

    pub(crate) fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }

    pub(crate) fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    fn magic_sequence(&mut self) {
        self.delay.delay_us(MAGIC_SETTLE_US);
        self.io.set_tck(false);
        self.delay.delay_us(MAGIC_TCK_DIP_US);
        self.io.set_tck(true);
        self.delay.delay_us(MAGIC_POST_DIP_US);

        for _ in 0..MAGIC_TMS_TOGGLES {
            self.io.set_tms(false);
            self.delay.delay_us(MAGIC_TOGGLE_HALF_US);
            self.io.set_tms(true);
            self.delay.delay_us(MAGIC_TOGGLE_HALF_US);
        }

        for _ in 0..MAGIC_TDI_TOGGLES {
            self.io.set_tdi(false);
            self.delay.delay_us(MAGIC_TOGGLE_HALF_US);
            self.io.set_tdi(true);
            self.delay.delay_us(MAGIC_TOGGLE_HALF_US);
        }

        for _ in 0..MAGIC_TCK_TOGGLES {
            self.io.set_tck(false);
            self.delay.delay_us(MAGIC_TOGGLE_HALF_US);
            self.io.set_tck(true);
            self.delay.delay_us(MAGIC_TOGGLE_HALF_US);
        }

        for _ in 0..MAGIC_TMS_TOGGLES_LONG {
            self.io.set_tms(false);
            self.delay.delay_us(MAGIC_TOGGLE_HALF_US);
            self.io.set_tms(true);
            self.delay.delay_us(MAGIC_TOGGLE_HALF_US);
        }

        self.delay.delay_us(MAGIC_TAIL_US);
        self.io.set_tms(false);
    }
}
