//! Wire-mode ownership and transitions.
//!
//! The four wires carry two mutually exclusive protocols, selected by a
//! mode byte after the power-on handshake. [`Link`] is the sole owner of
//! the mode variable: every transition goes through it, and it alone
//! decides when the PHY must emit the handshake, a mode byte, or a
//! protocol exit sequence.

use embedded_hal::delay::DelayNs;

use crate::io::JtagIo;
use crate::phy::Phy;

/// Number of TMS=1 clocks that exits the vendor JTAG mode.
const JTAG_EXIT_CLOCKS: u8 = 35;

/// Current wire protocol. The discriminants are the mode bytes sent on
/// the wire to select each protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    /// Handshake complete, target awaiting a mode byte. Held with TCK
    /// high and TMS low.
    Ready = 0x00,
    /// IEEE 1149.1 scan access plus the vendor debug registers.
    Jtag = 0xA5,
    /// Byte-serial in-circuit programming protocol.
    Icp = 0x69,
    /// Power-on state: pins high-impedance, handshake not yet run.
    NotInitialized = 0xFF,
}

/// Owner of the wire mode, wrapping the PHY.
pub struct Link<IO, D> {
    phy: Phy<IO, D>,
    mode: Mode,
}

impl<IO: JtagIo, D: DelayNs> Link<IO, D> {
    /// Create an uninitialised link over a pin driver and delay provider.
    pub fn new(io: IO, delay: D) -> Self {
        Link {
            phy: Phy::new(io, delay),
            mode: Mode::NotInitialized,
        }
    }

    /// Current wire mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Run the power-on handshake and leave the target awaiting a mode
    /// byte.
    ///
    /// The magic sequence must run exactly once per target power-on, so
    /// this is a no-op in every mode except `NotInitialized`.
    pub fn init(&mut self, wait_vref: bool) {
        if self.mode != Mode::NotInitialized {
            return;
        }
        self.phy.power_up(wait_vref);
        self.mode = Mode::Ready;
    }

    /// Release all pins and forget the handshake.
    pub fn stop(&mut self) {
        self.phy.tristate();
        self.mode = Mode::NotInitialized;
    }

    /// Switch the wire to `new`, exiting the current protocol first if
    /// needed. Returns the resulting mode.
    ///
    /// Re-selecting the current mode, or calling before [`Link::init`],
    /// issues no wire traffic.
    pub fn enter(&mut self, new: Mode) -> Mode {
        if self.mode == new || self.mode == Mode::NotInitialized {
            return self.mode;
        }

        if self.mode != Mode::Ready {
            self.reset();
        }

        match new {
            Mode::Jtag | Mode::Icp => {
                log::debug!("selecting {:?} mode", new);
                self.phy.send_mode_byte(new as u8);
                self.mode = new;
            }
            // `reset` above already landed in Ready; entering
            // NotInitialized is `stop`'s job.
            Mode::Ready | Mode::NotInitialized => {}
        }

        self.mode
    }

    /// Exit the current protocol back to the ready state. Returns the
    /// resulting mode.
    ///
    /// The JTAG exit needs the full 35-clock run: shorter TMS-high bursts
    /// in some TAP states drop the target out of its vendor mode without
    /// returning it to the ready state.
    pub fn reset(&mut self) -> Mode {
        match self.mode {
            Mode::Jtag => {
                for _ in 0..JTAG_EXIT_CLOCKS {
                    self.phy.next_state(true);
                }
                self.phy.drive_tck(true);
                self.phy.drive_tms(false);
                self.mode = Mode::Ready;
            }
            Mode::Icp => {
                // ICP exits on a TMS pulse while TCK is held high.
                self.phy.drive_tck(true);
                self.phy.drive_tms(true);
                self.phy.delay_half();
                self.phy.drive_tms(false);
                self.phy.delay_half();
                self.mode = Mode::Ready;
            }
            Mode::Ready | Mode::NotInitialized => {}
        }

        self.mode
    }

    pub(crate) fn phy(&mut self) -> &mut Phy<IO, D> {
        &mut self.phy
    }
}
