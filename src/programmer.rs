//! Flat command surface for an external transport.
//!
//! [`Programmer`] owns the whole stack and exposes each wire-protocol
//! operation both as a direct method and as a typed [`Command`] dispatched
//! through [`Programmer::execute`]. Serial framing and argument
//! marshalling live outside this crate; a transport only needs to decode
//! into `Command` and encode the returned [`Response`].
//!
//! Operations switch wire modes transparently: TAP commands enter JTAG
//! mode, ICP commands enter ICP mode, resetting through the ready state
//! as needed.

use embedded_hal::delay::DelayNs;
use num_enum::IntoPrimitive;

use crate::icp::Icp;
use crate::io::JtagIo;
use crate::link::{Link, Mode};
use crate::sinowealth::{self, Jtag};
use crate::tap::{State, Tap};

/// Status byte returned by fallible commands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    /// The target's IDCODE read back as all-zeros or all-ones.
    ErrIdcode = 1,
    /// Reserved by the wire protocol; nothing raises it today.
    ErrFlashTimeout = 2,
}

/// A decoded command from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    PhyInit,
    PhyReset,
    PhyStop,
    TapInit,
    TapState,
    TapReset,
    TapGotoState { state: u8 },
    TapIr { out: u8 },
    TapDr { out: u32, bits: u8 },
    TapBypass,
    TapIdcode,
    TapIdleClocks { count: u8 },
    TapCodescanRead { address: u16 },
    IcpInit,
    IcpVerify,
    IcpRead { address: u16, length: u16 },
    IcpErase { address: u16 },
    IcpWrite { address: u16, data: Vec<u8> },
}

/// A typed command result for the transport to encode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Unit,
    Bool(bool),
    Byte(u8),
    Word(u32),
    Bytes(Vec<u8>),
    Status(Status),
}

/// The complete programming engine over one pin driver.
pub struct Programmer<IO, D> {
    link: Link<IO, D>,
    tap_state: State,
}

impl<IO: JtagIo, D: DelayNs> Programmer<IO, D> {
    pub fn new(io: IO, delay: D) -> Self {
        Programmer {
            link: Link::new(io, delay),
            tap_state: State::TestLogicReset,
        }
    }

    /// Execute one decoded command.
    pub fn execute(&mut self, command: Command) -> Response {
        match command {
            Command::PhyInit => {
                self.phy_init(true);
                Response::Unit
            }
            Command::PhyReset => Response::Bool(self.phy_reset()),
            Command::PhyStop => {
                self.phy_stop();
                Response::Unit
            }
            Command::TapInit => Response::Status(match self.tap_init() {
                Ok(_) => Status::Ok,
                Err(_) => Status::ErrIdcode,
            }),
            Command::TapState => Response::Byte(self.tap_state().into()),
            Command::TapReset => {
                self.tap_reset();
                Response::Unit
            }
            Command::TapGotoState { state } => {
                self.tap_goto_state(state);
                Response::Unit
            }
            Command::TapIr { out } => Response::Byte(self.tap_ir(out)),
            Command::TapDr { out, bits } => Response::Word(self.tap_dr(out, bits)),
            Command::TapBypass => {
                self.tap_bypass();
                Response::Unit
            }
            Command::TapIdcode => Response::Word(self.tap_idcode()),
            Command::TapIdleClocks { count } => {
                self.tap_idle_clocks(count);
                Response::Unit
            }
            Command::TapCodescanRead { address } => {
                Response::Byte(self.tap_codescan_read(address))
            }
            Command::IcpInit => {
                self.icp_init();
                Response::Unit
            }
            Command::IcpVerify => Response::Bool(self.icp_verify()),
            Command::IcpRead { address, length } => {
                let mut data = vec![0; length as usize];
                self.icp_read(address, &mut data);
                Response::Bytes(data)
            }
            Command::IcpErase { address } => Response::Bool(self.icp_erase(address)),
            Command::IcpWrite { address, data } => {
                Response::Bool(self.icp_write(address, &data))
            }
        }
    }

    /// Run the power-on handshake; a no-op once initialised.
    pub fn phy_init(&mut self, wait_vref: bool) {
        self.link.init(wait_vref);
    }

    /// Drive the wire back to the ready state. True iff now ready.
    pub fn phy_reset(&mut self) -> bool {
        self.link.reset() == Mode::Ready
    }

    /// Release all pins to high impedance.
    pub fn phy_stop(&mut self) {
        self.link.stop();
    }

    /// Current wire mode.
    pub fn mode(&self) -> Mode {
        self.link.mode()
    }

    /// Enter JTAG mode and unlock the debug interface; returns the IDCODE.
    pub fn tap_init(&mut self) -> sinowealth::Result<u16> {
        self.jtag().debug_unlock()
    }

    /// Currently tracked TAP state.
    pub fn tap_state(&self) -> State {
        self.tap_state
    }

    /// Force the TAP to Test-Logic-Reset.
    pub fn tap_reset(&mut self) {
        self.enter_jtag();
        self.tap().reset();
    }

    /// Navigate to a TAP state by its wire number; out-of-range values
    /// are ignored.
    pub fn tap_goto_state(&mut self, state: u8) {
        let Ok(target) = State::try_from(state) else {
            return;
        };
        self.enter_jtag();
        self.tap().goto_state(target);
    }

    /// Shift the instruction register.
    pub fn tap_ir(&mut self, out: u8) -> u8 {
        self.enter_jtag();
        self.tap().ir_scan(out)
    }

    /// Shift a data register of one of the target's register widths.
    ///
    /// Unsupported widths perform no scan and return 0.
    pub fn tap_dr(&mut self, out: u32, bits: u8) -> u32 {
        match bits {
            4 | 8 | 16 | 23 | 30 | 32 => {
                self.enter_jtag();
                self.tap().dr_scan(out, bits)
            }
            _ => 0,
        }
    }

    /// Select the bypass register.
    pub fn tap_bypass(&mut self) {
        self.enter_jtag();
        self.tap().bypass();
    }

    /// Full 32-bit IDCODE scan.
    pub fn tap_idcode(&mut self) -> u32 {
        self.enter_jtag();
        self.tap().idcode()
    }

    /// Emit idle clocks with TMS low.
    pub fn tap_idle_clocks(&mut self, count: u8) {
        self.enter_jtag();
        self.tap().idle_clocks(count);
    }

    /// Read a single flash byte through CODESCAN.
    pub fn tap_codescan_read(&mut self, address: u16) -> u8 {
        self.jtag().codescan_read(address)
    }

    /// Enter ICP mode and ping the target.
    pub fn icp_init(&mut self) {
        self.enter_icp();
    }

    /// Check the target responds over ICP.
    pub fn icp_verify(&mut self) -> bool {
        self.enter_icp();
        Icp::new(&mut self.link).verify()
    }

    /// Read flash over ICP, then return the wire to the ready state.
    pub fn icp_read(&mut self, address: u16, buffer: &mut [u8]) {
        self.enter_icp();
        Icp::new(&mut self.link).read_flash(address, buffer);
        self.link.reset();
    }

    /// Erase the flash block containing `address`.
    pub fn icp_erase(&mut self, address: u16) -> bool {
        self.enter_icp();
        Icp::new(&mut self.link).erase_flash(address)
    }

    /// Program flash over ICP. Empty buffers are rejected without any
    /// wire traffic.
    pub fn icp_write(&mut self, address: u16, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }
        self.enter_icp();
        Icp::new(&mut self.link).write_flash(address, data)
    }

    /// Vendor JTAG operations (CODESCAN cursors, CONFIG access), entering
    /// JTAG mode as needed.
    pub fn jtag(&mut self) -> Jtag<'_, IO, D> {
        self.enter_jtag();
        Jtag::new(Tap::new(&mut self.link, &mut self.tap_state))
    }

    fn tap(&mut self) -> Tap<'_, IO, D> {
        Tap::new(&mut self.link, &mut self.tap_state)
    }

    fn enter_jtag(&mut self) {
        if self.link.mode() != Mode::Jtag && self.link.enter(Mode::Jtag) == Mode::Jtag {
            // Fresh entry: the hardware TAP comes up in its reset state.
            self.tap_state = State::TestLogicReset;
        }
    }

    fn enter_icp(&mut self) {
        if self.link.mode() != Mode::Icp && self.link.enter(Mode::Icp) == Mode::Icp {
            Icp::new(&mut self.link).init();
        }
    }
}
