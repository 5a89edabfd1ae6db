//! Pin-level simulation of a SinoWealth SH79F6484-style target.
//!
//! The simulator hangs off the engine's `JtagIo`/`DelayNs` seams and models
//! the target from the wire up: the power-on magic sequence detector, the
//! mode-byte handshake, a JTAG TAP with the vendor registers (recirculating
//! 16-bit IDCODE, lagged 30-bit CODESCAN backed by a flash array, CONFIG,
//! DEBUG and HALT opcode injection), and the byte-serial ICP responder.
//! Every driven pin edge and every delay is recorded so tests can assert
//! on waveforms as well as results.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use sinojtag::io::JtagIo;
use sinojtag::tap::{next_state, State};
use sinojtag::Programmer;

pub const FLASH_SIZE: usize = 0x10000;
pub const ERASE_BLOCK: usize = 1024;

const WIRE_MODE_JTAG: u8 = 0xA5;
const WIRE_MODE_ICP: u8 = 0x96; // 0x69 bit-reversed
const JTAG_EXIT_CLOCKS: u8 = 35;
// Initial drive-high plus the two TMS toggle loops.
const MAGIC_TMS_RISES: u32 = 1 + 165 + 25600;

const ICP_PREAMBLE: [u8; 4] = [0x15, 0x0A, 0x09, 0x06];

/// One recorded wire event. Pin events are recorded on level changes of
/// driven (non-tristated) lines only.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Tck(bool),
    Tms(bool),
    Tdi(bool),
    DelayUs(u32),
}

enum Phase {
    PowerOn { tms_rises: u32 },
    AwaitMode { bits: u8, count: u8 },
    Jtag(JtagModel),
    Icp(IcpModel),
}

struct JtagModel {
    state: State,
    consec_tms_high: u8,
    ir_shift: u8,
    ir: u8,
    dr_shift: u64,
    dr_count: u8,
    bypass: bool,
    debug_enabled: bool,
    halted: bool,
    debug_last: u8,
    config_last: u32,
    config_regs: [u16; 128],
    injected: Vec<u8>,
    flash_gated: bool,
    codescan_addr: u16,
}

impl JtagModel {
    fn new() -> Self {
        JtagModel {
            state: State::TestLogicReset,
            consec_tms_high: 0,
            ir_shift: 0,
            ir: 0x0E,
            dr_shift: 0,
            dr_count: 0,
            bypass: false,
            debug_enabled: false,
            halted: false,
            debug_last: 0,
            config_last: 0,
            config_regs: [0; 128],
            injected: Vec::new(),
            flash_gated: false,
            codescan_addr: 0,
        }
    }
}

enum IcpCmd {
    Idle,
    PingOperand,
    OffsetLow,
    OffsetHigh,
    DataOperand,
    Unlock { index: u8, erase: bool },
    WriteData,
    WritePair { first: u8 },
    WriteTerm { remaining: u8 },
    EraseArm,
    EraseStatus,
    EraseDone,
    Reading,
}

struct IcpModel {
    cmd: IcpCmd,
    acc: u8,
    clock: u8,
    responding: bool,
    resp: VecDeque<u8>,
    ib_offset: u16,
    pending_data: u8,
    write_ptr: u32,
}

impl IcpModel {
    fn new() -> Self {
        IcpModel {
            cmd: IcpCmd::Idle,
            acc: 0,
            clock: 0,
            responding: false,
            resp: VecDeque::new(),
            ib_offset: 0,
            pending_data: 0,
            write_ptr: 0,
        }
    }
}

pub struct Sim {
    tck: bool,
    tms: bool,
    tdi: bool,
    tdo: bool,
    vref: bool,
    outputs_enabled: bool,
    phase: Phase,
    idcode: u16,
    pub flash: Vec<u8>,
    pub events: Vec<Event>,
    /// Every complete command/operand byte received over ICP (response
    /// frames excluded).
    pub icp_bytes: Vec<u8>,
    /// Raw 30-bit words shifted into the CODESCAN register, oldest first.
    pub codescan_requests: Vec<u32>,
    /// Override for the 64-bit CONFIG readback register.
    pub config_readback: Option<u64>,
}

impl Sim {
    fn new() -> Self {
        Sim {
            tck: false,
            tms: false,
            tdi: false,
            tdo: false,
            vref: true,
            outputs_enabled: false,
            phase: Phase::PowerOn { tms_rises: 0 },
            idcode: 0xC14C,
            flash: vec![0xFF; FLASH_SIZE],
            events: Vec::new(),
            icp_bytes: Vec::new(),
            codescan_requests: Vec::new(),
            config_readback: None,
        }
    }

    pub fn set_idcode(&mut self, idcode: u16) {
        self.idcode = idcode;
    }

    pub fn load_flash(&mut self, address: u16, data: &[u8]) {
        let start = address as usize;
        self.flash[start..start + data.len()].copy_from_slice(data);
    }

    pub fn awaiting_mode_byte(&self) -> bool {
        matches!(self.phase, Phase::AwaitMode { .. })
    }

    pub fn in_jtag(&self) -> bool {
        matches!(self.phase, Phase::Jtag(_))
    }

    pub fn in_icp(&self) -> bool {
        matches!(self.phase, Phase::Icp(_))
    }

    pub fn debug_unlocked(&self) -> bool {
        matches!(&self.phase, Phase::Jtag(j) if j.flash_gated)
    }

    pub fn debug_config(&self, address: u8) -> u16 {
        match &self.phase {
            Phase::Jtag(j) => j.config_regs[address as usize & 0x7F],
            _ => 0,
        }
    }

    fn write_tck(&mut self, level: bool) {
        if !self.outputs_enabled {
            return;
        }
        if level != self.tck {
            self.events.push(Event::Tck(level));
        }
        let rising = level && !self.tck;
        self.tck = level;
        if rising {
            self.clock_rise();
        }
    }

    fn write_tms(&mut self, level: bool) {
        if !self.outputs_enabled {
            return;
        }
        if level != self.tms {
            self.events.push(Event::Tms(level));
        }
        let rising = level && !self.tms;
        let falling = !level && self.tms;
        self.tms = level;

        if rising {
            // A TMS pulse while TCK is held high exits ICP mode.
            if matches!(self.phase, Phase::Icp(_)) && self.tck {
                self.phase = Phase::AwaitMode { bits: 0, count: 0 };
                return;
            }
            if let Phase::PowerOn { tms_rises } = &mut self.phase {
                *tms_rises += 1;
            }
        } else if falling {
            // The magic sequence ends by parking TMS low after the long
            // toggle run; only then is the mode byte accepted.
            if let Phase::PowerOn { tms_rises } = self.phase {
                if tms_rises >= MAGIC_TMS_RISES {
                    self.phase = Phase::AwaitMode { bits: 0, count: 0 };
                }
            }
        }
    }

    fn write_tdi(&mut self, level: bool) {
        if !self.outputs_enabled {
            return;
        }
        if level != self.tdi {
            self.events.push(Event::Tdi(level));
        }
        self.tdi = level;
    }

    fn clock_rise(&mut self) {
        match &mut self.phase {
            Phase::PowerOn { .. } => {}
            Phase::AwaitMode { bits, count } => {
                // A rising edge with TMS high is residue from a protocol
                // exit, not part of a mode byte.
                if self.tms {
                    *bits = 0;
                    *count = 0;
                    return;
                }
                if *count < 8 && self.tdi {
                    *bits |= 1 << *count;
                }
                *count += 1;
                if *count == 10 {
                    let byte = *bits;
                    self.phase = match byte {
                        WIRE_MODE_JTAG => Phase::Jtag(JtagModel::new()),
                        WIRE_MODE_ICP => Phase::Icp(IcpModel::new()),
                        _ => Phase::AwaitMode { bits: 0, count: 0 },
                    };
                }
            }
            Phase::Jtag(_) => self.jtag_clock(),
            Phase::Icp(_) => self.icp_clock(),
        }
    }

    fn jtag_clock(&mut self) {
        let (tms, tdi) = (self.tms, self.tdi);
        let idcode = self.idcode;
        let readback = self.config_readback;

        let Phase::Jtag(j) = &mut self.phase else {
            unreachable!()
        };

        if tms {
            j.consec_tms_high += 1;
            if j.consec_tms_high >= JTAG_EXIT_CLOCKS {
                self.phase = Phase::AwaitMode { bits: 0, count: 0 };
                return;
            }
        } else {
            j.consec_tms_high = 0;
        }

        let s = j.state;
        match s {
            State::CaptureIR => j.ir_shift = 0b0001,
            State::ShiftIR => {
                self.tdo = j.ir_shift & 1 != 0;
                j.ir_shift = j.ir_shift >> 1 | (tdi as u8) << 3;
            }
            State::CaptureDR => {
                j.dr_count = 0;
                j.bypass = false;
                j.dr_shift = match j.ir {
                    0x0E => idcode as u64,
                    0x00 => {
                        if j.flash_gated {
                            let byte = self.flash[j.codescan_addr as usize];
                            (byte.reverse_bits() as u64) << 22
                        } else {
                            0
                        }
                    }
                    0x03 => readback.unwrap_or(j.config_last as u64),
                    0x02 => j.debug_last as u64,
                    _ => 0,
                };
            }
            State::ShiftDR => match j.ir {
                // IDCODE recirculates its 16-bit register.
                0x0E => {
                    let out = j.dr_shift & 1;
                    self.tdo = out != 0;
                    j.dr_shift = (j.dr_shift >> 1 & 0x7FFF) | out << 15;
                }
                0x00 | 0x02 | 0x03 | 0x0C => {
                    self.tdo = j.dr_shift & 1 != 0;
                    j.dr_shift = j.dr_shift >> 1 | (tdi as u64) << 63;
                    j.dr_count = j.dr_count.saturating_add(1);
                }
                // Everything else behaves as the single-bit bypass.
                _ => {
                    self.tdo = j.bypass;
                    j.bypass = tdi;
                }
            },
            _ => {}
        }

        let ns = next_state(s, tms);
        if ns == State::UpdateIR && s != State::UpdateIR {
            j.ir = j.ir_shift & 0x0F;
        }
        if ns == State::UpdateDR && s != State::UpdateDR && j.dr_count > 0 {
            let received = if j.dr_count >= 64 {
                j.dr_shift
            } else {
                j.dr_shift >> (64 - j.dr_count)
            };
            match j.ir {
                0x00 => {
                    self.codescan_requests.push(received as u32);
                    j.codescan_addr = (received as u16).reverse_bits();
                }
                0x02 => {
                    j.debug_last = received as u8 & 0x0F;
                    match j.debug_last {
                        0x04 => j.debug_enabled = true,
                        0x01 => j.halted = true,
                        _ => {}
                    }
                }
                0x03 => {
                    if j.dr_count == 23 {
                        let word = received as u32 & 0x7F_FFFF;
                        j.config_last = word;
                        j.config_regs[(word >> 16) as usize] = word as u16;
                    }
                }
                0x0C => {
                    j.injected.push((received as u8).reverse_bits());
                    if j.debug_enabled
                        && j.halted
                        && j.injected.ends_with(&[0x75, 0xFF, 0x80])
                    {
                        j.flash_gated = true;
                    }
                }
                _ => {}
            }
        }
        if ns == State::TestLogicReset {
            j.ir = 0x0E;
        }
        j.state = ns;
    }

    fn icp_clock(&mut self) {
        let tdi = self.tdi;
        let mut tdo = self.tdo;
        let mut completed = None;

        {
            let Phase::Icp(icp) = &mut self.phase else {
                unreachable!()
            };

            if icp.clock == 0 {
                icp.responding =
                    !icp.resp.is_empty() || matches!(icp.cmd, IcpCmd::Reading);
                if icp.responding && icp.resp.is_empty() {
                    // Streaming read: serve the next flash byte.
                    icp.resp.push_back(self.flash[icp.ib_offset as usize]);
                    icp.ib_offset = icp.ib_offset.wrapping_add(1);
                }
            }

            if icp.clock < 8 {
                if icp.responding {
                    if let Some(byte) = icp.resp.front() {
                        tdo = byte >> icp.clock & 1 != 0;
                    }
                }
                // Commands arrive MSB-first.
                icp.acc = icp.acc << 1 | tdi as u8;
            }

            icp.clock += 1;
            // Eight data clocks plus the trailing clock end a frame.
            if icp.clock == 9 {
                let byte = icp.acc;
                icp.acc = 0;
                icp.clock = 0;
                if icp.responding {
                    icp.resp.pop_front();
                } else {
                    completed = Some(byte);
                }
            }
        }

        self.tdo = tdo;
        if let Some(byte) = completed {
            self.icp_bytes.push(byte);
            self.icp_byte(byte);
        }
    }

    fn icp_byte(&mut self, byte: u8) {
        let mut erase_at = None;
        let mut tdo = self.tdo;

        {
            let Phase::Icp(icp) = &mut self.phase else {
                unreachable!()
            };

            icp.cmd = match std::mem::replace(&mut icp.cmd, IcpCmd::Idle) {
                IcpCmd::Idle | IcpCmd::Reading => match byte {
                    0x40 => IcpCmd::OffsetLow,
                    0x41 => IcpCmd::OffsetHigh,
                    0x42 => IcpCmd::DataOperand,
                    0x43 => {
                        icp.resp.push_back(icp.ib_offset as u8);
                        icp.resp.push_back((icp.ib_offset >> 8) as u8);
                        IcpCmd::Idle
                    }
                    0x44 => IcpCmd::Reading,
                    0x49 => IcpCmd::PingOperand,
                    0x6E => IcpCmd::Unlock {
                        index: 0,
                        erase: false,
                    },
                    0xE6 => IcpCmd::Unlock {
                        index: 0,
                        erase: true,
                    },
                    _ => IcpCmd::Idle,
                },
                IcpCmd::PingOperand => IcpCmd::Idle,
                IcpCmd::OffsetLow => {
                    icp.ib_offset = icp.ib_offset & 0xFF00 | byte as u16;
                    IcpCmd::Idle
                }
                IcpCmd::OffsetHigh => {
                    icp.ib_offset = icp.ib_offset & 0x00FF | (byte as u16) << 8;
                    IcpCmd::Idle
                }
                IcpCmd::DataOperand => {
                    icp.pending_data = byte;
                    IcpCmd::Idle
                }
                IcpCmd::Unlock { index, erase } => {
                    if byte != ICP_PREAMBLE[index as usize] {
                        IcpCmd::Idle
                    } else if index < 3 {
                        IcpCmd::Unlock {
                            index: index + 1,
                            erase,
                        }
                    } else if erase {
                        IcpCmd::EraseArm
                    } else {
                        // Unlock complete: the byte latched by SET_IB_DATA
                        // is committed at the base address.
                        self.flash[icp.ib_offset as usize] = icp.pending_data;
                        icp.write_ptr = icp.ib_offset as u32 + 1;
                        IcpCmd::WriteData
                    }
                }
                IcpCmd::WriteData => IcpCmd::WritePair { first: byte },
                IcpCmd::WritePair { first } => {
                    // Data bytes are padded with 0x00; a 0x00/0xAA pair can
                    // only be the termination sequence.
                    if first == 0x00 && byte == 0xAA {
                        IcpCmd::WriteTerm { remaining: 2 }
                    } else {
                        self.flash[icp.write_ptr as usize % FLASH_SIZE] = first;
                        icp.write_ptr += 1;
                        IcpCmd::WriteData
                    }
                }
                IcpCmd::WriteTerm { remaining } => {
                    if remaining > 1 {
                        IcpCmd::WriteTerm {
                            remaining: remaining - 1,
                        }
                    } else {
                        IcpCmd::Idle
                    }
                }
                IcpCmd::EraseArm => {
                    erase_at = Some(icp.ib_offset);
                    IcpCmd::EraseStatus
                }
                IcpCmd::EraseStatus => {
                    tdo = true;
                    IcpCmd::EraseDone
                }
                IcpCmd::EraseDone => {
                    tdo = false;
                    IcpCmd::Idle
                }
            };
        }

        self.tdo = tdo;
        if let Some(address) = erase_at {
            let block = address as usize & !(ERASE_BLOCK - 1);
            for byte in &mut self.flash[block..block + ERASE_BLOCK] {
                *byte = 0xFF;
            }
        }
    }
}

/// Host side of the simulated wires.
pub struct SimIo(Rc<RefCell<Sim>>);

impl JtagIo for SimIo {
    fn tristate(&mut self) {
        self.0.borrow_mut().outputs_enabled = false;
    }

    fn enable_outputs(&mut self) {
        self.0.borrow_mut().outputs_enabled = true;
    }

    fn set_tck(&mut self, level: bool) {
        self.0.borrow_mut().write_tck(level);
    }

    fn set_tms(&mut self, level: bool) {
        self.0.borrow_mut().write_tms(level);
    }

    fn set_tdi(&mut self, level: bool) {
        self.0.borrow_mut().write_tdi(level);
    }

    fn tdo(&mut self) -> bool {
        self.0.borrow().tdo
    }

    fn vref(&mut self) -> bool {
        self.0.borrow().vref
    }
}

/// Delay provider that records durations in the shared event stream.
/// Delays while the wires are tristated are not wire traffic and are
/// dropped.
pub struct SimDelay(Rc<RefCell<Sim>>);

impl SimDelay {
    fn record(&mut self, us: u32) {
        let mut sim = self.0.borrow_mut();
        if sim.outputs_enabled {
            sim.events.push(Event::DelayUs(us));
        }
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.record(ns / 1000);
    }

    fn delay_us(&mut self, us: u32) {
        self.record(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.record(ms * 1000);
    }
}

/// A fresh simulated target and the wire handles to drive it.
pub fn sim() -> (SimIo, SimDelay, Rc<RefCell<Sim>>) {
    let shared = Rc::new(RefCell::new(Sim::new()));
    (SimIo(shared.clone()), SimDelay(shared.clone()), shared)
}

/// A programmer wired to a fresh simulated target.
pub fn programmer() -> (Programmer<SimIo, SimDelay>, Rc<RefCell<Sim>>) {
    let (io, delay, shared) = sim();
    (Programmer::new(io, delay), shared)
}
