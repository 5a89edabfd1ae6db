//! IEEE 1149.1 TAP controller.
//!
//! Tracks the 16-state TAP finite state machine and provides IR/DR scans
//! on top of the PHY's bit shifter. The tracked state mirrors the hardware
//! state exactly as long as every TAP clock is issued through this module;
//! mode transitions (which clock the TAP behind its back) re-seed the
//! tracked state at the command surface.

use embedded_hal::delay::DelayNs;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::io::JtagIo;
use crate::link::Link;

/// Instruction register width of the SinoWealth TAP.
pub const IR_BITS: u8 = 4;

/// IR code selecting the device identification register.
pub(crate) const IR_IDCODE: u8 = 0x0E;

/// IR code (all ones) selecting the bypass register.
pub(crate) const IR_BYPASS: u8 = 0x0F;

/// The 16 TAP controller states, numbered as on the wire protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum State {
    TestLogicReset = 0,
    RunTestIdle = 1,
    SelectDRScan = 2,
    CaptureDR = 3,
    ShiftDR = 4,
    Exit1DR = 5,
    PauseDR = 6,
    Exit2DR = 7,
    UpdateDR = 8,
    SelectIRScan = 9,
    CaptureIR = 10,
    ShiftIR = 11,
    Exit1IR = 12,
    PauseIR = 13,
    Exit2IR = 14,
    UpdateIR = 15,
}

const STATES: [State; 16] = [
    State::TestLogicReset,
    State::RunTestIdle,
    State::SelectDRScan,
    State::CaptureDR,
    State::ShiftDR,
    State::Exit1DR,
    State::PauseDR,
    State::Exit2DR,
    State::UpdateDR,
    State::SelectIRScan,
    State::CaptureIR,
    State::ShiftIR,
    State::Exit1IR,
    State::PauseIR,
    State::Exit2IR,
    State::UpdateIR,
];

/// The TAP transition function: the state reached from `s` when TMS is
/// sampled as `tms` on the next rising TCK edge.
pub const fn next_state(s: State, tms: bool) -> State {
    match s {
        State::TestLogicReset => {
            if tms {
                State::TestLogicReset
            } else {
                State::RunTestIdle
            }
        }
        State::RunTestIdle => {
            if tms {
                State::SelectDRScan
            } else {
                State::RunTestIdle
            }
        }
        State::SelectDRScan => {
            if tms {
                State::SelectIRScan
            } else {
                State::CaptureDR
            }
        }
        State::CaptureDR => {
            if tms {
                State::Exit1DR
            } else {
                State::ShiftDR
            }
        }
        State::ShiftDR => {
            if tms {
                State::Exit1DR
            } else {
                State::ShiftDR
            }
        }
        State::Exit1DR => {
            if tms {
                State::UpdateDR
            } else {
                State::PauseDR
            }
        }
        State::PauseDR => {
            if tms {
                State::Exit2DR
            } else {
                State::PauseDR
            }
        }
        State::Exit2DR => {
            if tms {
                State::UpdateDR
            } else {
                State::ShiftDR
            }
        }
        State::UpdateDR => {
            if tms {
                State::SelectDRScan
            } else {
                State::RunTestIdle
            }
        }
        State::SelectIRScan => {
            if tms {
                State::TestLogicReset
            } else {
                State::CaptureIR
            }
        }
        State::CaptureIR => {
            if tms {
                State::Exit1IR
            } else {
                State::ShiftIR
            }
        }
        State::ShiftIR => {
            if tms {
                State::Exit1IR
            } else {
                State::ShiftIR
            }
        }
        State::Exit1IR => {
            if tms {
                State::UpdateIR
            } else {
                State::PauseIR
            }
        }
        State::PauseIR => {
            if tms {
                State::Exit2IR
            } else {
                State::PauseIR
            }
        }
        State::Exit2IR => {
            if tms {
                State::UpdateIR
            } else {
                State::ShiftIR
            }
        }
        State::UpdateIR => {
            if tms {
                State::SelectDRScan
            } else {
                State::RunTestIdle
            }
        }
    }
}

/// Borrow view over the link driving TAP operations.
pub struct Tap<'a, IO, D> {
    link: &'a mut Link<IO, D>,
    state: &'a mut State,
}

impl<'a, IO: JtagIo, D: DelayNs> Tap<'a, IO, D> {
    pub(crate) fn new(link: &'a mut Link<IO, D>, state: &'a mut State) -> Self {
        Tap { link, state }
    }

    /// Currently tracked TAP state.
    pub fn state(&self) -> State {
        *self.state
    }

    /// Force Test-Logic-Reset with five TMS=1 clocks.
    pub fn reset(&mut self) {
        for _ in 0..5 {
            self.link.phy().next_state(true);
        }
        *self.state = State::TestLogicReset;
    }

    /// Move to `target` by the shortest TMS sequence.
    ///
    /// Breadth-first search over the fixed transition graph, exploring
    /// TMS=0 before TMS=1 so ties resolve to the lexicographically
    /// smallest sequence. No clocks are emitted if already at `target`.
    pub fn goto_state(&mut self, target: State) {
        if *self.state == target {
            return;
        }

        let start = *self.state as usize;
        let goal = target as usize;

        let mut queue = [0usize; 16];
        let mut prev = [0usize; 16];
        let mut prev_tms = [false; 16];
        let mut visited = [false; 16];

        let mut head = 0;
        let mut tail = 0;
        visited[start] = true;
        queue[tail] = start;
        tail += 1;

        while head < tail && !visited[goal] {
            let s = queue[head];
            head += 1;
            for tms in [false, true] {
                let ns = next_state(STATES[s], tms) as usize;
                if !visited[ns] {
                    visited[ns] = true;
                    prev[ns] = s;
                    prev_tms[ns] = tms;
                    queue[tail] = ns;
                    tail += 1;
                }
            }
        }

        // Walk the predecessor chain back to the start, then replay the
        // TMS sequence forwards. The graph is strongly connected, so the
        // goal is always reached.
        let mut seq = [false; 16];
        let mut len = 0;
        let mut cur = goal;
        while cur != start {
            seq[len] = prev_tms[cur];
            len += 1;
            cur = prev[cur];
        }

        while len > 0 {
            len -= 1;
            self.step(seq[len]);
        }
    }

    /// Emit `count` clocks with TMS low.
    ///
    /// Only meaningful in the self-looping states (Run-Test/Idle,
    /// Shift-*, Pause-*); elsewhere it walks the state machine.
    pub fn idle_clocks(&mut self, count: u8) {
        for _ in 0..count {
            self.step(false);
        }
    }

    /// Shift `out` into the instruction register, returning the captured
    /// bits. Ends in Update-IR.
    pub fn ir_scan(&mut self, out: u8) -> u8 {
        self.goto_state(State::ShiftIR);
        let capture = self.link.phy().stream_bits(out as u32, IR_BITS, true);
        *self.state = State::Exit1IR;
        self.step(true);
        capture as u8
    }

    /// Shift `bits` bits of `out` into the data register, returning the
    /// captured bits. Ends in Update-DR.
    pub fn dr_scan(&mut self, out: u32, bits: u8) -> u32 {
        self.goto_state(State::ShiftDR);
        let capture = self.link.phy().stream_bits(out, bits, true);
        *self.state = State::Exit1DR;
        self.step(true);
        capture
    }

    /// Wide variant of [`Tap::dr_scan`] for registers larger than 32 bits,
    /// chained from two shifts with the exit asserted only on the final
    /// bit.
    pub fn dr_scan_wide(&mut self, out: u64, bits: u8) -> u64 {
        debug_assert!(bits > 32 && bits <= 64);
        self.goto_state(State::ShiftDR);
        let lo = self.link.phy().stream_bits(out as u32, 32, false);
        let hi = self.link.phy().stream_bits((out >> 32) as u32, bits - 32, true);
        *self.state = State::Exit1DR;
        self.step(true);
        (hi as u64) << 32 | lo as u64
    }

    /// Select the bypass register by shifting all-ones into IR.
    pub fn bypass(&mut self) {
        self.ir_scan(IR_BYPASS);
    }

    /// Select IDCODE and read 32 bits from the data register.
    pub fn idcode(&mut self) -> u32 {
        self.ir_scan(IR_IDCODE);
        self.dr_scan(0, 32)
    }

    pub(crate) fn link(&mut self) -> &mut Link<IO, D> {
        self.link
    }

    fn step(&mut self, tms: bool) {
        self.link.phy().next_state(tms);
        *self.state = next_state(*self.state, tms);
    }
}
