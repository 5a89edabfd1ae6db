// Copyright 2026 sinojtag contributors
// Licensed under the Apache-2.0 and MIT licenses.

//! sinojtag
//!
//! Flash programming engine for SinoWealth 8051 microcontrollers, driving a
//! bit-banged four-wire JTAG/ICP interface through a pluggable pin layer.
//!
//! The engine is layered: [`io::JtagIo`] abstracts the five wires, the
//! [`phy`] module turns them into timed JTAG primitives (including the
//! vendor handshake that unlocks the target's debug interface), [`tap`]
//! tracks the IEEE 1149.1 state machine, and the [`sinowealth`] and [`icp`]
//! modules implement the two vendor protocols multiplexed on the wires.
//! [`link`] owns the wire mode and serialises transitions between them, and
//! [`programmer`] exposes the flat command surface a host transport can
//! marshal over a serial link.

pub mod bits;
pub mod io;
pub mod phy;
pub mod link;
pub mod tap;
pub mod sinowealth;
pub mod icp;
pub mod programmer;

pub use io::JtagIo;
pub use link::{Link, Mode};
pub use programmer::{Command, Programmer, Response, Status};
