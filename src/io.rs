//! Pin driver seam.
//!
//! Everything above this trait is hardware-independent: the engine only ever
//! drives the four JTAG wires and senses VREF through [`JtagIo`], and all
//! timing goes through [`embedded_hal::delay::DelayNs`]. An implementation
//! for real hardware maps each method onto its GPIO port; the test suite
//! implements the trait over a simulated target.
//!
//! On the reference board the five signals share AVR PORTD: TCK bit 5,
//! TMS bit 3, TDI bit 4, TDO bit 2, VREF bit 6.

/// Access to the five wires of the programming interface.
///
/// TCK, TMS and TDI are host-driven outputs while a session is active; TDO
/// and VREF are always inputs. Level writes to a tristated line must be
/// harmless no-ops, matching GPIO-port semantics.
pub trait JtagIo {
    /// Return all five lines to high-impedance inputs with pull-ups off.
    ///
    /// This is both the power-on state and the `stop` state; the target
    /// must not see any driven level.
    fn tristate(&mut self);

    /// Configure TCK/TMS/TDI as outputs. TDO stays an input (with the
    /// host pull-up enabled where the hardware has one) and VREF stays an
    /// input with no pull-up.
    fn enable_outputs(&mut self);

    /// Drive the TCK line.
    fn set_tck(&mut self, level: bool);

    /// Drive the TMS line.
    fn set_tms(&mut self, level: bool);

    /// Drive the TDI line.
    fn set_tdi(&mut self, level: bool);

    /// Sample the TDO line.
    fn tdo(&mut self) -> bool;

    /// Sample the VREF sense line; high means the target is powered.
    fn vref(&mut self) -> bool;

    /// Drive the attention LED, used to signal a blocking VREF wait.
    ///
    /// Boards without a spare LED can ignore this.
    fn set_led(&mut self, _on: bool) {}
}
