//! Component B: the tone generator (spec.md §4.B).
//!
//! Two independent square-wave PIO state machines, OR-tied onto the same
//! output pin, clocked at 10 MHz. `set_freq` computes the half-period in
//! 100 ns ticks and reloads the machine; `f_hz == 0` just restarts the
//! machine, whose idle state drives the pin low.

use rp2040_hal::pio::{PIOExt, Running, StateMachine, StateMachineIndex, Stopped, Tx, UninitStateMachine};

/// Assembles the tone-generator PIO program from
/// `original_source/firmware/modem.py`'s `tone_generator`: pull a
/// half-period delay once, then toggle the pin high/low for that many
/// cycles each, forever.
pub fn tone_program() -> pio::Program<{ pio::RP2040_MAX_PROGRAM_SIZE }> {
    pio_proc::pio_asm!(
        "pull block",
        ".wrap_target",
        "set pins, 1",
        "mov x, osr",
        "delay_high:",
        "jmp x--, delay_high",
        "set pins, 0",
        "mov x, osr",
        "delay_low:",
        "jmp x--, delay_low",
        ".wrap",
    )
    .program
}

const PIO_CLOCK_HZ: f32 = 10_000_000.0;

/// Anything that can drive an audio frequency. Lets the modem state
/// machine hold tone outputs generically, without naming the concrete
/// PIO/state-machine type parameters of `ToneGenerator` in its own
/// signature.
pub trait ToneOutput {
    fn set_freq(&mut self, f_hz: u32);
}

impl<P: PIOExt, SM: StateMachineIndex> ToneOutput for ToneGenerator<P, SM> {
    fn set_freq(&mut self, f_hz: u32) {
        ToneGenerator::set_freq(self, f_hz)
    }
}

/// One of the two tone-generator state machines. Only `set_freq` is
/// exposed; starting/stopping is entirely encapsulated because the PIO
/// program must be restarted (not just reloaded) to change frequency.
pub struct ToneGenerator<P: PIOExt, SM: StateMachineIndex> {
    tx: Tx<(P, SM)>,
    sm: Option<StateMachine<(P, SM), Running>>,
    stopped_sm: Option<StateMachine<(P, SM), Stopped>>,
}

impl<P: PIOExt, SM: StateMachineIndex> ToneGenerator<P, SM> {
    pub fn new(
        uninit_sm: UninitStateMachine<(P, SM)>,
        installed: rp2040_hal::pio::InstalledProgram<P>,
        pin_base: u8,
    ) -> Self {
        let (sm, _rx, tx) = rp2040_hal::pio::PIOBuilder::from_installed_program(installed)
            .set_pins(pin_base, 1)
            .clock_divisor_fixed_point(12, 128) // 125 MHz / 12.5 ~= 10 MHz
            .build(uninit_sm);
        Self {
            tx,
            sm: None,
            stopped_sm: Some(sm),
        }
    }

    /// Half-period, in 100 ns PIO ticks, for a square wave at `f_hz`.
    /// Subtracting 3 accounts for the fixed instruction overhead in the
    /// `delay_high`/`delay_low` loop (spec.md §4.B).
    pub fn half_period_ticks(f_hz: u32) -> u32 {
        let half_period_s = 1.0 / (f_hz as f32) / 2.0;
        let ticks = (half_period_s * PIO_CLOCK_HZ).round() as i64 - 3;
        ticks.max(0) as u32
    }

    pub fn set_freq(&mut self, f_hz: u32) {
        if let Some(sm) = self.sm.take() {
            self.stopped_sm = Some(sm.stop());
        }
        let mut sm = self.stopped_sm.take().expect("state machine always present when stopped");
        sm = sm.restart();
        if f_hz > 0 {
            let delay = Self::half_period_ticks(f_hz);
            while !self.tx.write(delay) {
                core::hint::spin_loop();
            }
            self.sm = Some(sm.start());
        } else {
            // Idle state drives the pin low; leave it stopped.
            self.stopped_sm = Some(sm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_period_for_425hz_matches_reference_formula() {
        // delay = round(1/425/100e-9/2) - 3
        let expected = (1.0f64 / 425.0 / 100e-9 / 2.0).round() as i64 - 3;
        assert_eq!(
            ToneGenerator::<rp2040_hal::pac::PIO0, rp2040_hal::pio::SM0>::half_period_ticks(425),
            expected as u32
        );
    }

    #[test]
    fn half_period_never_underflows() {
        // Pathologically high frequency would otherwise go negative.
        assert_eq!(
            ToneGenerator::<rp2040_hal::pac::PIO0, rp2040_hal::pio::SM0>::half_period_ticks(
                5_000_000
            ),
            0
        );
    }
}
