//! Component A: the CPLD bus driver (spec.md §4.A).
//!
//! A lock-step, externally-clocked 16-bit strobe protocol run on a PIO
//! state machine at 24 MHz. All bus transactions are slave to the host
//! clock (`CLK`); the PIO program busy-waits on `CLK` edges, so this
//! driver only posts a transaction when the caller already knows a clock
//! edge is forthcoming (in direct response to an `IRQ` bit), per §4.A's
//! contract.

use rp2040_hal::pio::{PIOExt, Running, StateMachine, StateMachineIndex, Tx, UninitStateMachine};

/// Register addresses, 3-bit addressed (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum Reg {
    ToneDialer = 0,
    ModemControl = 1,
    ModemStatus = 2,
    RamdiskData = 3,
    RamdiskControl = 4,
    Baudrate = 5,
    MiscControl = 6,
    Irq = 7,
}

/// `IRQ` register bitfield (spec.md §3).
pub mod irq {
    pub const TONE_DIALER: u8 = 0x01;
    pub const MODEM_CONTROL: u8 = 0x02;
    pub const RAMDISK_COMMAND: u8 = 0x04;
    pub const RAMDISK_OBF: u8 = 0x08;
    pub const RAMDISK_IBF: u8 = 0x10;
    pub const BAUDRATE: u8 = 0x20;
    pub const MISC_CONTROL: u8 = 0x40;
}

/// Bit position of `ADDR` within the 32-bit command word (spec.md §4.A).
const ADDR_SHIFT: u32 = 11;
const STB_MASK: u32 = 0x3E000400;
const READ_MASK: u32 = 0x8000_0000;
const WRITE_MASK: u32 = 0x00FF_0200;

/// Assembles the PIO program described in spec.md §4.A: pull a 32-bit
/// command word, wait for a `CLK` rising edge, present data + pindirs,
/// wait for the falling edge, optionally sample 8 data bits back into the
/// RX FIFO, then tri-state everything on the next rising edge.
///
/// `CLK` is wired to relative pin 8 within the PIO pin bank (absolute
/// GP10, per `original_source/firmware/cpld.py`).
pub fn cpld_program() -> pio::Program<{ pio::RP2040_MAX_PROGRAM_SIZE }> {
    const CLK_PIN: u8 = 8;
    pio_proc::pio_asm!(
        ".side_set 0",
        "start:",
        "    pull block",
        "    wait 0 gpio 10",
        "    wait 1 gpio 10",
        "    out pins, 16",
        "    out pindirs, 15",
        "    wait 0 gpio 10",
        "    mov x, osr",
        "    jmp !x, finish",
        "    in pins, 8",
        "    push block",
        "finish:",
        "    wait 1 gpio 10",
        "    mov osr, null",
        "    out pins, 16",
        "    out pindirs, 16",
        "    jmp start",
    )
    .program
}

/// The register-level surface the modem and RAM-disk state machines
/// drive the bus through. Implemented by `CpldBus`; a fake stands in for
/// unit tests that exercise those state machines without real PIO
/// hardware.
pub trait Bus {
    fn write_reg(&mut self, addr: Reg, data: u8);
    fn read_reg(&mut self, addr: Reg) -> u8;
}

impl<P: PIOExt, SM: StateMachineIndex> Bus for CpldBus<P, SM> {
    fn write_reg(&mut self, addr: Reg, data: u8) {
        CpldBus::write_reg(self, addr, data)
    }

    fn read_reg(&mut self, addr: Reg) -> u8 {
        CpldBus::read_reg(self, addr)
    }
}

/// An in-memory `Bus` double: `read_reg` returns whatever was last
/// staged for that address, `write_reg` records the written byte.
/// Exercises the modem and RAM-disk state machines against literal
/// register sequences (spec.md §8) without a PIO state machine.
#[cfg(test)]
#[derive(Default)]
pub struct FakeBus {
    pub staged: [u8; 8],
    pub written: [heapless::Vec<u8, 32>; 8],
}

#[cfg(test)]
impl FakeBus {
    pub fn stage(&mut self, addr: Reg, data: u8) {
        self.staged[addr as usize] = data;
    }

    pub fn last_write(&self, addr: Reg) -> Option<u8> {
        self.written[addr as usize].last().copied()
    }
}

#[cfg(test)]
impl Bus for FakeBus {
    fn write_reg(&mut self, addr: Reg, data: u8) {
        let _ = self.written[addr as usize].push(data);
    }

    fn read_reg(&mut self, addr: Reg) -> u8 {
        self.staged[addr as usize]
    }
}

/// Owns the PIO state machine's FIFO handles. `write_reg`/`read_reg` are
/// the only two operations the rest of the firmware needs; the five
/// `read_irq_*` helpers from the original source are superseded by
/// reading the consolidated `IRQ` register through `read_reg`.
pub struct CpldBus<P: PIOExt, SM: StateMachineIndex> {
    tx: Tx<(P, SM)>,
    rx: rp2040_hal::pio::Rx<(P, SM)>,
    _sm: StateMachine<(P, SM), Running>,
}

impl<P: PIOExt, SM: StateMachineIndex> CpldBus<P, SM> {
    pub fn new(
        uninit_sm: UninitStateMachine<(P, SM)>,
        installed: rp2040_hal::pio::InstalledProgram<P>,
        pin_base: u8,
    ) -> Self {
        let (sm, rx, tx) = rp2040_hal::pio::PIOBuilder::from_installed_program(installed)
            .out_pins(pin_base, 8)
            .in_pin_base(pin_base)
            .clock_divisor_fixed_point(5, 0) // 125 MHz / 5 = 25 MHz, close enough to 24 MHz
            .autopull(false)
            .autopush(false)
            .build(uninit_sm);
        let sm = sm.start();
        Self { tx, rx, _sm: sm }
    }

    fn command_word(addr: Reg, extra: u32, data: u8) -> u32 {
        ((addr as u32) << ADDR_SHIFT) | STB_MASK | extra | data as u32
    }

    /// Posts a write and returns once the PIO machine has accepted the
    /// command word (FIFO push succeeds). No response is expected.
    pub fn write_reg(&mut self, addr: Reg, data: u8) {
        let word = Self::command_word(addr, WRITE_MASK, data);
        while !self.tx.write(word) {
            core::hint::spin_loop();
        }
    }

    /// Posts a read and blocks until a single response byte is popped
    /// from the return FIFO. Per §4.A this is unbounded: the caller must
    /// only invoke this in direct response to an `IRQ` bit, where the
    /// host protocol guarantees a clock edge is forthcoming.
    pub fn read_reg(&mut self, addr: Reg) -> u8 {
        let word = Self::command_word(addr, READ_MASK, 0);
        while !self.tx.write(word) {
            core::hint::spin_loop();
        }
        loop {
            if let Some(word) = self.rx.read() {
                return (word & 0xFF) as u8;
            }
            core::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_word_write_sets_write_mask_and_data() {
        let word = CpldBus::<rp2040_hal::pac::PIO0, rp2040_hal::pio::SM0>::command_word(
            Reg::RamdiskData,
            WRITE_MASK,
            0xAB,
        );
        assert_eq!(word & READ_MASK, 0);
        assert_eq!(word & 0xFF, 0xAB);
        assert_eq!((word >> ADDR_SHIFT) & 0x7, Reg::RamdiskData as u32);
    }

    #[test]
    fn command_word_read_sets_read_flag_and_zero_data() {
        let word = CpldBus::<rp2040_hal::pac::PIO0, rp2040_hal::pio::SM0>::command_word(
            Reg::Irq,
            READ_MASK,
            0,
        );
        assert_eq!(word & READ_MASK, READ_MASK);
        assert_eq!(word & 0xFF, 0);
    }
}
