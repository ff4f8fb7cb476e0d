//! Component E: the RAM-disk command/data state machine (spec.md §4.E).
//!
//! A byte-oriented request/response protocol: `handle_command()` reads a
//! command byte and the number of trailing payload bytes it expects;
//! `handle_data()` is called once per payload byte the host delivers and
//! executes the command once the payload is complete.

pub mod image;

use heapless::Vec;

use crate::bus::{irq, Bus, Reg};
use crate::error::StorageError;
use crate::storage::Storage;

/// RAM-disk command codes (spec.md §3).
pub mod code {
    pub const RESET: u8 = 0;
    pub const READ: u8 = 1;
    pub const READB: u8 = 2;
    pub const WRITE: u8 = 3;
    pub const WRITEB: u8 = 4;
    pub const CKSUM: u8 = 5;
}

/// Status byte for a write attempted while write-protected (spec.md
/// §4.E, §8 invariant 5).
const STATUS_WRITE_PROTECTED: u8 = 0x04;

/// Flush-check cadence: a pending-writes flag older than this is
/// considered flushed (spec.md §4.E "Flush policy"). Driven by the main
/// loop every 1,000 iterations rather than a timer (spec.md §9 notes
/// this couples flush cadence to loop throughput).
const FLUSH_WINDOW_MS: u64 = 15_000;

/// Forced image path when the failsafe switch is asserted (spec.md
/// §4.E "Failsafe switch").
const FAILSAFE_IMAGE_PATH: &str = "failsafe.dsk";

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
enum Command {
    Read,
    Readb,
    Write,
    Writeb,
}

/// The dedicated, pulled-up failsafe input pin (spec.md §4.E). Sampled
/// on every reopen; when asserted (pulled low) the image path is forced
/// and the disk goes read-only. `&mut self` matches `embedded-hal`'s
/// `InputPin`, which samples through a mutable borrow.
pub trait FailsafeSwitch {
    fn is_forced_read_only(&mut self) -> bool;
}

/// Fixed-state test double for `FailsafeSwitch`.
pub struct StaticFailsafeSwitch(pub bool);

impl FailsafeSwitch for StaticFailsafeSwitch {
    fn is_forced_read_only(&mut self) -> bool {
        self.0
    }
}

/// The board's own failsafe pin, not an external collaborator, so it gets
/// a concrete `embedded-hal` implementation alongside the trait (matching
/// `bus.rs`/`tone.rs`'s real-peripheral-next-to-trait pattern). Active
/// low: a read error is treated the same as "not asserted" rather than
/// panicking, since a stuck pin read must not stop the RAM-disk from
/// reopening.
pub struct GpioFailsafeSwitch<P> {
    pin: P,
}

impl<P> GpioFailsafeSwitch<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P: embedded_hal::digital::InputPin> FailsafeSwitch for GpioFailsafeSwitch<P> {
    fn is_forced_read_only(&mut self) -> bool {
        self.pin.is_low().unwrap_or(false)
    }
}

/// The RAM-disk state machine. Owns the backing `Storage` exclusively;
/// the CPLD bus, like the modem, is shared and passed in per call.
pub struct RamDisk<St: Storage> {
    storage: St,
    active: Option<Command>,
    remaining: usize,
    recv_buf: Vec<u8, 131>,
    pending_writes: bool,
    last_flush_ms: u64,
    read_only: bool,
    /// `CKSUM` always answers with this. Spec.md §9: "a real checksum
    /// implementation is absent in the source" — this crate matches
    /// that rather than inventing one.
    cached_checksum: u8,
}

impl<St: Storage> RamDisk<St> {
    pub fn new(storage: St) -> Self {
        Self {
            storage,
            active: None,
            remaining: 0,
            recv_buf: Vec::new(),
            pending_writes: false,
            last_flush_ms: 0,
            read_only: false,
            cached_checksum: 0,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn has_pending_writes(&self) -> bool {
        self.pending_writes
    }

    /// `handle_command()` (spec.md §4.E "Command phase"), invoked on
    /// `IRQ_RAMDISK_COMMAND`.
    pub fn handle_command(
        &mut self,
        bus: &mut impl Bus,
        failsafe: &mut impl FailsafeSwitch,
        image_path: &str,
    ) {
        let command_byte = bus.read_reg(Reg::RamdiskControl);
        self.recv_buf.clear();
        self.active = None;
        self.remaining = 0;
        match command_byte {
            code::RESET => {
                self.reopen(failsafe, image_path);
                let mut status = 1u8;
                if self.read_only {
                    status |= 2;
                }
                bus.write_reg(Reg::RamdiskData, status);
            }
            code::READ => {
                self.active = Some(Command::Read);
                self.remaining = 2;
            }
            code::READB => {
                self.active = Some(Command::Readb);
                self.remaining = 3;
            }
            code::WRITE => {
                self.active = Some(Command::Write);
                self.remaining = 130;
            }
            code::WRITEB => {
                self.active = Some(Command::Writeb);
                self.remaining = 4;
            }
            code::CKSUM => {
                let _ = self.storage.remount(image_path);
                bus.write_reg(Reg::RamdiskData, self.cached_checksum);
            }
            other => {
                defmt::debug!("ramdisk: unknown command {=u8:#04x}, ignoring", other);
            }
        }
    }

    /// `handle_data()` (spec.md §4.E "Data phase"), invoked once per byte
    /// on `IRQ_RAMDISK_OBF`.
    pub fn handle_data(&mut self, bus: &mut impl Bus) {
        let Some(command) = self.active else {
            return;
        };
        let byte = bus.read_reg(Reg::RamdiskData);
        let _ = self.recv_buf.push(byte);
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.execute(bus, command);
            self.active = None;
        }
    }

    fn execute(&mut self, bus: &mut impl Bus, command: Command) {
        match command {
            Command::Read => self.execute_read(bus),
            Command::Readb => self.execute_readb(bus),
            Command::Write => self.execute_write(bus),
            Command::Writeb => self.execute_writeb(bus),
        }
    }

    /// `READ`: seek to `sector_offset`, read 128 bytes, write a status
    /// byte followed by all 128 data bytes regardless of error so the
    /// host always sees 129 bytes (spec.md §8 invariant 4).
    fn execute_read(&mut self, bus: &mut impl Bus) {
        let offset = image::sector_offset(self.recv_buf[0], self.recv_buf[1]);
        let mut data = [0u8; image::SECTOR_SIZE];
        let status = self.read_status(offset, &mut data);
        bus.write_reg(Reg::RamdiskData, status);
        for &byte in &data {
            self.wait_for_ibf_clear(bus);
            bus.write_reg(Reg::RamdiskData, byte);
        }
    }

    fn execute_readb(&mut self, bus: &mut impl Bus) {
        let offset = image::byte_offset(self.recv_buf[0], self.recv_buf[1], self.recv_buf[2]);
        let mut data = [0u8; 1];
        let status = self.read_status(offset, &mut data);
        bus.write_reg(Reg::RamdiskData, status);
        self.wait_for_ibf_clear(bus);
        bus.write_reg(Reg::RamdiskData, data[0]);
    }

    fn read_status(&self, offset: usize, buf: &mut [u8]) -> u8 {
        match self.storage.read_at(offset, buf) {
            Ok(()) => 0,
            Err(_) => 255,
        }
    }

    fn wait_for_ibf_clear(&self, bus: &mut impl Bus) {
        while bus.read_reg(Reg::Irq) & irq::RAMDISK_IBF != 0 {
            core::hint::spin_loop();
        }
    }

    /// `WRITE`/`WRITEB` (spec.md §4.E, §8 invariant 5): write-protected
    /// disks refuse with status `0x04` and mutate nothing.
    fn execute_write(&mut self, bus: &mut impl Bus) {
        if self.read_only {
            bus.write_reg(Reg::RamdiskData, STATUS_WRITE_PROTECTED);
            return;
        }
        let offset = image::sector_offset(self.recv_buf[0], self.recv_buf[1]);
        let result: Result<(), StorageError> =
            self.storage.write_at(offset, &self.recv_buf[2..130]);
        if result.is_ok() {
            self.pending_writes = true;
        }
        bus.write_reg(Reg::RamdiskData, 0);
    }

    fn execute_writeb(&mut self, bus: &mut impl Bus) {
        if self.read_only {
            bus.write_reg(Reg::RamdiskData, STATUS_WRITE_PROTECTED);
            return;
        }
        let offset = image::byte_offset(self.recv_buf[0], self.recv_buf[1], self.recv_buf[2]);
        let result: Result<(), StorageError> =
            self.storage.write_at(offset, &self.recv_buf[3..4]);
        if result.is_ok() {
            self.pending_writes = true;
        }
        bus.write_reg(Reg::RamdiskData, 0);
    }

    fn reopen(&mut self, failsafe: &mut impl FailsafeSwitch, image_path: &str) {
        self.read_only = failsafe.is_forced_read_only();
        let path = if self.read_only {
            FAILSAFE_IMAGE_PATH
        } else {
            image_path
        };
        if self.storage.remount(path).is_err() {
            defmt::warn!("ramdisk: remount failed, keeping previously opened image");
        }
    }

    /// `maybe_flush_pending_writes()` (spec.md §4.E "Flush policy"),
    /// called by the main loop every 1,000 iterations.
    pub fn maybe_flush_pending_writes(&mut self, now_ms: u64) {
        if !self.pending_writes {
            return;
        }
        if now_ms < self.last_flush_ms || now_ms > self.last_flush_ms + FLUSH_WINDOW_MS {
            self.pending_writes = false;
            self.last_flush_ms = now_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::FakeBus;
    use crate::storage::MemoryStorage;

    fn new_disk() -> RamDisk<MemoryStorage<{ image::IMAGE_SIZE_BYTES }>> {
        RamDisk::new(MemoryStorage::new())
    }

    fn send_command(
        disk: &mut RamDisk<MemoryStorage<{ image::IMAGE_SIZE_BYTES }>>,
        bus: &mut FakeBus,
        failsafe: &mut impl FailsafeSwitch,
        command: u8,
        payload: &[u8],
    ) {
        bus.stage(Reg::RamdiskControl, command);
        disk.handle_command(bus, failsafe, "disk.img");
        for &byte in payload {
            bus.stage(Reg::RamdiskData, byte);
            disk.handle_data(bus);
        }
    }

    /// Scenario 4 / invariant 3 (spec.md §8): `RESET` writes exactly one
    /// status byte to `RAMDISK_DATA`, value 1 (no failsafe asserted).
    #[test]
    fn reset_writes_status_one_when_not_failsafe() {
        let mut disk = new_disk();
        let mut bus = FakeBus::default();
        send_command(&mut disk, &mut bus, &mut StaticFailsafeSwitch(false), code::RESET, &[]);
        assert_eq!(bus.written[Reg::RamdiskData as usize].len(), 1);
        assert_eq!(bus.last_write(Reg::RamdiskData), Some(1));
    }

    #[test]
    fn reset_writes_status_three_under_failsafe() {
        let mut disk = new_disk();
        let mut bus = FakeBus::default();
        send_command(&mut disk, &mut bus, &mut StaticFailsafeSwitch(true), code::RESET, &[]);
        assert_eq!(bus.last_write(Reg::RamdiskData), Some(3));
        assert!(disk.is_read_only());
    }

    /// Invariant 4 (spec.md §8): READ always writes 129 bytes total.
    #[test]
    fn read_writes_status_plus_128_data_bytes() {
        let mut disk = new_disk();
        let mut bus = FakeBus::default();
        send_command(&mut disk, &mut bus, &mut StaticFailsafeSwitch(false), code::READ, &[0, 0]);
        assert_eq!(bus.written[Reg::RamdiskData as usize].len(), 129);
        assert_eq!(bus.written[Reg::RamdiskData as usize][0], 0);
    }

    /// Scenario 5 (spec.md §8): a WRITEB payload sets the target byte
    /// and reports status 0.
    #[test]
    fn writeb_sets_target_byte_and_reports_success() {
        let mut disk = new_disk();
        let mut bus = FakeBus::default();
        send_command(
            &mut disk,
            &mut bus,
            &mut StaticFailsafeSwitch(false),
            code::WRITEB,
            &[0x01, 0x00, 0x00, 0xAB],
        );
        assert_eq!(bus.last_write(Reg::RamdiskData), Some(0));
        let mut readback = [0u8; 1];
        disk.storage.read_at(0, &mut readback).unwrap();
        assert_eq!(readback[0], 0xAB);
        assert!(disk.has_pending_writes());
    }

    /// Invariant 5 (spec.md §8): a write-protected disk refuses WRITE
    /// and WRITEB without mutating the image.
    #[test]
    fn write_protected_disk_refuses_without_mutation() {
        let mut disk = new_disk();
        let mut bus = FakeBus::default();
        send_command(&mut disk, &mut bus, &mut StaticFailsafeSwitch(true), code::RESET, &[]);
        assert!(disk.is_read_only());

        bus.written[Reg::RamdiskData as usize].clear();
        let mut payload = [0u8; 130];
        payload[0] = 1;
        payload[2] = 0xFF; // first data byte, would land at sector_offset(1,0) if applied
        send_command(&mut disk, &mut bus, &mut StaticFailsafeSwitch(true), code::WRITE, &payload);
        assert_eq!(bus.last_write(Reg::RamdiskData), Some(0x04));

        let mut readback = [0u8; 128];
        disk.storage
            .read_at(image::sector_offset(1, 0), &mut readback)
            .unwrap();
        assert!(readback.iter().all(|&b| b == 0));
    }

    #[test]
    fn cksum_always_answers_zero() {
        let mut disk = new_disk();
        let mut bus = FakeBus::default();
        send_command(&mut disk, &mut bus, &mut StaticFailsafeSwitch(false), code::CKSUM, &[]);
        assert_eq!(bus.last_write(Reg::RamdiskData), Some(0));
    }

    #[test]
    fn flush_clears_pending_writes_after_window_elapses() {
        let mut disk = new_disk();
        let mut bus = FakeBus::default();
        let mut payload = [0u8; 130];
        payload[0] = 1;
        send_command(&mut disk, &mut bus, &mut StaticFailsafeSwitch(false), code::WRITE, &payload);
        assert!(disk.has_pending_writes());

        disk.maybe_flush_pending_writes(1_000);
        assert!(disk.has_pending_writes(), "flush window hasn't elapsed yet");

        disk.maybe_flush_pending_writes(1_000 + FLUSH_WINDOW_MS + 1);
        assert!(!disk.has_pending_writes());
    }
}
