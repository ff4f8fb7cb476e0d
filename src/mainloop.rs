//! Component F: the main cooperative loop (spec.md §4.F).
//!
//! Single-threaded, no interrupts handled in-band (spec.md §5). Reads
//! the consolidated `IRQ` register once per iteration and dispatches in
//! the fixed priority order spec.md §5 calls out: tone-dialer,
//! modem-control, baudrate, misc-control, ramdisk-command,
//! ramdisk-data, then modem `poll()` (UART/tick) and the secondary
//! telnet server.

use crate::bus::{irq, Bus, Reg};
use crate::config::ConfigStore;
use crate::modem::socket::CallSocket;
use crate::modem::uart::UartIo;
use crate::modem::{CommandProcessor, Modem};
use crate::ramdisk::{FailsafeSwitch, RamDisk};
use crate::storage::Storage;
use crate::telnet_server::SecondaryTelnetServer;
use crate::tone::ToneOutput;
use crate::wifi::WifiLink;

/// Main-loop iterations between RAM-disk flush checks (spec.md §4.E,
/// §9 "couples RAM-disk flushing to main-loop throughput").
const RAMDISK_FLUSH_INTERVAL: u32 = 1_000;

/// `MISC_CONTROL` bit 5: modem-enable, active-low (spec.md §3).
const MODEM_ENABLE_BIT: u8 = 0x20;

/// Delay, in main-loop ticks' worth of milliseconds, between a
/// modem-disable edge and the forced reset it schedules (spec.md §4.F,
/// §5 "Cancellation & timeouts").
const MODEM_DISABLE_DELAY_MS: u32 = 1_000;

pub struct MainLoop<B, T1, T2, U, S, Cmd, St, W, Cfg, F, Tn>
where
    B: Bus,
    T1: ToneOutput,
    T2: ToneOutput,
    U: UartIo,
    S: CallSocket,
    Cmd: CommandProcessor,
    St: Storage,
    W: WifiLink,
    Cfg: ConfigStore,
    F: FailsafeSwitch,
    Tn: SecondaryTelnetServer,
{
    bus: B,
    modem: Modem<T1, T2, U, S, Cmd>,
    ramdisk: RamDisk<St>,
    wifi: W,
    config: Cfg,
    failsafe: F,
    telnet_server: Tn,
    modem_enabled: bool,
    disable_delay_ms: u32,
    ramdisk_iter: u32,
}

impl<B, T1, T2, U, S, Cmd, St, W, Cfg, F, Tn> MainLoop<B, T1, T2, U, S, Cmd, St, W, Cfg, F, Tn>
where
    B: Bus,
    T1: ToneOutput,
    T2: ToneOutput,
    U: UartIo,
    S: CallSocket,
    Cmd: CommandProcessor,
    St: Storage,
    W: WifiLink,
    Cfg: ConfigStore,
    F: FailsafeSwitch,
    Tn: SecondaryTelnetServer,
{
    pub fn new(
        bus: B,
        modem: Modem<T1, T2, U, S, Cmd>,
        ramdisk: RamDisk<St>,
        wifi: W,
        config: Cfg,
        failsafe: F,
        telnet_server: Tn,
    ) -> Self {
        Self {
            bus,
            modem,
            ramdisk,
            wifi,
            config,
            failsafe,
            telnet_server,
            modem_enabled: true,
            disable_delay_ms: 0,
            ramdisk_iter: 0,
        }
    }

    /// One iteration of the loop in spec.md §4.F's pseudocode, given the
    /// current monotonic millisecond clock.
    pub fn tick(&mut self, now_ms: u64) {
        let irq_bits = self.bus.read_reg(Reg::Irq);

        if self.modem_enabled {
            if irq_bits & irq::TONE_DIALER != 0 {
                self.modem.handle_tone_dialer(&mut self.bus);
            }
            if irq_bits & irq::MODEM_CONTROL != 0 {
                self.modem.handle_control(&mut self.bus);
            }
            if irq_bits & irq::BAUDRATE != 0 {
                self.modem.handle_baudrate(&mut self.bus);
            }
        }

        if irq_bits & irq::MISC_CONTROL != 0 {
            let misc = self.bus.read_reg(Reg::MiscControl);
            let new_enabled = misc & MODEM_ENABLE_BIT == 0;
            if new_enabled != self.modem_enabled {
                self.modem_enabled = new_enabled;
                self.disable_delay_ms = if new_enabled { 0 } else { MODEM_DISABLE_DELAY_MS };
            }
        }

        if !self.modem_enabled && self.disable_delay_ms > 0 {
            self.disable_delay_ms = self.disable_delay_ms.saturating_sub(1);
            if self.disable_delay_ms == 0 {
                self.modem.handle_control(&mut ForceResetBus(&mut self.bus));
            }
        }

        if irq_bits & irq::RAMDISK_COMMAND != 0 {
            self.ramdisk.handle_command(
                &mut self.bus,
                &mut self.failsafe,
                self.config.ramdisk_image_name(),
            );
        }
        if irq_bits & irq::RAMDISK_OBF != 0 {
            self.ramdisk.handle_data(&mut self.bus);
        }

        self.ramdisk_iter += 1;
        if self.ramdisk_iter == RAMDISK_FLUSH_INTERVAL {
            self.ramdisk_iter = 0;
            self.ramdisk.maybe_flush_pending_writes(now_ms);
        }

        self.modem.poll(&mut self.bus, &self.wifi, &self.config, now_ms);
        self.telnet_server.poll(self.modem.uart_mut());
    }
}

/// A `Bus` that always answers `MODEM_CONTROL` reads with 0, used to
/// drive the modem's own `handle_control` zero-byte reset path from the
/// disable-delay timeout without staging state on the real bus (spec.md
/// §4.D "if the byte is 0, issue a full reset").
struct ForceResetBus<'a, B: Bus>(&'a mut B);

impl<B: Bus> Bus for ForceResetBus<'_, B> {
    fn write_reg(&mut self, addr: Reg, data: u8) {
        self.0.write_reg(addr, data);
    }

    fn read_reg(&mut self, addr: Reg) -> u8 {
        match addr {
            Reg::ModemControl => 0,
            other => self.0.read_reg(other),
        }
    }
}
