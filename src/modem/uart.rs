//! Host-facing serial peripheral (spec.md §4.D, §6): the PX-8's own
//! UART line, reconfigured 8-N-1 to whatever rate the host negotiates
//! via `BAUDRATE` (`sync_baud`, spec.md §4.D). This is the modem's own
//! hardware, not an external collaborator — unlike WiFi/storage/CLI, it
//! gets a real `rp2040-hal` implementation alongside the trait.

use embedded_hal_nb::serial::{Read, Write};
use fugit::HertzU32;
use rp2040_hal::uart::{Enabled, UartDevice, UartPeripheral, ValidUartPinout};

pub trait UartIo {
    /// Non-blocking read of whatever host bytes are pending, up to
    /// `buf.len()`. Returns `None` when nothing is available, matching
    /// the original's "poll, don't block" treatment of host I/O.
    fn try_read(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Best-effort write; the modem only ever writes bytes it has
    /// already decided to forward (spec.md §4.D `CONNECTED` TICK).
    fn write_all(&mut self, bytes: &[u8]);

    /// True once every queued byte has left the transmit shift
    /// register (spec.md §4.D `DRAIN_UART`).
    fn transmit_complete(&self) -> bool;

    fn set_baud(&mut self, baud_hz: u32);
}

/// Host UART, reconfigured 8-N-1 at whatever rate `sync_baud` resolves.
/// Baud changes need the peripheral clock frequency, fixed at
/// construction since it does not change at runtime on this board.
pub struct HostUart<D: UartDevice, P: ValidUartPinout<D>> {
    uart: UartPeripheral<Enabled, D, P>,
    peripheral_clock_hz: HertzU32,
}

impl<D: UartDevice, P: ValidUartPinout<D>> HostUart<D, P> {
    pub fn new(uart: UartPeripheral<Enabled, D, P>, peripheral_clock_hz: HertzU32) -> Self {
        Self {
            uart,
            peripheral_clock_hz,
        }
    }
}

impl<D: UartDevice, P: ValidUartPinout<D>> UartIo for HostUart<D, P> {
    fn try_read(&mut self, buf: &mut [u8]) -> Option<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.uart.read() {
                Ok(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                Err(nb::Error::WouldBlock) | Err(nb::Error::Other(_)) => break,
            }
        }
        if n == 0 {
            None
        } else {
            Some(n)
        }
    }

    fn write_all(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let _ = nb::block!(self.uart.write(byte));
        }
    }

    fn transmit_complete(&self) -> bool {
        // UARTFR.BUSY stays set until the TX FIFO and the transmit shift
        // register have both drained; `uart_is_writable` only reports a
        // free FIFO slot and goes true long before the last queued byte
        // has actually left the wire.
        !self.uart.uart_is_busy()
    }

    fn set_baud(&mut self, baud_hz: u32) {
        let _ = self
            .uart
            .set_baudrate(HertzU32::from_raw(baud_hz), self.peripheral_clock_hz);
    }
}
