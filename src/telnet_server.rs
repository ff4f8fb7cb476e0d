//! Secondary telnet server (spec.md §1 Non-goals: external collaborator,
//! out of scope; gated behind the `extra_server` feature). Exposes the
//! host UART to external telnet clients, independent of the modem's own
//! call lifecycle. Mirrors `original_source/firmware/telnet.py`, reduced
//! to the option-negotiation boundary the modem already shares
//! (`modem::telnet`).

use crate::modem::telnet;
use crate::modem::uart::UartIo;

/// The main loop's view of whichever telnet server variant is compiled
/// in (spec.md §4.F calls `telnet_server.poll()` unconditionally).
pub trait SecondaryTelnetServer {
    fn poll(&mut self, uart: &mut impl UartIo);
}

/// A listening TCP socket that can accept at most one client at a time,
/// the minimal surface `TelnetServer::poll` needs. A real implementation
/// wraps an `smoltcp` listening socket; tests use a scriptable double.
pub trait ListenSocket {
    fn accept(&mut self) -> bool;
    fn try_recv(&mut self, buf: &mut [u8]) -> Option<usize>;
    fn try_send(&mut self, buf: &[u8]);
    fn disconnect(&mut self);
}

/// Pumps bytes between one external telnet client and the shared host
/// UART. Entirely independent of `Modem` — both may be draining the same
/// UART, which is a known oddity of the original design this crate
/// preserves rather than arbitrates (spec.md §1 "out of scope").
#[cfg(feature = "extra_server")]
pub struct TelnetServer<L: ListenSocket> {
    listener: L,
    connected: bool,
}

#[cfg(feature = "extra_server")]
impl<L: ListenSocket> TelnetServer<L> {
    pub fn new(listener: L) -> Self {
        Self {
            listener,
            connected: false,
        }
    }

    /// One step of the external telnet server's own poll loop.
    fn poll_impl(&mut self, uart: &mut impl UartIo) {
        if !self.connected {
            self.connected = self.listener.accept();
            if self.connected {
                self.listener.try_send(&telnet::CONNECT_NEGOTIATION);
            }
            return;
        }
        let mut buf = [0u8; 128];
        if let Some(n) = self.listener.try_recv(&mut buf) {
            if n == 0 {
                self.listener.disconnect();
                self.connected = false;
                return;
            }
            let (forwarded, replies): (heapless::Vec<u8, 128>, heapless::Vec<telnet::Reply, 8>) =
                telnet::process_options(&buf[..n]);
            uart.write_all(&forwarded);
            for reply in &replies {
                self.listener.try_send(reply);
            }
        }
        if let Some(n) = uart.try_read(&mut buf) {
            self.listener.try_send(&buf[..n]);
        }
    }
}

#[cfg(feature = "extra_server")]
impl<L: ListenSocket> SecondaryTelnetServer for TelnetServer<L> {
    fn poll(&mut self, uart: &mut impl UartIo) {
        self.poll_impl(uart)
    }
}

/// No-op stand-in used when `extra_server` is disabled, so the main loop
/// can call `poll` unconditionally without a second feature-gated path.
#[cfg(not(feature = "extra_server"))]
pub struct TelnetServer;

#[cfg(not(feature = "extra_server"))]
impl TelnetServer {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(feature = "extra_server"))]
impl Default for TelnetServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(feature = "extra_server"))]
impl SecondaryTelnetServer for TelnetServer {
    fn poll(&mut self, _uart: &mut impl UartIo) {}
}
