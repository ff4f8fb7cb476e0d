//! Non-blocking TCP boundary the modem drives for outbound calls
//! (spec.md §4.D "Call attempt", §5). A real implementation wraps an
//! `smoltcp` TCP socket handle from a pre-allocated `SocketSet` owned by
//! the main loop; this crate only needs the narrow surface below, and
//! owns one instance exclusively for the lifetime of a call
//! (spec.md §3 "Lifecycles").

use smoltcp::wire::IpAddress;

use crate::error::NetError;

pub trait CallSocket: Default {
    /// Begins a non-blocking connect. `Ok(())` means the attempt is
    /// underway (most real non-blocking stacks never fail
    /// synchronously); `Err(NetError::Refused)` means the peer rejected
    /// the connection immediately and the caller should play the BUSY
    /// tone without waiting for `RINGING`/`ECHO_CANCEL`/`HANDSHAKE` to
    /// elapse. Any other error is treated the same as "no network".
    fn connect(&mut self, addr: IpAddress, port: u16) -> Result<(), NetError>;

    /// Non-blocking receive of up to `buf.len()` bytes. `Ok(0)` means
    /// the peer closed the connection (spec.md §4.D, `CONNECTED` TICK:
    /// "on 0-byte read ... DRAIN_UART"); `Err(NetError::WouldBlock)`
    /// means no data is available yet and is not an error condition.
    fn try_recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError>;

    /// Best-effort non-blocking send. The modem tolerates write
    /// failures on telnet negotiation bytes silently (spec.md §4.D) but
    /// treats them as fatal for host-originated UART data
    /// (spec.md §4.D `CONNECTED` UART_RX).
    fn try_send(&mut self, buf: &[u8]) -> Result<usize, NetError>;
}

/// Bring-up placeholder: the real call socket is backed by an `smoltcp`
/// TCP socket against the interface the external WiFi driver wrapper
/// brings up (spec.md §1 Non-goals lists the WiFi driver as an external
/// collaborator, interface only). Until that driver is wired in,
/// `Modem::attempt_call` never reaches `connect()` anyway: `WifiLink`
/// reports disconnected first and the call fails with `NO_NETWORK`
/// before a socket is even constructed.
#[derive(Default)]
pub struct NullCallSocket;

impl CallSocket for NullCallSocket {
    fn connect(&mut self, _addr: IpAddress, _port: u16) -> Result<(), NetError> {
        Err(NetError::NoWifi)
    }

    fn try_recv(&mut self, _buf: &mut [u8]) -> Result<usize, NetError> {
        Err(NetError::Closed)
    }

    fn try_send(&mut self, _buf: &[u8]) -> Result<usize, NetError> {
        Err(NetError::Closed)
    }
}
