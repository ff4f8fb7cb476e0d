//! Telnet option negotiation (spec.md §4.D, §6, §8 invariant 6).
//!
//! Only options that fit entirely within one received chunk are
//! processed; a lone trailing `IAC` or `IAC CMD` passes through
//! unchanged. Shared between the modem (data-mode negotiation) and the
//! optional secondary telnet server (`telnet_server.rs`).

use heapless::Vec;

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;

pub const ECHO: u8 = 1;
pub const SGA: u8 = 3;

/// One `IAC CMD OPT` reply the caller should write back to the peer.
pub type Reply = [u8; 3];

/// Strips every `IAC CMD OPT` triple from `data`, returning the
/// remaining bytes (capacity-bounded: callers pass chunks no larger than
/// `N`) and the replies to send back, in order.
///
/// This is a pure function: the caller owns the socket write.
pub fn process_options<const N: usize, const R: usize>(
    data: &[u8],
) -> (Vec<u8, N>, Vec<Reply, R>) {
    let mut forwarded = Vec::new();
    let mut replies = Vec::new();
    let mut i = 0;
    while i < data.len() {
        if data[i] == IAC && data.len() - i >= 3 {
            let cmd = data[i + 1];
            let opt = data[i + 2];
            let reply = match cmd {
                DO => Some([IAC, if opt == SGA { WILL } else { WONT }, opt]),
                DONT => Some([IAC, WONT, opt]),
                WILL => Some([
                    IAC,
                    if opt == SGA || opt == ECHO { DO } else { DONT },
                    opt,
                ]),
                WONT => Some([IAC, DONT, opt]),
                _ => None,
            };
            if let Some(reply) = reply {
                let _ = replies.push(reply);
            }
            i += 3;
        } else {
            let _ = forwarded.push(data[i]);
            i += 1;
        }
    }
    (forwarded, replies)
}

/// The proactive negotiation the modem sends on entering `CONNECTED`
/// (spec.md §4.D, §6): `IAC DO SGA, IAC DO ECHO`.
pub const CONNECT_NEGOTIATION: [u8; 6] = [IAC, DO, SGA, IAC, DO, ECHO];
