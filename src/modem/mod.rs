//! Component D: the modem call-lifecycle state machine (spec.md §4.D).
//!
//! Eleven explicit states driven by five kinds of input: control-register
//! edges, DTMF digits, the 10 ms tick, host UART bytes, and the outcome of
//! a call attempt. Every transition below is taken directly from spec.md
//! §4.D's table; anything not listed there is deliberately a no-op (see
//! DESIGN.md's notes on the `HANDSHAKE`/`TXC` open question).

pub mod baud;
pub mod dtmf;
pub mod socket;
pub mod telnet;
pub mod uart;

use heapless::String;

use crate::bus::{Bus, Reg};
use crate::call_progress::{self, CallProgressTone, ToneAction, TonePlayer};
use crate::config::ConfigStore;
use crate::error::NetError;
use crate::tone::ToneOutput;
use crate::wifi::WifiLink;

use socket::CallSocket;
use uart::UartIo;

/// `MODEM_CONTROL` register bitfield (spec.md §3).
pub mod control {
    pub const OHC: u8 = 0x01;
    pub const HSC: u8 = 0x02;
    pub const MON: u8 = 0x04;
    pub const TXC: u8 = 0x08;
    pub const ANS: u8 = 0x10;
    pub const TEST: u8 = 0x20;
    pub const PWR: u8 = 0x40;
    pub const CCT: u8 = 0x80;
}

/// `MODEM_STATUS` register bitfield — both active-low (spec.md §3).
mod status {
    pub const RNG: u8 = 0x01;
    pub const CD: u8 = 0x04;
}

/// The order edges are checked in `handle_control`, fixed by spec.md
/// §4.D so that edge detection is deterministic when more than one bit
/// changes in the same register read.
const CONTROL_EDGE_BITS: [u8; 5] = [
    control::OHC,
    control::MON,
    control::TXC,
    control::PWR,
    control::CCT,
];

/// The eleven-state modem lifecycle (spec.md §3, §8 invariant 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum State {
    Idle,
    OffHook,
    Dialing,
    Ringing,
    EchoCancel,
    Handshake,
    Connected,
    EnterCommandMode,
    CommandMode,
    CallFailed,
    DrainUart,
}

/// Created on entering `COMMAND_MODE`, dropped on leaving it
/// (spec.md §3 "Lifecycles"). Implemented by `cli::LineCommandProcessor`;
/// see `cli.rs` for the abbreviation-dispatch registry.
pub trait CommandProcessor: Default {
    /// Feed one byte of host input. Returns true once a complete command
    /// has signaled the session should end (spec.md §6 "Return from
    /// `userinput` indicates 'done'").
    fn feed(&mut self, byte: u8) -> bool;

    /// Bytes queued for the host since the last call.
    fn drain_output(&mut self) -> heapless::Vec<u8, 256>;
}

/// Outcome of attempting to place a call (spec.md §4.D "Call attempt").
enum CallOutcome {
    Started,
    NoNetwork,
    InvalidNumber,
    Refused,
}

/// The currently-playing call-progress tone, erased over its concrete
/// pair count so `Modem` can hold one regardless of which tone is active
/// (spec.md §3 lists four distinct lengths: 1, 2, 4, 24).
enum ActiveTonePlayer {
    N1(TonePlayer<1>),
    N2(TonePlayer<2>),
    N4(TonePlayer<4>),
    N24(TonePlayer<24>),
}

impl ActiveTonePlayer {
    fn tick(&mut self) -> ToneAction {
        match self {
            Self::N1(p) => p.tick(),
            Self::N2(p) => p.tick(),
            Self::N4(p) => p.tick(),
            Self::N24(p) => p.tick(),
        }
    }

    fn is_done(&self) -> bool {
        match self {
            Self::N1(p) => p.is_done(),
            Self::N2(p) => p.is_done(),
            Self::N4(p) => p.is_done(),
            Self::N24(p) => p.is_done(),
        }
    }
}

/// Converts a `CallProgressTone<N>` into the generic `ActiveTonePlayer`
/// it belongs in. One impl per length in spec.md §3 — a plain `match` on
/// `N` isn't available since the enum's variants each name a concrete
/// `TonePlayer<N>` type.
trait IntoActiveTonePlayer {
    fn start(self) -> (ActiveTonePlayer, u32);
}

impl IntoActiveTonePlayer for CallProgressTone<1> {
    fn start(self) -> (ActiveTonePlayer, u32) {
        let (player, freq) = TonePlayer::new(self);
        (ActiveTonePlayer::N1(player), freq)
    }
}

impl IntoActiveTonePlayer for CallProgressTone<2> {
    fn start(self) -> (ActiveTonePlayer, u32) {
        let (player, freq) = TonePlayer::new(self);
        (ActiveTonePlayer::N2(player), freq)
    }
}

impl IntoActiveTonePlayer for CallProgressTone<4> {
    fn start(self) -> (ActiveTonePlayer, u32) {
        let (player, freq) = TonePlayer::new(self);
        (ActiveTonePlayer::N4(player), freq)
    }
}

impl IntoActiveTonePlayer for CallProgressTone<24> {
    fn start(self) -> (ActiveTonePlayer, u32) {
        let (player, freq) = TonePlayer::new(self);
        (ActiveTonePlayer::N24(player), freq)
    }
}

/// Longest dial string this board accepts before a phonebook lookup
/// would fail anyway; generous relative to the `***` escape sequence.
const MAX_DIAL_DIGITS: usize = 32;

/// The modem call-lifecycle state machine. Generic over the tone
/// outputs, the host UART, the call socket, and the command processor it
/// drives — all owned exclusively, matching spec.md §5's "no locks,
/// owned by the main loop" model. The bus, WiFi link, and config store
/// are shared with other components, so they're passed in per call
/// rather than stored here.
pub struct Modem<T1, T2, U, S, C>
where
    T1: ToneOutput,
    T2: ToneOutput,
    U: UartIo,
    S: CallSocket,
    C: CommandProcessor,
{
    tone1: T1,
    tone2: T2,
    uart: U,
    state: State,
    control_shadow: u8,
    answer_mode: bool,
    dial_buffer: String<MAX_DIAL_DIGITS>,
    latched_digit: Option<char>,
    tick_count: u32,
    status_byte: u8,
    baud: u32,
    active_tone: Option<ActiveTonePlayer>,
    socket: Option<S>,
    command_processor: Option<C>,
    last_tick_ms: u64,
}

impl<T1, T2, U, S, C> Modem<T1, T2, U, S, C>
where
    T1: ToneOutput,
    T2: ToneOutput,
    U: UartIo,
    S: CallSocket,
    C: CommandProcessor,
{
    pub fn new(tone1: T1, tone2: T2, uart: U) -> Self {
        Self {
            tone1,
            tone2,
            uart,
            state: State::Idle,
            control_shadow: 0,
            answer_mode: false,
            dial_buffer: String::new(),
            latched_digit: None,
            tick_count: 0,
            status_byte: status::RNG | status::CD,
            baud: 0,
            active_tone: None,
            socket: None,
            command_processor: None,
            last_tick_ms: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Shared access to the host UART for the optional secondary telnet
    /// server (spec.md §1, §4.F) — both poll the same peripheral, which
    /// is a known oddity of the design this crate preserves rather than
    /// arbitrates.
    pub fn uart_mut(&mut self) -> &mut U {
        &mut self.uart
    }

    /// `handle_control()` (spec.md §4.D). A zero byte is a full reset;
    /// otherwise each of `OHC, MON, TXC, PWR, CCT` is checked in that
    /// fixed order and, on a changed bit, dispatched as an edge event.
    pub fn handle_control(&mut self, bus: &mut impl Bus) {
        let byte = bus.read_reg(Reg::ModemControl);
        if byte == 0 {
            self.full_reset(bus);
            return;
        }
        self.answer_mode = byte & control::ANS != 0;
        for &bit in &CONTROL_EDGE_BITS {
            if (byte ^ self.control_shadow) & bit != 0 {
                self.on_control_edge(bus, bit, byte & bit != 0);
            }
        }
        self.control_shadow = byte;
    }

    fn on_control_edge(&mut self, _bus: &mut impl Bus, bit: u8, value: bool) {
        match (self.state, bit, value) {
            (State::Idle, control::OHC, true) => {
                self.dial_buffer.clear();
                self.tone1.set_freq(425);
                self.state = State::OffHook;
            }
            _ => {
                defmt::trace!(
                    "modem: ignored control edge bit {=u8:#04x} -> {} in state {}",
                    bit,
                    value,
                    self.state
                );
            }
        }
    }

    /// `handle_tone_dialer()` (spec.md §4.D). Bit 4 set means the dialer
    /// presents a key: both tone generators are driven at the mapped
    /// frequencies and the decoded digit is latched. Bit 4 clear silences
    /// both generators and, if a digit was latched, emits it as `DTMF`.
    pub fn handle_tone_dialer(&mut self, bus: &mut impl Bus) {
        let byte = bus.read_reg(Reg::ToneDialer);
        if dtmf::is_key_active(byte) {
            self.tone1.set_freq(dtmf::LOW_FREQUENCIES_HZ[dtmf::low_index(byte)]);
            self.tone2
                .set_freq(dtmf::HIGH_FREQUENCIES_HZ[dtmf::high_index(byte)]);
            if let Some(digit) = dtmf::decode_digit(byte) {
                self.latched_digit = Some(digit);
            }
        } else {
            self.tone1.set_freq(0);
            self.tone2.set_freq(0);
            if let Some(digit) = self.latched_digit.take() {
                self.on_dtmf(bus, digit);
            }
        }
    }

    fn on_dtmf(&mut self, bus: &mut impl Bus, digit: char) {
        match self.state {
            State::OffHook => {
                let _ = self.dial_buffer.push(digit);
                self.tick_count = 0;
                self.state = State::Dialing;
            }
            State::Dialing => {
                let _ = self.dial_buffer.push(digit);
                self.tick_count = 0;
                if self.dial_buffer.as_str() == "***" {
                    self.carrier_detected(bus, true);
                    self.start_tone1(call_progress::COMMAND_MODE);
                    self.state = State::EnterCommandMode;
                }
            }
            _ => defmt::trace!("modem: ignored DTMF {} in state {}", digit, self.state),
        }
    }

    /// `poll()` (spec.md §4.D, §4.F). Issues at most one `TICK` per call
    /// regardless of how much wall-clock time has passed (ticks are
    /// never coalesced), then pumps any pending host UART bytes.
    pub fn poll(
        &mut self,
        bus: &mut impl Bus,
        wifi: &impl WifiLink,
        config: &impl ConfigStore,
        now_ms: u64,
    ) {
        if now_ms.wrapping_sub(self.last_tick_ms) >= call_progress::TICK_MS as u64 {
            self.last_tick_ms = now_ms;
            self.on_tick(bus, wifi, config);
        }
        self.pump_uart(bus);
    }

    fn pump_uart(&mut self, bus: &mut impl Bus) {
        let mut buf = [0u8; 128];
        if let Some(n) = self.uart.try_read(&mut buf) {
            if n > 0 {
                self.on_uart_rx(bus, &buf[..n]);
            }
        }
    }

    fn on_uart_rx(&mut self, bus: &mut impl Bus, data: &[u8]) {
        match self.state {
            State::Connected => {
                let mut failed = false;
                if let Some(socket) = self.socket.as_mut() {
                    if socket.try_send(data).is_err() {
                        failed = true;
                    }
                } else {
                    failed = true;
                }
                if failed {
                    self.full_reset(bus);
                }
            }
            State::CommandMode => {
                let mut done = false;
                let mut out: heapless::Vec<u8, 256> = heapless::Vec::new();
                if let Some(proc) = self.command_processor.as_mut() {
                    for &byte in data {
                        if proc.feed(byte) {
                            done = true;
                        }
                    }
                    out = proc.drain_output();
                }
                if !out.is_empty() {
                    self.uart.write_all(&out);
                }
                if done {
                    self.command_processor = None;
                    self.state = State::DrainUart;
                }
            }
            _ => {}
        }
    }

    fn on_tick(&mut self, bus: &mut impl Bus, wifi: &impl WifiLink, config: &impl ConfigStore) {
        match self.state {
            State::Dialing => {
                self.tick_count += 1;
                if self.tick_count >= 100 {
                    match self.attempt_call(wifi, config) {
                        CallOutcome::Started => {
                            self.start_tone1(call_progress::RING);
                            self.state = State::Ringing;
                        }
                        CallOutcome::NoNetwork => {
                            self.start_tone1(call_progress::NO_NETWORK);
                            self.state = State::CallFailed;
                        }
                        CallOutcome::InvalidNumber => {
                            self.start_tone1(call_progress::INVALID_NUMBER);
                            self.state = State::CallFailed;
                        }
                        CallOutcome::Refused => {
                            self.start_tone1(call_progress::BUSY);
                            self.state = State::CallFailed;
                        }
                    }
                }
            }
            State::CallFailed => {
                self.tick_tone();
            }
            State::Ringing => {
                if self.tick_tone() {
                    self.start_tone1(call_progress::ECHO_CANCEL);
                    self.state = State::EchoCancel;
                }
            }
            State::EchoCancel => {
                if self.tick_tone() {
                    self.carrier_detected(bus, true);
                    if self.answer_mode {
                        self.start_tone1(call_progress::HANDSHAKE_ANSWER);
                    } else {
                        self.start_tone1(call_progress::HANDSHAKE_ORIGINATE);
                    }
                    self.state = State::Handshake;
                }
            }
            State::Handshake => {
                if self.tick_tone() {
                    self.sync_baud(bus);
                    if let Some(socket) = self.socket.as_mut() {
                        let _ = socket.try_send(&telnet::CONNECT_NEGOTIATION);
                    }
                    self.state = State::Connected;
                }
            }
            State::Connected => self.poll_connected_socket(),
            State::EnterCommandMode => {
                if self.tick_tone() {
                    self.sync_baud(bus);
                    self.command_processor = Some(C::default());
                    self.state = State::CommandMode;
                }
            }
            State::DrainUart => {
                if self.uart.transmit_complete() {
                    self.full_reset(bus);
                }
            }
            _ => {}
        }
    }

    /// Advances `active_tone` by one tick, applying any resulting
    /// frequency change to tone generator 1. Returns whether the tone has
    /// finished (spec.md §4.C).
    fn tick_tone(&mut self) -> bool {
        let Some(tone) = self.active_tone.as_mut() else {
            return true;
        };
        if let ToneAction::SetFrequency(freq) = tone.tick() {
            self.tone1.set_freq(freq);
        }
        tone.is_done()
    }

    fn start_tone1<T: IntoActiveTonePlayer>(&mut self, tone: T) {
        let (player, freq) = tone.start();
        self.tone1.set_freq(freq);
        self.active_tone = Some(player);
    }

    /// "Call attempt" (spec.md §4.D): requires WiFi, a phonebook hit, a
    /// successful DNS resolution, and a connect attempt that isn't
    /// synchronously refused.
    fn attempt_call(&mut self, wifi: &impl WifiLink, config: &impl ConfigStore) -> CallOutcome {
        if !wifi.is_connected() {
            return CallOutcome::NoNetwork;
        }
        let Some((host, port)) = config.lookup(self.dial_buffer.as_str()) else {
            return CallOutcome::InvalidNumber;
        };
        let addr = match wifi.resolve(host) {
            Ok(addr) => addr,
            Err(_) => return CallOutcome::NoNetwork,
        };
        let mut socket = S::default();
        match socket.connect(addr, port) {
            Ok(()) => {
                self.socket = Some(socket);
                CallOutcome::Started
            }
            Err(NetError::Refused) => CallOutcome::Refused,
            Err(_) => CallOutcome::NoNetwork,
        }
    }

    /// `CONNECTED` TICK (spec.md §4.D): non-blocking read of up to 128
    /// bytes, telnet-option stripping, forward to the host UART. A
    /// zero-byte read or a non-retry error drops to `DRAIN_UART`.
    fn poll_connected_socket(&mut self) {
        let Some(socket) = self.socket.as_mut() else {
            self.state = State::DrainUart;
            return;
        };
        let mut buf = [0u8; 128];
        match socket.try_recv(&mut buf) {
            Ok(0) => self.state = State::DrainUart,
            Ok(n) => {
                let (forwarded, replies): (
                    heapless::Vec<u8, 128>,
                    heapless::Vec<telnet::Reply, 8>,
                ) = telnet::process_options(&buf[..n]);
                self.uart.write_all(&forwarded);
                for reply in &replies {
                    let _ = socket.try_send(reply);
                }
            }
            Err(NetError::WouldBlock) => {}
            Err(_) => self.state = State::DrainUart,
        }
    }

    /// `handle_baudrate()` (spec.md §4.F pseudocode, §5 fixed dispatch
    /// order): the main loop calls this directly on the `BAUDRATE` IRQ
    /// bit, ahead of `MISC_CONTROL`, so a host-initiated baud change is
    /// serviced (and the IRQ bit acknowledged by the `BAUDRATE` read)
    /// the same iteration it's raised rather than waiting for the next
    /// reset or handshake to call `sync_baud` on its own.
    pub fn handle_baudrate(&mut self, bus: &mut impl Bus) {
        self.sync_baud(bus);
    }

    /// `sync_baud()` (spec.md §4.D): called on reset, on leaving
    /// `HANDSHAKE`, and on leaving `ENTER_COMMAND_MODE`.
    fn sync_baud(&mut self, bus: &mut impl Bus) {
        let byte = bus.read_reg(Reg::Baudrate);
        match baud::lookup(byte) {
            Some(rate) => {
                self.baud = rate;
                self.uart.set_baud(rate);
            }
            None => defmt::warn!("modem: unknown baud control value {=u8:#04x}", byte),
        }
    }

    /// Clears or sets `MODEM_STATUS`'s `CD` bit — both status bits are
    /// active-low, so "asserted" clears the bit (spec.md §3, §4.D).
    fn carrier_detected(&mut self, bus: &mut impl Bus, asserted: bool) {
        self.set_status_bit(bus, status::CD, asserted);
    }

    fn ringing(&mut self, bus: &mut impl Bus, asserted: bool) {
        self.set_status_bit(bus, status::RNG, asserted);
    }

    fn set_status_bit(&mut self, bus: &mut impl Bus, bit: u8, asserted: bool) {
        if asserted {
            self.status_byte &= !bit;
        } else {
            self.status_byte |= bit;
        }
        bus.write_reg(Reg::ModemStatus, self.status_byte);
    }

    fn full_reset(&mut self, bus: &mut impl Bus) {
        self.tone1.set_freq(0);
        self.tone2.set_freq(0);
        self.active_tone = None;
        self.socket = None;
        self.command_processor = None;
        self.dial_buffer.clear();
        self.latched_digit = None;
        self.tick_count = 0;
        self.control_shadow = 0;
        self.answer_mode = false;
        self.carrier_detected(bus, false);
        self.ringing(bus, false);
        self.sync_baud(bus);
        self.state = State::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::FakeBus;
    use crate::config::{Config, StaticConfigStore};
    use crate::wifi::StaticWifiLink;
    use smoltcp::wire::IpAddress;

    #[derive(Default)]
    struct FakeTone {
        freq: u32,
        history: heapless::Vec<u32, 64>,
    }

    impl ToneOutput for FakeTone {
        fn set_freq(&mut self, f_hz: u32) {
            self.freq = f_hz;
            let _ = self.history.push(f_hz);
        }
    }

    #[derive(Default)]
    struct FakeUart {
        rx: heapless::Deque<u8, 256>,
        tx: heapless::Vec<u8, 1024>,
        baud: u32,
        /// Models the real UART's BUSY bit: one extra poll of
        /// `transmit_complete` per queued byte before it reports drained,
        /// so tests can tell a hardcoded-`true` stub apart from the real
        /// "FIFO and shift register both empty" signal (spec.md §4.D
        /// `DRAIN_UART`).
        drain_ticks_remaining: core::cell::Cell<u32>,
    }

    impl FakeUart {
        fn push_rx(&mut self, bytes: &[u8]) {
            for &b in bytes {
                let _ = self.rx.push_back(b);
            }
        }
    }

    impl UartIo for FakeUart {
        fn try_read(&mut self, buf: &mut [u8]) -> Option<usize> {
            let mut n = 0;
            while n < buf.len() {
                match self.rx.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            if n == 0 {
                None
            } else {
                Some(n)
            }
        }

        fn write_all(&mut self, bytes: &[u8]) {
            let _ = self.tx.extend_from_slice(bytes);
            let pending = self.drain_ticks_remaining.get();
            self.drain_ticks_remaining.set(pending + bytes.len() as u32);
        }

        fn transmit_complete(&self) -> bool {
            let remaining = self.drain_ticks_remaining.get();
            if remaining == 0 {
                true
            } else {
                self.drain_ticks_remaining.set(remaining - 1);
                false
            }
        }

        fn set_baud(&mut self, baud_hz: u32) {
            self.baud = baud_hz;
        }
    }

    #[derive(Default)]
    struct FakeSocket {
        connect_result: Option<Result<(), NetError>>,
        recv_results: heapless::Deque<Result<heapless::Vec<u8, 128>, NetError>, 8>,
        sent: heapless::Vec<u8, 1024>,
    }

    impl CallSocket for FakeSocket {
        fn connect(&mut self, _addr: IpAddress, _port: u16) -> Result<(), NetError> {
            self.connect_result.take().unwrap_or(Ok(()))
        }

        fn try_recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
            match self.recv_results.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(NetError::WouldBlock),
            }
        }

        fn try_send(&mut self, buf: &[u8]) -> Result<usize, NetError> {
            let _ = self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[derive(Default)]
    struct NoopCommandProcessor;

    impl CommandProcessor for NoopCommandProcessor {
        fn feed(&mut self, _byte: u8) -> bool {
            true
        }

        fn drain_output(&mut self) -> heapless::Vec<u8, 256> {
            heapless::Vec::new()
        }
    }

    type TestModem = Modem<FakeTone, FakeTone, FakeUart, FakeSocket, NoopCommandProcessor>;

    fn new_modem() -> TestModem {
        Modem::new(FakeTone::default(), FakeTone::default(), FakeUart::default())
    }

    /// Scenario 1 (spec.md §8): `MODEM_CONTROL: 0x01` drives tone
    /// generator 1 to 425 Hz and transitions IDLE -> OFF_HOOK.
    #[test]
    fn off_hook_edge_plays_dial_tone() {
        let mut modem = new_modem();
        let mut bus = FakeBus::default();
        bus.stage(Reg::ModemControl, control::OHC);
        modem.handle_control(&mut bus);
        assert_eq!(modem.state(), State::OffHook);
        assert_eq!(modem.tone1.freq, 425);
    }

    fn press_digit(modem: &mut TestModem, bus: &mut FakeBus, byte: u8) {
        bus.stage(Reg::ToneDialer, byte | 0x10);
        modem.handle_tone_dialer(bus);
        bus.stage(Reg::ToneDialer, 0);
        modem.handle_tone_dialer(bus);
    }

    /// Scenario 2 (spec.md §8): after going off-hook, dialing a digit
    /// that misses the phonebook and then timing out (100 ticks with no
    /// further digit) fails the call with INVALID_NUMBER.
    #[test]
    fn dialing_unknown_number_times_out_to_call_failed() {
        let mut modem = new_modem();
        let mut bus = FakeBus::default();
        bus.stage(Reg::ModemControl, control::OHC);
        modem.handle_control(&mut bus);

        press_digit(&mut modem, &mut bus, 1); // '2' per the digit map

        let wifi = StaticWifiLink::new(true);
        let config = StaticConfigStore::new(Config::default());

        let mut now = 0u64;
        for _ in 0..100 {
            now += call_progress::TICK_MS as u64;
            modem.poll(&mut bus, &wifi, &config, now);
        }
        assert_eq!(modem.state(), State::CallFailed);
    }

    /// Scenario 3 (spec.md §8): dialing `***` asserts carrier-detect
    /// (MODEM_STATUS write with the CD bit cleared) and enters
    /// ENTER_COMMAND_MODE.
    #[test]
    fn triple_star_enters_command_mode() {
        let mut modem = new_modem();
        let mut bus = FakeBus::default();
        bus.stage(Reg::ModemControl, control::OHC);
        modem.handle_control(&mut bus);

        press_digit(&mut modem, &mut bus, 12); // '*'
        press_digit(&mut modem, &mut bus, 12);
        press_digit(&mut modem, &mut bus, 12);

        assert_eq!(modem.state(), State::EnterCommandMode);
        let status = bus.last_write(Reg::ModemStatus).unwrap();
        assert_eq!(status & status::CD, 0);
    }

    /// Scenario 6 (spec.md §8): a CONNECTED modem receiving
    /// `48 FF FD 01 69` forwards `48 69` to the UART and replies
    /// `FF FB 01` (WONT ECHO, per the DO-ECHO reply rule in spec.md §4.D).
    #[test]
    fn connected_modem_strips_telnet_options_and_replies() {
        let mut modem = new_modem();
        let mut bus = FakeBus::default();
        modem.state = State::Connected;
        modem.socket = Some(FakeSocket::default());
        modem
            .socket
            .as_mut()
            .unwrap()
            .recv_results
            .push_back(Ok(heapless::Vec::from_slice(&[0x48, 0xFF, 0xFD, 0x01, 0x69]).unwrap()))
            .unwrap();

        modem.poll_connected_socket();

        assert_eq!(&modem.uart.tx[..], &[0x48, 0x69]);
        let sent = &modem.socket.as_ref().unwrap().sent;
        assert_eq!(&sent[..], &[0xFF, telnet::WONT, 0x01]);
    }

    #[test]
    fn reset_control_byte_returns_modem_to_idle() {
        let mut modem = new_modem();
        let mut bus = FakeBus::default();
        bus.stage(Reg::ModemControl, control::OHC);
        modem.handle_control(&mut bus);
        assert_eq!(modem.state(), State::OffHook);

        bus.stage(Reg::ModemControl, 0);
        modem.handle_control(&mut bus);
        assert_eq!(modem.state(), State::Idle);
        assert_eq!(modem.tone1.freq, 0);
    }

    /// `DRAIN_UART` must hold until the UART genuinely finishes
    /// transmitting, not merely until its TX FIFO has a free slot
    /// (reviewer-flagged regression: `transmit_complete` used to alias
    /// FIFO-writable, which would have reset the modem here on the very
    /// first poll).
    #[test]
    fn drain_uart_waits_for_uart_to_actually_finish_transmitting() {
        let mut modem = new_modem();
        let mut bus = FakeBus::default();
        let wifi = StaticWifiLink::new(false);
        let config = StaticConfigStore::new(Config::default());

        modem.uart.write_all(&[0xAA, 0xBB, 0xCC]);
        modem.state = State::DrainUart;

        let mut now = 0u64;
        for _ in 0..3 {
            now += call_progress::TICK_MS as u64;
            modem.poll(&mut bus, &wifi, &config, now);
            assert_eq!(
                modem.state(),
                State::DrainUart,
                "must not reset before the UART actually drains"
            );
        }

        now += call_progress::TICK_MS as u64;
        modem.poll(&mut bus, &wifi, &config, now);
        assert_eq!(modem.state(), State::Idle);
    }

    #[test]
    fn call_failed_tone_repeats_without_leaving_state() {
        let mut modem = new_modem();
        let mut bus = FakeBus::default();
        modem.state = State::CallFailed;
        modem.start_tone1(call_progress::NO_NETWORK);
        let wifi = StaticWifiLink::new(false);
        let config = StaticConfigStore::new(Config::default());
        let mut now = 0u64;
        for _ in 0..1_000 {
            now += call_progress::TICK_MS as u64;
            modem.poll(&mut bus, &wifi, &config, now);
        }
        assert_eq!(modem.state(), State::CallFailed);
    }
}
