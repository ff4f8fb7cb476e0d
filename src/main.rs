//! PicoX-8 firmware entry point: RP2040 hardware bring-up (spec.md §10.A).
//!
//! Brings up the two PIO co-processors (the CPLD bus driver, spec.md
//! §4.A, and the two tone generators, spec.md §4.B), the host-facing
//! UART, and the board's own failsafe pin, then hands them to
//! `MainLoop::tick` in an infinite loop (spec.md §4.F). WiFi, SD-card
//! storage, and the JSON config store are external collaborators
//! (spec.md §1 Non-goals) — this crate wires in their trait boundaries
//! with bring-up placeholders until those drivers exist.
#![no_std]
#![no_main]

use cortex_m_rt::entry;
use defmt_rtt as _;
use panic_probe as _;

use fugit::HertzU32;
use rp2040_hal as hal;
use hal::clocks::Clock;
use hal::pio::PIOExt;

use picox8_fw::bus::{self, CpldBus};
use picox8_fw::cli::LineCommandProcessor;
use picox8_fw::config::{Config, StaticConfigStore};
use picox8_fw::mainloop::MainLoop;
use picox8_fw::modem::socket::NullCallSocket;
use picox8_fw::modem::uart::HostUart;
use picox8_fw::modem::Modem;
use picox8_fw::ramdisk::image::IMAGE_SIZE_BYTES;
use picox8_fw::ramdisk::{GpioFailsafeSwitch, RamDisk};
use picox8_fw::storage::MemoryStorage;
use picox8_fw::telnet_server::TelnetServer;
use picox8_fw::tone::{self, ToneGenerator};
use picox8_fw::wifi::StaticWifiLink;

/// Second-stage bootloader, linked into `.boot2` by `memory.x`
/// (spec.md §10.A).
#[link_section = ".boot2"]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

/// The board's crystal, matching the Pico/Pico W reference design.
const XTAL_FREQ_HZ: u32 = 12_000_000u32;

/// First data pin of the 8-pin CPLD bus (spec.md §6 "Physical bus"); the
/// PIO program also claims `pin_base..pin_base+8` for `ADDR`/`STB`/`DIR`
/// via its `PINDIRS`/pin-direction fields (spec.md §4.A).
const BUS_PIN_BASE: u8 = 0;

/// The two tone-generator outputs are OR-tied onto one pin externally
/// (spec.md §4.B) but each PIO state machine still needs its own `SET`
/// pin mapping; both point at the same physical GPIO.
const TONE_PIN: u8 = 16;

#[entry]
fn main() -> ! {
    let mut pac = hal::pac::Peripherals::take().unwrap();
    let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);
    let sio = hal::Sio::new(pac.SIO);

    let clocks = hal::clocks::init_clocks_and_plls(
        XTAL_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .unwrap();

    let timer = hal::Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);

    let pins = hal::gpio::Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );

    // Component A: the CPLD bus driver, one PIO0 state machine
    // (spec.md §4.A).
    let (mut pio0, sm0, _, _, _) = pac.PIO0.split(&mut pac.RESETS);
    let bus_installed = pio0.install(&bus::cpld_program()).unwrap();
    let cpld_bus = CpldBus::new(sm0, bus_installed, BUS_PIN_BASE);

    // Component B: the two tone generators, PIO1 state machines 0 and 1
    // (spec.md §4.B).
    let (mut pio1, tone_sm0, tone_sm1, _, _) = pac.PIO1.split(&mut pac.RESETS);
    let tone1_installed = pio1.install(&tone::tone_program()).unwrap();
    let tone1 = ToneGenerator::new(tone_sm0, tone1_installed, TONE_PIN);
    let tone2_installed = pio1.install(&tone::tone_program()).unwrap();
    let tone2 = ToneGenerator::new(tone_sm1, tone2_installed, TONE_PIN);

    // Host UART: the PX-8's own serial line, reconfigured 8-N-1 at
    // whatever rate `Modem::sync_baud` resolves (spec.md §4.D).
    let uart_pins = (
        pins.gpio12.into_function::<hal::gpio::FunctionUart>(),
        pins.gpio13.into_function::<hal::gpio::FunctionUart>(),
    );
    let peripheral_clock_hz = clocks.peripheral_clock.freq();
    let uart = hal::uart::UartPeripheral::new(pac.UART0, uart_pins, &mut pac.RESETS)
        .enable(
            hal::uart::UartConfig::new(
                HertzU32::from_raw(110),
                hal::uart::DataBits::Eight,
                None,
                hal::uart::StopBits::One,
            ),
            peripheral_clock_hz,
        )
        .unwrap();
    let host_uart = HostUart::new(uart, peripheral_clock_hz);

    // The dedicated, pulled-up failsafe input pin (spec.md §4.E).
    let failsafe_pin = pins.gpio2.into_pull_up_input();
    let failsafe = GpioFailsafeSwitch::new(failsafe_pin);

    let modem: Modem<_, _, _, NullCallSocket, LineCommandProcessor> =
        Modem::new(tone1, tone2, host_uart);

    // The RAM-disk image file and the JSON config store both live on the
    // SD card (spec.md §1 Non-goals: SD-card/VFS layer, external). Until
    // that driver is wired in, an in-memory image stands in so the
    // command/data state machine (spec.md §4.E) runs end to end.
    let storage = MemoryStorage::<IMAGE_SIZE_BYTES>::new();
    let ramdisk = RamDisk::new(storage);

    // WiFi driver wrapper (spec.md §1 Non-goals, external): reports
    // disconnected until a real `WifiLink` is wired in, which routes
    // every call attempt to the NO_NETWORK tone rather than reaching
    // `NullCallSocket::connect` (spec.md §4.D "Call attempt").
    let wifi = StaticWifiLink::new(false);

    // JSON config store (spec.md §1 Non-goals, external): empty phonebook
    // and the default RAM-disk image name until the SD-backed store is
    // wired in (spec.md §10.D).
    let config = StaticConfigStore::new(Config::default());

    let telnet_server = TelnetServer::new();

    let mut main_loop = MainLoop::new(
        cpld_bus,
        modem,
        ramdisk,
        wifi,
        config,
        failsafe,
        telnet_server,
    );

    loop {
        let now_ms = timer.get_counter().ticks() / 1000;
        main_loop.tick(now_ms);
    }
}
