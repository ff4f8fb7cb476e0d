//! PicoX-8 firmware library: everything that does not need a
//! `cortex-m-rt` entry point lives here so `cargo test` can run the unit
//! suites on the host under `std` (spec.md §10.A). The `picox8-fw` binary
//! (`main.rs`) pulls these modules in, adds the hardware bring-up that
//! does need an entry point, and runs the main loop forever.
#![cfg_attr(not(test), no_std)]

pub mod bus;
pub mod call_progress;
pub mod cli;
pub mod config;
pub mod error;
pub mod mainloop;
pub mod modem;
pub mod ramdisk;
pub mod storage;
pub mod telnet_server;
pub mod tone;
pub mod wifi;
