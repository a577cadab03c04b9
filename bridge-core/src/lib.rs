#![cfg_attr(not(test), no_std)]

#[cfg(test)]
extern crate std;

// Measurement core shared by the bridge firmware and host-side tooling.
//
// This crate stays portable across the MCU target and host tests by avoiding
// the Rust standard library. Everything with timing behavior takes explicit
// microsecond timestamps; the firmware shell stamps them from its monotonic
// clock, tests stamp them synthetically.

pub mod adc;
pub mod cmd;
pub mod config;
pub mod counter;
pub mod eeprom;
pub mod frame;
pub mod pipeline;
pub mod pps;
pub mod queue;
