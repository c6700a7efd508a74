#![warn(clippy::cognitive_complexity)]
#![allow(clippy::single_match)]
#![deny(
    clippy::correctness,
    clippy::cast_possible_wrap,
    unused_lifetimes,
    unused_unsafe,
    single_use_lifetimes,
    missing_debug_implementations
)]

extern crate lazy_static;

pub mod constants;
pub mod error;
pub mod events;
pub mod logging;

pub mod config;
pub mod resolve;

pub mod command;
pub mod policy;

pub mod classifier;
pub mod status_line;

pub mod campaign;
pub mod supervisor;

pub mod coverage;
