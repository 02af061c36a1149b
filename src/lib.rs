//! Operator console core for Siemens S7 digital I/O.
//!
//! The crate keeps a session to one device, mirrors its 16 digital inputs and
//! 16 digital outputs into a local shadow on a fixed period, lets an operator
//! set, toggle or bulk-switch outputs without disturbing sibling bits, and
//! optionally pushes the observed snapshot to an HTTP collector.
//!
//! [`Console`] is the entry point for panels. The device contract lives in
//! [`api::link`]; [`protocol::s7`] implements it over ISO-on-TCP and
//! [`SimulatedPlc`] implements it in memory.

pub mod api;
#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;

pub use api::*;
