//! Weft core - identifier arithmetic for the prefix-routing overlay.
//!
//! Nodes and keys share one identifier space: fixed-width digit strings
//! routed one digit of agreement per hop. This crate defines the identifier
//! type and the three comparisons the rest of the system is built on:
//! shared prefix length, slot ordering (`closer`) and route selection
//! (`better_choice`).

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod id;

pub use id::{Digit, Id, IdParseError, BASE, DIGITS};
