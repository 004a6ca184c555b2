//! Cryptographic helpers shared by the CadLink crates.
//!
//! - `hash`: SHA-256 over bytes, strings and files
//! - `sealed`: AES-256-GCM sealing keyed from machine identity

#![forbid(unsafe_code)]

pub mod hash;
pub mod sealed;

#[cfg(test)]
mod proptests;
