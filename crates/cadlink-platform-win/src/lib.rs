//! Windows integration for CadLink.
//!
//! On other targets this crate is empty; callers gate their use on `cfg(windows)`.

#![cfg(windows)]
// Note: Individual modules use #![allow(unsafe_code)] for Windows API calls

pub mod dpapi;
pub mod system_info;

pub use dpapi::{DpapiError, DpapiProtector, DpapiScope, ZeroizedBytes};
pub use system_info::SystemIdentity;
