#![cfg(windows)]
#![allow(unsafe_code)] // CryptProtectData / CryptUnprotectData are FFI.

//! DPAPI byte protection for CadLink's local records.
//!
//! Blobs are bound to the Windows logon (or machine, for
//! [`DpapiScope::LocalMachine`]) and optionally to caller-supplied entropy.
//! Prompting is always forbidden since the host application may be headless.

use thiserror::Error;
use windows::core::w;
use windows::Win32::Foundation::{LocalFree, HLOCAL};
use windows::Win32::Security::Cryptography::{
    CryptProtectData, CryptUnprotectData, CRYPTPROTECT_LOCAL_MACHINE, CRYPTPROTECT_UI_FORBIDDEN,
    CRYPT_INTEGER_BLOB,
};
use zeroize::ZeroizeOnDrop;

#[derive(Debug, Error)]
pub enum DpapiError {
    #[error("DPAPI protect failed: {0}")]
    Protect(String),
    #[error("DPAPI unprotect failed: {0}")]
    Unprotect(String),
    #[error("input of {0} bytes exceeds DPAPI limits")]
    TooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpapiScope {
    CurrentUser,
    LocalMachine,
}

#[derive(Debug, Clone)]
pub struct DpapiProtector {
    scope: DpapiScope,
    entropy: Option<Vec<u8>>,
}

impl DpapiProtector {
    pub fn new(scope: DpapiScope) -> Self {
        Self {
            scope,
            entropy: None,
        }
    }

    /// Bind blobs to `entropy` as well; unprotect must supply the same bytes.
    pub fn with_entropy(mut self, entropy: &[u8]) -> Self {
        self.entropy = Some(entropy.to_vec());
        self
    }

    pub fn scope(&self) -> DpapiScope {
        self.scope
    }

    pub fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, DpapiError> {
        let input = borrow_blob(plaintext)?;
        let entropy = self.entropy_blob()?;
        let mut output = CRYPT_INTEGER_BLOB::default();

        // SAFETY: `input` and `entropy` point into slices that outlive the call;
        // `output` is allocated by DPAPI and released by `take_output`.
        let status = unsafe {
            CryptProtectData(
                &input,
                w!("CadLink"),
                entropy.as_ref().map(|e| e as *const _),
                None,
                None,
                self.protect_flags(),
                &mut output,
            )
        };
        status.map_err(|e| DpapiError::Protect(e.to_string()))?;
        // SAFETY: the call succeeded, so `output` holds a LocalAlloc'd buffer.
        Ok(unsafe { take_output(output) })
    }

    pub fn unprotect(&self, protected: &[u8]) -> Result<ZeroizedBytes, DpapiError> {
        let input = borrow_blob(protected)?;
        let entropy = self.entropy_blob()?;
        let mut output = CRYPT_INTEGER_BLOB::default();

        // SAFETY: as in `protect`.
        let status = unsafe {
            CryptUnprotectData(
                &input,
                None,
                entropy.as_ref().map(|e| e as *const _),
                None,
                None,
                CRYPTPROTECT_UI_FORBIDDEN,
                &mut output,
            )
        };
        status.map_err(|e| DpapiError::Unprotect(e.to_string()))?;
        // SAFETY: as in `protect`.
        Ok(ZeroizedBytes(unsafe { take_output(output) }))
    }

    fn protect_flags(&self) -> u32 {
        match self.scope {
            DpapiScope::CurrentUser => CRYPTPROTECT_UI_FORBIDDEN,
            DpapiScope::LocalMachine => CRYPTPROTECT_UI_FORBIDDEN | CRYPTPROTECT_LOCAL_MACHINE,
        }
    }

    fn entropy_blob(&self) -> Result<Option<CRYPT_INTEGER_BLOB>, DpapiError> {
        self.entropy.as_deref().map(borrow_blob).transpose()
    }
}

/// View `data` as a DPAPI input blob. DPAPI never writes through it.
fn borrow_blob(data: &[u8]) -> Result<CRYPT_INTEGER_BLOB, DpapiError> {
    let len = u32::try_from(data.len()).map_err(|_| DpapiError::TooLarge(data.len()))?;
    Ok(CRYPT_INTEGER_BLOB {
        cbData: len,
        pbData: data.as_ptr() as *mut u8,
    })
}

/// Copy a DPAPI output blob into a `Vec` and free the original.
unsafe fn take_output(blob: CRYPT_INTEGER_BLOB) -> Vec<u8> {
    if blob.pbData.is_null() {
        return Vec::new();
    }
    let bytes = std::slice::from_raw_parts(blob.pbData, blob.cbData as usize).to_vec();
    let _ = LocalFree(Some(HLOCAL(blob.pbData as *mut _)));
    bytes
}

/// Plaintext returned by [`DpapiProtector::unprotect`]; wiped on drop.
#[derive(ZeroizeOnDrop)]
pub struct ZeroizedBytes(Vec<u8>);

impl ZeroizedBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
