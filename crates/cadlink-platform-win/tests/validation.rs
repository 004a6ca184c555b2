#![cfg(windows)]

use cadlink_platform_win::{DpapiProtector, DpapiScope, SystemIdentity};

/// Validation tests for cadlink-platform-win components

#[test]
fn test_dpapi_round_trip() {
    let protector = DpapiProtector::new(DpapiScope::CurrentUser);
    let protected = protector.protect(b"license blob").unwrap();
    assert_ne!(protected.as_slice(), b"license blob");

    let plain = protector.unprotect(&protected).unwrap();
    assert_eq!(plain.as_bytes(), b"license blob");
}

#[test]
fn test_dpapi_entropy_mismatch_fails() {
    let protected = DpapiProtector::new(DpapiScope::CurrentUser)
        .with_entropy(b"one")
        .protect(b"data")
        .unwrap();

    let result = DpapiProtector::new(DpapiScope::CurrentUser)
        .with_entropy(b"two")
        .unprotect(&protected);
    assert!(result.is_err());
}

#[test]
fn test_local_machine_scope_round_trip() {
    let protector = DpapiProtector::new(DpapiScope::LocalMachine).with_entropy(b"cadlink");
    assert_eq!(protector.scope(), DpapiScope::LocalMachine);
    let protected = protector.protect(b"ledger").unwrap();
    let plain = protector.unprotect(&protected).unwrap();
    assert_eq!(plain.len(), 6);
    assert_eq!(plain.as_bytes(), b"ledger");
}

#[test]
fn test_empty_plaintext() {
    let protector = DpapiProtector::new(DpapiScope::CurrentUser);
    let protected = protector.protect(b"").unwrap();
    assert!(protector.unprotect(&protected).unwrap().is_empty());
}

#[test]
fn test_garbage_input_fails() {
    let protector = DpapiProtector::new(DpapiScope::CurrentUser);
    assert!(protector.unprotect(b"not a dpapi blob").is_err());
}

#[test]
fn test_basic_identity_is_stable() {
    let a = SystemIdentity::basic();
    let b = SystemIdentity::basic();
    assert!(!a.computer_name.is_empty());
    assert_eq!(a.computer_name, b.computer_name);
    assert_eq!(a.windows_version, b.windows_version);
    assert!(a.hardware_ids.is_empty());
}
