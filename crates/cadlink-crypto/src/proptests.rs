#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::hash::sha256_joined;
    use crate::sealed::{open, seal, MachineKey};

    proptest! {
        #[test]
        fn test_seal_round_trip(
            attrs in proptest::collection::vec("[a-z0-9]{1,12}", 1..5),
            plaintext in any::<Vec<u8>>()
        ) {
            let key = MachineKey::derive(&attrs);
            let sealed = seal(&key, &plaintext).unwrap();
            prop_assert_eq!(open(&key, &sealed).unwrap(), plaintext);
        }

        #[test]
        fn test_key_derivation_determinism(
            attrs in proptest::collection::vec("[a-zA-Z0-9 ._-]{0,16}", 0..6)
        ) {
            let k1 = MachineKey::derive(&attrs);
            let k2 = MachineKey::derive(&attrs);
            prop_assert_eq!(k1.as_bytes(), k2.as_bytes());
            prop_assert_eq!(k1.as_bytes(), &sha256_joined(&attrs));
        }
    }
}
