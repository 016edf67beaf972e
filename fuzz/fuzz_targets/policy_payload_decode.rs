#![no_main]

use libfuzzer_sys::fuzz_target;
use nexus_policy::{decode_policy_payload, encode_policy_payload, MIN_PAYLOAD_LEN};

fuzz_target!(|data: &[u8]| {
    match decode_policy_payload(data) {
        Ok(policy) => {
            assert!(data.len() >= MIN_PAYLOAD_LEN);
            let reencoded = encode_policy_payload(&policy);
            let decoded = decode_policy_payload(&reencoded).expect("re-encoded payload decodes");
            assert_eq!(decoded, policy);
        }
        Err(error) => {
            assert!(!error.to_string().is_empty());
        }
    }
});
