use sha2::{Digest, Sha256};

pub const SELECTOR_LEN: usize = 8;

/// 8-byte prefix identifying a program instruction: `sha256("global:" + name)[..8]`.
pub fn instruction_selector(name: &str) -> [u8; SELECTOR_LEN] {
    namespaced_prefix("global", name)
}

/// 8-byte prefix identifying a program-owned account type: `sha256("account:" + name)[..8]`.
pub fn account_discriminator(name: &str) -> [u8; SELECTOR_LEN] {
    namespaced_prefix("account", name)
}

pub fn selector_hex(selector: &[u8; SELECTOR_LEN]) -> String {
    selector.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn namespaced_prefix(namespace: &str, name: &str) -> [u8; SELECTOR_LEN] {
    let digest = Sha256::new()
        .chain_update(namespace.as_bytes())
        .chain_update(b":")
        .chain_update(name.as_bytes())
        .finalize();
    let mut prefix = [0_u8; SELECTOR_LEN];
    prefix.copy_from_slice(&digest[..SELECTOR_LEN]);
    prefix
}
