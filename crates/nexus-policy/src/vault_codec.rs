//! Binary payload stored in the policy vault account.
//!
//! Both layouts share `version: u8 | daily_limit: u64 LE | daily_spent: u64 LE`.
//!
//! - version 1: `protocol_flags: u8` (18 bytes total). It has no active flag;
//!   such accounts decode as active.
//! - version 2: `count: u32 LE | (len: u32 LE | utf8 tag) * count | is_active: u8`
//!
//! Version 2 is written by default. Unknown tags in a version 2 list are
//! skipped so older clients keep reading accounts written by newer programs.

use thiserror::Error;

use crate::{PolicyRecord, Protocol};

pub const CODEC_VERSION_V1: u8 = 1;
pub const CODEC_VERSION_V2: u8 = 2;
pub const CURRENT_CODEC_VERSION: u8 = CODEC_VERSION_V2;
pub const V1_PAYLOAD_LEN: usize = 18;
/// Header, an empty tag list and the active flag.
pub const V2_MIN_PAYLOAD_LEN: usize = 22;
/// Shortest payload any supported version can decode.
pub const MIN_PAYLOAD_LEN: usize = V1_PAYLOAD_LEN;

const FLAG_JUPITER: u8 = 1 << 0;
const FLAG_SPL_TRANSFER: u8 = 1 << 1;

#[derive(Debug, Error, PartialEq, Eq)]
/// Enumerates supported `PolicyCodecError` values.
pub enum PolicyCodecError {
    #[error("policy payload is too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },
    #[error("unsupported policy payload version: {0}")]
    UnsupportedVersion(u8),
    #[error("policy payload truncated while reading {field} at offset {offset}")]
    Truncated { field: &'static str, offset: usize },
    #[error("protocol tag at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },
    #[error("invalid boolean byte {value:#04x} for {field}")]
    InvalidBool { field: &'static str, value: u8 },
}

/// Encodes with the current layout version.
pub fn encode_policy_payload(policy: &PolicyRecord) -> Vec<u8> {
    let mut out = header(CODEC_VERSION_V2, policy);
    // counts and lengths come from the fixed protocol set, far below u32::MAX
    out.extend_from_slice(&(policy.allowed_protocols.len() as u32).to_le_bytes());
    for protocol in &policy.allowed_protocols {
        let tag = protocol.account_tag().as_bytes();
        out.extend_from_slice(&(tag.len() as u32).to_le_bytes());
        out.extend_from_slice(tag);
    }
    out.push(u8::from(policy.is_active));
    out
}

/// Version 1 cannot carry `is_active`; it is dropped on encode.
pub fn encode_policy_payload_versioned(
    policy: &PolicyRecord,
    version: u8,
) -> Result<Vec<u8>, PolicyCodecError> {
    match version {
        CODEC_VERSION_V1 => {
            let mut out = header(CODEC_VERSION_V1, policy);
            out.push(protocols_to_flags(&policy.allowed_protocols));
            Ok(out)
        }
        CODEC_VERSION_V2 => Ok(encode_policy_payload(policy)),
        other => Err(PolicyCodecError::UnsupportedVersion(other)),
    }
}

/// Decodes either layout; trailing bytes are ignored.
pub fn decode_policy_payload(payload: &[u8]) -> Result<PolicyRecord, PolicyCodecError> {
    let Some(&version) = payload.first() else {
        return Err(PolicyCodecError::TooShort {
            len: 0,
            min: MIN_PAYLOAD_LEN,
        });
    };
    let min = match version {
        CODEC_VERSION_V1 => V1_PAYLOAD_LEN,
        CODEC_VERSION_V2 => V2_MIN_PAYLOAD_LEN,
        other => return Err(PolicyCodecError::UnsupportedVersion(other)),
    };
    if payload.len() < min {
        return Err(PolicyCodecError::TooShort {
            len: payload.len(),
            min,
        });
    }

    let mut reader = PayloadReader::new(payload);
    reader.u8("version")?;
    let daily_limit_lamports = reader.u64("daily_limit")?;
    let daily_spent_lamports = reader.u64("daily_spent")?;

    if version == CODEC_VERSION_V1 {
        return Ok(PolicyRecord {
            daily_limit_lamports,
            daily_spent_lamports,
            allowed_protocols: flags_to_protocols(reader.u8("protocol_flags")?),
            is_active: true,
        });
    }

    let count = reader.u32("protocol_count")?;
    let mut allowed_protocols = Vec::new();
    for _ in 0..count {
        let len = reader.u32("protocol_tag_len")? as usize;
        let offset = reader.offset;
        let raw = reader.take(len, "protocol_tag")?;
        let tag = std::str::from_utf8(raw).map_err(|_| PolicyCodecError::InvalidUtf8 { offset })?;
        match Protocol::from_account_tag(tag) {
            Some(protocol) => allowed_protocols.push(protocol),
            None => tracing::debug!(tag, "ignoring unknown protocol tag in policy payload"),
        }
    }

    let is_active = match reader.u8("is_active")? {
        0 => false,
        1 => true,
        value => {
            return Err(PolicyCodecError::InvalidBool {
                field: "is_active",
                value,
            })
        }
    };

    Ok(PolicyRecord {
        daily_limit_lamports,
        daily_spent_lamports,
        allowed_protocols,
        is_active,
    })
}

fn header(version: u8, policy: &PolicyRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.push(version);
    out.extend_from_slice(&policy.daily_limit_lamports.to_le_bytes());
    out.extend_from_slice(&policy.daily_spent_lamports.to_le_bytes());
    out
}

fn protocols_to_flags(protocols: &[Protocol]) -> u8 {
    protocols.iter().fold(0, |flags, protocol| {
        flags
            | match protocol {
                Protocol::Jupiter => FLAG_JUPITER,
                Protocol::SplTransfer => FLAG_SPL_TRANSFER,
            }
    })
}

fn flags_to_protocols(flags: u8) -> Vec<Protocol> {
    let mut protocols = Vec::new();
    if flags & FLAG_JUPITER != 0 {
        protocols.push(Protocol::Jupiter);
    }
    if flags & FLAG_SPL_TRANSFER != 0 {
        protocols.push(Protocol::SplTransfer);
    }
    protocols
}

struct PayloadReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], PolicyCodecError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(PolicyCodecError::Truncated {
                field,
                offset: self.offset,
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, PolicyCodecError> {
        Ok(self.take(1, field)?[0])
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, PolicyCodecError> {
        let mut raw = [0_u8; 4];
        raw.copy_from_slice(self.take(4, field)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, PolicyCodecError> {
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(self.take(8, field)?);
        Ok(u64::from_le_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        decode_policy_payload, encode_policy_payload, encode_policy_payload_versioned,
        PolicyCodecError, CODEC_VERSION_V1, MIN_PAYLOAD_LEN, V1_PAYLOAD_LEN, V2_MIN_PAYLOAD_LEN,
    };
    use crate::{PolicyRecord, Protocol};

    fn policy(limit: u64, spent: u64, protocols: Vec<Protocol>, active: bool) -> PolicyRecord {
        PolicyRecord {
            daily_limit_lamports: limit,
            daily_spent_lamports: spent,
            allowed_protocols: protocols,
            is_active: active,
        }
    }

    #[test]
    fn functional_current_layout_round_trips_edge_values() {
        let protocol_sets = [
            vec![],
            vec![Protocol::Jupiter],
            vec![Protocol::SplTransfer],
            vec![Protocol::SplTransfer, Protocol::Jupiter],
        ];
        for (limit, spent) in [(0, 0), (500_000_000, 0), (10, u64::MAX), (u64::MAX, 1)] {
            for protocols in &protocol_sets {
                for active in [true, false] {
                    let original = policy(limit, spent, protocols.clone(), active);
                    let decoded =
                        decode_policy_payload(&encode_policy_payload(&original)).expect("decode");
                    assert_eq!(decoded, original);
                }
            }
        }
    }

    #[test]
    fn unit_v1_layout_is_eighteen_bytes_with_flag_bits() {
        let original = policy(7, 3, vec![Protocol::Jupiter, Protocol::SplTransfer], true);
        let bytes = encode_policy_payload_versioned(&original, CODEC_VERSION_V1).expect("v1");
        assert_eq!(bytes.len(), V1_PAYLOAD_LEN);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..9], &7_u64.to_le_bytes());
        assert_eq!(&bytes[9..17], &3_u64.to_le_bytes());
        assert_eq!(bytes[17], 0b11);
        assert_eq!(decode_policy_payload(&bytes).expect("decode"), original);
    }

    #[test]
    fn regression_legacy_v1_account_bytes_decode_as_active() {
        let mut legacy = vec![1_u8];
        legacy.extend_from_slice(&500_000_000_u64.to_le_bytes());
        legacy.extend_from_slice(&0_u64.to_le_bytes());
        legacy.push(0b01);
        assert_eq!(legacy.len(), 18);

        let decoded = decode_policy_payload(&legacy).expect("legacy v1 decodes");
        assert_eq!(decoded, policy(500_000_000, 0, vec![Protocol::Jupiter], true));
        assert_eq!(
            encode_policy_payload_versioned(&decoded, CODEC_VERSION_V1).expect("v1"),
            legacy
        );

        let inactive = policy(1, 0, vec![Protocol::SplTransfer], false);
        let reencoded = encode_policy_payload_versioned(&inactive, CODEC_VERSION_V1).expect("v1");
        assert!(decode_policy_payload(&reencoded).expect("decode").is_active);
    }

    #[test]
    fn unit_v2_layout_writes_length_prefixed_tags() {
        let bytes = encode_policy_payload(&policy(1, 2, vec![Protocol::Jupiter], false));
        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[17..21], &1_u32.to_le_bytes());
        assert_eq!(&bytes[21..25], &7_u32.to_le_bytes());
        assert_eq!(&bytes[25..32], b"jupiter");
        assert_eq!(bytes[32], 0);
        assert_eq!(bytes.len(), 33);
    }

    #[test]
    fn regression_short_and_unknown_version_payloads_fail_explicitly() {
        assert_eq!(
            decode_policy_payload(&[]),
            Err(PolicyCodecError::TooShort {
                len: 0,
                min: MIN_PAYLOAD_LEN
            })
        );
        for len in 1..V1_PAYLOAD_LEN {
            assert_eq!(
                decode_policy_payload(&vec![1; len]),
                Err(PolicyCodecError::TooShort {
                    len,
                    min: V1_PAYLOAD_LEN
                })
            );
        }
        for len in 1..V2_MIN_PAYLOAD_LEN {
            let mut bytes = vec![0; len];
            bytes[0] = 2;
            assert_eq!(
                decode_policy_payload(&bytes),
                Err(PolicyCodecError::TooShort {
                    len,
                    min: V2_MIN_PAYLOAD_LEN
                })
            );
        }
        let mut bytes = encode_policy_payload(&PolicyRecord::default());
        bytes[0] = 9;
        assert_eq!(
            decode_policy_payload(&bytes),
            Err(PolicyCodecError::UnsupportedVersion(9))
        );
        assert_eq!(
            decode_policy_payload(&[9]),
            Err(PolicyCodecError::UnsupportedVersion(9))
        );
        assert_eq!(
            encode_policy_payload_versioned(&PolicyRecord::default(), 0),
            Err(PolicyCodecError::UnsupportedVersion(0))
        );
    }

    #[test]
    fn regression_unknown_tags_are_skipped() {
        let mut bytes = vec![2];
        bytes.extend_from_slice(&5_u64.to_le_bytes());
        bytes.extend_from_slice(&0_u64.to_le_bytes());
        bytes.extend_from_slice(&2_u32.to_le_bytes());
        for tag in ["raydium", "spl_transfer"] {
            bytes.extend_from_slice(&(tag.len() as u32).to_le_bytes());
            bytes.extend_from_slice(tag.as_bytes());
        }
        bytes.push(1);

        let decoded = decode_policy_payload(&bytes).expect("decode");
        assert_eq!(decoded.allowed_protocols, vec![Protocol::SplTransfer]);
        assert!(decoded.is_active);
    }

    #[test]
    fn regression_truncated_tag_list_and_bad_bool_are_rejected() {
        let full = encode_policy_payload(&policy(
            1,
            1,
            vec![Protocol::Jupiter, Protocol::SplTransfer],
            true,
        ));
        let error = decode_policy_payload(&full[..full.len() - 3]).expect_err("truncated");
        assert!(matches!(error, PolicyCodecError::Truncated { field: "protocol_tag", .. }));

        let mut bad_bool = full.clone();
        let last = bad_bool.len() - 1;
        bad_bool[last] = 2;
        assert_eq!(
            decode_policy_payload(&bad_bool),
            Err(PolicyCodecError::InvalidBool {
                field: "is_active",
                value: 2
            })
        );

        let mut huge_len = encode_policy_payload(&policy(1, 1, vec![Protocol::Jupiter], true));
        huge_len[21..25].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode_policy_payload(&huge_len),
            Err(PolicyCodecError::Truncated { .. })
        ));
    }

    #[test]
    fn regression_invalid_utf8_tag_is_rejected() {
        let mut bytes = encode_policy_payload(&policy(1, 1, vec![Protocol::Jupiter], true));
        bytes[25] = 0xff;
        assert_eq!(
            decode_policy_payload(&bytes),
            Err(PolicyCodecError::InvalidUtf8 { offset: 25 })
        );
    }

    #[test]
    fn unit_trailing_bytes_are_ignored() {
        let original = PolicyRecord::default();
        let mut bytes = encode_policy_payload(&original);
        bytes.extend_from_slice(&[0; 16]);
        assert_eq!(decode_policy_payload(&bytes).expect("decode"), original);
    }
}
