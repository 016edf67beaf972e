use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `ChainError` values.
pub enum ChainError {
    #[error("invalid public key: {0}")]
    InvalidPubkey(String),
    #[error("invalid program address seeds: {0}")]
    InvalidSeeds(String),
    #[error("derived address lies on the ed25519 curve")]
    AddressOnCurve,
    #[error("unable to find a viable program address bump seed")]
    NoViableBump,
    #[error("transaction references more than 256 accounts")]
    TooManyAccounts,
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),
    #[error("unsupported transaction message version {0}")]
    UnsupportedMessageVersion(u8),
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("ledger RPC endpoint is not configured")]
    MissingEndpoint,
    #[error("ledger http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ledger RPC {method} failed: {status}")]
    HttpStatus { method: &'static str, status: u16 },
    #[error("ledger RPC {method} error {code}: {message}")]
    Rpc {
        method: &'static str,
        code: i64,
        message: String,
    },
    #[error("ledger RPC {method} returned an invalid response: {detail}")]
    InvalidResponse { method: &'static str, detail: String },
}

#[derive(Debug, Error)]
/// Failures raised by a [`crate::TransactionSigner`].
pub enum SignerError {
    #[error("Wallet not connected")]
    NoIdentity,
    #[error("signer {0} is not a required signer of this transaction")]
    NotARequiredSigner(String),
    #[error("invalid keypair: {0}")]
    InvalidKeypair(String),
    #[error("failed to read keypair file {path}: {source}")]
    KeypairIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("signing was declined: {0}")]
    Declined(String),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[derive(Debug, Error)]
/// Failures raised while submitting or confirming a signed transaction.
pub enum BroadcastError {
    #[error(transparent)]
    Ledger(#[from] ChainError),
    #[error("broadcast relay failed: {0}")]
    Relay(String),
    #[error("transaction {signature} was not confirmed within {timeout_ms}ms")]
    ConfirmationTimeout { signature: String, timeout_ms: u64 },
    #[error("transaction {signature} failed: {error}")]
    TransactionFailed { signature: String, error: String },
}
