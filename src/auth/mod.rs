// Credential lifecycle module
// Encrypts provider tokens for the session artifact and refreshes them on expiry

mod codec;
mod manager;
mod refresh;
mod types;

pub use codec::{CodecError, DecryptionError, TokenCodec, MAX_PLAINTEXT_LEN};
pub use manager::{now_millis, CredentialManager, RequestOutcome};
pub use refresh::{token_endpoint_url, HttpTokenRefresher, RefreshError, TokenRefresher};
pub use types::{
    CredentialState, EncryptedTokenPair, ProviderTokens, RefreshedToken, SessionErrorTag,
    TokenPair,
};
