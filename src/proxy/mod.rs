//! Upstream completion API access and credential sealing.

pub mod api_key;
pub mod completion;

pub use api_key::{ApiKeyCipher, EncryptedApiKey};
pub use completion::{CompletionApi, CompletionParams, ImagePayload, OpenRouterClient};
