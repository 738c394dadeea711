//! Multi-account credential lifecycle: device-code sign-in, token cache
//! persistence and silent refresh.

pub mod account;
pub mod cache;
pub mod device_code;
pub mod error;
pub mod identity;
pub mod manager;
pub mod store;
pub mod token;

pub use account::{Account, IdTokenClaims};
pub use cache::{CacheEntry, TokenCache};
pub use device_code::{AuthFlow, DeviceCodePoll};
pub use error::AuthError;
pub use identity::{IdentityClient, TokenResponse};
pub use manager::{AccountManager, DeviceFlowOutcome};
pub use store::{CredentialStore, FileTokenStore, TokenStore};
pub use token::{AccessToken, Token};
