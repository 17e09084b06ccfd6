//! Session core: tokens, refresh token ledger, credentials and the flows that
//! tie them together. Nothing in here knows about HTTP.

pub mod clock;
pub mod credentials;
pub mod ledger;
pub mod manager;
pub mod roles;
pub mod token;

#[cfg(test)]
pub(crate) mod memory;

pub use clock::{Clock, SystemClock};
pub use credentials::{CredentialStore, PgCredentialStore, Principal};
pub use ledger::{PgRefreshTokenLedger, RefreshTokenLedger};
pub use manager::{SessionError, SessionManager};
pub use roles::{Role, Roles};
pub use token::{TokenCodec, TokenConfig, TokenKind, TokenPair};
