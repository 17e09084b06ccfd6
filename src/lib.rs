//! # Concierge (help desk session and access control)
//!
//! `concierge` issues and verifies the tokens that every other help desk
//! endpoint depends on, and gates each request before it reaches a handler.
//!
//! ## Tokens
//!
//! Sign-in returns a short-lived **access token** (15 minutes by default) and a
//! long-lived **refresh token** (30 days). Both are HS256 JWTs signed with one
//! shared secret; a `token_type` claim keeps them from being used in place of
//! each other.
//!
//! ## Refresh Token Ledger
//!
//! Each principal has at most one live refresh token. Only its SHA-256 hash is
//! stored. Refreshing consumes the presented token and stores the next one in
//! the same transaction, so a replayed or superseded refresh token fails and
//! two concurrent refreshes of the same token cannot both succeed.
//!
//! ## Request Gate
//!
//! Everything outside `/api/auth` and `/health` needs `Authorization: Bearer
//! <access token>`. Admin-only prefixes (default `/api/admin`) additionally
//! require the admin role; failures answer 401 or 403 without reaching the
//! handler.

pub mod api;
pub mod cli;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
