//! Public authentication endpoints under `/api/auth`.
//!
//! Flow Overview:
//! 1) `signup` registers a principal; it does not sign them in.
//! 2) `signin` exchanges email and password for an access/refresh pair.
//! 3) `refresh` exchanges a refresh token for a new pair, consuming it.

pub mod refresh;
pub mod signin;
pub mod signup;
pub mod types;
