//! Token issuance, verification and access policy.
//!
//! ```text
//! Authorization: Bearer <token>
//!          │
//!          ▼
//! ┌──────────────────┐   verify    ┌──────────────────┐
//! │   AccessPolicy   │ ──────────▶ │   TokenService   │
//! │ (scope / owner)  │             │  (HS256, kid)    │
//! └──────────────────┘             └──────────────────┘
//! ```

mod policy;
mod scope;
mod token;

pub use policy::{AccessPolicy, Principal};
pub use scope::{Operation, Role, Scope};
pub use token::{
    Claims, IssuedToken, SigningKeys, TokenService, DEFAULT_KEY_ID, DEFAULT_TOKEN_TTL_SECS,
    MIN_KEY_LEN,
};
