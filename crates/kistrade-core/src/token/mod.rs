//! Access token lifecycle: issuance, in-memory caching, refresh, file
//! persistence and revocation for the real and virtual domains.

mod access;
mod issuer;
mod manager;
mod store;

pub use access::AccessToken;
pub use issuer::{HttpTokenIssuer, TokenIssuer};
pub use manager::TokenManager;
pub use store::{token_file_name, TokenStore};
