//! Session authentication
//!
//! An HS256 JWT travels in the session cookie. Each request reloads the user
//! so bans and role changes take effect immediately.

mod bootstrap;
mod extractor;
mod token;

pub use bootstrap::ensure_bootstrap_admin;
pub use extractor::{AuthContext, CurrentUser, SessionUser};
pub use token::{token_from_cookies, Claims, TokenService};
