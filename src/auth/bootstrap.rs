//! Operator bootstrap: make sure a first admin account exists

use tracing::info;

use super::token::TokenService;
use crate::database::{DatabasePool, Role, User};
use crate::error::{MarketError, MarketResult};

/// Ensure an admin with `email` exists and return it with a fresh session
/// token. An existing non-admin account with that email is promoted.
pub async fn ensure_bootstrap_admin(
    db: &DatabasePool,
    tokens: &TokenService,
    email: &str,
) -> MarketResult<(User, String)> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(MarketError::validation("Bootstrap admin email is invalid"));
    }

    let admin = match db.users().find_by_email(&email).await? {
        Some(user) if user.role == Role::Admin => user,
        Some(user) => {
            info!(user_id = %user.id, "Promoting bootstrap account to admin");
            db.users()
                .set_role(user.id, Role::Admin)
                .await?
                .ok_or_else(|| MarketError::not_found("User not found"))?
        }
        None => {
            let user = User::new(email, Role::Admin);
            db.users().insert_user(&user).await?;
            info!(user_id = %user.id, "Created bootstrap admin");
            user
        }
    };

    let token = tokens.issue(admin.id)?;
    Ok((admin, token))
}
