use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use tracing::warn;

use super::token::{token_from_cookies, TokenService};
use crate::database::{DatabasePool, User};
use crate::error::{MarketError, MarketResult};

/// What the extractors need from application state
#[derive(Clone)]
pub struct AuthContext {
    pub tokens: Arc<TokenService>,
    pub db: Arc<DatabasePool>,
}

impl AuthContext {
    async fn load_user(&self, parts: &Parts) -> MarketResult<User> {
        let token = token_from_cookies(&parts.headers, self.tokens.cookie_name())
            .ok_or(MarketError::Unauthenticated)?;
        let user_id = self.tokens.user_id(&token)?;

        self.db
            .users()
            .get_user(user_id)
            .await?
            .ok_or(MarketError::Unauthenticated)
    }
}

/// Any signed-in user, banned accounts included
#[derive(Debug, Clone)]
pub struct SessionUser(pub User);

/// A signed-in user whose account is not banned
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl<S> FromRequestParts<S> for SessionUser
where
    AuthContext: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthContext::from_ref(state);
        auth.load_user(parts).await.map(SessionUser)
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    AuthContext: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let SessionUser(user) = SessionUser::from_request_parts(parts, state).await?;

        if user.is_banned {
            warn!(user_id = %user.id, path = %parts.uri.path(), "Banned user refused");
            return Err(MarketError::forbidden("Account is banned"));
        }

        Ok(CurrentUser(user))
    }
}
