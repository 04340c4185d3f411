//! User administration: bans, role changes and trust overrides

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::manager::{require_staff, ModerationManager};
use super::report::{MAX_REASON_LEN, MAX_TRUST_SCORE};
use crate::database::{Role, User};
use crate::error::{MarketError, MarketResult};

/// Admin action on a user account, tagged by `action` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum UserAction {
    Ban {
        #[serde(default)]
        reason: String,
    },
    Unban,
    Promote,
    Demote,
    UpdateTrustScore {
        #[serde(rename = "trustScore")]
        trust_score: i32,
    },
}

impl UserAction {
    pub fn name(&self) -> &'static str {
        match self {
            UserAction::Ban { .. } => "ban",
            UserAction::Unban => "unban",
            UserAction::Promote => "promote",
            UserAction::Demote => "demote",
            UserAction::UpdateTrustScore { .. } => "updateTrustScore",
        }
    }

    /// Bans can be handled by moderators, everything else needs an admin
    fn required_role(&self) -> Role {
        match self {
            UserAction::Ban { .. } | UserAction::Unban => Role::Moderator,
            _ => Role::Admin,
        }
    }
}

impl ModerationManager {
    pub async fn apply_user_action(
        &self,
        caller: &User,
        target_id: Uuid,
        action: UserAction,
    ) -> MarketResult<User> {
        require_staff(caller)?;

        if action.required_role() == Role::Admin && caller.role != Role::Admin {
            warn!(caller = %caller.id, action = action.name(), "Admin action refused");
            return Err(MarketError::forbidden("Admin role required"));
        }

        let target = self
            .db
            .users()
            .get_user(target_id)
            .await?
            .ok_or_else(|| MarketError::not_found("User not found"))?;

        if target.id == caller.id
            && matches!(action, UserAction::Ban { .. } | UserAction::Demote)
        {
            return Err(MarketError::forbidden(format!(
                "Cannot {} yourself",
                action.name()
            )));
        }

        // Moderators manage regular users only
        if caller.role != Role::Admin && target.role.is_staff() {
            return Err(MarketError::forbidden(
                "Only admins can act on staff accounts",
            ));
        }

        let updated = match &action {
            UserAction::Ban { reason } => {
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(MarketError::validation("Ban reason is required"));
                }
                if reason.chars().count() > MAX_REASON_LEN {
                    return Err(MarketError::validation(format!(
                        "Ban reason must be at most {} characters",
                        MAX_REASON_LEN
                    )));
                }
                self.db.users().set_ban(target_id, Some(reason)).await?
            }
            UserAction::Unban => self.db.users().set_ban(target_id, None).await?,
            UserAction::Promote => {
                self.db
                    .users()
                    .set_role(target_id, target.role.promoted())
                    .await?
            }
            UserAction::Demote => {
                self.db
                    .users()
                    .set_role(target_id, target.role.demoted())
                    .await?
            }
            UserAction::UpdateTrustScore { trust_score } => {
                if !(0..=MAX_TRUST_SCORE).contains(trust_score) {
                    return Err(MarketError::validation(format!(
                        "Trust score must be between 0 and {}",
                        MAX_TRUST_SCORE
                    )));
                }
                self.db
                    .users()
                    .set_trust_score(target_id, *trust_score)
                    .await?
            }
        };

        let updated = updated.ok_or_else(|| MarketError::not_found("User not found"))?;

        info!(
            caller = %caller.id,
            target = %target_id,
            action = action.name(),
            role = updated.role.as_str(),
            is_banned = updated.is_banned,
            "User action applied"
        );

        Ok(updated)
    }
}
