//! Who is asking for a balance change.

use crate::database::{PaymentSource, Role, User};
use crate::payments::WebhookAuthority;

/// Origin of a credit increment
#[derive(Debug)]
pub enum CreditSource<'a> {
    /// A user acting on their own account
    SelfService { caller: &'a User },
    /// An admin granting credits by hand
    AdminGrant { admin: &'a User },
    /// The payment provider, after signature verification
    PaymentWebhook(WebhookAuthority),
}

impl CreditSource<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            CreditSource::SelfService { .. } => "self_service",
            CreditSource::AdminGrant { .. } => "admin_grant",
            CreditSource::PaymentWebhook(_) => "payment_webhook",
        }
    }

    /// Payment path this source settles through, if any
    pub fn payment_source(&self) -> Option<PaymentSource> {
        match self {
            CreditSource::SelfService { .. } => Some(PaymentSource::Confirmation),
            CreditSource::PaymentWebhook(_) => Some(PaymentSource::Webhook),
            CreditSource::AdminGrant { .. } => None,
        }
    }

    pub(crate) fn is_admin(&self) -> bool {
        matches!(self, CreditSource::AdminGrant { admin } if admin.role == Role::Admin && !admin.is_banned)
    }
}
