//! Integration tests for the marketplace ledger
//!
//! These drive the full HTTP application (routes plus middleware) against the
//! in-memory store: credit flows, payment settlement through both paths,
//! report moderation, user administration and access control.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use market_ledger::auth::TokenService;
use market_ledger::config::{AuthConfig, DatabaseConfig};
use market_ledger::payments::{IntentStatus, SIGNATURE_HEADER};
use market_ledger::{
    create_app, DatabasePool, MarketApiState, MarketError, MarketResult, PaymentGateway,
    PaymentIntent, Role, SecurityMiddlewareConfig, SecurityState, TrustPenalty, User,
    WebhookVerifier,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

// ============================================================================
// Test Helpers
// ============================================================================

const WEBHOOK_SECRET: &str = "whsec_integration_secret";

/// Payment provider stand-in holding intents by id
#[derive(Default)]
struct FakeGateway {
    intents: Mutex<HashMap<String, PaymentIntent>>,
}

impl FakeGateway {
    fn put(&self, intent: PaymentIntent) {
        self.intents
            .lock()
            .unwrap()
            .insert(intent.id.clone(), intent);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn retrieve_intent(&self, intent_id: &str) -> MarketResult<PaymentIntent> {
        self.intents
            .lock()
            .unwrap()
            .get(intent_id)
            .cloned()
            .ok_or_else(|| MarketError::not_found("Payment intent not found"))
    }
}

struct Harness {
    app: Router,
    db: Arc<DatabasePool>,
    tokens: Arc<TokenService>,
    gateway: Arc<FakeGateway>,
    webhooks: WebhookVerifier,
}

fn auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "integration-secret-integration-secret".to_string(),
        token_ttl_hours: 1,
        cookie_name: "token".to_string(),
    }
}

fn build(db: Arc<DatabasePool>, penalty: TrustPenalty) -> Harness {
    build_with(
        db,
        penalty,
        SecurityMiddlewareConfig {
            rate_limit_per_minute: 10_000,
            ..SecurityMiddlewareConfig::default()
        },
    )
}

fn build_with(
    db: Arc<DatabasePool>,
    penalty: TrustPenalty,
    security: SecurityMiddlewareConfig,
) -> Harness {
    let gateway = Arc::new(FakeGateway::default());
    let webhooks = WebhookVerifier::new(WEBHOOK_SECRET, 300);

    let state = MarketApiState::new(
        db.clone(),
        TokenService::new(&auth_config()),
        gateway.clone(),
        webhooks.clone(),
        penalty,
    );
    let tokens = state.tokens.clone();

    let security = SecurityState::new(security);

    Harness {
        app: create_app(state, security),
        db,
        tokens,
        gateway,
        webhooks,
    }
}

fn harness() -> Harness {
    build(Arc::new(DatabasePool::in_memory()), TrustPenalty::default())
}

impl Harness {
    /// Insert a user and return it with a session cookie
    async fn user(&self, role: Role) -> (User, String) {
        let user = User::new(format!("{}@example.com", Uuid::new_v4()), role);
        self.db.users().insert_user(&user).await.unwrap();
        let token = self.tokens.issue(user.id).unwrap();
        (user, format!("token={}", token))
    }

    async fn fetch_user(&self, id: Uuid) -> User {
        self.db.users().get_user(id).await.unwrap().unwrap()
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        read(self.app.clone().oneshot(request).await.unwrap()).await
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> (StatusCode, Value) {
        self.send(Method::GET, uri, cookie, None).await
    }

    async fn post(&self, uri: &str, cookie: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, cookie, Some(body)).await
    }

    async fn webhook(&self, payload: &str, signature: Option<String>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/webhooks/payments")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        let request = builder.body(Body::from(payload.to_string())).unwrap();
        read(self.app.clone().oneshot(request).await.unwrap()).await
    }

    fn sign(&self, payload: &str) -> String {
        self.webhooks
            .sign(payload.as_bytes(), Utc::now().timestamp())
            .unwrap()
    }
}

async fn read(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn succeeded_intent(id: &str, owner: Uuid, amount_cents: i64) -> PaymentIntent {
    PaymentIntent {
        id: id.to_string(),
        status: IntentStatus::Succeeded,
        amount_cents,
        currency: "usd".to_string(),
        user_id: Some(owner),
    }
}

fn succeeded_event(intent_id: &str, owner: Uuid, amount_cents: i64) -> String {
    json!({
        "id": format!("evt_{}", intent_id),
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": intent_id,
            "object": "payment_intent",
            "status": "succeeded",
            "amount": amount_cents,
            "currency": "usd",
            "metadata": { "user_id": owner.to_string() }
        }}
    })
    .to_string()
}

// ============================================================================
// Credit Ledger
// ============================================================================

mod ledger {
    use super::*;
    use market_ledger::{CreditLedger, CreditSource};

    #[tokio::test]
    async fn test_balance_starts_empty() {
        let h = harness();
        let (_, cookie) = h.user(Role::User).await;

        let (status, body) = h.get("/api/credits", Some(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["credits"], 0);
        assert_eq!(body["manual_credits"], 0);
    }

    #[tokio::test]
    async fn test_admin_manual_grant() {
        let h = harness();
        let (_, admin_cookie) = h.user(Role::Admin).await;
        let (user, _) = h.user(Role::User).await;

        let uri = format!("/api/admin/users/{}/credits", user.id);
        let (status, body) = h
            .post(&uri, Some(&admin_cookie), json!({ "amount": 250 }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["credits"], 250);
        assert_eq!(body["manual_credits"], 250);

        let (status, _) = h
            .post(&uri, Some(&admin_cookie), json!({ "amount": 0 }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = h
            .post(&uri, Some(&admin_cookie), json!({ "amount": "lots" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = h
            .post(&uri, Some(&admin_cookie), json!({ "amount": 9_751 }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.fetch_user(user.id).await.manual_credits, 250);
    }

    #[tokio::test]
    async fn test_grant_to_missing_user() {
        let h = harness();
        let (_, admin_cookie) = h.user(Role::Admin).await;

        let uri = format!("/api/admin/users/{}/credits", Uuid::new_v4());
        let (status, _) = h
            .post(&uri, Some(&admin_cookie), json!({ "amount": 10 }))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_concurrent_increments_sum() {
        let db = Arc::new(DatabasePool::in_memory());
        let ledger = Arc::new(CreditLedger::new(db.clone()));
        let user = Arc::new(User::new("many@example.com", Role::User));
        db.users().insert_user(&user).await.unwrap();

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let ledger = ledger.clone();
                let user = user.clone();
                tokio::spawn(async move {
                    ledger
                        .increment(user.id, 7, CreditSource::SelfService { caller: &user })
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(ledger.balance(user.id).await.unwrap().credits, 700);
    }

    #[tokio::test]
    async fn test_concurrent_grants_respect_ceiling() {
        let h = harness();
        let (_, admin_cookie) = h.user(Role::Admin).await;
        let (user, _) = h.user(Role::User).await;
        let uri = format!("/api/admin/users/{}/credits", user.id);

        let requests = (0..15).map(|_| h.post(&uri, Some(&admin_cookie), json!({ "amount": 1000 })));
        let results = futures::future::join_all(requests).await;

        let granted = results
            .iter()
            .filter(|(status, _)| *status == StatusCode::OK)
            .count();
        assert_eq!(granted, 10);
        let user = h.fetch_user(user.id).await;
        assert_eq!(user.manual_credits, 10_000);
        assert_eq!(user.credits, 10_000);
    }
}

// ============================================================================
// Payment Settlement
// ============================================================================

mod payments {
    use super::*;

    #[tokio::test]
    async fn test_confirmation_credits_user() {
        let h = harness();
        let (user, cookie) = h.user(Role::User).await;
        h.gateway.put(succeeded_intent("pi_confirm", user.id, 2500));

        let (status, body) = h
            .post(
                "/api/credits/confirm",
                Some(&cookie),
                json!({ "payment_intent_id": "pi_confirm" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "credited");
        assert_eq!(body["balance"]["credits"], 250);
    }

    #[tokio::test]
    async fn test_confirmation_then_webhook_credits_once() {
        let h = harness();
        let (user, cookie) = h.user(Role::User).await;
        h.gateway.put(succeeded_intent("pi_both", user.id, 1000));

        let (status, _) = h
            .post(
                "/api/credits/confirm",
                Some(&cookie),
                json!({ "payment_intent_id": "pi_both" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let payload = succeeded_event("pi_both", user.id, 1000);
        let (status, body) = h.webhook(&payload, Some(h.sign(&payload))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["outcome"], "already_processed");
        assert_eq!(body["result"]["first_source"], "confirmation");

        assert_eq!(h.fetch_user(user.id).await.credits, 100);
    }

    #[tokio::test]
    async fn test_webhook_then_confirmation_credits_once() {
        let h = harness();
        let (user, cookie) = h.user(Role::User).await;
        h.gateway.put(succeeded_intent("pi_hook_first", user.id, 500));

        let payload = succeeded_event("pi_hook_first", user.id, 500);
        let (status, body) = h.webhook(&payload, Some(h.sign(&payload))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["outcome"], "credited");

        let (status, body) = h
            .post(
                "/api/credits/confirm",
                Some(&cookie),
                json!({ "payment_intent_id": "pi_hook_first" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "already_processed");
        assert_eq!(h.fetch_user(user.id).await.credits, 50);
    }

    #[tokio::test]
    async fn test_racing_paths_credit_once() {
        let h = harness();
        let (user, cookie) = h.user(Role::User).await;
        h.gateway.put(succeeded_intent("pi_race", user.id, 3000));
        let payload = succeeded_event("pi_race", user.id, 3000);
        let signature = h.sign(&payload);

        let confirm = h.post(
            "/api/credits/confirm",
            Some(&cookie),
            json!({ "payment_intent_id": "pi_race" }),
        );
        let hook = h.webhook(&payload, Some(signature.clone()));
        let replay = h.webhook(&payload, Some(signature));
        let (a, b, c) = tokio::join!(confirm, hook, replay);

        assert_eq!(a.0, StatusCode::OK);
        assert_eq!(b.0, StatusCode::OK);
        assert_eq!(c.0, StatusCode::OK);
        assert_eq!(h.fetch_user(user.id).await.credits, 300);
    }

    #[tokio::test]
    async fn test_confirming_someone_elses_payment() {
        let h = harness();
        let (owner, _) = h.user(Role::User).await;
        let (_, intruder_cookie) = h.user(Role::User).await;
        h.gateway.put(succeeded_intent("pi_owned", owner.id, 1000));

        let (status, _) = h
            .post(
                "/api/credits/confirm",
                Some(&intruder_cookie),
                json!({ "payment_intent_id": "pi_owned" }),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(h.fetch_user(owner.id).await.credits, 0);
    }

    #[tokio::test]
    async fn test_confirming_unfinished_or_unknown_payment() {
        let h = harness();
        let (user, cookie) = h.user(Role::User).await;
        let mut pending = succeeded_intent("pi_pending", user.id, 1000);
        pending.status = IntentStatus::Processing;
        h.gateway.put(pending);

        let (status, _) = h
            .post(
                "/api/credits/confirm",
                Some(&cookie),
                json!({ "payment_intent_id": "pi_pending" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = h
            .post(
                "/api/credits/confirm",
                Some(&cookie),
                json!({ "payment_intent_id": "pi_missing" }),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_webhook_signatures_rejected() {
        let h = harness();
        let (user, _) = h.user(Role::User).await;
        let payload = succeeded_event("pi_forged", user.id, 100_000);

        let (status, _) = h.webhook(&payload, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let forged = WebhookVerifier::new("not-the-secret", 300)
            .sign(payload.as_bytes(), Utc::now().timestamp())
            .unwrap();
        let (status, _) = h.webhook(&payload, Some(forged)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let stale = h
            .webhooks
            .sign(payload.as_bytes(), Utc::now().timestamp() - 3600)
            .unwrap();
        let (status, _) = h.webhook(&payload, Some(stale)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let signed_other = h.sign(&succeeded_event("pi_forged", user.id, 100));
        let (status, _) = h.webhook(&payload, Some(signed_other)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(h.fetch_user(user.id).await.credits, 0);
    }

    #[tokio::test]
    async fn test_unrelated_events_acknowledged() {
        let h = harness();
        let payload = json!({
            "id": "evt_refund",
            "type": "charge.refunded",
            "data": { "object": { "id": "ch_1" } }
        })
        .to_string();

        let (status, body) = h.webhook(&payload, Some(h.sign(&payload))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], true);
    }
}

// ============================================================================
// Report Moderation
// ============================================================================

mod moderation {
    use super::*;
    use market_ledger::PenaltyPolicy;

    async fn file(h: &Harness, cookie: &str, reported: Uuid) -> Uuid {
        let (status, body) = h
            .post(
                "/api/reports",
                Some(cookie),
                json!({ "reported_id": reported, "reason": "Never shipped the item" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "pending");
        Uuid::parse_str(body["id"].as_str().unwrap()).unwrap()
    }

    async fn review(h: &Harness, cookie: &str, report: Uuid, decision: &str) -> (StatusCode, Value) {
        h.post(
            &format!("/api/admin/reports/{}/review", report),
            Some(cookie),
            json!({ "decision": decision, "admin_notes": "checked" }),
        )
        .await
    }

    #[tokio::test]
    async fn test_resolve_from_55_to_45_once() {
        let h = harness();
        let (_, reporter_cookie) = h.user(Role::User).await;
        let (reported, _) = h.user(Role::User).await;
        let (moderator, mod_cookie) = h.user(Role::Moderator).await;
        h.db.users().set_trust_score(reported.id, 55).await.unwrap();

        let report = file(&h, &reporter_cookie, reported.id).await;

        let (status, body) = review(&h, &mod_cookie, report, "resolve").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"]["status"], "resolved");
        assert_eq!(body["report"]["reviewed_by"], moderator.id.to_string());
        assert_eq!(body["already_reviewed"], false);
        assert_eq!(body["reported_trust_score"], 45);

        let (status, body) = review(&h, &mod_cookie, report, "resolve").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["already_reviewed"], true);
        assert_eq!(h.fetch_user(reported.id).await.trust_score, 45);

        let (status, _) = review(&h, &mod_cookie, report, "dismiss").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.fetch_user(reported.id).await.trust_score, 45);
    }

    #[tokio::test]
    async fn test_concurrent_reviews_penalize_once() {
        let h = harness();
        let (_, reporter_cookie) = h.user(Role::User).await;
        let (reported, _) = h.user(Role::User).await;
        let (_, mod_cookie) = h.user(Role::Moderator).await;
        let report = file(&h, &reporter_cookie, reported.id).await;

        let attempts = (0..10).map(|_| review(&h, &mod_cookie, report, "resolve"));
        let results = futures::future::join_all(attempts).await;

        let fresh = results
            .iter()
            .filter(|(status, body)| *status == StatusCode::OK && body["already_reviewed"] == false)
            .count();
        assert_eq!(fresh, 1);
        assert_eq!(h.fetch_user(reported.id).await.trust_score, 90);
    }

    #[tokio::test]
    async fn test_trust_after_n_resolutions() {
        for (policy, floor) in [(PenaltyPolicy::Clamp, Some(0)), (PenaltyPolicy::Unbounded, None)] {
            let h = build(
                Arc::new(DatabasePool::in_memory()),
                TrustPenalty {
                    policy,
                    ..TrustPenalty::default()
                },
            );
            let (_, reporter_cookie) = h.user(Role::User).await;
            let (reported, _) = h.user(Role::User).await;
            let (_, admin_cookie) = h.user(Role::Admin).await;

            for _ in 0..12 {
                let report = file(&h, &reporter_cookie, reported.id).await;
                let (status, _) = review(&h, &admin_cookie, report, "resolved").await;
                assert_eq!(status, StatusCode::OK);
            }

            let expected = match floor {
                Some(floor) => (100 - 120).max(floor),
                None => 100 - 120,
            };
            assert_eq!(h.fetch_user(reported.id).await.trust_score, expected);
        }
    }

    #[tokio::test]
    async fn test_dismiss_keeps_trust() {
        let h = harness();
        let (_, reporter_cookie) = h.user(Role::User).await;
        let (reported, _) = h.user(Role::User).await;
        let (_, mod_cookie) = h.user(Role::Moderator).await;
        let report = file(&h, &reporter_cookie, reported.id).await;

        let (status, body) = review(&h, &mod_cookie, report, "dismiss").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"]["status"], "dismissed");
        assert_eq!(h.fetch_user(reported.id).await.trust_score, 100);
    }

    #[tokio::test]
    async fn test_report_validation() {
        let h = harness();
        let (reporter, cookie) = h.user(Role::User).await;

        let (status, _) = h
            .post(
                "/api/reports",
                Some(&cookie),
                json!({ "reported_id": reporter.id, "reason": "me" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = h
            .post(
                "/api/reports",
                Some(&cookie),
                json!({ "reported_id": "not-a-uuid", "reason": "spam" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = h
            .post(
                "/api/reports",
                Some(&cookie),
                json!({ "reported_id": Uuid::new_v4(), "reason": "spam" }),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_moderator_cannot_review_reports_against_staff() {
        let h = harness();
        let (_, reporter_cookie) = h.user(Role::User).await;
        let (moderator, mod_cookie) = h.user(Role::Moderator).await;
        let (_, other_mod_cookie) = h.user(Role::Moderator).await;
        let (_, admin_cookie) = h.user(Role::Admin).await;

        let report = file(&h, &reporter_cookie, moderator.id).await;

        let (status, _) = review(&h, &mod_cookie, report, "dismiss").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = review(&h, &other_mod_cookie, report, "dismiss").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = review(&h, &admin_cookie, report, "resolve").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"]["status"], "resolved");
        assert_eq!(h.fetch_user(moderator.id).await.trust_score, 90);
    }

    #[tokio::test]
    async fn test_report_queue_filter() {
        let h = harness();
        let (_, reporter_cookie) = h.user(Role::User).await;
        let (reported, _) = h.user(Role::User).await;
        let (_, mod_cookie) = h.user(Role::Moderator).await;

        let first = file(&h, &reporter_cookie, reported.id).await;
        file(&h, &reporter_cookie, reported.id).await;
        review(&h, &mod_cookie, first, "dismiss").await;

        let (status, body) = h
            .get("/api/admin/reports?status=pending", Some(&mod_cookie))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, body) = h.get("/api/admin/reports", Some(&mod_cookie)).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, _) = h
            .get("/api/admin/reports?status=reopened", Some(&mod_cookie))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_report_visible_to_reporter_and_staff() {
        let h = harness();
        let (_, reporter_cookie) = h.user(Role::User).await;
        let (reported, reported_cookie) = h.user(Role::User).await;
        let (_, mod_cookie) = h.user(Role::Moderator).await;
        let report = file(&h, &reporter_cookie, reported.id).await;
        let uri = format!("/api/reports/{}", report);

        assert_eq!(h.get(&uri, Some(&reporter_cookie)).await.0, StatusCode::OK);
        assert_eq!(h.get(&uri, Some(&mod_cookie)).await.0, StatusCode::OK);
        assert_eq!(
            h.get(&uri, Some(&reported_cookie)).await.0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            h.get("/api/reports/nope", Some(&mod_cookie)).await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            h.get(&format!("/api/reports/{}", Uuid::new_v4()), Some(&mod_cookie))
                .await
                .0,
            StatusCode::NOT_FOUND
        );
    }
}

// ============================================================================
// User Administration
// ============================================================================

mod administration {
    use super::*;

    #[tokio::test]
    async fn test_ban_blocks_access_and_unban_restores() {
        let h = harness();
        let (_, admin_cookie) = h.user(Role::Admin).await;
        let (user, user_cookie) = h.user(Role::User).await;
        let uri = format!("/api/admin/users/{}", user.id);

        let (status, body) = h
            .post(
                &uri,
                Some(&admin_cookie),
                json!({ "action": "ban", "reason": "chargeback fraud" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_banned"], true);
        assert_eq!(body["ban_reason"], "chargeback fraud");

        assert_eq!(
            h.get("/api/credits", Some(&user_cookie)).await.0,
            StatusCode::FORBIDDEN
        );
        let (status, body) = h.get("/api/me", Some(&user_cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ban_reason"], "chargeback fraud");

        let (status, body) = h
            .post(&uri, Some(&admin_cookie), json!({ "action": "unban" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_banned"], false);
        assert_eq!(body["ban_reason"], Value::Null);

        assert_eq!(
            h.get("/api/credits", Some(&user_cookie)).await.0,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_promote_demote_and_trust_update() {
        let h = harness();
        let (_, admin_cookie) = h.user(Role::Admin).await;
        let (user, _) = h.user(Role::User).await;
        let uri = format!("/api/admin/users/{}", user.id);

        let (_, body) = h
            .post(&uri, Some(&admin_cookie), json!({ "action": "promote" }))
            .await;
        assert_eq!(body["role"], "moderator");

        let (_, body) = h
            .post(&uri, Some(&admin_cookie), json!({ "action": "demote" }))
            .await;
        assert_eq!(body["role"], "user");

        let (status, body) = h
            .post(
                &uri,
                Some(&admin_cookie),
                json!({ "action": "updateTrustScore", "trustScore": 70 }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["trust_score"], 70);

        let (status, _) = h
            .post(
                &uri,
                Some(&admin_cookie),
                json!({ "action": "updateTrustScore", "trustScore": 101 }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = h
            .post(&uri, Some(&admin_cookie), json!({ "action": "delete" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_target_must_be_valid_and_exist() {
        let h = harness();
        let (_, admin_cookie) = h.user(Role::Admin).await;

        let (status, _) = h
            .post(
                "/api/admin/users/12345",
                Some(&admin_cookie),
                json!({ "action": "unban" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = h
            .post(
                &format!("/api/admin/users/{}", Uuid::new_v4()),
                Some(&admin_cookie),
                json!({ "action": "unban" }),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_role_changes_apply_to_live_sessions() {
        let h = harness();
        let (_, admin_cookie) = h.user(Role::Admin).await;
        let (user, user_cookie) = h.user(Role::User).await;

        assert_eq!(
            h.get("/api/admin/reports", Some(&user_cookie)).await.0,
            StatusCode::FORBIDDEN
        );

        h.post(
            &format!("/api/admin/users/{}", user.id),
            Some(&admin_cookie),
            json!({ "action": "promote" }),
        )
        .await;

        assert_eq!(
            h.get("/api/admin/reports", Some(&user_cookie)).await.0,
            StatusCode::OK
        );
    }
}

// ============================================================================
// Access Control
// ============================================================================

mod access_control {
    use super::*;

    fn privileged_routes(id: Uuid) -> Vec<(Method, String, Value)> {
        vec![
            (Method::GET, "/api/me".to_string(), Value::Null),
            (Method::GET, "/api/credits".to_string(), Value::Null),
            (
                Method::POST,
                "/api/credits/confirm".to_string(),
                json!({ "payment_intent_id": "pi_x" }),
            ),
            (
                Method::POST,
                "/api/reports".to_string(),
                json!({ "reported_id": id, "reason": "x" }),
            ),
            (Method::GET, format!("/api/reports/{}", id), Value::Null),
            (Method::GET, "/api/admin/reports".to_string(), Value::Null),
            (
                Method::POST,
                format!("/api/admin/reports/{}/review", id),
                json!({ "decision": "resolve" }),
            ),
            (
                Method::POST,
                format!("/api/admin/users/{}", id),
                json!({ "action": "ban", "reason": "x" }),
            ),
            (
                Method::POST,
                format!("/api/admin/users/{}/credits", id),
                json!({ "amount": 5 }),
            ),
        ]
    }

    fn body(value: &Value) -> Option<Value> {
        (!value.is_null()).then(|| value.clone())
    }

    #[tokio::test]
    async fn test_anonymous_requests_get_401() {
        let h = harness();
        for (method, uri, payload) in privileged_routes(Uuid::new_v4()) {
            let (status, body_json) = h.send(method, &uri, None, body(&payload)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
            assert!(body_json["error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_invalid_tokens_get_401() {
        let h = harness();
        // Validly signed, but the user was never stored
        let ghost = User::new("ghost@example.com", Role::Admin);
        let deleted_user_cookie = format!("token={}", h.tokens.issue(ghost.id).unwrap());

        for cookie in ["token=garbage", "token=", "theme=dark", deleted_user_cookie.as_str()] {
            let (status, _) = h.get("/api/credits", Some(cookie)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", cookie);
        }
    }

    #[tokio::test]
    async fn test_regular_users_get_403_on_staff_routes() {
        let h = harness();
        let (_, cookie) = h.user(Role::User).await;
        let (target, _) = h.user(Role::User).await;

        for (method, uri, payload) in privileged_routes(target.id)
            .into_iter()
            .filter(|(_, uri, _)| uri.starts_with("/api/admin"))
        {
            let (status, _) = h.send(method, &uri, Some(&cookie), body(&payload)).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_moderators_cannot_grant_or_promote() {
        let h = harness();
        let (_, mod_cookie) = h.user(Role::Moderator).await;
        let (target, _) = h.user(Role::User).await;

        let (status, _) = h
            .post(
                &format!("/api/admin/users/{}/credits", target.id),
                Some(&mod_cookie),
                json!({ "amount": 5 }),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = h
            .post(
                &format!("/api/admin/users/{}", target.id),
                Some(&mod_cookie),
                json!({ "action": "promote" }),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(h.fetch_user(target.id).await.role, Role::User);
    }

    #[tokio::test]
    async fn test_banned_users_get_403() {
        let h = harness();
        let (user, cookie) = h.user(Role::Admin).await;
        h.db.users().set_ban(user.id, Some("compromised")).await.unwrap();

        for (method, uri, payload) in privileged_routes(Uuid::new_v4())
            .into_iter()
            .filter(|(_, uri, _)| uri != "/api/me")
        {
            let (status, _) = h.send(method, &uri, Some(&cookie), body(&payload)).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_security_headers_present() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert!(response.headers().contains_key("x-ratelimit-limit"));
    }
}

// ============================================================================
// Request Limits
// ============================================================================

mod limits {
    use super::*;

    const MAX_BODY: usize = 64 * 1024;

    fn padded_event(intent_id: &str, owner: Uuid) -> String {
        let mut event: Value =
            serde_json::from_str(&succeeded_event(intent_id, owner, 1000)).unwrap();
        event["padding"] = Value::String("x".repeat(MAX_BODY * 3));
        event.to_string()
    }

    #[tokio::test]
    async fn test_streamed_webhook_over_limit_rejected() {
        let h = harness();
        let (user, _) = h.user(Role::User).await;
        let payload = padded_event("pi_padded", user.id);
        assert!(payload.len() > MAX_BODY);

        // No Content-Length header: the limit must hold while buffering
        let (status, _) = h.webhook(&payload, Some(h.sign(&payload))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(h.fetch_user(user.id).await.credits, 0);
    }

    #[tokio::test]
    async fn test_streamed_json_over_limit_rejected() {
        let h = harness();
        let (user, cookie) = h.user(Role::User).await;
        h.gateway.put(succeeded_intent("pi_big_body", user.id, 1000));

        let (status, body) = h
            .post(
                "/api/credits/confirm",
                Some(&cookie),
                json!({
                    "payment_intent_id": "pi_big_body",
                    "note": "x".repeat(MAX_BODY * 2),
                }),
            )
            .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "Request body too large");
        assert_eq!(h.fetch_user(user.id).await.credits, 0);
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_rejected() {
        let h = harness();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/webhooks/payments")
            .header(header::CONTENT_LENGTH, MAX_BODY + 1)
            .body(Body::from(vec![b'x'; MAX_BODY + 1]))
            .unwrap();

        let (status, _) = read(h.app.clone().oneshot(request).await.unwrap()).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_forwarded_for_does_not_reset_rate_limit() {
        let h = build_with(
            Arc::new(DatabasePool::in_memory()),
            TrustPenalty::default(),
            SecurityMiddlewareConfig {
                rate_limit_per_minute: 2,
                ..SecurityMiddlewareConfig::default()
            },
        );

        let mut statuses = Vec::new();
        for i in 0..4 {
            let request = Request::builder()
                .uri("/health")
                .header("x-forwarded-for", format!("203.0.113.{}", i))
                .body(Body::empty())
                .unwrap();
            statuses.push(h.app.clone().oneshot(request).await.unwrap().status());
        }

        assert_eq!(
            statuses,
            vec![
                StatusCode::OK,
                StatusCode::OK,
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::TOO_MANY_REQUESTS,
            ]
        );
    }

    #[tokio::test]
    async fn test_trusted_proxy_keys_by_forwarded_for() {
        let h = build_with(
            Arc::new(DatabasePool::in_memory()),
            TrustPenalty::default(),
            SecurityMiddlewareConfig {
                rate_limit_per_minute: 1,
                trust_proxy_headers: true,
                ..SecurityMiddlewareConfig::default()
            },
        );

        for i in 0..3 {
            let request = Request::builder()
                .uri("/health")
                .header("x-forwarded-for", format!("203.0.113.{}", i))
                .body(Body::empty())
                .unwrap();
            let status = h.app.clone().oneshot(request).await.unwrap().status();
            assert_eq!(status, StatusCode::OK);
        }
    }
}

// ============================================================================
// Store Availability
// ============================================================================

mod availability {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_store() {
        let h = harness();
        let (status, body) = h.get("/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"], "memory");
    }

    #[tokio::test]
    async fn test_unreachable_database_returns_503() {
        let config = DatabaseConfig {
            postgres_url: "postgresql://market@127.0.0.1:1/market".to_string(),
            postgres_enabled: true,
            max_connections: 1,
            probe_attempts: 2,
            probe_timeout_ms: 200,
            probe_delay_ms: 10,
        };
        let db = Arc::new(DatabasePool::connect(&config).await.unwrap());
        let h = build(db, TrustPenalty::default());

        let (status, body) = h.get("/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Service temporarily unavailable");

        let (status, _) = h.get("/api/credits", Some("token=whatever")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
