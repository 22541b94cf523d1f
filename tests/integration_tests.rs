//! End-to-end scenario coverage over a tempfile SQLite database and a
//! `wiremock`-stubbed TRON RPC / price-feed backend, one test per seeded
//! scenario from the escrow flow: happy path, deposit tolerance, deadline
//! expiry (refund and auto-release), dispute resolution with autoban, and
//! the chain client's circuit breaker under an RPC outage.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use escrow_arbiter::chain::{ChainClient, PriceFeed};
use escrow_arbiter::db::{self, audit, deals, sessions, transactions, users};
use escrow_arbiter::deposit_monitor::DepositMonitor;
use escrow_arbiter::deadline_monitor::DeadlineMonitor;
use escrow_arbiter::dispute;
use escrow_arbiter::models::{CommissionPayer, DealStatus, DisputeOutcome, MicroUsdt, PendingKeyValidation, TransactionKind};
use escrow_arbiter::notifier::{NavigationState, QueuedNotifier};
use escrow_arbiter::payout::resource::HttpEnergyRentalProvider;
use escrow_arbiter::payout::{self, PayoutRequest};
use escrow_arbiter::state_machine::DealEvent;
use tempfile::tempdir;
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USDT_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
const ARBITER_ADDRESS: &str = "TArbiterAddr";
const COMMISSION_WALLET: &str = "TCommissionWallet";

/// Returns the pool alongside its backing `TempDir`; callers must keep the
/// directory alive for the lifetime of the test or its database file vanishes
/// out from under the pool.
fn test_pool(name: &str) -> (tempfile::TempDir, db::SqlitePool) {
    let dir = tempdir().unwrap();
    let pool = db::init_db(dir.path().join(format!("{name}.db"))).unwrap();
    (dir, pool)
}

fn test_notifier() -> Arc<QueuedNotifier> {
    Arc::new(QueuedNotifier {
        target_url_for_user: Arc::new(|u: &str| format!("https://chat.example/{u}")),
        nav: Arc::new(NavigationState::new()),
    })
}

async fn mock_trc20_transfer(server: &MockServer, address: &str, amount_micro: i64) {
    Mock::given(method("GET"))
        .and(path_regex(format!("^/v1/accounts/{address}/transactions/trc20$")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "transaction_id": format!("tx-{amount_micro}"),
            "from": "TBuyerExternal",
            "to": address,
            "token_contract": USDT_CONTRACT,
            "amount_micro": amount_micro,
            "block_timestamp": 0,
            "confirmed": true,
        }])))
        .mount(server)
        .await;
}

async fn mock_no_transfers(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex("^/v1/accounts/.*/transactions/trc20$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(server)
        .await;
}

/// Low balance keeps `sweep_excess_trx` a no-op so payout tests don't also
/// need a broadcast stub for the sweep leg.
async fn mock_low_balance(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/wallet/getaccount"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "address": "TMultisig", "trx_sun": 500_000, "usdt_micro": 0,
        })))
        .mount(server)
        .await;
}

async fn mock_broadcasts_accept(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/wallet/broadcasttransaction"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tx_hash": "trx-broadcast", "accepted": true, "message": null,
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/wallet/triggersmartcontract"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tx_hash": "usdt-broadcast", "accepted": true, "message": null,
        })))
        .mount(server)
        .await;
}

async fn mock_price_feed(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/price/trx-usd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "trx_usd": 0.28 })))
        .mount(server)
        .await;
}

fn provision(conn: &mut rusqlite::Connection, deal_id: Uuid, version: i64) -> escrow_arbiter::models::Deal {
    deals::provision_wallet(conn, deal_id, version, "TMultisig", "TBuyerKey", "TSellerKey", "TArbiterKey").unwrap()
}

#[tokio::test]
async fn s1_happy_path_deposit_and_release() {
    let (_dir, pool) = test_pool("s1");
    let mut conn = pool.get().unwrap();

    let deadline = Utc::now().naive_utc() + ChronoDuration::hours(72);
    let deal = deals::create_deal(
        &conn,
        "buyer1",
        "seller1",
        "arbiter1",
        MicroUsdt::from_usdt(100),
        "TBuyerPayout",
        "TSellerPayout",
        CommissionPayer::Buyer,
        deadline,
    )
    .unwrap();
    assert_eq!(deal.status, DealStatus::Created);
    assert_eq!(deal.commission(), MicroUsdt::from_usdt(15));
    assert_eq!(deal.deposit_required(), MicroUsdt::from_usdt(115));
    assert_eq!(deal.payout_amount(), MicroUsdt::from_usdt(100));

    provision(&mut conn, deal.id, deal.version);

    let server = MockServer::start().await;
    mock_trc20_transfer(&server, "TMultisig", 115_000_000).await;
    mock_low_balance(&server).await;
    mock_broadcasts_accept(&server).await;
    mock_price_feed(&server).await;

    let base_url = url::Url::parse(&server.uri()).unwrap();
    let chain = Arc::new(ChainClient::new(base_url.clone(), USDT_CONTRACT).unwrap());
    let notifier = test_notifier();
    let monitor = DepositMonitor::new(pool.clone(), chain.clone(), notifier.clone(), ARBITER_ADDRESS.to_string());
    monitor.run_cycle().await.unwrap();

    let funded = deals::get_deal(&conn, deal.id).unwrap().unwrap();
    assert_eq!(funded.status, DealStatus::Funded);
    assert!(funded.deposit_notification_sent);

    let due = db::notifications::fetch_due(&conn, 10).unwrap();
    assert_eq!(due.len(), 2, "both buyer and seller should be notified exactly once");

    let price_feed = PriceFeed::new(base_url.clone());
    let rental: Option<&HttpEnergyRentalProvider> = None;
    let released = payout::run(
        &mut conn,
        &chain,
        &price_feed,
        rental,
        PayoutRequest {
            deal_id: deal.id,
            recipient_address: &funded.seller_payout_address,
            net_amount: funded.payout_amount(),
            commission: funded.commission(),
            commission_wallet: COMMISSION_WALLET,
            arbiter_address: ARBITER_ADDRESS,
            recipient_signing_key: "stub-seller-key",
            terminal_event: DealEvent::BuyerReleaseApproved,
            payout_kind: TransactionKind::Payout,
        },
    )
    .await
    .unwrap();

    assert_eq!(released.status, DealStatus::Released);
    assert!(released.operational_costs.is_some());

    let txs = transactions::list_for_deal(&conn, deal.id).unwrap();
    assert!(txs.iter().any(|t| t.kind == TransactionKind::Deposit && t.amount == MicroUsdt::from_usdt(115)));
    assert!(txs.iter().any(|t| t.kind == TransactionKind::Payout && t.amount == MicroUsdt::from_usdt(100)));
    assert!(txs.iter().any(|t| t.kind == TransactionKind::Commission && t.amount == MicroUsdt::from_usdt(15)));
}

#[tokio::test]
async fn s2_deposit_within_tolerance_accepted_below_rejected() {
    let (_dir, pool) = test_pool("s2");
    let conn = pool.get().unwrap();
    let deadline = Utc::now().naive_utc() + ChronoDuration::hours(72);

    // Seller covers the commission, so deposit_required == amount == 50.
    let accepted_deal = deals::create_deal(
        &conn,
        "buyer_a",
        "seller_a",
        "arbiter1",
        MicroUsdt::from_usdt(50),
        "TBuyerPayoutA",
        "TSellerPayoutA",
        CommissionPayer::Seller,
        deadline,
    )
    .unwrap();
    let rejected_deal = deals::create_deal(
        &conn,
        "buyer_b",
        "seller_b",
        "arbiter1",
        MicroUsdt::from_usdt(50),
        "TBuyerPayoutB",
        "TSellerPayoutB",
        CommissionPayer::Seller,
        deadline,
    )
    .unwrap();
    assert_eq!(accepted_deal.deposit_required(), MicroUsdt::from_usdt(50));

    let mut conn = pool.get().unwrap();
    deals::provision_wallet(&mut conn, accepted_deal.id, accepted_deal.version, "TMultisigA", "TBKeyA", "TSKeyA", "TArbiterKey").unwrap();
    deals::provision_wallet(&mut conn, rejected_deal.id, rejected_deal.version, "TMultisigB", "TBKeyB", "TSKeyB", "TArbiterKey").unwrap();

    let server = MockServer::start().await;
    mock_trc20_transfer(&server, "TMultisigA", 48_500_000).await; // 48.5 USDT: within the 2 USDT tolerance
    mock_trc20_transfer(&server, "TMultisigB", 47_990_000).await; // 47.99 USDT: outside tolerance
    mock_broadcasts_accept(&server).await;

    let base_url = url::Url::parse(&server.uri()).unwrap();
    let chain = Arc::new(ChainClient::new(base_url, USDT_CONTRACT).unwrap());
    let notifier = test_notifier();
    let monitor = DepositMonitor::new(pool.clone(), chain, notifier, ARBITER_ADDRESS.to_string());
    monitor.run_cycle().await.unwrap();

    let accepted = deals::get_deal(&conn, accepted_deal.id).unwrap().unwrap();
    let rejected = deals::get_deal(&conn, rejected_deal.id).unwrap().unwrap();
    assert_eq!(accepted.status, DealStatus::Funded);
    assert_eq!(rejected.status, DealStatus::AwaitingDeposit);
}

#[tokio::test]
async fn s3_deadline_expiry_then_buyer_refund() {
    let (_dir, pool) = test_pool("s3");
    let mut conn = pool.get().unwrap();

    // Deadline and grace window both already elapsed, so one sweep covers
    // the notification and the key-validation prompt together.
    let deadline = Utc::now().naive_utc() - ChronoDuration::hours(13);
    let deal = deals::create_deal(
        &conn,
        "buyer1",
        "seller1",
        "arbiter1",
        MicroUsdt::from_usdt(300),
        "TBuyerPayout",
        "TSellerPayout",
        CommissionPayer::Buyer,
        deadline,
    )
    .unwrap();
    assert_eq!(deal.commission(), MicroUsdt::from_usdt(15));

    let provisioned = provision(&mut conn, deal.id, deal.version);
    deals::apply_transition(&mut conn, deal.id, provisioned.version, DealEvent::DepositDetected, "system", "deposit").unwrap();

    let notifier = test_notifier();
    let deadline_monitor = DeadlineMonitor::new(pool.clone(), notifier);
    deadline_monitor.run_cycle().await.unwrap();

    let expired = deals::get_deal(&conn, deal.id).unwrap().unwrap();
    assert!(expired.deadline_notification_sent);
    assert_eq!(expired.pending_key_validation, Some(PendingKeyValidation::BuyerRefund));

    let sessions = sessions::find_valid(&conn, find_session_id(&conn, deal.id), "key_validation").unwrap();
    assert!(sessions.is_some());

    let server = MockServer::start().await;
    mock_low_balance(&server).await;
    mock_broadcasts_accept(&server).await;
    mock_price_feed(&server).await;
    let base_url = url::Url::parse(&server.uri()).unwrap();
    let chain = ChainClient::new(base_url.clone(), USDT_CONTRACT).unwrap();
    let price_feed = PriceFeed::new(base_url);
    let rental: Option<&HttpEnergyRentalProvider> = None;

    let refunded = payout::run(
        &mut conn,
        &chain,
        &price_feed,
        rental,
        PayoutRequest {
            deal_id: deal.id,
            recipient_address: &expired.buyer_payout_address,
            net_amount: expired.payout_amount(),
            commission: expired.commission(),
            commission_wallet: COMMISSION_WALLET,
            arbiter_address: ARBITER_ADDRESS,
            recipient_signing_key: "stub-buyer-key",
            terminal_event: DealEvent::DeadlineGraceExpiredAutoRefund,
            payout_kind: TransactionKind::Refund,
        },
    )
    .await
    .unwrap();

    assert_eq!(refunded.status, DealStatus::Refunded);
    assert_eq!(refunded.payout_amount(), MicroUsdt::from_usdt(285));
}

/// Test-only helper: the Deadline Monitor doesn't hand back the session id it
/// creates, so pull the most recent one directly for assertions.
fn find_session_id(conn: &rusqlite::Connection, deal_id: Uuid) -> Uuid {
    conn.query_row(
        "SELECT id FROM sessions WHERE deal_id = :deal_id ORDER BY created_at DESC LIMIT 1",
        rusqlite::named_params! { ":deal_id": deal_id.to_string() },
        |row| row.get::<_, String>(0),
    )
    .map(|s| Uuid::parse_str(&s).unwrap())
    .unwrap()
}

#[tokio::test]
async fn s4_auto_release_after_silence() {
    let (_dir, pool) = test_pool("s4");
    let mut conn = pool.get().unwrap();

    let deadline = Utc::now().naive_utc() - ChronoDuration::hours(13);
    // Seller covers the commission so the buyer's silence doesn't cost the
    // seller anything beyond the commission itself: payout = 100 - 15 = 85.
    let deal = deals::create_deal(
        &conn,
        "buyer1",
        "seller1",
        "arbiter1",
        MicroUsdt::from_usdt(100),
        "TBuyerPayout",
        "TSellerPayout",
        CommissionPayer::Seller,
        deadline,
    )
    .unwrap();

    let provisioned = provision(&mut conn, deal.id, deal.version);
    deals::apply_transition(&mut conn, deal.id, provisioned.version, DealEvent::DepositDetected, "system", "deposit").unwrap();
    deals::mark_work_submitted(&conn, deal.id).unwrap();

    let notifier = test_notifier();
    let deadline_monitor = DeadlineMonitor::new(pool.clone(), notifier);
    deadline_monitor.run_cycle().await.unwrap();

    let swept = deals::get_deal(&conn, deal.id).unwrap().unwrap();
    assert_eq!(swept.pending_key_validation, Some(PendingKeyValidation::SellerRelease));

    let server = MockServer::start().await;
    mock_low_balance(&server).await;
    mock_broadcasts_accept(&server).await;
    mock_price_feed(&server).await;
    let base_url = url::Url::parse(&server.uri()).unwrap();
    let chain = ChainClient::new(base_url.clone(), USDT_CONTRACT).unwrap();
    let price_feed = PriceFeed::new(base_url);
    let rental: Option<&HttpEnergyRentalProvider> = None;

    let released = payout::run(
        &mut conn,
        &chain,
        &price_feed,
        rental,
        PayoutRequest {
            deal_id: deal.id,
            recipient_address: &swept.seller_payout_address,
            net_amount: swept.payout_amount(),
            commission: swept.commission(),
            commission_wallet: COMMISSION_WALLET,
            arbiter_address: ARBITER_ADDRESS,
            recipient_signing_key: "stub-seller-key",
            terminal_event: DealEvent::DeadlineReachedAutoRelease,
            payout_kind: TransactionKind::Payout,
        },
    )
    .await
    .unwrap();

    assert_eq!(released.status, DealStatus::Released);
    assert_eq!(swept.payout_amount(), MicroUsdt::from_usdt(85));
}

#[tokio::test]
async fn s5_dispute_buyer_wins_seller_third_loss_autobans() {
    let (_dir, pool) = test_pool("s5");
    let mut conn = pool.get().unwrap();

    // Seller already lost two prior disputes; this one is the third.
    users::record_outcome(&conn, "seller1", false).unwrap();
    users::record_outcome(&conn, "seller1", false).unwrap();

    let deadline = Utc::now().naive_utc() + ChronoDuration::hours(72);
    let deal = deals::create_deal(
        &conn,
        "buyer1",
        "seller1",
        "arbiter1",
        MicroUsdt::from_usdt(100),
        "TBuyerPayout",
        "TSellerPayout",
        CommissionPayer::Buyer,
        deadline,
    )
    .unwrap();
    let provisioned = provision(&mut conn, deal.id, deal.version);
    deals::apply_transition(&mut conn, deal.id, provisioned.version, DealEvent::DepositDetected, "system", "deposit").unwrap();

    dispute::open(&mut conn, deal.id, "buyer1", "seller never delivered the agreed work").unwrap();
    let resolution = dispute::resolve(&mut conn, deal.id, DisputeOutcome::Buyer, "no proof of delivery was provided").unwrap();

    assert_eq!(resolution.deal.status, DealStatus::Disputed, "stays open until payout clears");
    assert!(resolution.loser_autobanned);
    assert_eq!(resolution.loser_stats.loss_streak, 3);

    let notes = audit::list_for_deal(&conn, deal.id).unwrap();
    assert!(notes.iter().any(|n| n.actor == "arbiter"));

    let server = MockServer::start().await;
    mock_low_balance(&server).await;
    mock_broadcasts_accept(&server).await;
    mock_price_feed(&server).await;
    let base_url = url::Url::parse(&server.uri()).unwrap();
    let chain = ChainClient::new(base_url.clone(), USDT_CONTRACT).unwrap();
    let price_feed = PriceFeed::new(base_url);
    let rental: Option<&HttpEnergyRentalProvider> = None;

    let current = deals::get_deal(&conn, deal.id).unwrap().unwrap();
    let resolved = payout::run(
        &mut conn,
        &chain,
        &price_feed,
        rental,
        PayoutRequest {
            deal_id: deal.id,
            recipient_address: &current.buyer_payout_address,
            net_amount: current.payout_amount(),
            commission: current.commission(),
            commission_wallet: COMMISSION_WALLET,
            arbiter_address: ARBITER_ADDRESS,
            recipient_signing_key: "stub-buyer-key",
            terminal_event: DealEvent::ArbiterRulesForBuyer,
            payout_kind: TransactionKind::Refund,
        },
    )
    .await
    .unwrap();
    assert_eq!(resolved.status, DealStatus::ResolvedBuyer);

    // A blacklisted seller can no longer be party to a new deal.
    let err = deals::create_deal(
        &conn,
        "buyer2",
        "seller1",
        "arbiter1",
        MicroUsdt::from_usdt(10),
        "TBuyerPayout2",
        "TSellerPayout2",
        CommissionPayer::Buyer,
        deadline,
    )
    .unwrap_err();
    assert!(matches!(err, db::StoreError::InvalidInput(_)));
}

#[tokio::test]
async fn s6_rpc_outage_opens_breaker_and_monitor_degrades_gracefully() {
    let (_dir, pool) = test_pool("s6");
    let conn = pool.get().unwrap();

    let deadline = Utc::now().naive_utc() + ChronoDuration::hours(72);
    let deal = deals::create_deal(
        &conn,
        "buyer1",
        "seller1",
        "arbiter1",
        MicroUsdt::from_usdt(50),
        "TBuyerPayout",
        "TSellerPayout",
        CommissionPayer::Buyer,
        deadline,
    )
    .unwrap();
    let mut conn = pool.get().unwrap();
    provision(&mut conn, deal.id, deal.version);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wallet/getaccount"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mock_no_transfers(&server).await;

    let base_url = url::Url::parse(&server.uri()).unwrap();
    let chain = Arc::new(ChainClient::new(base_url, USDT_CONTRACT).unwrap());

    use escrow_arbiter::chain::BreakerState;
    assert_eq!(chain.breaker().state(), BreakerState::Closed);

    // One real failing round-trip through wiremock, then the remaining trips
    // to the threshold are driven directly against the same breaker instance
    // the client holds, to avoid waiting out the client's own retry backoff
    // five times over.
    assert!(chain.get_balance("TMultisig").await.is_err());
    for _ in 0..4 {
        chain.breaker().record_failure();
    }
    assert_eq!(chain.breaker().state(), BreakerState::Open);

    let err = chain.get_balance("TMultisig").await.unwrap_err();
    assert!(matches!(err, escrow_arbiter::chain::ChainError::CircuitOpen));

    // The deposit monitor treats a per-deal chain error as "skip and log",
    // never as a reason to crash the whole cycle.
    let notifier = test_notifier();
    let monitor = DepositMonitor::new(pool.clone(), chain.clone(), notifier, ARBITER_ADDRESS.to_string());
    monitor.run_cycle().await.unwrap();

    let still_awaiting = deals::get_deal(&conn, deal.id).unwrap().unwrap();
    assert_eq!(still_awaiting.status, DealStatus::AwaitingDeposit);
    assert!(!still_awaiting.deposit_notification_sent);
}
