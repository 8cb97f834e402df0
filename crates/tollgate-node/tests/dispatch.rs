use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::{http::header::HeaderValue, test, web, App};
use serde_json::{json, Value};
use tollgate::{
    Chain, InMemoryLedger, ParsedInstruction, PaymentVerifier, TokenConfig, TransactionRecord,
    TOKEN_PROGRAM_ID,
};
use tollgate_node::{
    handler_fn, routes, AppState, EchoHandler, HandlerError, HandlerOptions, HandlerRegistry,
    MeteredDispatcher, NodeConfig, Params, StatsAggregator,
};

const WALLET: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";
const WALLET_ATA: &str = "WalletTokenAccount1111111111111111111111111";
const STRANGER_ATA: &str = "StrangerTokenAccount11111111111111111111111";
const PAYER: &str = "PayerWa11et11111111111111111111111111111111";

/// Helper: a confirmed transfer of `amount` raw units into `destination`.
fn transfer_tx(signature: &str, destination: &str, amount: &str) -> TransactionRecord {
    TransactionRecord {
        signature: signature.to_string(),
        failed: false,
        instructions: vec![ParsedInstruction::transfer(
            TOKEN_PROGRAM_ID,
            "PayerTokenAccount",
            destination,
            PAYER,
            amount,
        )],
        inner_instructions: vec![],
    }
}

fn ledger() -> Arc<InMemoryLedger> {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.insert_token_account(WALLET_ATA, Some(WALLET));
    ledger.insert_token_account(STRANGER_ATA, Some("SomeoneE1se111111111111111111111111111111111"));
    ledger.insert_transaction(transfer_tx("paid-0.01", WALLET_ATA, "10000"));
    ledger.insert_transaction(transfer_tx("paid-0.005", WALLET_ATA, "5000"));
    ledger.insert_transaction(transfer_tx("paid-elsewhere", STRANGER_ATA, "10000"));
    ledger
}

fn config(extra: &[(&str, &str)]) -> NodeConfig {
    let mut vars: HashMap<String, String> = extra
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    vars.insert("WALLET_ADDRESS".to_string(), WALLET.to_string());
    NodeConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Build node state with `echo` at 0.01 plus whatever `setup` registers.
fn make_state(extra: &[(&str, &str)], setup: impl FnOnce(&HandlerRegistry)) -> web::Data<AppState> {
    let config = config(extra);
    let verifier = PaymentVerifier::new(config.chains.clone(), TokenConfig::default())
        .with_ledger(Chain::Devnet, ledger());

    let handlers = HandlerRegistry::new(config.default_price, config.default_timeout);
    handlers
        .register("echo", EchoHandler, HandlerOptions::default().price(0.01))
        .unwrap();
    setup(&handlers);

    let dispatcher = MeteredDispatcher::new(
        Arc::new(verifier),
        Arc::new(handlers),
        Arc::new(StatsAggregator::new()),
        WALLET,
    );
    web::Data::new(AppState::new(config, dispatcher))
}

fn call_request(payment: Option<&str>, body: Value) -> test::TestRequest {
    let mut req = test::TestRequest::post()
        .uri("/call")
        .insert_header(("Content-Type", "application/json"))
        .set_payload(body.to_string());
    if let Some(payment) = payment {
        req = req.insert_header(("X-Payment", payment));
    }
    req
}

// -- End-to-end metered calls --

#[actix_rt::test]
async fn test_paid_call_succeeds_and_is_accounted() {
    let state = make_state(&[], |_| {});
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(
        Some("paid-0.01"),
        json!({ "api": "echo", "params": { "hello": "world" } }),
    )
    .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["hello"], "world");
    assert_eq!(body["cost"], 0.01);
    assert!(body["requestId"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(body["latency"].is_u64());
    assert!(body["timestamp"].is_string());

    let stats = state.dispatcher.stats().snapshot();
    assert_eq!(stats.requests_served, 1);
    assert_eq!(stats.total_earnings, 0.01);
    assert_eq!(stats.error_count, 0);
}

#[actix_rt::test]
async fn test_free_call_below_price_is_402() {
    let state = make_state(&[], |_| {});
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(
        Some("free-api-call"),
        json!({ "api": "echo", "params": {} }),
    )
    .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 402);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "insufficient_payment");
    assert_eq!(body["required"], 0.01);
    assert_eq!(body["received"], 0.0);
    assert!(body["requestId"].is_string());
    assert!(body["latency"].is_u64());

    let stats = state.dispatcher.stats().snapshot();
    assert_eq!(stats.requests_served, 0);
    assert_eq!(stats.error_count, 0);
}

#[actix_rt::test]
async fn test_missing_payment_header_is_free_call() {
    let state = make_state(&[], |h| {
        h.register("ping", EchoHandler, HandlerOptions::default().price(0.0))
            .unwrap();
    });
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(None, json!({ "api": "ping", "params": {} })).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["cost"], 0.0);
}

#[actix_rt::test]
async fn test_underpaid_call_is_402() {
    let state = make_state(&[], |_| {});
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(Some("paid-0.005"), json!({ "api": "echo", "params": {} })).to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 402);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["required"], 0.01);
    assert_eq!(body["received"], 0.005);
}

#[actix_rt::test]
async fn test_unknown_api_is_500_and_counted() {
    let state = make_state(&[], |_| {});
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(Some("paid-0.01"), json!({ "api": "missing", "params": {} })).to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 500);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "handler_not_found");
    assert!(body["error"].as_str().unwrap().contains("unknown API"));
    assert!(body["error"].as_str().unwrap().contains("missing"));
    assert_eq!(state.dispatcher.stats().snapshot().error_count, 1);
}

#[actix_rt::test]
async fn test_slow_handler_times_out() {
    let state = make_state(&[], |h| {
        h.register(
            "echo",
            handler_fn(|params: Params| async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok::<_, HandlerError>(Value::Object(params))
            }),
            HandlerOptions::default()
                .price(0.01)
                .timeout(Duration::from_secs(1)),
        )
        .unwrap();
    });
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(Some("paid-0.01"), json!({ "api": "echo", "params": {} })).to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 500);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "handler_timeout");
    assert!(body["error"].as_str().unwrap().contains("timed out"));
    assert!(body["latency"].as_u64().unwrap() >= 1000);

    let stats = state.dispatcher.stats().snapshot();
    assert_eq!(stats.error_count, 1);
    assert_eq!(stats.requests_served, 0);
    assert_eq!(stats.total_earnings, 0.0);
}

#[actix_rt::test]
async fn test_timed_out_handler_is_aborted() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let state = make_state(&[], move |h| {
        h.register(
            "slow",
            handler_fn(move |_params: Params| {
                let flag = Arc::clone(&flag);
                async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok::<_, HandlerError>(json!({}))
                }
            }),
            HandlerOptions::default()
                .price(0.0)
                .timeout(Duration::from_millis(50)),
        )
        .unwrap();
    });
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(None, json!({ "api": "slow", "params": {} })).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!finished.load(Ordering::SeqCst), "handler kept running after timeout");
}

#[actix_rt::test]
async fn test_failing_handler_is_500() {
    let state = make_state(&[], |h| {
        h.register(
            "broken",
            handler_fn(|_params: Params| async {
                Err::<Value, _>(HandlerError::new("database unavailable"))
            }),
            HandlerOptions::default().price(0.0),
        )
        .unwrap();
    });
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(None, json!({ "api": "broken", "params": {} })).to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 500);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "handler_error");
    assert!(body["error"].as_str().unwrap().contains("database unavailable"));
    assert_eq!(state.dispatcher.stats().snapshot().error_count, 1);
}

#[actix_rt::test]
async fn test_reregistration_changes_price() {
    let state = make_state(&[], |h| {
        h.register("echo", EchoHandler, HandlerOptions::default().price(0.02))
            .unwrap();
    });
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(Some("paid-0.01"), json!({ "api": "echo", "params": {} })).to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 402);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["required"], 0.02);
}

#[actix_rt::test]
async fn test_padded_api_name_reaches_handler() {
    let state = make_state(&[], |_| {});
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(
        Some("paid-0.01"),
        json!({ "api": " echo ", "params": { "n": 2 } }),
    )
    .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["n"], 2);
    assert_eq!(state.dispatcher.stats().snapshot().error_count, 0);
}

// -- Rejections before execution --

#[actix_rt::test]
async fn test_payment_to_other_wallet_is_402() {
    let state = make_state(&[], |_| {});
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(Some("paid-elsewhere"), json!({ "api": "echo", "params": {} })).to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 402);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "payment_rejected");
    assert_eq!(state.dispatcher.stats().snapshot().error_count, 0);
}

#[actix_rt::test]
async fn test_unknown_signature_is_402() {
    let state = make_state(&[], |_| {});
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(Some("never-happened"), json!({ "api": "echo", "params": {} })).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 402);
}

#[actix_rt::test]
async fn test_unreadable_payment_header_is_400() {
    let state = make_state(&[], |h| {
        h.register("ping", EchoHandler, HandlerOptions::default().price(0.0))
            .unwrap();
    });
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(None, json!({ "api": "ping", "params": {} }))
        .insert_header((
            "X-Payment",
            HeaderValue::from_bytes(b"sig\xff\xfe").unwrap(),
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "bad_request");
    assert!(body["error"].as_str().unwrap().contains("X-Payment"));
    assert!(body["requestId"].is_string());

    let stats = state.dispatcher.stats().snapshot();
    assert_eq!(stats.requests_served, 0);
    assert_eq!(stats.error_count, 0);
}

#[actix_rt::test]
async fn test_unsupported_chain_is_400() {
    let state = make_state(&[], |_| {});
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    for chain in ["mainnet", "ethereum"] {
        let req = call_request(Some("paid-0.01"), json!({ "api": "echo", "params": {} }))
            .insert_header(("X-Payment-Chain", chain))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 400, "chain {chain}");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "unsupported_chain");
    }
}

#[actix_rt::test]
async fn test_malformed_bodies_are_400() {
    let state = make_state(&[], |_| {});
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let bodies = [
        json!({ "params": {} }),
        json!({ "api": 42, "params": {} }),
        json!({ "api": "echo" }),
        json!({ "api": "echo", "params": "nope" }),
        json!(["echo"]),
    ];
    for body in bodies {
        let req = call_request(Some("paid-0.01"), body.clone()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400, "body {body}");
        let json: Value = test::read_body_json(resp).await;
        assert_eq!(json["code"], "bad_request");
        assert!(json["requestId"].is_string());
    }

    let req = test::TestRequest::post()
        .uri("/call")
        .insert_header(("X-Payment", "paid-0.01"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let stats = state.dispatcher.stats().snapshot();
    assert_eq!(stats.requests_served, 0);
    assert_eq!(stats.error_count, 0);
}

// -- Free endpoints --

#[actix_rt::test]
async fn test_health_reports_node() {
    let state = make_state(&[], |_| {});
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = call_request(Some("paid-0.01"), json!({ "api": "echo", "params": {} })).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["apis"], json!(["echo"]));
    assert_eq!(body["wallet"], WALLET);
    assert_eq!(body["chains"], json!(["devnet"]));
    assert_eq!(body["stats"]["requestsServed"], 1);
    assert_eq!(body["stats"]["totalEarnings"], 0.01);
    assert!(body["stats"]["uptime"].is_u64());
}

#[actix_rt::test]
async fn test_apis_lists_prices() {
    let state = make_state(&[], |h| {
        h.register("quote", EchoHandler, HandlerOptions::default().timeout(Duration::from_secs(5)))
            .unwrap();
    });
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = test::TestRequest::get().uri("/apis").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body[0]["name"], "echo");
    assert_eq!(body[0]["price"], 0.01);
    assert_eq!(body[1]["name"], "quote");
    assert_eq!(body[1]["price"], 0.01);
    assert_eq!(body[1]["timeoutSecs"], 5.0);
}

#[actix_rt::test]
async fn test_metrics_requires_token_when_configured() {
    let state = make_state(&[("METRICS_TOKEN", "scrape-me")], |_| {});
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get()
        .uri("/metrics")
        .insert_header(("Authorization", "Bearer wrong"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get()
        .uri("/metrics")
        .insert_header(("Authorization", "Bearer scrape-me"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}
