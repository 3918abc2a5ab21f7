//! Wallet integration tests.
//!
//! Tests verify:
//! - Wallet endpoints need a signed-in viewer
//! - Staff credits, coin unlocks and their effect on the reader
//! - Insufficient balance and double purchases are rejected
//! - Donations move the work's meter

use axum::http::StatusCode;
use serde_json::json;

use astra_reader::TierConfig;

use super::test_utils::{body_json, get, get_as, post_as, send_json, timed_tier, TestApp};

async fn credit(app: &TestApp, user: &str, amount: i64) {
    let staff = app.staff_token();
    let response = app
        .send(send_json(
            "POST",
            &format!("/admin/wallets/{}/credit", user),
            &staff,
            json!({ "amount": amount }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_wallet_requires_account() {
    let app = TestApp::new().await;

    let response = app.send(get("/wallet")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "authentication_required");
}

#[tokio::test]
async fn test_credit_and_balance() {
    let app = TestApp::new().await;
    let token = app.token("reader-1", false, None);

    let empty = body_json(app.send(get_as("/wallet", &token)).await).await;
    assert_eq!(empty["balance"], 0);

    credit(&app, "reader-1", 120).await;
    credit(&app, "reader-1", 30).await;

    let body = body_json(app.send(get_as("/wallet", &token)).await).await;
    assert_eq!(body["userId"], "reader-1");
    assert_eq!(body["balance"], 150);
}

#[tokio::test]
async fn test_credit_rejects_non_positive_amounts() {
    let app = TestApp::new().await;
    let staff = app.staff_token();

    let response = app
        .send(send_json(
            "POST",
            "/admin/wallets/reader-1/credit",
            &staff,
            json!({ "amount": 0 }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_amount");
}

#[tokio::test]
async fn test_coin_unlock_opens_blocked_chapter() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", timed_tier(), 50).await;
    app.publish_chapters(&work, 2).await;
    let chapter = app.catalog.find_chapter(&work, "2").await.unwrap();

    let token = app.token("reader-1", false, None);
    let blocked = app.send(get_as("/works/solo/chapters/2", &token)).await;
    assert_eq!(blocked.status(), StatusCode::FORBIDDEN);

    credit(&app, "reader-1", 80).await;
    let response = app
        .send(post_as(&format!("/wallet/unlock/{}", chapter.id), &token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let receipt = body_json(response).await;
    assert_eq!(receipt["chapterId"], chapter.id);
    assert_eq!(receipt["cost"], 50);
    assert_eq!(receipt["balance"], 30);

    let open = app.send(get_as("/works/solo/chapters/2", &token)).await;
    assert_eq!(open.status(), StatusCode::OK);

    // The unlock is personal
    let other = app.token("reader-2", false, None);
    let response = app.send(get_as("/works/solo/chapters/2", &other)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let list = body_json(app.send(get_as("/works/solo/chapters", &token)).await).await;
    assert_eq!(list["chapters"][0]["access"]["blocked"], false);
}

#[tokio::test]
async fn test_unlock_twice_is_conflict() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", timed_tier(), 50).await;
    app.publish_chapters(&work, 2).await;
    let chapter = app.catalog.find_chapter(&work, "2").await.unwrap();
    credit(&app, "reader-1", 200).await;

    let token = app.token("reader-1", false, None);
    let uri = format!("/wallet/unlock/{}", chapter.id);
    assert_eq!(app.send(post_as(&uri, &token)).await.status(), StatusCode::OK);

    let again = app.send(post_as(&uri, &token)).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(again).await["error"], "already_unlocked");

    let wallet = body_json(app.send(get_as("/wallet", &token)).await).await;
    assert_eq!(wallet["balance"], 150);
}

#[tokio::test]
async fn test_unlock_without_funds() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", timed_tier(), 50).await;
    app.publish_chapters(&work, 2).await;
    let chapter = app.catalog.find_chapter(&work, "2").await.unwrap();
    credit(&app, "reader-1", 20).await;

    let token = app.token("reader-1", false, None);
    let response = app
        .send(post_as(&format!("/wallet/unlock/{}", chapter.id), &token))
        .await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body_json(response).await["error"], "insufficient_balance");

    let wallet = body_json(app.send(get_as("/wallet", &token)).await).await;
    assert_eq!(wallet["balance"], 20);
}

#[tokio::test]
async fn test_unlock_on_free_work_is_rejected() {
    let app = TestApp::new().await;
    let work = app.create_work("solo", TierConfig::default(), 0).await;
    app.publish_chapters(&work, 1).await;
    let chapter = app.catalog.find_chapter(&work, "1").await.unwrap();
    credit(&app, "reader-1", 100).await;

    let token = app.token("reader-1", false, None);
    let response = app
        .send(post_as(&format!("/wallet/unlock/{}", chapter.id), &token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "not_purchasable");
}

#[tokio::test]
async fn test_unlock_unknown_chapter() {
    let app = TestApp::new().await;
    let token = app.token("reader-1", false, None);

    let response = app.send(post_as("/wallet/unlock/9999", &token)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_donation_moves_meter() {
    let app = TestApp::new().await;
    app.create_work("solo", TierConfig::default(), 0).await;
    credit(&app, "reader-1", 500).await;

    let token = app.token("reader-1", false, None);
    let response = app
        .send(send_json(
            "POST",
            "/wallet/donate/solo",
            &token,
            json!({ "amount": 250 }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let receipt = body_json(response).await;
    assert_eq!(receipt["balance"], 250);
    assert_eq!(receipt["currentDonations"], 250);
    assert_eq!(receipt["donationGoal"], 1000);

    let work = body_json(app.send(get("/works/solo")).await).await;
    assert_eq!(work["currentDonations"], 250);
    assert_eq!(work["donationPercent"], 25);

    let too_much = app
        .send(send_json(
            "POST",
            "/wallet/donate/solo",
            &token,
            json!({ "amount": 1000 }),
        ))
        .await;
    assert_eq!(too_much.status(), StatusCode::PAYMENT_REQUIRED);
}
