//! Webhook transport tests: the router is served on a free port with fake collaborators
//! and driven with reqwest.

mod common;

use apolo::channels::InboundMessage;
use apolo::gateway::{self, WebhookSettings};
use common::{harness, Harness, RagBehavior, NOT_A_LEAD, SENDER};
use serde_json::{json, Value};
use std::time::Duration;

const BOT: &str = "5219980000000";

fn settings() -> WebhookSettings {
    WebhookSettings {
        port: 0,
        verify_token: None,
        bot_number: Some(BOT.to_string()),
        provider: "recording".to_string(),
    }
}

async fn serve(h: &Harness) -> String {
    let (app, _processor) = gateway::router(h.orchestrator.clone(), settings());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

fn cloud_text(id: &str, from: &str, body: &str) -> Value {
    json!({
        "entry": [{
            "changes": [{
                "value": {
                    "messages": [{
                        "id": id,
                        "from": from,
                        "type": "text",
                        "timestamp": "1718000000",
                        "text": { "body": body }
                    }]
                }
            }]
        }]
    })
}

async fn post_status(client: &reqwest::Client, url: &str, payload: &Value) -> (u16, String) {
    let res = client.post(url).json(payload).send().await.expect("post webhook");
    let status = res.status().as_u16();
    let body: Value = res.json().await.expect("json ack");
    (status, body["status"].as_str().unwrap_or_default().to_string())
}

/// Wait until the messenger has recorded `n` parts (or give up after 5s).
async fn wait_for_sends(h: &Harness, n: usize) {
    for _ in 0..100 {
        if h.messenger.sent().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("expected {} sends, saw {:?}", n, h.messenger.sent());
}

#[tokio::test]
async fn duplicate_delivery_is_acknowledged_and_answered_once() {
    let h = harness(NOT_A_LEAD, RagBehavior::Answer("¡Hola! ¿Qué zona te interesa?".to_string()));
    let base = serve(&h).await;
    let client = reqwest::Client::new();
    let url = format!("{}/webhook", base);
    let payload = cloud_text("wamid.HBgLNTIx", SENDER, "Hola");

    assert_eq!(post_status(&client, &url, &payload).await, (200, "accepted".to_string()));
    assert_eq!(post_status(&client, &url, &payload).await, (200, "accepted".to_string()));

    wait_for_sends(&h, 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let sent = h.messenger.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, SENDER);
}

#[tokio::test]
async fn skipped_payloads_report_their_status() {
    let h = harness(NOT_A_LEAD, RagBehavior::Answer("hola".to_string()));
    let base = serve(&h).await;
    let client = reqwest::Client::new();
    let url = format!("{}/webhook", base);

    let own = cloud_text("wamid.own", BOT, "Mensaje del bot");
    assert_eq!(post_status(&client, &url, &own).await.1, "self_bot_number");

    let blank = cloud_text("wamid.blank", SENDER, "   ");
    assert_eq!(post_status(&client, &url, &blank).await.1, "empty");

    let mut image = cloud_text("wamid.img", SENDER, "");
    image["entry"][0]["changes"][0]["value"]["messages"][0]["type"] = json!("image");
    assert_eq!(post_status(&client, &url, &image).await.1, "not_text");

    let statuses = json!({ "entry": [{ "changes": [{ "value": { "statuses": [] } }] }] });
    assert_eq!(post_status(&client, &url, &statuses).await, (200, "no_message".to_string()));

    let res = client
        .post(&url)
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .expect("post webhook");
    assert_eq!(res.status().as_u16(), 400);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.messenger.sent().is_empty());
}

#[tokio::test]
async fn handshake_without_configured_token_is_forbidden() {
    let h = harness(NOT_A_LEAD, RagBehavior::Answer("hola".to_string()));
    let base = serve(&h).await;
    let res = reqwest::Client::new()
        .get(format!("{}/webhook", base))
        .query(&[("hub.mode", "subscribe"), ("hub.verify_token", ""), ("hub.challenge", "7")])
        .send()
        .await
        .expect("handshake request");
    assert_eq!(res.status().as_u16(), 403);
}

#[tokio::test]
async fn twilio_form_is_processed() {
    let h = harness(NOT_A_LEAD, RagBehavior::Answer("Con gusto te ayudo.".to_string()));
    let base = serve(&h).await;
    let client = reqwest::Client::new();
    let url = format!("{}/twilio/webhook", base);

    let res = client
        .post(&url)
        .form(&[
            ("MessageSid", "SM0123456789"),
            ("From", "whatsapp:+5215550000"),
            ("Body", "Hola, ¿tienen casas en renta?"),
        ])
        .send()
        .await
        .expect("post twilio webhook");
    assert_eq!(res.status().as_u16(), 200);

    wait_for_sends(&h, 1).await;
    assert_eq!(h.messenger.sent()[0].0, "+5215550000");

    let missing = client
        .post(&url)
        .form(&[("MessageSid", "SM999"), ("From", "whatsapp:+5215550000")])
        .send()
        .await
        .expect("post twilio webhook");
    assert_eq!(missing.status().as_u16(), 400);
}

#[tokio::test]
async fn closing_the_queue_waits_for_in_flight_messages() {
    let h = harness(
        NOT_A_LEAD,
        RagBehavior::Delay(Duration::from_millis(150), "Claro, con gusto.".to_string()),
    );
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let processor = gateway::spawn_processor(h.orchestrator.clone(), rx);

    for i in 0..3 {
        let msg = InboundMessage::new(format!("wamid.drain{}", i), SENDER, "Hola");
        tx.send(msg).await.expect("queue open");
    }
    drop(tx);

    tokio::time::timeout(Duration::from_secs(5), processor)
        .await
        .expect("processor drains")
        .expect("processor task");
    assert_eq!(h.messenger.sent().len(), 3);
}
