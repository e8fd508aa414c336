//! REST surface driven through the real router and auth middleware.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedReceiver;
use tower::ServiceExt;
use uuid::Uuid;

use murmur_api::auth::{AppState, AppStateInner};
use murmur_db::Database;
use murmur_gateway::registry::ConnectionId;
use murmur_gateway::{BroadcastRouter, RouterConfig};
use murmur_types::api::{Claims, Identity};
use murmur_types::events::{GatewayCommand, GatewayEvent};
use murmur_types::models::{Message, MessageKind, Reactions};

const SECRET: &str = "test-secret-for-rest";

struct TestApp {
    app: Router,
    state: AppState,
}

struct User {
    id: Uuid,
    name: String,
    token: String,
}

fn setup() -> TestApp {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let router = BroadcastRouter::new(db.clone(), RouterConfig::default());
    let state: AppState = Arc::new(AppStateInner {
        db,
        router,
        jwt_secret: SECRET.to_string(),
    });
    TestApp {
        app: murmur_api::routes(state.clone()),
        state,
    }
}

fn user(name: &str) -> User {
    let id = Uuid::new_v4();
    let claims = Claims {
        sub: id,
        name: name.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
    User {
        id,
        name: name.to_string(),
        token,
    }
}

impl TestApp {
    async fn call(&self, method: Method, uri: &str, who: Option<&User>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(who) = who {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", who.token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self.app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(&self, who: &User, kind: &str, others: &[&User]) -> (StatusCode, Value) {
        let ids: Vec<Uuid> = others.iter().map(|u| u.id).collect();
        self.call(
            Method::POST,
            "/conversations",
            Some(who),
            Some(json!({ "kind": kind, "participant_ids": ids, "name": "team" })),
        )
        .await
    }

    async fn connect(&self, who: &User) -> (ConnectionId, UnboundedReceiver<GatewayEvent>) {
        let (conn, mut rx) = self
            .state
            .router
            .connect(Identity {
                user_id: who.id,
                display_name: who.name.clone(),
            })
            .await
            .unwrap();
        while rx.try_recv().is_ok() {}
        (conn, rx)
    }

    async fn send(&self, conn: ConnectionId, conversation_id: Uuid, content: &str) {
        self.state
            .router
            .handle(
                conn,
                GatewayCommand::Send {
                    conversation_id,
                    content: content.to_string(),
                    kind: None,
                    file: None,
                    reply_to: None,
                },
            )
            .await;
    }
}

fn drain(rx: &mut UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn id_of(value: &Value) -> Uuid {
    value["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn health_needs_no_token() {
    let t = setup();
    let (status, body) = t.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_or_bad_token_is_401() {
    let t = setup();
    let (status, body) = t.call(Method::GET, "/conversations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "unauthorized");

    let mut forged = user("mallory");
    forged.token.push('x');
    let (status, _) = t.call(Method::GET, "/conversations", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn direct_create_is_idempotent() {
    let t = setup();
    let (alice, bob) = (user("alice"), user("bob"));

    let (status, first) = t.create(&alice, "direct", &[&bob]).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["participants"].as_array().unwrap().len(), 2);
    assert!(first["name"].is_null(), "direct conversations carry no name");
    assert!(first["admins"].as_array().unwrap().is_empty());

    let (status, again) = t.create(&bob, "direct", &[&alice]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(id_of(&again), id_of(&first));

    let (_, listed) = t.call(Method::GET, "/conversations", Some(&alice), None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn direct_needs_exactly_two_distinct_users() {
    let t = setup();
    let (alice, bob, carol) = (user("alice"), user("bob"), user("carol"));

    let (status, body) = t.create(&alice, "direct", &[&bob, &carol]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");

    let (status, _) = t.create(&alice, "direct", &[&alice]).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn created_conversation_is_pushed_to_connected_members() {
    let t = setup();
    let (alice, bob) = (user("alice"), user("bob"));
    let (_, mut bob_rx) = t.connect(&bob).await;

    let (_, created) = t.create(&alice, "group", &[&bob]).await;
    let events = drain(&mut bob_rx);
    assert!(matches!(
        &events[..],
        [GatewayEvent::ConversationCreated { conversation }] if conversation.id == id_of(&created)
    ));
    assert_eq!(created["admins"], json!([alice.id]));
}

#[tokio::test]
async fn history_is_members_only() {
    let t = setup();
    let (alice, bob, eve) = (user("alice"), user("bob"), user("eve"));
    let (_, conv) = t.create(&alice, "direct", &[&bob]).await;

    let uri = format!("/conversations/{}/messages", id_of(&conv));
    let (status, _) = t.call(Method::GET, &uri, Some(&eve), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let uri = format!("/conversations/{}/messages", Uuid::new_v4());
    let (status, body) = t.call(Method::GET, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn fetching_history_records_receipts_once() {
    let t = setup();
    let (alice, bob) = (user("alice"), user("bob"));
    let (_, conv) = t.create(&alice, "direct", &[&bob]).await;
    let conv_id = id_of(&conv);
    let (alice_conn, mut alice_rx) = t.connect(&alice).await;
    t.send(alice_conn, conv_id, "are you there?").await;
    drain(&mut alice_rx);

    let uri = format!("/conversations/{}/messages", conv_id);
    let (status, page) = t.call(Method::GET, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    let read_by = page["messages"][0]["read_by"].as_array().unwrap();
    assert_eq!(read_by.len(), 1);
    assert_eq!(read_by[0]["user_id"], json!(bob.id));

    let receipts = drain(&mut alice_rx);
    assert!(matches!(
        &receipts[..],
        [GatewayEvent::MessagesRead { user_id, message_ids, .. }] if *user_id == bob.id && message_ids.len() == 1
    ));

    t.call(Method::GET, &uri, Some(&bob), None).await;
    assert!(drain(&mut alice_rx).is_empty(), "nothing new was read");

    // Reading your own messages records nothing.
    t.call(Method::GET, &uri, Some(&alice), None).await;
    assert!(drain(&mut alice_rx).is_empty());
}

#[tokio::test]
async fn history_pages_newest_first() {
    let t = setup();
    let (alice, bob) = (user("alice"), user("bob"));
    let (_, conv) = t.create(&alice, "direct", &[&bob]).await;
    let conv_id = id_of(&conv);
    let (alice_conn, _rx) = t.connect(&alice).await;
    for text in ["one", "two", "three"] {
        t.send(alice_conn, conv_id, text).await;
    }

    let uri = format!("/conversations/{}/messages?limit=2", conv_id);
    let (_, page) = t.call(Method::GET, &uri, Some(&alice), None).await;
    let contents: Vec<&str> = page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["three", "two"]);

    let cursor = page["next_before"].as_str().unwrap();
    let uri = format!(
        "/conversations/{}/messages?limit=2&before={}",
        conv_id,
        cursor.replace('+', "%2B")
    );
    let (status, older) = t.call(Method::GET, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(older["messages"].as_array().unwrap().len(), 1);
    assert_eq!(older["messages"][0]["content"], "one");
    assert!(older["next_before"].is_null());

    let uri = format!("/conversations/{}/messages?before=yesterday", conv_id);
    let (status, _) = t.call(Method::GET, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn paging_through_same_instant_messages_sees_each_once() {
    let t = setup();
    let (alice, bob) = (user("alice"), user("bob"));
    let (_, conv) = t.create(&alice, "direct", &[&bob]).await;
    let conv_id = id_of(&conv);

    let at = murmur_db::queries::now();
    for text in ["a", "b", "c"] {
        t.state
            .db
            .insert_message(&Message {
                id: Uuid::new_v4(),
                conversation_id: conv_id,
                sender_id: alice.id,
                sender_name: alice.name.clone(),
                content: text.to_string(),
                kind: MessageKind::Text,
                file: None,
                reply_to: None,
                reactions: Reactions::new(),
                edited: false,
                edited_at: None,
                deleted: false,
                deleted_at: None,
                read_by: vec![],
                created_at: at,
            })
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut uri = format!("/conversations/{}/messages?limit=2", conv_id);
    loop {
        let (status, page) = t.call(Method::GET, &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        for m in page["messages"].as_array().unwrap() {
            seen.push(m["content"].as_str().unwrap().to_string());
        }
        match page["next_before"].as_str() {
            Some(cursor) => {
                uri = format!("/conversations/{}/messages?limit=2&before={}", conv_id, cursor)
            }
            None => break,
        }
    }
    assert_eq!(seen, ["c", "b", "a"]);
}

#[tokio::test]
async fn participants_are_managed_by_admins() {
    let t = setup();
    let (alice, bob, carol) = (user("alice"), user("bob"), user("carol"));
    let (_, group) = t.create(&alice, "group", &[&bob]).await;
    let uri = format!("/conversations/{}/participants", id_of(&group));
    let (_, mut carol_rx) = t.connect(&carol).await;

    let (status, _) = t
        .call(Method::POST, &uri, Some(&bob), Some(json!({ "user_id": carol.id })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, updated) = t
        .call(Method::POST, &uri, Some(&alice), Some(json!({ "user_id": carol.id })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["participants"].as_array().unwrap().len(), 3);

    let events = drain(&mut carol_rx);
    assert!(matches!(
        &events[..],
        [GatewayEvent::ConversationCreated { .. }, GatewayEvent::Joined { .. }]
    ));

    let (_, direct) = t.create(&alice, "direct", &[&bob]).await;
    let uri = format!("/conversations/{}/participants", id_of(&direct));
    let (status, _) = t
        .call(Method::POST, &uri, Some(&alice), Some(json!({ "user_id": carol.id })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn removing_a_participant_evicts_their_connections() {
    let t = setup();
    let (alice, bob) = (user("alice"), user("bob"));
    let (_, group) = t.create(&alice, "group", &[&bob]).await;
    let group_id = id_of(&group);
    let (alice_conn, _alice_rx) = t.connect(&alice).await;
    let (_, mut bob_rx) = t.connect(&bob).await;

    let uri = format!("/conversations/{}/participants/{}", group_id, alice.id);
    let (status, _) = t.call(Method::DELETE, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "bob is not an admin");

    let uri = format!("/conversations/{}/participants/{}", group_id, bob.id);
    let (status, _) = t.call(Method::DELETE, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(matches!(&drain(&mut bob_rx)[..], [GatewayEvent::Left { .. }]));

    t.send(alice_conn, group_id, "bob cannot see this").await;
    assert!(drain(&mut bob_rx).is_empty());

    let uri = format!("/conversations/{}/messages", group_id);
    let (status, _) = t.call(Method::GET, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn search_is_scoped_to_own_conversations() {
    let t = setup();
    let (alice, bob, carol) = (user("alice"), user("bob"), user("carol"));
    let (_, ab) = t.create(&alice, "direct", &[&bob]).await;
    let (_, bc) = t.create(&bob, "direct", &[&carol]).await;
    let (alice_conn, _a) = t.connect(&alice).await;
    let (bob_conn, _b) = t.connect(&bob).await;
    t.send(alice_conn, id_of(&ab), "Pizza tonight?").await;
    t.send(bob_conn, id_of(&bc), "pizza with carol").await;

    let (status, hits) = t.call(Method::GET, "/search?q=pizza", Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["content"], "Pizza tonight?");

    let (_, hits) = t.call(Method::GET, "/search?q=pizza", Some(&bob), None).await;
    assert_eq!(hits.as_array().unwrap().len(), 2);

    let (status, _) = t.call(Method::GET, "/search?q=%20", Some(&alice), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
