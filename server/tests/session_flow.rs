use syncout_server::connection::ConnectionEvent;
use syncout_server::session::SessionCommand;
use syncout_server::session_registry::{SessionRegistry, SessionTx};
use syncout_system::serde_json::{self, json, Value};
use syncout_system::{ClientMessage, ParticipantInfo, WELCOME_TEXT};
use tokio::sync::mpsc::{channel, Receiver};
use tokio::sync::oneshot;

async fn join(session: &SessionTx, name: &str) -> (ParticipantInfo, Receiver<ConnectionEvent>) {
    let (tx, rx) = channel(256);
    let (reply, admitted) = oneshot::channel();
    session
        .send(SessionCommand::Join {
            name: Some(name.to_owned()),
            tx,
            reply,
        })
        .await
        .expect("session running");
    (admitted.await.expect("admitted"), rx)
}

async fn next(rx: &mut Receiver<ConnectionEvent>) -> Value {
    match rx.recv().await {
        Some(ConnectionEvent::Text(text)) => serde_json::from_str(&text).expect("json"),
        other => panic!("unexpected event {:?}", other),
    }
}

async fn send(session: &SessionTx, from: &ParticipantInfo, message: Value) {
    let message: ClientMessage = serde_json::from_value(message).expect("client message");
    session
        .send(SessionCommand::Inbound {
            from: from.id.clone(),
            message,
        })
        .await
        .expect("session running");
}

#[tokio::test]
async fn edits_made_before_a_join_show_up_in_the_joiners_init() {
    let registry = SessionRegistry::new(16);
    let session = registry.create().sender();

    let (a, mut a_rx) = join(&session, "Ada").await;
    let init = next(&mut a_rx).await;
    assert_eq!(init["type"], "init");
    assert_eq!(init["code"], WELCOME_TEXT);
    assert_eq!(init["revision"], 0);

    send(
        &session,
        &a,
        json!({ "type": "operation", "op_type": "insert", "position": 0, "content": "x" }),
    )
    .await;

    let (b, mut b_rx) = join(&session, "Bob").await;
    let init = next(&mut b_rx).await;
    assert_eq!(init["code"], format!("x{}", WELCOME_TEXT));
    assert_eq!(init["revision"], 1);

    let joined = next(&mut a_rx).await;
    assert_eq!(joined["type"], "user_joined");
    assert_eq!(joined["user"]["id"], b.id.as_str());
}

#[tokio::test]
async fn a_departure_is_announced_and_forgotten() {
    let registry = SessionRegistry::new(16);
    let session = registry.get_or_create("team").sender();

    let (_a, mut a_rx) = join(&session, "a").await;
    let (b, b_rx) = join(&session, "b").await;
    next(&mut a_rx).await;
    next(&mut a_rx).await;

    drop(b_rx);
    session
        .send(SessionCommand::Leave {
            participant: b.clone(),
        })
        .await
        .expect("session running");

    let left = next(&mut a_rx).await;
    assert_eq!(left["type"], "user_left");
    assert_eq!(left["user_name"], "b");

    let (_c, mut c_rx) = join(&session, "c").await;
    let init = next(&mut c_rx).await;
    let names = init["users"]
        .as_array()
        .expect("users")
        .iter()
        .map(|u| u["name"].clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec![json!("a"), json!("c")]);

    let summary = registry
        .get("TEAM")
        .expect("exists")
        .describe()
        .await
        .expect("running");
    assert_eq!(summary.users_count, 2);
}

#[tokio::test]
async fn edits_from_concurrent_connections_are_applied_one_at_a_time() {
    let registry = SessionRegistry::new(4);
    let session = registry.get_or_create("race").sender();
    let (a, _a_rx) = join(&session, "a").await;
    let (b, _b_rx) = join(&session, "b").await;

    let mut writers = Vec::new();
    for participant in [a, b] {
        let session = session.clone();
        writers.push(tokio::spawn(async move {
            for _ in 0..50 {
                send(
                    &session,
                    &participant,
                    json!({ "type": "operation", "op_type": "insert", "position": 0, "content": "z" }),
                )
                .await;
            }
        }));
    }
    for writer in writers {
        writer.await.expect("writer finished");
    }

    let summary = registry
        .get("race")
        .expect("exists")
        .describe()
        .await
        .expect("running");
    assert_eq!(summary.revision, 100);
}
