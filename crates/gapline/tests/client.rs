//! Startup sequencing, login, peer resolution and flood control through a
//! running client.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gapline::{
    AuthError, BoxError, Client, ClientError, ClientOptions, ConstantAuthenticator, Counter,
    FloodCallback, FloodWait, GaplineConfig, Inbound, Invoker, PeerError, PeerId, PeerRecord,
    Request, SequenceState, SequenceStateStore, StreamId, Stores, UpdateKind,
};
use tempfile::TempDir;

use common::{FakeServer, LOGIN_CODE, SESSION_BLOB, me, record, timed, transport, wait_until};

fn authenticator(code: &str) -> Arc<ConstantAuthenticator> {
    Arc::new(ConstantAuthenticator {
        phone: "+15550100".into(),
        code: code.into(),
        password: None,
    })
}

#[tokio::test(start_paused = true)]
async fn login_runs_after_catch_up_and_persists_session() {
    let server = FakeServer::new();
    server.publish_many(StreamId::Common, 7);
    let (transport, _tx) = transport(&server);

    let stores = Stores::in_memory();
    stores
        .state
        .set(
            StreamId::Common,
            SequenceState {
                pts: 5,
                ..Default::default()
            },
        )
        .unwrap();
    let sessions = stores.session.clone();

    let mut client = Client::new(transport, stores).with_authenticator(authenticator(LOGIN_CODE));
    let seen = record(&mut client, UpdateKind::NewMessage);
    let cancel = client.cancellation_token();

    let user = Arc::new(Mutex::new(None));
    let result = client
        .run({
            let user = user.clone();
            move |session| async move {
                *user.lock().unwrap() = Some(session.user);
                cancel.cancel();
                Ok::<(), BoxError>(())
            }
        })
        .await;

    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert_eq!(*user.lock().unwrap(), Some(me()));
    assert_eq!(*seen.lock().unwrap(), vec![6, 7]);
    assert_eq!(
        server.call_log(),
        vec!["get_difference", "get_self", "send_code", "sign_in"]
    );
    assert_eq!(sessions.load().unwrap().as_deref(), Some(SESSION_BLOB));
}

#[tokio::test(start_paused = true)]
async fn authorized_session_skips_login() {
    let server = FakeServer::authorized();
    let (transport, _tx) = transport(&server);
    let client = Client::new(transport, Stores::in_memory());
    let cancel = client.cancellation_token();

    client
        .run(move |session| async move {
            assert_eq!(session.user.id, 42);
            cancel.cancel();
            Ok::<(), BoxError>(())
        })
        .await
        .unwrap_err();

    assert_eq!(server.calls("send_code"), 0);
}

#[tokio::test(start_paused = true)]
async fn bot_session_logs_in_as_user() {
    let server = FakeServer::bot_session();
    let (transport, _tx) = transport(&server);
    let client =
        Client::new(transport, Stores::in_memory()).with_authenticator(authenticator(LOGIN_CODE));
    let cancel = client.cancellation_token();

    let user = Arc::new(Mutex::new(None));
    client
        .run({
            let user = user.clone();
            move |session| async move {
                *user.lock().unwrap() = Some(session.user);
                cancel.cancel();
                Ok::<(), BoxError>(())
            }
        })
        .await
        .unwrap_err();

    assert_eq!(*user.lock().unwrap(), Some(me()));
    assert_eq!(server.calls("sign_in"), 1);
}

#[tokio::test(start_paused = true)]
async fn login_without_authenticator_fails() {
    let server = FakeServer::new();
    let (transport, _tx) = transport(&server);
    let client = Client::new(transport, Stores::in_memory());

    let result = client
        .run(|_session| async { Ok::<(), BoxError>(()) })
        .await;

    assert!(matches!(
        result,
        Err(ClientError::Auth(AuthError::NoAuthenticator))
    ));
}

#[tokio::test(start_paused = true)]
async fn wrong_login_code_is_fatal() {
    let server = FakeServer::new();
    let (transport, _tx) = transport(&server);
    let client =
        Client::new(transport, Stores::in_memory()).with_authenticator(authenticator("0000"));

    let result = client
        .run(|_session| async { Ok::<(), BoxError>(()) })
        .await;

    match result {
        Err(ClientError::Auth(AuthError::Rpc(err))) => {
            assert!(err.is_message("PHONE_CODE_INVALID"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!server.is_authorized());
}

#[tokio::test(start_paused = true)]
async fn dialogs_fill_peer_storage_before_main() {
    let server = FakeServer::authorized();
    server.add_dialogs((1..=250).map(|id| {
        PeerRecord::new(PeerId::user(id)).with_access_hash(format!("hash-{id}"))
    }));
    let (transport, _tx) = transport(&server);
    let client = Client::new(transport, Stores::in_memory()).with_options(ClientOptions {
        fill_peer_storage: true,
        ..Default::default()
    });
    let cancel = client.cancellation_token();

    client
        .run(move |session| async move {
            let peer = session.peers.resolve_id(PeerId::user(200))?;
            assert_eq!(peer.access_hash.as_deref(), Some("hash-200"));
            cancel.cancel();
            Ok::<(), BoxError>(())
        })
        .await
        .unwrap_err();

    assert_eq!(server.calls("get_dialogs"), 3);
}

#[tokio::test(start_paused = true)]
async fn username_is_resolved_remotely_once() {
    let server = FakeServer::authorized();
    server.add_username(
        "rustlang",
        PeerRecord::new(PeerId::channel(99)).with_access_hash("h"),
    );
    let (transport, _tx) = transport(&server);
    let client = Client::new(transport, Stores::in_memory());
    let cancel = client.cancellation_token();

    client
        .run(move |session| async move {
            let first = session.peers.resolve_username("@rustlang").await?;
            let second = session.peers.resolve_username("rustlang").await?;
            assert_eq!(first, second);
            assert_eq!(first.id, PeerId::channel(99));
            cancel.cancel();
            Ok::<(), BoxError>(())
        })
        .await
        .unwrap_err();

    assert_eq!(server.calls("resolve_username"), 1);
}

#[tokio::test(start_paused = true)]
async fn main_error_is_reported_as_application_error() {
    let server = FakeServer::authorized();
    let (transport, _tx) = transport(&server);
    let client = Client::new(transport, Stores::in_memory());

    let result = client
        .run(|session| async move {
            session.peers.resolve_username("nobody").await?;
            Ok::<(), BoxError>(())
        })
        .await;

    match result {
        Err(ClientError::Application(source)) => {
            let err = source.downcast_ref::<PeerError>().unwrap();
            assert!(matches!(err, PeerError::UsernameNotFound(name) if name == "nobody"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn client_error_from_main_keeps_its_variant() {
    let server = FakeServer::authorized();
    let (transport, _tx) = transport(&server);
    let client = Client::new(transport, Stores::in_memory());

    let result = client
        .run(|_session| async move {
            Err::<(), BoxError>(Box::new(ClientError::GapUnresolved {
                stream: StreamId::Common,
                counter: Counter::Pts,
                local: 1,
                next: 3,
            }))
        })
        .await;

    assert!(matches!(
        result,
        Err(ClientError::GapUnresolved { local: 1, next: 3, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn flood_wait_is_waited_out_and_reported_once() {
    let server = FakeServer::authorized();
    server.flood_next(Duration::from_secs(2));
    let (transport, _tx) = transport(&server);

    let waits = Arc::new(Mutex::new(Vec::new()));
    let on_flood_wait: FloodCallback = Arc::new({
        let waits = waits.clone();
        move |wait: FloodWait| waits.lock().unwrap().push(wait)
    });
    let options = ClientOptions {
        on_flood_wait: Some(on_flood_wait),
        ..Default::default()
    };
    let client = Client::new(transport, Stores::in_memory()).with_options(options);
    let cancel = client.cancellation_token();

    let (result, elapsed) = timed(client.run(move |_session| async move {
        cancel.cancel();
        Ok::<(), BoxError>(())
    }))
    .await;

    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert!(elapsed >= Duration::from_secs(2), "took {elapsed:?}");
    let waits = waits.lock().unwrap();
    assert_eq!(waits.len(), 1);
    assert_eq!(waits[0].method, "get_self");
    assert_eq!(waits[0].duration, Duration::from_secs(2));
    // The blocked call was retried.
    assert_eq!(server.calls("get_self"), 2);
}

#[tokio::test(start_paused = true)]
async fn outbound_calls_are_rate_limited() {
    let server = FakeServer::authorized();
    let (transport, _tx) = transport(&server);
    let client = Client::new(transport, Stores::in_memory());
    let cancel = client.cancellation_token();
    let elapsed = Arc::new(AtomicUsize::new(0));

    client
        .run({
            let elapsed = elapsed.clone();
            move |session| async move {
                // get_self during startup took the first token.
                let start = tokio::time::Instant::now();
                for _ in 0..5 {
                    session.api.invoke(Request::GetSelf).await?;
                }
                let took = start.elapsed().as_millis();
                elapsed.store(usize::try_from(took)?, Ordering::SeqCst);
                cancel.cancel();
                Ok::<(), BoxError>(())
            }
        })
        .await
        .unwrap_err();

    assert!(elapsed.load(Ordering::SeqCst) >= 100);
}

#[tokio::test(start_paused = true)]
async fn configured_client_keeps_state_in_the_phone_session() {
    let dir = TempDir::new().unwrap();
    let mut config = GaplineConfig::default();
    config.client.phone = "+1 555 0100".into();
    config.storage.data_dir = dir.path().to_path_buf();

    let server = FakeServer::authorized();
    let (transport, tx) = transport(&server);
    let mut client = Client::from_config(transport, &config).unwrap();
    let seen = record(&mut client, UpdateKind::NewMessage);
    let cancel = client.cancellation_token();

    client
        .run({
            let server = server.clone();
            let seen = seen.clone();
            move |_session| async move {
                for update in server.publish_many(StreamId::Common, 2) {
                    tx.send(Inbound::Update(update)).await?;
                }
                wait_until(|| seen.lock().unwrap().len() == 2).await;
                cancel.cancel();
                Ok::<(), BoxError>(())
            }
        })
        .await
        .unwrap_err();

    let stores = Stores::open(dir.path().join("session").join("phone-15550100")).unwrap();
    assert_eq!(stores.state.get(StreamId::Common).unwrap().unwrap().pts, 2);
}
