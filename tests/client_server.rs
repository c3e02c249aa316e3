use std::{
    io::{BufReader, Read, Write},
    net::{TcpListener, TcpStream},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use tether::{
    message::{Message, MessageObject, MessageReader},
    protocol::{
        ClientError, Credentials, DispatchQueue, ErrorKind, MessageClient, MessageServer, Router,
        SessionStore,
    },
};

const VERSION: &str = "2.0";

fn router() -> Router {
    let sessions = SessionStore::new(
        VERSION,
        vec![Credentials::new("a", "secret"), Credentials::new("b", "hunter2")],
    );

    Router::with_sessions(Arc::new(sessions))
        .route("ECHO", |request| {
            Ok(MessageObject::new("ECHOED")?
                .with("n", request.get_int_or("n", 0)?)?
                .into())
        })
        .route_authenticated("WHOAMI", |caller, _| {
            Ok(MessageObject::new("YOU")?
                .with("user", caller.user.as_str())?
                .into())
        })
        .route("SLOW", |_| {
            thread::sleep(Duration::from_millis(50));
            Ok(MessageObject::new("DONE")?.into())
        })
}

fn server() -> MessageServer {
    MessageServer::builder(router())
        .workers(4)
        .bind("127.0.0.1:0")
        .unwrap()
}

fn echo(n: i64) -> MessageObject {
    MessageObject::new("ECHO").unwrap().with("n", n).unwrap()
}

fn protocol_kind(err: ClientError) -> ErrorKind {
    match err {
        ClientError::Protocol(e) => e.kind,
        other => panic!("expected a protocol error, got {other:?}"),
    }
}

/// Runs queued completions until `done` holds or five seconds pass.
fn drain_until(queue: &DispatchQueue, mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        queue.run_next(Duration::from_millis(10));
    }
    panic!("completions did not arrive in time");
}

#[test]
fn ping_and_echo() {
    let server = server();
    let client = MessageClient::connect(server.local_addr()).unwrap();

    client.ping().unwrap();
    let reply = client.query(echo(7)).unwrap();
    assert_eq!(reply.to_string(), "ECHOED{n=7}");
}

#[test]
fn login_then_authenticated_request() {
    let server = server();
    let client = MessageClient::connect(server.local_addr()).unwrap();

    let err = client.query(MessageObject::new("WHOAMI").unwrap()).unwrap_err();
    assert_eq!(protocol_kind(err), ErrorKind::NotLoggedIn);

    let session = client.login("a", "secret", VERSION).unwrap();
    assert_eq!(session.session_id.len(), 128);

    let request = session.sign(MessageObject::new("WHOAMI").unwrap()).unwrap();
    let reply = client.query(request).unwrap();
    assert_eq!(reply.to_string(), r#"YOU{user="a"}"#);
}

#[test]
fn version_mismatch_and_bad_credentials() {
    let server = server();
    let client = MessageClient::connect(server.local_addr()).unwrap();

    let err = client.login("a", "secret", "1.0").unwrap_err();
    assert_eq!(protocol_kind(err), ErrorKind::VersionMismatch);

    let err = client.login("a", "wrong", VERSION).unwrap_err();
    assert_eq!(protocol_kind(err), ErrorKind::LoginFailed);

    // Errors leave the connection usable.
    client.ping().unwrap();
}

#[test]
fn second_login_invalidates_first_session() {
    let server = server();
    let first_client = MessageClient::connect(server.local_addr()).unwrap();
    let second_client = MessageClient::connect(server.local_addr()).unwrap();

    let first = first_client.login("a", "secret", VERSION).unwrap();
    let _second = second_client.login("a", "secret", VERSION).unwrap();

    let request = first.sign(MessageObject::new("WHOAMI").unwrap()).unwrap();
    let err = first_client.query(request).unwrap_err();
    assert_eq!(protocol_kind(err), ErrorKind::SessionInvalid);
}

#[test]
fn async_replies_arrive_in_request_order() {
    let server = server();
    let queue = Arc::new(DispatchQueue::new());
    let client = MessageClient::connect(server.local_addr())
        .unwrap()
        .with_dispatcher(queue.clone());

    let seen = Arc::new(Mutex::new(Vec::new()));
    for n in 0..20 {
        let seen = Arc::clone(&seen);
        client.query_async(echo(n), move |reply| {
            let reply = reply.unwrap();
            let n = reply.as_object().unwrap().get_int("n").unwrap();
            seen.lock().unwrap().push(n);
        });
    }

    drain_until(&queue, || seen.lock().unwrap().len() == 20);
    assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
}

#[test]
fn sync_query_waits_behind_queued_async_queries() {
    let server = server();
    let client = MessageClient::connect(server.local_addr()).unwrap();

    let done = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second"] {
        let done = Arc::clone(&done);
        client.query_async(MessageObject::new("SLOW").unwrap(), move |reply| {
            assert!(reply.unwrap().is("DONE"));
            done.lock().unwrap().push(label);
        });
    }

    let reply = client.query(echo(3)).unwrap();
    assert!(reply.is("ECHOED"));
    assert_eq!(*done.lock().unwrap(), vec!["first", "second"]);
}

#[test]
fn cancelled_query_skips_callback() {
    let server = server();
    let queue = Arc::new(DispatchQueue::new());
    let client = MessageClient::connect(server.local_addr())
        .unwrap()
        .with_dispatcher(queue.clone());

    let ran = Arc::new(Mutex::new(Vec::new()));
    let cancelled = {
        let ran = Arc::clone(&ran);
        client.query_async(echo(1), move |_| ran.lock().unwrap().push(1))
    };
    cancelled.cancel();

    let ran_after = Arc::clone(&ran);
    client.query_async(echo(2), move |_| ran_after.lock().unwrap().push(2));

    drain_until(&queue, || !ran.lock().unwrap().is_empty());
    queue.run_pending();
    assert_eq!(*ran.lock().unwrap(), vec![2]);
    assert!(cancelled.is_cancelled());
}

#[test]
fn batch_against_server_reports_each_slot() {
    let server = server();
    let queue = Arc::new(DispatchQueue::new());
    let client = MessageClient::connect(server.local_addr())
        .unwrap()
        .with_dispatcher(queue.clone());

    let results = Arc::new(Mutex::new(Vec::new()));
    client.begin_batch().unwrap();
    assert!(matches!(client.begin_batch(), Err(ClientError::BatchOpen)));
    assert!(matches!(client.query(echo(0)), Err(ClientError::BatchOpen)));

    for request in [echo(1), MessageObject::new("WHOAMI").unwrap(), echo(3)] {
        let results = Arc::clone(&results);
        client.query_async(request, move |reply| {
            let entry = match reply {
                Ok(reply) => reply.to_string(),
                Err(e) => format!("{:?}", protocol_kind(e)),
            };
            results.lock().unwrap().push(entry);
        });
    }

    let completed = Arc::new(Mutex::new(None));
    let completed_in = Arc::clone(&completed);
    let results_at_completion = Arc::clone(&results);
    client
        .end_batch(move |result| {
            assert!(result.is_ok());
            *completed_in.lock().unwrap() = Some(results_at_completion.lock().unwrap().len());
        })
        .unwrap();

    drain_until(&queue, || completed.lock().unwrap().is_some());
    assert_eq!(*completed.lock().unwrap(), Some(3));
    assert_eq!(
        *results.lock().unwrap(),
        vec!["ECHOED{n=1}", "NotLoggedIn", "ECHOED{n=3}"]
    );
    assert!(!client.is_batching());
}

#[test]
fn batch_is_sent_as_a_single_request() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();

    let fake = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = MessageReader::new(BufReader::new(stream));

        let request = reader.read_message().unwrap();
        writer
            .write_all(br#"BATCH_RESPONSE[RA{},ERROR{code=10,message="no such planet"}]"#)
            .unwrap();
        writer.flush().unwrap();

        let next = reader.read_message();
        (request, next.is_err())
    });

    let queue = Arc::new(DispatchQueue::new());
    let client = MessageClient::connect(address)
        .unwrap()
        .with_dispatcher(queue.clone());

    let order = Arc::new(Mutex::new(Vec::new()));
    client.begin_batch().unwrap();
    for name in ["A", "B"] {
        let order = Arc::clone(&order);
        client.query_async(MessageObject::new(name).unwrap(), move |reply| {
            let entry = match reply {
                Ok(reply) => reply.to_string(),
                Err(e) => format!("{:?}", protocol_kind(e)),
            };
            order.lock().unwrap().push(entry);
        });
    }
    let finish = Arc::clone(&order);
    client
        .end_batch(move |result| {
            assert!(result.is_ok());
            finish.lock().unwrap().push("complete".to_string());
        })
        .unwrap();

    drain_until(&queue, || order.lock().unwrap().len() == 3);
    assert_eq!(
        *order.lock().unwrap(),
        vec!["RA{}", "UnknownPlanet", "complete"]
    );

    drop(client);
    let (request, closed) = fake.join().unwrap();
    assert_eq!(request.to_string(), "BATCH[A{},B{}]");
    assert!(closed);
}

#[test]
fn empty_batch_completes_without_traffic() {
    let server = server();
    let client = MessageClient::connect(server.local_addr()).unwrap();
    let done = Arc::new(Mutex::new(false));

    client.begin_batch().unwrap();
    let flag = Arc::clone(&done);
    client
        .end_batch(move |result| {
            assert!(result.is_ok());
            *flag.lock().unwrap() = true;
        })
        .unwrap();

    assert!(*done.lock().unwrap());
    assert!(matches!(client.cancel_batch(), Err(ClientError::BatchNotOpen)));
    assert!(matches!(
        client.end_batch(|_| {}),
        Err(ClientError::BatchNotOpen)
    ));
}

#[test]
fn cancel_batch_sends_nothing() {
    let server = server();
    let client = MessageClient::connect(server.local_addr()).unwrap();

    client.begin_batch().unwrap();
    client.query_async(echo(1), |_| panic!("discarded query must not complete"));
    client.cancel_batch().unwrap();

    assert_eq!(client.query(echo(2)).unwrap().to_string(), "ECHOED{n=2}");
}

#[test]
fn malformed_request_gets_syntax_error_and_connection_survives() {
    let server = server();
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.write_all(b"FOO{a=}PING{}").unwrap();

    let mut reader = MessageReader::new(BufReader::new(stream.try_clone().unwrap()));
    let error = reader.read_message().unwrap();
    let error = error.as_object().unwrap();
    assert!(error.is("ERROR"));
    assert_eq!(error.get_int("code").unwrap(), ErrorKind::Syntax.ordinal());

    assert_eq!(reader.read_message().unwrap().to_string(), "PONG{}");
}

#[test]
fn server_shutdown_disconnects_client() {
    let server = server();
    let client = MessageClient::connect(server.local_addr()).unwrap();
    client.ping().unwrap();

    server.shutdown();

    let err = client.ping().unwrap_err();
    assert!(
        matches!(err, ClientError::Disconnected | ClientError::Transport(_)),
        "unexpected error: {err:?}"
    );
    // Once the link is broken every later query fails fast.
    assert!(matches!(client.ping(), Err(ClientError::Disconnected)));
}

#[test]
fn closed_client_fails_queries() {
    let server = server();
    let client = MessageClient::connect(server.local_addr()).unwrap();
    client.close();

    assert!(client.ping().is_err());
}

#[test]
fn unknown_message_is_reported() {
    let server = server();
    let client = MessageClient::connect(server.local_addr()).unwrap();

    let err = client
        .query(Message::parse("LAUNCH_MISSILES{}").unwrap())
        .unwrap_err();
    assert_eq!(protocol_kind(err), ErrorKind::UnknownMessage);
}

#[test]
fn raw_pong_roundtrip() {
    let server = server();
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.write_all(b"PING{}").unwrap();

    let mut reply = [0u8; 6];
    stream.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"PONG{}");
}

#[test]
fn deferred_replies_resolve_in_order() {
    let server = server();
    let client = MessageClient::connect(server.local_addr()).unwrap();

    let slow = client.query_deferred(MessageObject::new("SLOW").unwrap()).unwrap();
    let fast = client.query_deferred(echo(4)).unwrap();

    assert!(slow.wait().unwrap().is("DONE"));
    assert_eq!(fast.wait().unwrap().to_string(), "ECHOED{n=4}");
}

#[test]
fn per_call_dispatcher_overrides_client_default() {
    let server = server();
    let client = MessageClient::connect(server.local_addr()).unwrap();
    let queue = Arc::new(DispatchQueue::new());

    let got = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&got);
    client.query_async_on(echo(5), queue.clone(), move |reply| {
        *slot.lock().unwrap() = Some(reply.unwrap().to_string());
    });

    // Nothing runs until the queue owner drains it.
    client.ping().unwrap();
    assert!(got.lock().unwrap().is_none());

    drain_until(&queue, || got.lock().unwrap().is_some());
    assert_eq!(got.lock().unwrap().as_deref(), Some("ECHOED{n=5}"));
}
