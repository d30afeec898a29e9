//! End-to-end scenarios driving a real `Server` and real `Client`s over
//! loopback TCP.

use netframe::logging::discard;
use netframe::server::Server;
use netframe::Client;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn spin_until<F: Fn() -> bool>(timeout: Duration, predicate: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

#[test]
fn welcome_assigns_distinct_ids_in_accept_order() {
    let server = Server::new(-1, Arc::new(|_, _| {}), discard());
    server.start(0).unwrap();
    let port = wait_for_port(&server);

    let client_a = Client::connect("127.0.0.1", port, Arc::new(|_| {}), discard()).unwrap();
    let client_b = Client::connect("127.0.0.1", port, Arc::new(|_| {}), discard()).unwrap();

    assert_eq!(client_a.id(), 0);
    assert_eq!(client_b.id(), 1);
    assert_ne!(client_a.id(), client_b.id());

    client_a.disconnect();
    client_b.disconnect();
    server.shutdown(false);
}

#[test]
fn echo_round_trips_a_payload() {
    let server = Server::new(-1, Arc::new(|_, _| {}), discard());
    let server_clone = server.clone();
    server.attach(
        42,
        Arc::new(move |payload, source| {
            server_clone.push(payload, 42, source);
        }),
    );
    server.start(0).unwrap();
    let port = wait_for_port(&server);

    let received: Arc<Mutex<Option<serde_json::Value>>> = Arc::new(Mutex::new(None));
    let sink = received.clone();
    let client =
        Client::connect("127.0.0.1", port, Arc::new(|_| {}), discard()).unwrap();
    client.attach(
        42,
        Arc::new(move |payload| {
            *sink.lock().unwrap() = Some(payload);
        }),
    );

    client.push(json!({ "text": "ping" }), 42);

    assert!(spin_until(Duration::from_secs(1), || {
        received.lock().unwrap().as_ref().map(|v| v["text"] == "ping").unwrap_or(false)
    }));

    client.disconnect();
    server.shutdown(false);
}

#[test]
fn group_fan_out_reaches_only_members() {
    let server = Server::new(-1, Arc::new(|_, _| {}), discard());
    server.start(0).unwrap();
    let port = wait_for_port(&server);

    let hits_a = Arc::new(AtomicU32::new(0));
    let hits_b = Arc::new(AtomicU32::new(0));
    let hits_c = Arc::new(AtomicU32::new(0));

    let client_a = Client::connect("127.0.0.1", port, Arc::new(|_| {}), discard()).unwrap();
    let client_b = Client::connect("127.0.0.1", port, Arc::new(|_| {}), discard()).unwrap();
    let client_c = Client::connect("127.0.0.1", port, Arc::new(|_| {}), discard()).unwrap();

    for (client, counter) in [(&client_a, &hits_a), (&client_b, &hits_b), (&client_c, &hits_c)] {
        let counter = counter.clone();
        client.attach(7, Arc::new(move |_| { counter.fetch_add(1, Ordering::SeqCst); }));
    }

    server.group(client_a.id(), 100);
    server.group(client_b.id(), 100);
    server.push_group(json!({}), 7, 100);

    assert!(spin_until(Duration::from_millis(500), || {
        hits_a.load(Ordering::SeqCst) == 1 && hits_b.load(Ordering::SeqCst) == 1
    }));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(hits_a.load(Ordering::SeqCst), 1);
    assert_eq!(hits_b.load(Ordering::SeqCst), 1);
    assert_eq!(hits_c.load(Ordering::SeqCst), 0);

    client_a.disconnect();
    client_b.disconnect();
    client_c.disconnect();
    server.shutdown(false);
}

#[test]
fn broken_pipe_is_reaped_quickly() {
    let server = Server::new(-1, Arc::new(|_, _| {}), discard());
    server.start(0).unwrap();
    let port = wait_for_port(&server);

    let client = Client::connect("127.0.0.1", port, Arc::new(|_| {}), discard()).unwrap();
    let id = client.id();
    client.disconnect();

    assert!(spin_until(Duration::from_millis(500), || !server.has_worker(id)));

    server.shutdown(false);
}

#[test]
fn blocked_address_is_refused_at_accept() {
    let server = Server::new(-1, Arc::new(|_, _| {}), discard());
    server.block("127.0.0.1");
    server.start(0).unwrap();
    let port = wait_for_port(&server);

    let attempt = Client::connect("127.0.0.1", port, Arc::new(|_| {}), discard());
    assert!(attempt.is_err());

    server.shutdown(false);
}

#[test]
fn graceful_shutdown_drains_queued_messages() {
    let server = Server::new(-1, Arc::new(|_, _| {}), discard());
    server.start(0).unwrap();
    let port = wait_for_port(&server);

    let received = Arc::new(AtomicU32::new(0));
    let counter = received.clone();
    let client = Client::connect("127.0.0.1", port, Arc::new(|_| {}), discard()).unwrap();
    client.attach(1, Arc::new(move |_| { counter.fetch_add(1, Ordering::SeqCst); }));

    for _ in 0..100 {
        server.push(json!({}), 1, client.id());
    }

    server.shutdown(true);

    assert!(spin_until(Duration::from_secs(2), || received.load(Ordering::SeqCst) == 100));
    client.disconnect();
}

fn wait_for_port(server: &Arc<Server>) -> u16 {
    spin_until(Duration::from_secs(1), || server.local_port().is_some());
    server.local_port().expect("server never bound a port")
}
