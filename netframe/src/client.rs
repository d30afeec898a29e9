//! Client core: a single connection running a combined network loop (send
//! and receive merged, since there is exactly one link to serve) and a
//! separate dispatch loop, mirroring the shape of the server's loops without
//! the accept side.

use crate::config::ClientConfig;
use crate::error::{ErrorKind, NetError, NetResult};
use crate::link::Link;
use crate::logging::{info, warn, Logger};
use crate::protocol::{ClientId, CommandId, JsonMessage, Protocol};
use crate::queue::SyncQueue;
use crate::registry::{ClientHandler, Registry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const NETWORK_IDLE_DELAY: Duration = Duration::from_millis(25);
const DISPATCH_IDLE_DELAY: Duration = Duration::from_millis(15);

/// A connected client: its assigned id, link, in/out queues, and handler
/// registry. Constructed only via [`Client::connect`], which performs the
/// welcome handshake before any loop starts.
pub struct Client {
    id: ClientId,
    link: Link,
    outgoing: SyncQueue<JsonMessage>,
    incoming: SyncQueue<JsonMessage>,
    registry: Mutex<Registry<ClientHandler>>,
    running: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
    log: Logger,
}

impl Client {
    /// Opens a connection to `host:port`, performs the welcome handshake
    /// synchronously, then launches the network and dispatch loops.
    pub fn connect(
        host: &str,
        port: u16,
        fallback: Arc<ClientHandler>,
        log: Logger,
    ) -> NetResult<Arc<Client>> {
        let link = Link::open(host, port)?;
        let id = read_welcome(&link)?;

        let client = Arc::new(Client {
            id,
            link,
            outgoing: SyncQueue::new(),
            incoming: SyncQueue::new(),
            registry: Mutex::new(Registry::new(fallback)),
            running: AtomicBool::new(true),
            threads: Mutex::new(Vec::new()),
            log,
        });
        info!(client.log, "connected"; "id" => id, "host" => host, "port" => port);

        let mut threads = client.threads.lock().unwrap();
        threads.push(spawn_loop(&client, "network", Client::network_loop));
        threads.push(spawn_loop(&client, "dispatch", Client::dispatch_loop));
        drop(threads);

        Ok(client)
    }

    /// Connects using a [`ClientConfig`]'s `host`/`port`.
    pub fn connect_with(
        config: &ClientConfig,
        fallback: Arc<ClientHandler>,
        log: Logger,
    ) -> NetResult<Arc<Client>> {
        Client::connect(&config.host, config.port, fallback, log)
    }

    #[inline]
    pub fn id(&self) -> ClientId {
        self.id
    }

    #[inline]
    pub fn is_online(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.link.is_online()
    }

    pub fn attach(&self, command: CommandId, handler: Arc<ClientHandler>) {
        self.registry.lock().unwrap().attach(command, handler);
    }

    pub fn detach(&self, command: CommandId) {
        self.registry.lock().unwrap().detach(command);
    }

    /// Enqueues a message to be sent to the server.
    pub fn push(&self, payload: serde_json::Value, command: CommandId) {
        self.outgoing.push(JsonMessage::new(command, payload));
    }

    /// Disconnects without draining the outgoing queue.
    pub fn disconnect(&self) {
        self.shutdown(false);
    }

    /// Stops the loops and closes the link. If `graceful`, first waits for
    /// the outgoing queue to drain.
    pub fn shutdown(&self, graceful: bool) {
        if graceful {
            while self.is_online() && !self.outgoing.is_empty() {
                thread::sleep(Duration::from_millis(15));
            }
        }
        self.running.store(false, Ordering::SeqCst);
        self.link.close();

        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
        self.outgoing.clear();
        self.incoming.clear();
    }

    fn network_loop(self: &Arc<Self>) {
        while self.running.load(Ordering::SeqCst) && self.link.is_online() {
            while let Some(message) = self.outgoing.try_pop() {
                match message.encode() {
                    Ok(text) => {
                        if let Err(e) = self.link.write_frame(&text) {
                            warn!(self.log, "write failed, closing link"; "error" => e.to_string());
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(self.log, "failed to encode outgoing message"; "error" => e.to_string());
                    }
                }
            }

            loop {
                match self.link.is_ready() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(_) => break,
                }
                match self.link.read_frame() {
                    Ok(text) => match JsonMessage::decode(&text) {
                        Ok(message) => self.incoming.push(message),
                        Err(e) => warn!(self.log, "dropping malformed message"; "error" => e.to_string()),
                    },
                    Err(_) => break,
                }
            }

            thread::sleep(NETWORK_IDLE_DELAY);
        }
    }

    fn dispatch_loop(self: &Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            match self.incoming.try_pop() {
                Some(message) => {
                    let registry = self.registry.lock().unwrap();
                    registry.trigger(message.command(), message.fields);
                }
                None => thread::sleep(DISPATCH_IDLE_DELAY),
            }
        }
    }
}

/// Reads and parses the server's welcome frame, extracting the assigned id.
/// Unlike ordinary frames, the welcome carries no `command` field, so this
/// bypasses `JsonMessage::decode`.
fn read_welcome(link: &Link) -> NetResult<ClientId> {
    let budget = Duration::from_secs(5);
    let step = Duration::from_millis(5);
    let waited = std::time::Instant::now();
    loop {
        match link.is_ready() {
            Ok(true) => break,
            Ok(false) => {
                if !link.is_online() {
                    return Err(NetError::broken_pipe("connection closed before welcome frame arrived"));
                }
                if waited.elapsed() > budget {
                    return Err(NetError::broken_pipe("timed out waiting for welcome frame"));
                }
                thread::sleep(step);
            }
            Err(e) => return Err(e),
        }
    }

    let text = link.read_frame()?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    value
        .get("id")
        .and_then(|v| v.as_u64())
        .map(|n| n as ClientId)
        .ok_or_else(|| NetError::new(ErrorKind::Decode, "welcome frame is missing an \"id\" field"))
}

fn spawn_loop(client: &Arc<Client>, name: &'static str, body: fn(&Arc<Client>)) -> JoinHandle<()> {
    let client = client.clone();
    thread::Builder::new()
        .name(format!("netframe-client-{}", name))
        .spawn(move || body(&client))
        .expect("failed to spawn client loop thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Listener;
    use crate::logging::discard;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn respond_welcome(listener: &Listener, id: ClientId) -> Link {
        let server_side = loop {
            if let Some(link) = listener.accept().unwrap() {
                break link;
            }
            thread::sleep(Duration::from_millis(5));
        };
        let text = serde_json::to_string(&json!({ "id": id })).unwrap();
        server_side.write_frame(&text).unwrap();
        server_side
    }

    #[test]
    fn connect_reads_the_assigned_id_from_the_welcome_frame() {
        let listener = Listener::open(0).unwrap();
        let port = listener.local_port().unwrap();

        let server = thread::spawn(move || respond_welcome(&listener, 3));
        let client = Client::connect("127.0.0.1", port, Arc::new(|_| {}), discard()).unwrap();
        let _server_link = server.join().unwrap();

        assert_eq!(client.id(), 3);
        client.disconnect();
    }

    #[test]
    fn incoming_messages_reach_the_registered_handler() {
        let listener = Listener::open(0).unwrap();
        let port = listener.local_port().unwrap();

        let server = thread::spawn(move || respond_welcome(&listener, 0));
        let client = Client::connect("127.0.0.1", port, Arc::new(|_| {}), discard()).unwrap();
        let server_link = server.join().unwrap();

        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        client.attach(9, Arc::new(move |_payload| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let msg = JsonMessage::new(9, json!({ "n": 1 }));
        server_link.write_frame(&msg.encode().unwrap()).unwrap();

        let waited = std::time::Instant::now();
        while hits.load(Ordering::SeqCst) == 0 && waited.elapsed() < Duration::from_secs(1) {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        client.disconnect();
    }
}
