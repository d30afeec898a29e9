//! Server core: accept / send / receive / dispatch loops, the worker table,
//! group index, and IP block list. Shaped after the source's `Server`, but
//! with Rust ownership: the worker table holds `Arc<Worker>`, so the send and
//! receive loops can work from a released snapshot instead of holding the
//! table lock across a socket call.

use crate::config::ServerConfig;
use crate::error::NetResult;
use crate::link::{Link, Listener};
use crate::logging::{debug, info, warn, Logger};
use crate::protocol::{ClientId, CommandId, GroupId, JsonMessage, Protocol};
use crate::queue::SyncQueue;
use crate::registry::{Registry, ServerHandler};
use crate::worker::Worker;
use hashbrown::{HashMap, HashSet};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ACCEPT_IDLE_DELAY: Duration = Duration::from_millis(25);
const ACCEPT_FULL_DELAY: Duration = Duration::from_secs(1);
const SEND_IDLE_DELAY: Duration = Duration::from_millis(25);
const RECEIVE_SWEEP_DELAY: Duration = Duration::from_millis(25);
const DISPATCH_IDLE_DELAY: Duration = Duration::from_millis(15);

/// A message still waiting to be written to its target worker's link.
struct Outgoing {
    target: ClientId,
    message: JsonMessage,
}

/// A message that has been read off a worker's link and is waiting for
/// dispatch.
struct Incoming {
    source: ClientId,
    message: JsonMessage,
}

struct WorkerTable {
    next_id: ClientId,
    workers: HashMap<ClientId, Arc<Worker>>,
}

/// A multi-client TCP server that frames JSON messages and dispatches them
/// to per-command handlers.
pub struct Server {
    listener: Listener,
    workers: Mutex<WorkerTable>,
    ips: Mutex<HashSet<String>>,
    groups: Mutex<HashMap<GroupId, HashSet<ClientId>>>,
    incoming: SyncQueue<Incoming>,
    outgoing: SyncQueue<Outgoing>,
    max_clients: i32,
    registry: Mutex<Registry<ServerHandler>>,
    shutting_down: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
    log: Logger,
}

impl Server {
    /// Creates a new, not-yet-listening server. `max_clients < 0` means
    /// unbounded.
    pub fn new(max_clients: i32, fallback: Arc<ServerHandler>, log: Logger) -> Arc<Server> {
        Arc::new(Server {
            listener: Listener::unbound(),
            workers: Mutex::new(WorkerTable { next_id: 0, workers: HashMap::new() }),
            ips: Mutex::new(HashSet::new()),
            groups: Mutex::new(HashMap::new()),
            incoming: SyncQueue::new(),
            outgoing: SyncQueue::new(),
            max_clients,
            registry: Mutex::new(Registry::new(fallback)),
            shutting_down: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
            log,
        })
    }

    /// Builds a server from a [`ServerConfig`], taking `max_clients` from it.
    pub fn from_config(config: &ServerConfig, fallback: Arc<ServerHandler>, log: Logger) -> Arc<Server> {
        Server::new(config.max_clients, fallback, log)
    }

    /// Registers `handler` for `command`. Intended to be called before
    /// [`Server::start`]; changing handlers concurrently with dispatch is the
    /// caller's responsibility to serialize.
    pub fn attach(&self, command: CommandId, handler: Arc<ServerHandler>) {
        self.registry.lock().unwrap().attach(command, handler);
    }

    pub fn detach(&self, command: CommandId) {
        self.registry.lock().unwrap().detach(command);
    }

    #[inline]
    pub fn is_online(&self) -> bool {
        self.listener.is_online()
    }

    /// The local port actually bound, useful when `start` was called with
    /// port 0. `None` if not currently listening.
    pub fn local_port(&self) -> Option<u16> {
        self.listener.local_port()
    }

    /// Whether `id` currently has a live entry in the worker table.
    pub fn has_worker(&self, id: ClientId) -> bool {
        self.workers.lock().unwrap().workers.contains_key(&id)
    }

    /// Starts listening on `port` and launches the accept, send, receive and
    /// dispatch loops. Idempotent once already online.
    pub fn start(self: &Arc<Self>, port: u16) -> NetResult<()> {
        if self.is_online() {
            return Ok(());
        }
        self.rebind(port)?;
        self.shutting_down.store(false, Ordering::SeqCst);

        let mut threads = self.threads.lock().unwrap();
        threads.push(spawn_loop(self, "accept", Server::accept_loop));
        threads.push(spawn_loop(self, "send", Server::send_loop));
        threads.push(spawn_loop(self, "receive", Server::receive_loop));
        threads.push(spawn_loop(self, "dispatch", Server::dispatch_loop));
        Ok(())
    }

    fn rebind(&self, port: u16) -> NetResult<()> {
        self.listener.bind(port)
    }

    /// Shuts the server down. If `graceful`, first stops admitting new
    /// pushes and waits for the outgoing queue to drain, so a caller can
    /// queue a final burst of messages and be sure they go out before the
    /// listener closes. Either way: closes the listener, joins every loop,
    /// disconnects every worker, clears both queues and resets the id
    /// counter.
    pub fn shutdown(&self, graceful: bool) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if graceful {
            while self.is_online() && !self.outgoing.is_empty() {
                thread::sleep(Duration::from_millis(15));
            }
        }
        self.listener.close();

        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
        drop(threads);

        let mut table = self.workers.lock().unwrap();
        for (_, worker) in table.workers.drain() {
            worker.link().close();
        }
        table.next_id = 0;
        drop(table);

        self.groups.lock().unwrap().clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.shutting_down.store(false, Ordering::SeqCst);
    }

    /// Disconnects a single worker: erases its table entry, removes it from
    /// every group it belonged to, and closes its link. Removes the table
    /// entry before touching the group table, so this never holds both locks
    /// at once.
    pub fn disconnect(&self, id: ClientId) {
        let worker = self.workers.lock().unwrap().workers.remove(&id);
        let worker = match worker {
            Some(worker) => worker,
            None => return,
        };

        let mut groups = self.groups.lock().unwrap();
        for group in worker.groups() {
            if let Some(members) = groups.get_mut(&group) {
                members.remove(&id);
            }
        }
        drop(groups);

        worker.link().close();
        info!(self.log, "worker disconnected"; "client" => id);
    }

    /// Enqueues `payload` for delivery to `target`. A no-op once shutdown has
    /// begun draining.
    pub fn push(&self, payload: Value, command: CommandId, target: ClientId) {
        if self.shutting_down.load(Ordering::SeqCst) {
            warn!(self.log, "push refused, server is shutting down"; "target" => target);
            return;
        }
        self.outgoing.push(Outgoing { target, message: JsonMessage::new(command, payload) });
    }

    /// Enqueues one copy of `payload` for every currently-online worker.
    pub fn broadcast(&self, payload: Value, command: CommandId) {
        if self.shutting_down.load(Ordering::SeqCst) {
            warn!(self.log, "broadcast refused, server is shutting down");
            return;
        }
        let table = self.workers.lock().unwrap();
        for worker in table.workers.values() {
            if worker.is_online() {
                self.outgoing.push(Outgoing {
                    target: worker.id(),
                    message: JsonMessage::new(command, payload.clone()),
                });
            }
        }
    }

    /// Enqueues one copy of `payload` per client-id in `group`. A no-op if
    /// the group does not exist.
    pub fn push_group(&self, payload: Value, command: CommandId, group: GroupId) {
        let clients = self.clients_of(group);
        for client in clients {
            self.push(payload.clone(), command, client);
        }
    }

    /// Adds `client` to `group`, creating the group if it does not exist yet.
    pub fn group(&self, client: ClientId, group: GroupId) {
        let mut groups = self.groups.lock().unwrap();
        groups.entry(group).or_insert_with(HashSet::new).insert(client);
        drop(groups);
        let table = self.workers.lock().unwrap();
        if let Some(worker) = table.workers.get(&client) {
            worker.add_group(group);
        }
    }

    /// Removes `client` from `group`. A no-op if either does not exist.
    pub fn ungroup(&self, client: ClientId, group: GroupId) {
        self.ungroup_locked(client, group);
    }

    fn ungroup_locked(&self, client: ClientId, group: GroupId) {
        let mut groups = self.groups.lock().unwrap();
        if let Some(members) = groups.get_mut(&group) {
            members.remove(&client);
        }
        drop(groups);
        let table = self.workers.lock().unwrap();
        if let Some(worker) = table.workers.get(&client) {
            worker.remove_group(group);
        }
    }

    /// Returns the set of client-ids currently in `group` (empty if the
    /// group does not exist).
    pub fn clients_of(&self, group: GroupId) -> Vec<ClientId> {
        self.groups.lock().unwrap().get(&group).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn has_group(&self, group: GroupId) -> bool {
        self.groups.lock().unwrap().contains_key(&group)
    }

    pub fn block(&self, ip: &str) {
        self.ips.lock().unwrap().insert(ip.to_string());
    }

    pub fn unblock(&self, ip: &str) {
        self.ips.lock().unwrap().remove(ip);
    }

    fn is_blocked(&self, ip: &str) -> bool {
        self.ips.lock().unwrap().contains(ip)
    }

    fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().workers.len()
    }

    // -- loops -----------------------------------------------------------

    fn accept_loop(self: &Arc<Self>) {
        while self.is_online() {
            if self.max_clients >= 0 && self.worker_count() >= self.max_clients as usize {
                thread::sleep(ACCEPT_FULL_DELAY);
                continue;
            }

            let link = match self.listener.accept() {
                Ok(Some(link)) => link,
                Ok(None) => {
                    thread::sleep(ACCEPT_IDLE_DELAY);
                    continue;
                }
                Err(_) => {
                    thread::sleep(ACCEPT_IDLE_DELAY);
                    continue;
                }
            };

            let peer = link.peer_address().to_string();
            let host = peer.rsplit_once(':').map(|(h, _)| h.to_string()).unwrap_or(peer.clone());

            if self.is_blocked(&host) {
                warn!(self.log, "refused client from blocked host"; "host" => host);
                link.close();
                continue;
            }

            self.welcome_and_publish(link, &peer);
        }
    }

    /// Writes the welcome frame first, then publishes the worker into the
    /// table while still holding its lock, so no other loop can ever
    /// observe a half-constructed worker.
    fn welcome_and_publish(&self, link: Link, peer: &str) {
        let mut table = self.workers.lock().unwrap();
        let id = table.next_id;
        let text = serde_json::to_string(&json!({ "id": id }))
            .expect("id welcome payload is always serializable");

        if let Err(e) = link.write_frame(&text) {
            warn!(self.log, "failed to welcome new client"; "peer" => peer, "error" => e.to_string());
            drop(table);
            link.close();
            return;
        }

        table.next_id += 1;
        table.workers.insert(id, Arc::new(Worker::new(id, link)));
        info!(self.log, "client accepted"; "client" => id, "peer" => peer);
    }

    fn send_loop(self: &Arc<Self>) {
        while self.is_online() {
            let mut sent_any = false;
            while let Some(item) = self.outgoing.try_pop() {
                sent_any = true;
                self.send_one(item);
            }
            if !sent_any {
                thread::sleep(SEND_IDLE_DELAY);
            }
        }
    }

    fn send_one(&self, item: Outgoing) {
        let worker = {
            let table = self.workers.lock().unwrap();
            table.workers.get(&item.target).cloned()
        };
        let worker = match worker {
            Some(worker) => worker,
            None => {
                warn!(self.log, "dropping message to unknown worker"; "target" => item.target);
                return;
            }
        };
        if !worker.is_online() {
            return;
        }
        let text = match item.message.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(self.log, "failed to encode outgoing message"; "target" => item.target, "error" => e.to_string());
                return;
            }
        };
        if let Err(e) = worker.link().write_frame(&text) {
            warn!(self.log, "connection to client was killed"; "client" => item.target, "error" => e.to_string());
        }
    }

    fn receive_loop(self: &Arc<Self>) {
        while self.is_online() {
            let snapshot: Vec<Arc<Worker>> =
                self.workers.lock().unwrap().workers.values().cloned().collect();

            for worker in &snapshot {
                if !worker.is_online() {
                    self.disconnect(worker.id());
                    continue;
                }
                loop {
                    match worker.link().is_ready() {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(_) => break,
                    }
                    match worker.link().read_frame() {
                        Ok(text) => match JsonMessage::decode(&text) {
                            Ok(message) => {
                                self.incoming.push(Incoming { source: worker.id(), message });
                            }
                            Err(e) => {
                                debug!(self.log, "dropping malformed message"; "client" => worker.id(), "error" => e.to_string());
                            }
                        },
                        Err(_) => break,
                    }
                }
                if !worker.is_online() {
                    self.disconnect(worker.id());
                }
            }

            thread::sleep(RECEIVE_SWEEP_DELAY);
        }
    }

    fn dispatch_loop(self: &Arc<Self>) {
        while self.is_online() {
            match self.incoming.try_pop() {
                Some(item) => {
                    let registry = self.registry.lock().unwrap();
                    registry.trigger(item.message.command(), item.message.fields, item.source);
                }
                None => thread::sleep(DISPATCH_IDLE_DELAY),
            }
        }
    }
}

fn spawn_loop(
    server: &Arc<Server>,
    name: &'static str,
    body: fn(&Arc<Server>),
) -> JoinHandle<()> {
    let server = server.clone();
    thread::Builder::new()
        .name(format!("netframe-server-{}", name))
        .spawn(move || body(&server))
        .expect("failed to spawn server loop thread")
}
