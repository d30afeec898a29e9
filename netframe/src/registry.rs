//! Command-id to handler registry. The source's `CallbackManager` reinterpret-casts
//! member function pointers to register them under a common signature; that
//! cast is not portable and isn't reproduced here. Instead handlers are plain
//! boxed trait objects, looked up by id in a hash map.

use crate::protocol::{ClientId, CommandId};
use hashbrown::HashMap;
use serde_json::Value;
use std::sync::Arc;

/// Handler invoked by the server's dispatch loop: `(payload, source client)`.
pub type ServerHandler = dyn Fn(Value, ClientId) + Send + Sync;
/// Handler invoked by the client's dispatch loop: `(payload)`.
pub type ClientHandler = dyn Fn(Value) + Send + Sync;

/// Maps command-ids to handlers, with a fallback for unregistered ids.
/// `F` is `ServerHandler` or `ClientHandler`, picking which `trigger` applies.
pub struct Registry<F: ?Sized> {
    handlers: HashMap<CommandId, Arc<F>>,
    fallback: Arc<F>,
}

impl<F: ?Sized> Registry<F> {
    pub fn new(fallback: Arc<F>) -> Registry<F> {
        Registry { handlers: HashMap::new(), fallback }
    }

    /// Registers `handler` for `command`, replacing any prior registration.
    pub fn attach(&mut self, command: CommandId, handler: Arc<F>) {
        self.handlers.insert(command, handler);
    }

    /// Removes the handler registered for `command`, if any.
    pub fn detach(&mut self, command: CommandId) {
        self.handlers.remove(&command);
    }

    fn resolve(&self, command: CommandId) -> Arc<F> {
        self.handlers.get(&command).cloned().unwrap_or_else(|| self.fallback.clone())
    }
}

impl Registry<ServerHandler> {
    /// Looks up the handler for `command` and invokes it, falling back to
    /// the registry's fallback handler if none is registered.
    pub fn trigger(&self, command: CommandId, payload: Value, source: ClientId) {
        (self.resolve(command))(payload, source)
    }
}

impl Registry<ClientHandler> {
    pub fn trigger(&self, command: CommandId, payload: Value) {
        (self.resolve(command))(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn trigger_invokes_the_registered_handler() {
        let seen: Arc<Mutex<Vec<(Value, ClientId)>>> = Arc::new(Mutex::new(Vec::new()));
        let fallback_hits = Arc::new(AtomicU32::new(0));

        let fallback_counter = fallback_hits.clone();
        let mut registry: Registry<ServerHandler> =
            Registry::new(Arc::new(move |_payload, _source| {
                fallback_counter.fetch_add(1, Ordering::SeqCst);
            }));

        let sink = seen.clone();
        registry.attach(
            42,
            Arc::new(move |payload, source| sink.lock().unwrap().push((payload, source))),
        );

        registry.trigger(42, Value::from("ping"), 7);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(fallback_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unregistered_command_hits_fallback() {
        let fallback_hits = Arc::new(AtomicU32::new(0));
        let fallback_counter = fallback_hits.clone();
        let registry: Registry<ServerHandler> =
            Registry::new(Arc::new(move |_payload, _source| {
                fallback_counter.fetch_add(1, Ordering::SeqCst);
            }));

        registry.trigger(99, Value::Null, 1);
        assert_eq!(fallback_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn re_attaching_replaces_the_previous_handler() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry: Registry<ServerHandler> = Registry::new(Arc::new(|_, _| {}));

        let first = calls.clone();
        registry.attach(1, Arc::new(move |_, _| first.lock().unwrap().push("first")));
        let second = calls.clone();
        registry.attach(1, Arc::new(move |_, _| second.lock().unwrap().push("second")));

        registry.trigger(1, Value::Null, 0);
        assert_eq!(*calls.lock().unwrap(), vec!["second"]);
    }
}
