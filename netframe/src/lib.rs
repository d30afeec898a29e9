//! TCP-based multi-client message-dispatch runtime: length-prefixed JSON
//! frames, command-id dispatch, client grouping and IP-level admission
//! control.

pub mod client;
pub mod config;
pub mod error;
pub mod link;
pub mod logging;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod server;
pub mod worker;

pub use client::Client;
pub use error::{ErrorKind, NetError, NetResult};
pub use protocol::{ClientId, CommandId, GroupId, JsonMessage, Protocol};
pub use registry::{ClientHandler, Registry, ServerHandler};
pub use server::Server;
