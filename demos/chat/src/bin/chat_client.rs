//! Chat client: logs in under a username, then relays stdin lines as chat
//! messages and prints whatever the server broadcasts. Grounded on the
//! networking module's `demo/chatclient` sample and, for the per-thread
//! stdin-reading shape, the pack's standalone Rust chat client examples.

use clap::{App, Arg};
use hashbrown::HashMap;
use netframe::logging;
use netframe::Client;
use serde_json::json;
use std::io::{self, BufRead};
use std::sync::{Arc, Mutex};

const LOGIN_REQUEST: u32 = 1;
const LOGIN_RESPONSE: u32 = 2;
const LOGOUT_REQUEST: u32 = 3;
const LOGOUT_RESPONSE: u32 = 4;
const MESSAGE_REQUEST: u32 = 5;
const MESSAGE_RESPONSE: u32 = 6;
const USERLIST_UPDATE: u32 = 7;

fn main() {
    let matches = App::new("Chat Client")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Connects to the netframe chat demo server.")
        .arg(Arg::with_name("host").required(true))
        .arg(Arg::with_name("port").required(true))
        .arg(Arg::with_name("username").required(true))
        .get_matches();

    let host = matches.value_of("host").unwrap();
    let port: u16 = matches.value_of("port").unwrap().parse().expect("invalid port");
    let username = matches.value_of("username").unwrap().to_string();
    let logger = logging::init(logging::Severity::Info);

    let users: Arc<Mutex<HashMap<u32, String>>> = Arc::new(Mutex::new(HashMap::new()));

    let client = Client::connect(host, port, Arc::new(|_| {}), logger.clone())
        .expect("failed to connect to chat server");

    let login_users = users.clone();
    let login_username = username.clone();
    client.attach(
        LOGIN_RESPONSE,
        Arc::new(move |data| {
            let success = data.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
            if success {
                println!("you entered the chat as '{}'", login_username);
                let id = data.get("id").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                login_users.lock().unwrap().insert(id, login_username.clone());
            } else {
                println!("login failed, you may already be logged in");
            }
        }),
    );

    let message_users = users.clone();
    client.attach(
        MESSAGE_RESPONSE,
        Arc::new(move |data| {
            let id = data.get("id").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            let text = data.get("text").and_then(|v| v.as_str()).unwrap_or("");
            let name = message_users.lock().unwrap().get(&id).cloned().unwrap_or_else(|| id.to_string());
            println!("<{}> {}", name, text);
        }),
    );

    let update_users = users.clone();
    client.attach(
        USERLIST_UPDATE,
        Arc::new(move |data| {
            let add = data.get("add").and_then(|v| v.as_bool()).unwrap_or(false);
            let id = data.get("id").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            let name = data.get("username").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let mut users = update_users.lock().unwrap();
            if add {
                println!("'{}' joined the chat", name);
                users.insert(id, name);
            } else if let Some(name) = users.remove(&id) {
                println!("'{}' left the chat", name);
            }
        }),
    );

    client.attach(
        LOGOUT_RESPONSE,
        Arc::new(|_data| {
            println!("you left the chat");
        }),
    );

    client.push(json!({ "username": username }), LOGIN_REQUEST);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line == "/quit" {
            client.push(serde_json::Value::Null, LOGOUT_REQUEST);
            break;
        }
        client.push(json!({ "text": line }), MESSAGE_REQUEST);
    }

    client.shutdown(true);
}
