//! Chat server: logs clients in under a display name, relays chat lines to
//! everyone else, and announces departures. Grounded on the networking
//! module's own `demo/chatserver` sample.

use clap::{App, Arg};
use hashbrown::HashMap;
use netframe::logging;
use netframe::server::Server;
use serde_json::json;
use std::sync::{Arc, Mutex};

const LOGIN_REQUEST: u32 = 1;
const LOGIN_RESPONSE: u32 = 2;
const LOGOUT_REQUEST: u32 = 3;
const LOGOUT_RESPONSE: u32 = 4;
const MESSAGE_REQUEST: u32 = 5;
const MESSAGE_RESPONSE: u32 = 6;
const USERLIST_UPDATE: u32 = 7;

fn main() {
    let matches = App::new("Chat Server")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Runs the netframe chat demo server.")
        .arg(Arg::with_name("port").long("port").takes_value(true).default_value("9981"))
        .get_matches();

    let port: u16 = matches.value_of("port").unwrap().parse().expect("invalid port");
    let logger = logging::init(logging::Severity::Info);

    let users: Arc<Mutex<HashMap<u32, String>>> = Arc::new(Mutex::new(HashMap::new()));
    let server = Server::new(-1, Arc::new(|_, _| {}), logger.clone());

    let login_users = users.clone();
    let login_server = server.clone();
    server.attach(
        LOGIN_REQUEST,
        Arc::new(move |data, id| {
            let mut users = login_users.lock().unwrap();
            if users.contains_key(&id) {
                login_server.push(json!({ "success": false }), LOGIN_RESPONSE, id);
                return;
            }
            let username = data.get("username").and_then(|v| v.as_str()).unwrap_or("anon").to_string();
            users.insert(id, username.clone());
            login_server.push(
                json!({ "success": true, "id": id, "username": username }),
                LOGIN_RESPONSE,
                id,
            );
            for (&other_id, other_name) in users.iter() {
                if other_id == id {
                    continue;
                }
                login_server.push(
                    json!({ "add": true, "id": other_id, "username": other_name }),
                    USERLIST_UPDATE,
                    id,
                );
                login_server.push(
                    json!({ "add": true, "id": id, "username": username }),
                    USERLIST_UPDATE,
                    other_id,
                );
            }
        }),
    );

    let message_users = users.clone();
    let message_server = server.clone();
    server.attach(
        MESSAGE_REQUEST,
        Arc::new(move |data, id| {
            let users = message_users.lock().unwrap();
            if !users.contains_key(&id) {
                return;
            }
            let text = data.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
            for &other_id in users.keys() {
                message_server.push(json!({ "id": id, "text": text }), MESSAGE_RESPONSE, other_id);
            }
        }),
    );

    let logout_users = users.clone();
    let logout_server = server.clone();
    server.attach(
        LOGOUT_REQUEST,
        Arc::new(move |_data, id| {
            let username = match logout_users.lock().unwrap().remove(&id) {
                Some(name) => name,
                None => return,
            };
            logout_server.push(json!({ "id": id }), LOGOUT_RESPONSE, id);
            for &other_id in logout_users.lock().unwrap().keys() {
                logout_server.push(
                    json!({ "add": false, "id": id, "username": username }),
                    USERLIST_UPDATE,
                    other_id,
                );
            }
        }),
    );

    server.start(port).expect("failed to start chat server");
    logging::info!(logger, "chat server started"; "port" => port);

    while server.is_online() {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
    logging::info!(logger, "chat server stopped");
}
