//! Interactive connect-four client: joins the lobby, then reads column
//! numbers from stdin on its turn and prints the board state as it changes.

use clap::{App, Arg};
use netframe::logging;
use netframe::Client;
use serde_json::json;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const JOIN_LOBBY: u32 = 1;
const MATCH_FOUND: u32 = 2;
const DROP_PIECE: u32 = 3;
const PIECE_DROPPED: u32 = 4;
const GAME_OVER: u32 = 5;
const ILLEGAL_MOVE: u32 = 6;

fn main() {
    let matches = App::new("Connect Four Client")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Connects to the netframe connect-four demo server.")
        .arg(Arg::with_name("host").required(true))
        .arg(Arg::with_name("port").required(true))
        .get_matches();

    let host = matches.value_of("host").unwrap();
    let port: u16 = matches.value_of("port").unwrap().parse().expect("invalid port");
    let logger = logging::init(logging::Severity::Info);

    let client = Client::connect(host, port, Arc::new(|_| {}), logger)
        .expect("failed to connect to connect-four server");

    let game_over = Arc::new(AtomicBool::new(false));

    client.attach(
        MATCH_FOUND,
        Arc::new(move |data| {
            let disc = data.get("disc").and_then(|v| v.as_str()).unwrap_or("?");
            let first = data.get("first").and_then(|v| v.as_bool()).unwrap_or(false);
            println!("match found, you are {} ({})", disc, if first { "go first" } else { "wait for opponent" });
        }),
    );

    client.attach(
        PIECE_DROPPED,
        Arc::new(|data| {
            let row = data.get("row").and_then(|v| v.as_u64()).unwrap_or(0);
            let column = data.get("column").and_then(|v| v.as_u64()).unwrap_or(0);
            let player = data.get("player").and_then(|v| v.as_u64()).unwrap_or(0);
            println!("player {} dropped a piece at ({}, {})", player, row, column);
        }),
    );

    client.attach(
        ILLEGAL_MOVE,
        Arc::new(|data| {
            let reason = data.get("reason").and_then(|v| v.as_str()).unwrap_or("illegal move");
            println!("move rejected: {}", reason);
        }),
    );

    let over_flag = game_over.clone();
    client.attach(
        GAME_OVER,
        Arc::new(move |data| {
            match data.get("winner").and_then(|v| v.as_u64()) {
                Some(winner) => println!("game over, player {} wins", winner),
                None => println!("game over, draw"),
            }
            over_flag.store(true, Ordering::SeqCst);
        }),
    );

    client.push(serde_json::Value::Null, JOIN_LOBBY);
    println!("waiting for an opponent...");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        if game_over.load(Ordering::SeqCst) {
            break;
        }
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line == "/quit" {
            break;
        }
        let column: u64 = match line.trim().parse() {
            Ok(column) => column,
            Err(_) => {
                println!("enter a column number");
                continue;
            }
        };
        client.push(json!({ "column": column }), DROP_PIECE);
    }

    client.disconnect();
}
