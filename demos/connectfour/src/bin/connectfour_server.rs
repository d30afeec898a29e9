//! Matches pairs of connecting clients into a connect-four game, each match
//! its own group. Exercises `group`/`push-group` where the chat demo mostly
//! exercises `broadcast`.

use clap::{App, Arg};
use connectfour_demo::board::{Board, Disc};
use netframe::logging;
use netframe::server::Server;
use netframe::{ClientId, GroupId};
use serde_json::json;
use std::sync::{Arc, Mutex};

const JOIN_LOBBY: u32 = 1;
const MATCH_FOUND: u32 = 2;
const DROP_PIECE: u32 = 3;
const PIECE_DROPPED: u32 = 4;
const GAME_OVER: u32 = 5;
const ILLEGAL_MOVE: u32 = 6;

struct Match {
    board: Board,
    turn: ClientId,
    players: (ClientId, ClientId),
}

struct Lobby {
    waiting: Option<ClientId>,
    next_group: GroupId,
    matches: std::collections::HashMap<GroupId, Match>,
    player_group: std::collections::HashMap<ClientId, GroupId>,
}

impl Lobby {
    fn new() -> Lobby {
        Lobby {
            waiting: None,
            next_group: 1,
            matches: std::collections::HashMap::new(),
            player_group: std::collections::HashMap::new(),
        }
    }
}

fn main() {
    let matches = App::new("Connect Four Server")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Runs the netframe connect-four demo server.")
        .arg(Arg::with_name("port").long("port").takes_value(true).default_value("9981"))
        .get_matches();

    let port: u16 = matches.value_of("port").unwrap().parse().expect("invalid port");
    let logger = logging::init(logging::Severity::Info);

    let lobby = Arc::new(Mutex::new(Lobby::new()));
    let server = Server::new(-1, Arc::new(|_, _| {}), logger.clone());

    let join_lobby = lobby.clone();
    let join_server = server.clone();
    server.attach(
        JOIN_LOBBY,
        Arc::new(move |_data, id| {
            let mut lobby = join_lobby.lock().unwrap();
            let opponent = match lobby.waiting.take() {
                Some(opponent) => opponent,
                None => {
                    lobby.waiting = Some(id);
                    return;
                }
            };
            let group = lobby.next_group;
            lobby.next_group += 1;
            join_server.group(opponent, group);
            join_server.group(id, group);
            lobby.player_group.insert(opponent, group);
            lobby.player_group.insert(id, group);
            lobby.matches.insert(
                group,
                Match { board: Board::new(), turn: opponent, players: (opponent, id) },
            );

            join_server.push(json!({ "disc": "red", "first": true }), MATCH_FOUND, opponent);
            join_server.push(json!({ "disc": "yellow", "first": false }), MATCH_FOUND, id);
        }),
    );

    let move_lobby = lobby.clone();
    let move_server = server.clone();
    server.attach(
        DROP_PIECE,
        Arc::new(move |data, id| {
            let mut lobby = move_lobby.lock().unwrap();
            let group = match lobby.player_group.get(&id) {
                Some(&group) => group,
                None => return,
            };
            let column = match data.get("column").and_then(|v| v.as_u64()) {
                Some(column) => column as usize,
                None => return,
            };

            let (game_over, winner, players) = {
                let game = match lobby.matches.get_mut(&group) {
                    Some(game) => game,
                    None => return,
                };
                if game.turn != id {
                    move_server.push(json!({ "reason": "not your turn" }), ILLEGAL_MOVE, id);
                    return;
                }
                let disc = if id == game.players.0 { Disc::Red } else { Disc::Yellow };
                let row = match game.board.drop_piece(column, disc) {
                    Some(row) => row,
                    None => {
                        move_server.push(json!({ "reason": "column is full" }), ILLEGAL_MOVE, id);
                        return;
                    }
                };
                move_server.push_group(
                    json!({ "row": row, "column": column, "player": id }),
                    PIECE_DROPPED,
                    group,
                );
                let won = game.board.is_winning_move(row, column, disc);
                let drawn = !won && game.board.is_full();
                game.turn = if id == game.players.0 { game.players.1 } else { game.players.0 };
                (won || drawn, if won { Some(id) } else { None }, game.players)
            };

            if game_over {
                move_server.push_group(json!({ "winner": winner }), GAME_OVER, group);
                lobby.matches.remove(&group);
                lobby.player_group.remove(&players.0);
                lobby.player_group.remove(&players.1);
            }
        }),
    );

    server.start(port).expect("failed to start connect-four server");
    logging::info!(logger, "connect-four server started"; "port" => port);

    while server.is_online() {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
    logging::info!(logger, "connect-four server stopped");
}
