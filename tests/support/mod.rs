// each integration test binary compiles its own copy of this module and
// uses a different slice of it
#![allow(dead_code)]

//! Test support: an in-process RESP server the integration tests talk to
//! over a real TCP socket.
//!
//! The server implements just enough of the command set for the client to
//! exercise every engine path: strings, keys, lists, hashes, sets,
//! transactions with WATCH semantics, pub/sub and the handshake commands.
//! It also records the order commands arrive in and offers a couple of
//! fault-injection hooks (a poisoned reply, an unsolicited reply, a black
//! hole and a forced transaction abort).

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use redmux::reply::Reply;
use redmux::resp::ReplyReader;
use redmux::ConnectionConfig;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// A key that makes the server answer with a malformed frame.
pub const POISON_KEY: &str = "__poison__";
/// A key that makes the server send an extra, unsolicited reply.
pub const UNSOLICITED_KEY: &str = "__unsolicited__";
/// A key the server never answers for.
pub const BLACKHOLE_KEY: &str = "__blackhole__";

const SERVER_VERSION: &str = "2.6.14";

#[derive(Clone)]
enum Value {
    Str(Bytes),
    List(Vec<Bytes>),
    Hash(HashMap<String, Bytes>),
    Set(HashSet<Bytes>),
    SortedSet(Vec<(Bytes, f64)>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
        }
    }
}

#[derive(Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

struct ServerState {
    password: Option<String>,
    dbs: Mutex<HashMap<i32, HashMap<String, Entry>>>,
    versions: Mutex<HashMap<(i32, String), u64>>,
    log: Mutex<Vec<String>>,
    force_abort_exec: AtomicBool,
    subscribers: Mutex<HashMap<u64, (HashSet<String>, HashSet<String>)>>,
    publish: broadcast::Sender<(String, Bytes)>,
    next_session: AtomicU64,
}

/// The in-process server handle used by the integration tests.
pub struct MockServer {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
}

impl MockServer {
    pub async fn start() -> MockServer {
        MockServer::start_with_password(None).await
    }

    pub async fn start_with_password(password: Option<&str>) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock server");
        let addr = listener.local_addr().expect("mock server has no address");

        let (publish, _) = broadcast::channel(64);
        let state = Arc::new(ServerState {
            password: password.map(str::to_string),
            dbs: Mutex::new(HashMap::new()),
            versions: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            force_abort_exec: AtomicBool::new(false),
            subscribers: Mutex::new(HashMap::new()),
            publish,
            next_session: AtomicU64::new(0),
        });

        {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    tokio::spawn(handle_connection(Arc::clone(&state), stream));
                }
            });
        }

        MockServer { addr, state }
    }

    /// A connection config pointing at this server.
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.addr.ip().to_string()).port(self.addr.port())
    }

    /// The names of every command received so far, in arrival order.
    pub fn command_log(&self) -> Vec<String> {
        self.state.log.lock().unwrap().clone()
    }

    /// Makes the next `EXEC` abort as if a watched key had changed.
    pub fn force_abort_next_exec(&self) {
        self.state.force_abort_exec.store(true, Ordering::SeqCst);
    }
}

struct Session {
    id: u64,
    db: i32,
    authed: bool,
    txn: Option<Vec<(String, Vec<Bytes>)>>,
    watches: HashMap<(i32, String), u64>,
    channels: HashSet<String>,
    patterns: HashSet<String>,
}

async fn handle_connection(state: Arc<ServerState>, stream: TcpStream) {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = ReplyReader::new(read_half);
    let mut events = state.publish.subscribe();

    let mut session = Session {
        id: state.next_session.fetch_add(1, Ordering::SeqCst),
        db: 0,
        authed: state.password.is_none(),
        txn: None,
        watches: HashMap::new(),
        channels: HashSet::new(),
        patterns: HashSet::new(),
    };

    loop {
        let mut out = BytesMut::new();

        tokio::select! {
            frame = reader.read_reply() => {
                let Ok(Some(frame)) = frame else { break };
                let Some((name, args)) = parse_command(frame) else {
                    error(&mut out, "ERR protocol error");
                    if writer.write_all(&out).await.is_err() { break; }
                    continue;
                };

                state.log.lock().unwrap().push(name.clone());

                let keep_going = dispatch(&state, &mut session, &name, &args, &mut out);
                if !out.is_empty() && writer.write_all(&out).await.is_err() {
                    break;
                }
                if !keep_going {
                    break;
                }
            }
            event = events.recv() => {
                let Ok((channel, payload)) = event else { continue };
                deliver_event(&session, &channel, &payload, &mut out);
                if !out.is_empty() && writer.write_all(&out).await.is_err() {
                    break;
                }
            }
        }
    }

    state.subscribers.lock().unwrap().remove(&session.id);
}

fn deliver_event(session: &Session, channel: &str, payload: &[u8], out: &mut BytesMut) {
    if session.channels.contains(channel) {
        array_header(out, 3);
        bulk(out, Some(b"message"));
        bulk(out, Some(channel.as_bytes()));
        bulk(out, Some(payload));
    }

    for pattern in &session.patterns {
        if pattern_matches(pattern, channel) {
            array_header(out, 4);
            bulk(out, Some(b"pmessage"));
            bulk(out, Some(pattern.as_bytes()));
            bulk(out, Some(channel.as_bytes()));
            bulk(out, Some(payload));
        }
    }
}

fn pattern_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => pattern == channel,
    }
}

fn parse_command(frame: Reply) -> Option<(String, Vec<Bytes>)> {
    let Reply::Array(Some(items)) = frame else {
        return None;
    };

    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Reply::Bulk(Some(body)) => parts.push(body),
            _ => return None,
        }
    }

    let name = String::from_utf8_lossy(parts.first()?).to_uppercase();
    Some((name, parts.split_off(1)))
}

/// Handles one command, writing the reply into `out`. Returns false when
/// the connection should close.
fn dispatch(
    state: &ServerState,
    session: &mut Session,
    name: &str,
    args: &[Bytes],
    out: &mut BytesMut,
) -> bool {
    if !session.authed {
        if name == "AUTH" {
            let given = args.first().map(|a| String::from_utf8_lossy(a).into_owned());
            if given.as_deref() == state.password.as_deref() {
                session.authed = true;
                status(out, "OK");
            } else {
                error(out, "ERR invalid password");
            }
        } else {
            error(out, "ERR operation not permitted");
        }
        return true;
    }

    // transaction queuing intercepts everything except control commands
    if session.txn.is_some()
        && !matches!(name, "MULTI" | "EXEC" | "DISCARD" | "WATCH" | "UNWATCH" | "QUIT")
    {
        if let Some(queue) = session.txn.as_mut() {
            queue.push((name.to_string(), args.to_vec()));
        }
        status(out, "QUEUED");
        return true;
    }

    match name {
        "QUIT" => {
            status(out, "OK");
            return false;
        }
        "AUTH" => status(out, "OK"),
        "PING" => status(out, "PONG"),
        "ECHO" => bulk(out, args.first().map(|a| a.as_ref())),
        "INFO" => {
            let body = format!(
                "# Server\r\nredis_version:{SERVER_VERSION}\r\nredis_mode:standalone\r\n"
            );
            bulk(out, Some(body.as_bytes()));
        }
        "CONFIG" => {
            let sub = args
                .first()
                .map(|a| String::from_utf8_lossy(a).to_uppercase())
                .unwrap_or_default();
            if sub == "GET" {
                let key = args
                    .get(1)
                    .map(|a| String::from_utf8_lossy(a).into_owned())
                    .unwrap_or_default();
                array_header(out, 2);
                bulk(out, Some(key.as_bytes()));
                bulk(out, Some(b"0"));
            } else {
                status(out, "OK");
            }
        }
        "SELECT" => {
            session.db = args
                .first()
                .and_then(|a| String::from_utf8_lossy(a).parse::<i32>().ok())
                .unwrap_or(0);
            status(out, "OK");
        }
        "FLUSHDB" => {
            state.dbs.lock().unwrap().remove(&session.db);
            status(out, "OK");
        }
        "FLUSHALL" => {
            state.dbs.lock().unwrap().clear();
            status(out, "OK");
        }
        "SLAVEOF" => status(out, "OK"),
        "MULTI" => {
            session.txn = Some(Vec::new());
            status(out, "OK");
        }
        "DISCARD" => {
            session.txn = None;
            session.watches.clear();
            status(out, "OK");
        }
        "WATCH" => {
            for key in args {
                let key = String::from_utf8_lossy(key).into_owned();
                let version = current_version(state, session.db, &key);
                session.watches.insert((session.db, key), version);
            }
            status(out, "OK");
        }
        "UNWATCH" => {
            session.watches.clear();
            status(out, "OK");
        }
        "EXEC" => {
            let queued = session.txn.take().unwrap_or_default();
            let forced = state.force_abort_exec.swap(false, Ordering::SeqCst);
            let dirty = session.watches.iter().any(|((db, key), version)| {
                current_version(state, *db, key) != *version
            });
            session.watches.clear();

            if forced || dirty {
                out.put_slice(b"*-1\r\n");
            } else {
                array_header(out, queued.len());
                for (queued_name, queued_args) in queued {
                    apply_data_command(state, session, &queued_name, &queued_args, out);
                }
            }
        }
        "SUBSCRIBE" => {
            for channel in args {
                let channel = String::from_utf8_lossy(channel).into_owned();
                session.channels.insert(channel.clone());
                sync_subscribers(state, session);
                array_header(out, 3);
                bulk(out, Some(b"subscribe"));
                bulk(out, Some(channel.as_bytes()));
                int(out, session.channels.len() as i64);
            }
        }
        "UNSUBSCRIBE" => {
            for channel in args {
                let channel = String::from_utf8_lossy(channel).into_owned();
                session.channels.remove(&channel);
                sync_subscribers(state, session);
                array_header(out, 3);
                bulk(out, Some(b"unsubscribe"));
                bulk(out, Some(channel.as_bytes()));
                int(out, session.channels.len() as i64);
            }
        }
        "PSUBSCRIBE" => {
            for pattern in args {
                let pattern = String::from_utf8_lossy(pattern).into_owned();
                session.patterns.insert(pattern.clone());
                sync_subscribers(state, session);
                array_header(out, 3);
                bulk(out, Some(b"psubscribe"));
                bulk(out, Some(pattern.as_bytes()));
                int(out, session.patterns.len() as i64);
            }
        }
        "PUNSUBSCRIBE" => {
            for pattern in args {
                let pattern = String::from_utf8_lossy(pattern).into_owned();
                session.patterns.remove(&pattern);
                sync_subscribers(state, session);
                array_header(out, 3);
                bulk(out, Some(b"punsubscribe"));
                bulk(out, Some(pattern.as_bytes()));
                int(out, session.patterns.len() as i64);
            }
        }
        "PUBLISH" => {
            let channel = args
                .first()
                .map(|a| String::from_utf8_lossy(a).into_owned())
                .unwrap_or_default();
            let payload = args.get(1).cloned().unwrap_or_default();

            let receivers = {
                let subscribers = state.subscribers.lock().unwrap();
                subscribers
                    .values()
                    .filter(|(channels, patterns)| {
                        channels.contains(&channel)
                            || patterns.iter().any(|p| pattern_matches(p, &channel))
                    })
                    .count()
            };

            let _ = state.publish.send((channel, payload));
            int(out, receivers as i64);
        }
        _ => {
            apply_data_command(state, session, name, args, out);
        }
    }

    true
}

fn sync_subscribers(state: &ServerState, session: &Session) {
    state.subscribers.lock().unwrap().insert(
        session.id,
        (session.channels.clone(), session.patterns.clone()),
    );
}

fn current_version(state: &ServerState, db: i32, key: &str) -> u64 {
    *state
        .versions
        .lock()
        .unwrap()
        .get(&(db, key.to_string()))
        .unwrap_or(&0)
}

fn touch(state: &ServerState, db: i32, key: &str) {
    *state
        .versions
        .lock()
        .unwrap()
        .entry((db, key.to_string()))
        .or_insert(0) += 1;
}

fn arg_str(args: &[Bytes], index: usize) -> String {
    args.get(index)
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .unwrap_or_default()
}

fn arg_int(args: &[Bytes], index: usize) -> Option<i64> {
    args.get(index)
        .and_then(|a| String::from_utf8_lossy(a).parse::<i64>().ok())
}

/// Data commands; also run for each queued command when `EXEC` commits.
fn apply_data_command(
    state: &ServerState,
    session: &mut Session,
    name: &str,
    args: &[Bytes],
    out: &mut BytesMut,
) {
    let db = session.db;
    let key = arg_str(args, 0);

    // fault-injection hooks used by the protocol tests
    if name == "GET" {
        match key.as_str() {
            POISON_KEY => {
                out.put_slice(b"!oops\r\n");
                return;
            }
            UNSOLICITED_KEY => {
                bulk(out, None);
                status(out, "OK");
                return;
            }
            BLACKHOLE_KEY => {
                return;
            }
            _ => {}
        }
    }

    let mut dbs = state.dbs.lock().unwrap();

    // MOVE spans two databases, so it cannot work through one store borrow
    if name == "MOVE" {
        let target_db = arg_int(args, 1).unwrap_or(0) as i32;
        let removed = dbs.entry(db).or_default().remove(&key);
        match removed {
            Some(entry) => {
                touch(state, db, &key);
                touch(state, target_db, &key);
                dbs.entry(target_db).or_default().insert(key, entry);
                int(out, 1);
            }
            None => int(out, 0),
        }
        return;
    }

    let store = dbs.entry(db).or_default();
    prune_expired(store);

    match name {
        "SELECT" => {
            session.db = arg_int(args, 0).unwrap_or(0) as i32;
            status(out, "OK");
        }
        "SET" => {
            store.insert(
                key.clone(),
                Entry {
                    value: Value::Str(args.get(1).cloned().unwrap_or_default()),
                    expires_at: None,
                },
            );
            touch(state, db, &key);
            status(out, "OK");
        }
        "SETEX" => {
            let seconds = arg_int(args, 1).unwrap_or(0);
            store.insert(
                key.clone(),
                Entry {
                    value: Value::Str(args.get(2).cloned().unwrap_or_default()),
                    expires_at: Some(Instant::now() + Duration::from_secs(seconds.max(0) as u64)),
                },
            );
            touch(state, db, &key);
            status(out, "OK");
        }
        "SETNX" => {
            if store.contains_key(&key) {
                int(out, 0);
            } else {
                store.insert(
                    key.clone(),
                    Entry {
                        value: Value::Str(args.get(1).cloned().unwrap_or_default()),
                        expires_at: None,
                    },
                );
                touch(state, db, &key);
                int(out, 1);
            }
        }
        "GET" => match store.get(&key) {
            Some(Entry {
                value: Value::Str(body),
                ..
            }) => bulk(out, Some(body)),
            Some(_) => error(out, "ERR wrong type"),
            None => bulk(out, None),
        },
        "GETSET" => {
            let old = match store.get(&key) {
                Some(Entry {
                    value: Value::Str(body),
                    ..
                }) => Some(body.clone()),
                _ => None,
            };
            store.insert(
                key.clone(),
                Entry {
                    value: Value::Str(args.get(1).cloned().unwrap_or_default()),
                    expires_at: None,
                },
            );
            touch(state, db, &key);
            bulk(out, old.as_deref());
        }
        "APPEND" => {
            let mut body = match store.get(&key) {
                Some(Entry {
                    value: Value::Str(body),
                    ..
                }) => body.to_vec(),
                _ => Vec::new(),
            };
            body.extend_from_slice(args.get(1).map(|a| a.as_ref()).unwrap_or_default());
            let length = body.len() as i64;
            store.insert(
                key.clone(),
                Entry {
                    value: Value::Str(Bytes::from(body)),
                    expires_at: None,
                },
            );
            touch(state, db, &key);
            int(out, length);
        }
        "STRLEN" => match store.get(&key) {
            Some(Entry {
                value: Value::Str(body),
                ..
            }) => int(out, body.len() as i64),
            _ => int(out, 0),
        },
        "INCR" | "INCRBY" | "DECR" | "DECRBY" => {
            let delta = match name {
                "INCR" => 1,
                "DECR" => -1,
                "INCRBY" => arg_int(args, 1).unwrap_or(0),
                _ => -arg_int(args, 1).unwrap_or(0),
            };
            let current = match store.get(&key) {
                Some(Entry {
                    value: Value::Str(body),
                    ..
                }) => String::from_utf8_lossy(body).parse::<i64>().ok(),
                Some(_) => None,
                None => Some(0),
            };
            match current {
                Some(value) => {
                    let next = value + delta;
                    store.insert(
                        key.clone(),
                        Entry {
                            value: Value::Str(Bytes::from(next.to_string())),
                            expires_at: None,
                        },
                    );
                    touch(state, db, &key);
                    int(out, next);
                }
                None => error(out, "ERR value is not an integer or out of range"),
            }
        }
        "DEL" => {
            let mut removed = 0;
            for arg in args {
                let key = String::from_utf8_lossy(arg).into_owned();
                if store.remove(&key).is_some() {
                    touch(state, db, &key);
                    removed += 1;
                }
            }
            int(out, removed);
        }
        "EXISTS" => int(out, i64::from(store.contains_key(&key))),
        "EXPIRE" => {
            let seconds = arg_int(args, 1).unwrap_or(0);
            match store.get_mut(&key) {
                Some(entry) => {
                    entry.expires_at =
                        Some(Instant::now() + Duration::from_secs(seconds.max(0) as u64));
                    touch(state, db, &key);
                    int(out, 1);
                }
                None => int(out, 0),
            }
        }
        "PERSIST" => match store.get_mut(&key) {
            Some(entry) if entry.expires_at.is_some() => {
                entry.expires_at = None;
                touch(state, db, &key);
                int(out, 1);
            }
            _ => int(out, 0),
        },
        "TTL" => match store.get(&key).and_then(|entry| entry.expires_at) {
            Some(expires_at) => {
                let remaining = expires_at.saturating_duration_since(Instant::now());
                int(out, remaining.as_secs() as i64);
            }
            None => int(out, -1),
        },
        "RENAME" => {
            let target = arg_str(args, 1);
            match store.remove(&key) {
                Some(entry) => {
                    store.insert(target.clone(), entry);
                    touch(state, db, &key);
                    touch(state, db, &target);
                    status(out, "OK");
                }
                None => error(out, "ERR no such key"),
            }
        }
        "RANDOMKEY" => match store.keys().next() {
            Some(key) => bulk(out, Some(key.clone().as_bytes())),
            None => bulk(out, None),
        },
        "TYPE" => match store.get(&key) {
            Some(entry) => status(out, entry.value.type_name()),
            None => status(out, "none"),
        },
        "KEYS" => {
            let keys: Vec<String> = store.keys().cloned().collect();
            array_header(out, keys.len());
            for key in keys {
                bulk(out, Some(key.as_bytes()));
            }
        }
        "LPUSH" | "RPUSH" => {
            let entry = store.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::List(Vec::new()),
                expires_at: None,
            });
            if let Value::List(list) = &mut entry.value {
                let item = args.get(1).cloned().unwrap_or_default();
                if name == "LPUSH" {
                    list.insert(0, item);
                } else {
                    list.push(item);
                }
                let length = list.len() as i64;
                touch(state, db, &key);
                int(out, length);
            } else {
                error(out, "ERR wrong type");
            }
        }
        "LPOP" | "RPOP" => match store.get_mut(&key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) if !list.is_empty() => {
                let item = if name == "LPOP" {
                    list.remove(0)
                } else {
                    list.pop().unwrap_or_default()
                };
                touch(state, db, &key);
                bulk(out, Some(&item));
            }
            _ => bulk(out, None),
        },
        "LLEN" => match store.get(&key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => int(out, list.len() as i64),
            _ => int(out, 0),
        },
        "LRANGE" => match store.get(&key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let start = arg_int(args, 1).unwrap_or(0);
                let stop = arg_int(args, 2).unwrap_or(-1);
                let length = list.len() as i64;
                let resolve = |index: i64| -> i64 {
                    if index < 0 {
                        (length + index).max(0)
                    } else {
                        index.min(length)
                    }
                };
                let from = resolve(start) as usize;
                let to = (resolve(stop) + 1).min(length) as usize;
                let window = if from < to { &list[from..to] } else { &list[0..0] };
                array_header(out, window.len());
                for item in window {
                    bulk(out, Some(item));
                }
            }
            _ => array_header(out, 0),
        },
        "LREM" => match store.get_mut(&key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let target = args.get(2).cloned().unwrap_or_default();
                let before = list.len();
                list.retain(|item| item != &target);
                let removed = (before - list.len()) as i64;
                if removed > 0 {
                    touch(state, db, &key);
                }
                int(out, removed);
            }
            _ => int(out, 0),
        },
        "LINDEX" => match store.get(&key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let index = arg_int(args, 1).unwrap_or(0);
                let resolved = if index < 0 {
                    list.len() as i64 + index
                } else {
                    index
                };
                match usize::try_from(resolved).ok().and_then(|i| list.get(i)) {
                    Some(item) => bulk(out, Some(item)),
                    None => bulk(out, None),
                }
            }
            _ => bulk(out, None),
        },
        "HSET" | "HSETNX" => {
            let entry = store.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            if let Value::Hash(hash) = &mut entry.value {
                let field = arg_str(args, 1);
                let value = args.get(2).cloned().unwrap_or_default();
                let fresh = !hash.contains_key(&field);
                if fresh || name == "HSET" {
                    hash.insert(field, value);
                    touch(state, db, &key);
                }
                int(out, i64::from(fresh));
            } else {
                error(out, "ERR wrong type");
            }
        }
        "HGET" => match store.get(&key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => bulk(out, hash.get(&arg_str(args, 1)).map(|v| v.as_ref())),
            _ => bulk(out, None),
        },
        "HGETALL" => match store.get(&key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => {
                array_header(out, hash.len() * 2);
                for (field, value) in hash {
                    bulk(out, Some(field.as_bytes()));
                    bulk(out, Some(value));
                }
            }
            _ => array_header(out, 0),
        },
        "HDEL" => match store.get_mut(&key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => {
                let removed = hash.remove(&arg_str(args, 1)).is_some();
                if removed {
                    touch(state, db, &key);
                }
                int(out, i64::from(removed));
            }
            _ => int(out, 0),
        },
        "HEXISTS" => match store.get(&key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => int(out, i64::from(hash.contains_key(&arg_str(args, 1)))),
            _ => int(out, 0),
        },
        "HINCRBY" => {
            let entry = store.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            if let Value::Hash(hash) = &mut entry.value {
                let field = arg_str(args, 1);
                let delta = arg_int(args, 2).unwrap_or(0);
                let current = hash
                    .get(&field)
                    .and_then(|v| String::from_utf8_lossy(v).parse::<i64>().ok())
                    .unwrap_or(0);
                let next = current + delta;
                hash.insert(field, Bytes::from(next.to_string()));
                touch(state, db, &key);
                int(out, next);
            } else {
                error(out, "ERR wrong type");
            }
        }
        "HKEYS" => match store.get(&key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => {
                array_header(out, hash.len());
                for field in hash.keys() {
                    bulk(out, Some(field.as_bytes()));
                }
            }
            _ => array_header(out, 0),
        },
        "HVALS" => match store.get(&key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => {
                array_header(out, hash.len());
                for value in hash.values() {
                    bulk(out, Some(value));
                }
            }
            _ => array_header(out, 0),
        },
        "HLEN" => match store.get(&key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => int(out, hash.len() as i64),
            _ => int(out, 0),
        },
        "SADD" | "SREM" => {
            let entry = store.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::Set(HashSet::new()),
                expires_at: None,
            });
            if let Value::Set(set) = &mut entry.value {
                let member = args.get(1).cloned().unwrap_or_default();
                let changed = if name == "SADD" {
                    set.insert(member)
                } else {
                    set.remove(&member)
                };
                if changed {
                    touch(state, db, &key);
                }
                int(out, i64::from(changed));
            } else {
                error(out, "ERR wrong type");
            }
        }
        "SCARD" => match store.get(&key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => int(out, set.len() as i64),
            _ => int(out, 0),
        },
        "SISMEMBER" => match store.get(&key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => int(
                out,
                i64::from(set.contains(&args.get(1).cloned().unwrap_or_default())),
            ),
            _ => int(out, 0),
        },
        "SMEMBERS" => match store.get(&key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                array_header(out, set.len());
                for member in set {
                    bulk(out, Some(member));
                }
            }
            _ => array_header(out, 0),
        },
        "ZADD" | "ZINCRBY" => {
            let entry = store.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::SortedSet(Vec::new()),
                expires_at: None,
            });
            if let Value::SortedSet(members) = &mut entry.value {
                let score = args
                    .get(1)
                    .and_then(|a| String::from_utf8_lossy(a).parse::<f64>().ok())
                    .unwrap_or(0.0);
                let member = args.get(2).cloned().unwrap_or_default();
                let existing = members.iter().position(|(m, _)| m == &member);

                let reply_score;
                let fresh = existing.is_none();
                match existing {
                    Some(index) if name == "ZINCRBY" => {
                        members[index].1 += score;
                        reply_score = members[index].1;
                    }
                    Some(index) => {
                        members[index].1 = score;
                        reply_score = score;
                    }
                    None => {
                        members.push((member, score));
                        reply_score = score;
                    }
                }
                members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
                touch(state, db, &key);

                if name == "ZADD" {
                    int(out, i64::from(fresh));
                } else {
                    bulk(out, Some(format_score(reply_score).as_bytes()));
                }
            } else {
                error(out, "ERR wrong type");
            }
        }
        "ZREM" => match store.get_mut(&key) {
            Some(Entry {
                value: Value::SortedSet(members),
                ..
            }) => {
                let member = args.get(1).cloned().unwrap_or_default();
                let before = members.len();
                members.retain(|(m, _)| m != &member);
                let removed = before != members.len();
                if removed {
                    touch(state, db, &key);
                }
                int(out, i64::from(removed));
            }
            _ => int(out, 0),
        },
        "ZSCORE" => match store.get(&key) {
            Some(Entry {
                value: Value::SortedSet(members),
                ..
            }) => {
                let member = args.get(1).cloned().unwrap_or_default();
                match members.iter().find(|(m, _)| m == &member) {
                    Some((_, score)) => bulk(out, Some(format_score(*score).as_bytes())),
                    None => bulk(out, None),
                }
            }
            _ => bulk(out, None),
        },
        "ZCARD" => match store.get(&key) {
            Some(Entry {
                value: Value::SortedSet(members),
                ..
            }) => int(out, members.len() as i64),
            _ => int(out, 0),
        },
        "ZRANGE" => match store.get(&key) {
            Some(Entry {
                value: Value::SortedSet(members),
                ..
            }) => {
                let start = arg_int(args, 1).unwrap_or(0);
                let stop = arg_int(args, 2).unwrap_or(-1);
                let with_scores = args
                    .get(3)
                    .map(|a| String::from_utf8_lossy(a).to_uppercase() == "WITHSCORES")
                    .unwrap_or(false);
                let length = members.len() as i64;
                let resolve = |index: i64| -> i64 {
                    if index < 0 {
                        (length + index).max(0)
                    } else {
                        index.min(length)
                    }
                };
                let from = resolve(start) as usize;
                let to = (resolve(stop) + 1).min(length) as usize;
                let window = if from < to {
                    &members[from..to]
                } else {
                    &members[0..0]
                };

                if with_scores {
                    array_header(out, window.len() * 2);
                    for (member, score) in window {
                        bulk(out, Some(member));
                        bulk(out, Some(format_score(*score).as_bytes()));
                    }
                } else {
                    array_header(out, window.len());
                    for (member, _) in window {
                        bulk(out, Some(member));
                    }
                }
            }
            _ => array_header(out, 0),
        },
        "SPOP" => match store.get_mut(&key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => match set.iter().next().cloned() {
                Some(member) => {
                    set.remove(&member);
                    touch(state, db, &key);
                    bulk(out, Some(&member));
                }
                None => bulk(out, None),
            },
            _ => bulk(out, None),
        },
        _ => error(out, "ERR unknown command"),
    }
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}

fn prune_expired(store: &mut HashMap<String, Entry>) {
    let now = Instant::now();
    store.retain(|_, entry| match entry.expires_at {
        Some(expires_at) => expires_at > now,
        None => true,
    });
}

fn status(out: &mut BytesMut, text: &str) {
    out.put_u8(b'+');
    out.put_slice(text.as_bytes());
    out.put_slice(b"\r\n");
}

fn error(out: &mut BytesMut, text: &str) {
    out.put_u8(b'-');
    out.put_slice(text.as_bytes());
    out.put_slice(b"\r\n");
}

fn int(out: &mut BytesMut, value: i64) {
    out.put_u8(b':');
    out.put_slice(value.to_string().as_bytes());
    out.put_slice(b"\r\n");
}

fn bulk(out: &mut BytesMut, body: Option<&[u8]>) {
    match body {
        Some(body) => {
            out.put_u8(b'$');
            out.put_slice(body.len().to_string().as_bytes());
            out.put_slice(b"\r\n");
            out.put_slice(body);
            out.put_slice(b"\r\n");
        }
        None => out.put_slice(b"$-1\r\n"),
    }
}

fn array_header(out: &mut BytesMut, count: usize) {
    out.put_u8(b'*');
    out.put_slice(count.to_string().as_bytes());
    out.put_slice(b"\r\n");
}
