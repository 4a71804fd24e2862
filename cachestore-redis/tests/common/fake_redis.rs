/// In-process RESP server for tests that need a Redis peer
///
/// Speaks enough of the protocol for the store: connection setup, PING, GET,
/// MGET, SET, SETEX, DEL, FLUSHDB, TTL, TYPE, HSET and SCAN. Every command is
/// recorded, so tests can assert on what the store sent.
///
/// SCAN pages overlap by one key on purpose, like a server that is rehashing,
/// so callers must deduplicate.

use cachestore_shared::config::StoreConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

enum Data {
    Text(Vec<u8>),
    Hash(HashMap<Vec<u8>, Vec<u8>>),
}

struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct State {
    entries: HashMap<Vec<u8>, Entry>,
    commands: Vec<String>,
}

enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Vec<Reply>),
}

impl Reply {
    fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Status(text) => out.extend_from_slice(format!("+{}\r\n", text).as_bytes()),
            Reply::Error(text) => out.extend_from_slice(format!("-{}\r\n", text).as_bytes()),
            Reply::Integer(n) => out.extend_from_slice(format!(":{}\r\n", n).as_bytes()),
            Reply::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            Reply::Bulk(Some(bytes)) => {
                out.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
                out.extend_from_slice(bytes);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Array(items) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.write(out);
                }
            }
        }
    }
}

/// Handle to a running fake server
#[derive(Clone)]
pub struct FakeRedis {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl FakeRedis {
    /// Binds an ephemeral port and serves connections in the background
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake redis");
        let addr = listener.local_addr().expect("fake redis address");
        let state = Arc::new(Mutex::new(State::default()));

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&accept_state)));
            }
        });

        Self { addr, state }
    }

    /// Store configuration pointing at this server
    pub fn config(&self) -> StoreConfig {
        StoreConfig::new()
            .host("127.0.0.1")
            .port(self.addr.port())
            .pool_size(1, 4)
            .timeouts(2, 5)
    }

    /// Names of the commands received so far, upper-cased
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Forgets the recorded commands
    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Stores a hash field directly, bypassing the store
    pub fn insert_hash(&self, key: &str, field: &str, value: &str) {
        let mut state = self.state.lock();
        state.hset(key.as_bytes(), field.as_bytes(), value.as_bytes());
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<State>>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let args = match read_command(&mut reader).await {
            Ok(Some(args)) if !args.is_empty() => args,
            _ => return,
        };

        let reply = state.lock().execute(&args);
        let mut out = Vec::new();
        reply.write(&mut out);
        if write_half.write_all(&out).await.is_err() {
            return;
        }
    }
}

async fn read_command<R>(reader: &mut R) -> io::Result<Option<Vec<Vec<u8>>>>
where
    R: AsyncBufReadExt + AsyncReadExt + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let count = header_len(&line, '*')?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await?;
        let len = header_len(&line, '$')?;

        let mut buf = vec![0u8; len + 2];
        reader.read_exact(&mut buf).await?;
        buf.truncate(len);
        args.push(buf);
    }
    Ok(Some(args))
}

fn header_len(line: &str, marker: char) -> io::Result<usize> {
    line.trim_end()
        .strip_prefix(marker)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("bad header {:?}", line)))
}

impl State {
    fn execute(&mut self, args: &[Vec<u8>]) -> Reply {
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        self.commands.push(name.clone());
        let args = &args[1..];

        match (name.as_str(), args.len()) {
            ("PING", 0) => Reply::Status("PONG".to_string()),
            ("PING", 1) => Reply::Bulk(Some(args[0].clone())),
            ("SELECT" | "AUTH" | "CLIENT", _) => Reply::ok(),
            ("GET", 1) => match self.live(&args[0]) {
                None => Reply::Bulk(None),
                Some(Data::Text(bytes)) => Reply::Bulk(Some(bytes.clone())),
                Some(Data::Hash(_)) => Reply::Error(WRONGTYPE.to_string()),
            },
            ("MGET", n) if n > 0 => {
                let values = args
                    .iter()
                    .map(|key| match self.live(key) {
                        Some(Data::Text(bytes)) => Reply::Bulk(Some(bytes.clone())),
                        _ => Reply::Bulk(None),
                    })
                    .collect();
                Reply::Array(values)
            }
            ("SET", 2) => {
                self.put(&args[0], args[1].clone(), None);
                Reply::ok()
            }
            ("SETEX", 3) => match parse_int(&args[1]) {
                Some(seconds) if seconds > 0 => {
                    let ttl = Duration::from_secs(seconds as u64);
                    self.put(&args[0], args[2].clone(), Some(ttl));
                    Reply::ok()
                }
                _ => Reply::Error("ERR invalid expire time in 'setex' command".to_string()),
            },
            ("DEL", n) if n > 0 => {
                let removed = args.iter().filter(|key| self.remove(key)).count();
                Reply::Integer(removed as i64)
            }
            ("FLUSHDB", 0) => {
                self.entries.clear();
                Reply::ok()
            }
            ("TTL", 1) => match self.live_entry(&args[0]) {
                None => Reply::Integer(-2),
                Some(Entry {
                    expires_at: None, ..
                }) => Reply::Integer(-1),
                Some(Entry {
                    expires_at: Some(at),
                    ..
                }) => {
                    let left = at.saturating_duration_since(Instant::now());
                    let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
                    Reply::Integer(secs as i64)
                }
            },
            ("TYPE", 1) => Reply::Status(
                match self.live(&args[0]) {
                    None => "none",
                    Some(Data::Text(_)) => "string",
                    Some(Data::Hash(_)) => "hash",
                }
                .to_string(),
            ),
            ("HSET", 3) => {
                if matches!(self.live(&args[0]), Some(Data::Text(_))) {
                    return Reply::Error(WRONGTYPE.to_string());
                }
                self.hset(&args[0], &args[1], &args[2]);
                Reply::Integer(1)
            }
            ("SCAN", n) if n >= 1 => self.scan(args),
            _ => Reply::Error(format!("ERR unknown command or arity '{}'", name)),
        }
    }

    fn live_entry(&mut self, key: &[u8]) -> Option<&Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }

    fn live(&mut self, key: &[u8]) -> Option<&Data> {
        self.live_entry(key).map(|entry| &entry.data)
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_vec(),
            Entry {
                data: Data::Text(value),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        self.live_entry(key).is_some() && self.entries.remove(key).is_some()
    }

    fn hset(&mut self, key: &[u8], field: &[u8], value: &[u8]) {
        let entry = self.entries.entry(key.to_vec()).or_insert_with(|| Entry {
            data: Data::Hash(HashMap::new()),
            expires_at: None,
        });
        if let Data::Hash(fields) = &mut entry.data {
            fields.insert(field.to_vec(), value.to_vec());
        }
    }

    fn scan(&mut self, args: &[Vec<u8>]) -> Reply {
        let Some(cursor) = parse_int(&args[0]).filter(|c| *c >= 0) else {
            return Reply::Error("ERR invalid cursor".to_string());
        };
        let mut pattern: &[u8] = b"*";
        let mut count = 10usize;
        for pair in args[1..].chunks(2) {
            match (pair[0].to_ascii_uppercase().as_slice(), pair.get(1)) {
                (b"MATCH", Some(value)) => pattern = value.as_slice(),
                (b"COUNT", Some(value)) => {
                    count = parse_int(value).filter(|c| *c > 0).unwrap_or(10) as usize
                }
                _ => return Reply::Error("ERR syntax error".to_string()),
            }
        }

        let now = Instant::now();
        let mut keys: Vec<Vec<u8>> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at.map_or(true, |at| at > now))
            .map(|(key, _)| key.clone())
            .filter(|key| glob_match(pattern, key))
            .collect();
        keys.sort();

        let start = (cursor as usize).min(keys.len());
        let end = (start + count).min(keys.len());
        // Repeat the previous page's last key
        let from = start.saturating_sub(1);
        let batch = keys[from..end]
            .iter()
            .map(|key| Reply::Bulk(Some(key.clone())))
            .collect();
        let next = if end >= keys.len() { 0 } else { end };

        Reply::Array(vec![
            Reply::Bulk(Some(next.to_string().into_bytes())),
            Reply::Array(batch),
        ])
    }
}

fn parse_int(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Glob matching with `*` and `?`
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut pi, mut ti) = (0, 0);
    let (mut star_pi, mut star_ti) = (None, 0);

    while ti < text.len() {
        if pi < pattern.len() && (pattern[pi] == b'?' || pattern[pi] == text[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < pattern.len() && pattern[pi] == b'*' {
            star_pi = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(star) = star_pi {
            pi = star + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < pattern.len() && pattern[pi] == b'*' {
        pi += 1;
    }
    pi == pattern.len()
}
