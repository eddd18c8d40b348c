//! A small in-process RESP server speaking the handful of commands `RedisCache` sends.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Default)]
struct State {
    hashes: HashMap<String, HashMap<String, String>>,
    ttls_ms: HashMap<String, i64>,
    /// `None` accepts any password.
    passwords: Option<HashSet<String>>,
    auths: Vec<String>,
}

pub struct FakeRedis {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    task: JoinHandle<()>,
}

impl FakeRedis {
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap()).await
    }

    pub async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));
        let shared = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, shared.clone()));
            }
        });
        Self { addr, state, task }
    }

    /// Only accept `AUTH` with one of `passwords`.
    pub fn require_passwords(&self, passwords: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.passwords = Some(passwords.iter().map(|p| p.to_string()).collect());
    }

    pub fn allow_password(&self, password: &str) {
        let mut state = self.state.lock().unwrap();
        state.passwords.get_or_insert_with(HashSet::new).insert(password.to_string());
    }

    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    /// Passwords seen in `AUTH`, accepted or not, in arrival order.
    pub fn auths(&self) -> Vec<String> {
        self.state.lock().unwrap().auths.clone()
    }

    pub fn hash(&self, key: &str) -> Option<HashMap<String, String>> {
        self.state.lock().unwrap().hashes.get(key).cloned()
    }

    pub fn ttl_ms(&self, key: &str) -> Option<i64> {
        self.state.lock().unwrap().ttls_ms.get(key).copied()
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// An address nothing listens on, at least until a test binds it.
pub async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Accepts connections and never answers.
pub async fn silent_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (addr, task)
}

async fn serve(stream: TcpStream, state: Arc<Mutex<State>>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut queued: Option<Vec<Vec<String>>> = None;

    while let Some(command) = read_command(&mut reader).await {
        let name = command.first().map(|c| c.to_ascii_uppercase()).unwrap_or_default();
        let reply = if name == "MULTI" {
            queued = Some(Vec::new());
            "+OK\r\n".to_string()
        } else if name == "EXEC" {
            let commands = queued.take().unwrap_or_default();
            let mut out = format!("*{}\r\n", commands.len());
            for command in &commands {
                out.push_str(&execute(&state, command));
            }
            out
        } else if let Some(pending) = queued.as_mut() {
            pending.push(command);
            "+QUEUED\r\n".to_string()
        } else {
            execute(&state, &command)
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

async fn read_command<R>(reader: &mut R) -> Option<Vec<String>>
where
    R: AsyncBufReadExt + AsyncReadExt + Unpin,
{
    let count: usize = read_header(reader, '*').await?;
    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let len: usize = read_header(reader, '$').await?;
        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        parts.push(String::from_utf8(buf).ok()?);
    }
    Some(parts)
}

async fn read_header<R>(reader: &mut R, marker: char) -> Option<usize>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    line.trim_end().strip_prefix(marker)?.parse().ok()
}

fn bulk(value: &str) -> String {
    format!("${}\r\n{}\r\n", value.len(), value)
}

fn execute(state: &Mutex<State>, command: &[String]) -> String {
    let mut state = state.lock().unwrap();
    let name = command[0].to_ascii_uppercase();
    let args = &command[1..];
    match name.as_str() {
        "PING" => "+PONG\r\n".to_string(),
        "CLIENT" | "SELECT" => "+OK\r\n".to_string(),
        "AUTH" => {
            let password = args.last().cloned().unwrap_or_default();
            state.auths.push(password.clone());
            match &state.passwords {
                Some(allowed) if !allowed.contains(&password) => {
                    "-WRONGPASS invalid username-password pair or user is disabled.\r\n".to_string()
                }
                _ => "+OK\r\n".to_string(),
            }
        }
        "HGETALL" => match state.hashes.get(&args[0]) {
            None => "*0\r\n".to_string(),
            Some(hash) => {
                let mut out = format!("*{}\r\n", hash.len() * 2);
                for (field, value) in hash {
                    out.push_str(&bulk(field));
                    out.push_str(&bulk(value));
                }
                out
            }
        },
        "DEL" => {
            state.ttls_ms.remove(&args[0]);
            let removed = state.hashes.remove(&args[0]).is_some();
            format!(":{}\r\n", u8::from(removed))
        }
        "HSET" | "HMSET" => {
            let hash = state.hashes.entry(args[0].clone()).or_default();
            let mut added = 0;
            for pair in args[1..].chunks(2) {
                if let [field, value] = pair {
                    if hash.insert(field.clone(), value.clone()).is_none() {
                        added += 1;
                    }
                }
            }
            if name == "HMSET" {
                "+OK\r\n".to_string()
            } else {
                format!(":{added}\r\n")
            }
        }
        "PEXPIRE" => {
            let ttl = args[1].parse().unwrap_or_default();
            let exists = state.hashes.contains_key(&args[0]);
            if exists {
                state.ttls_ms.insert(args[0].clone(), ttl);
            }
            format!(":{}\r\n", u8::from(exists))
        }
        other => format!("-ERR unknown command '{other}'\r\n"),
    }
}
