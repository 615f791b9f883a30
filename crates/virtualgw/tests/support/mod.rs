//! Fake router and client helpers shared by the daemon tests

#![allow(dead_code)]

use async_trait::async_trait;
use gateway::{CommandRunner, ExecOutput, ReachabilityProbe, Result};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use virtualgw::Reply;

/// Router that keeps interface and firewall state in memory
#[derive(Default)]
pub struct FakeRouter {
    link_up: AtomicBool,
    rule_enabled: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl FakeRouter {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn link_up(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    pub fn rule_enabled(&self) -> bool {
        self.rule_enabled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for FakeRouter {
    async fn run(&self, program: &str, args: &[String]) -> Result<ExecOutput> {
        let line = format!("{} {}", program, args.join(" "));
        self.calls.lock().unwrap().push(line.clone());

        let out = match program {
            "ifup" => {
                self.link_up.store(true, Ordering::SeqCst);
                ExecOutput::ok("")
            }
            "ifdown" => {
                self.link_up.store(false, Ordering::SeqCst);
                ExecOutput::ok("")
            }
            "ifstatus" => {
                let up = self.link_up();
                ExecOutput::ok(format!(
                    r#"{{"up":{},"available":true,"pending":false}}"#,
                    up
                ))
            }
            "uci" if line.contains(".enabled=1") => {
                self.rule_enabled.store(true, Ordering::SeqCst);
                ExecOutput::ok("")
            }
            "uci" if line.contains(".enabled=0") => {
                self.rule_enabled.store(false, Ordering::SeqCst);
                ExecOutput::ok("")
            }
            "uci" if line.contains(" get ") => {
                let value = if self.rule_enabled() { "1" } else { "0" };
                ExecOutput::ok(format!("{}\n", value))
            }
            _ => ExecOutput::ok(""),
        };
        Ok(out)
    }
}

/// Reachability that can be flipped while the daemon runs
pub struct Switchable {
    reachable: AtomicBool,
}

impl Switchable {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for Switchable {
    async fn attempt(&self, _target: &str, _timeout: Duration) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "switchable"
    }
}

/// Line-oriented client of the control socket
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Connect, retrying while the daemon is still binding
    pub async fn connect(path: &Path) -> Self {
        for _ in 0..100 {
            if let Ok(stream) = UnixStream::connect(path).await {
                let (reader, writer) = stream.into_split();
                return Self {
                    reader: BufReader::new(reader),
                    writer,
                };
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("control socket {} never came up", path.display());
    }

    pub async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn read_reply(&mut self) -> Reply {
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
            .await
            .expect("timeout waiting for reply")
            .unwrap();
        assert!(n > 0, "connection closed");
        serde_json::from_str(line.trim()).unwrap()
    }

    pub async fn request(&mut self, line: &str) -> Reply {
        self.send_line(line).await;
        self.read_reply().await
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
