use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::selector::ServerInstance;
use crate::workspace::ConnectionId;

pub trait Logger: Send + Sync {
    fn listening(&self, _instance: &ServerInstance, _addr: &str) {}
    fn session_open(&self, _conn: &ConnectionId, _peer: &str) {}
    fn command(&self, _conn: &ConnectionId, _line: &str) {}
    fn rejected(&self, _conn: &ConnectionId, _line: &str, _reason: &str) {}
    fn transfer_sent(&self, _conn: &ConnectionId, _bytes: u64, _files: u64) {}
    fn transfer_refused(&self, _conn: &ConnectionId, _msg: &str) {}
    fn error(&self, _conn: Option<&ConnectionId>, _context: &str, _msg: &str) {}
    fn session_closed(&self, _conn: &ConnectionId, _commands: u64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

fn conn_tag(conn: Option<&ConnectionId>) -> String {
    conn.map(|c| c.short()).unwrap_or_else(|| "-".to_string())
}

fn event_listening(instance: &ServerInstance, addr: &str) -> String {
    format!("LISTEN instance={} port={} addr={}", instance.role, instance.port, addr)
}
fn event_open(conn: &ConnectionId, peer: &str) -> String {
    format!("OPEN conn={} peer={}", conn.short(), peer)
}
fn event_command(conn: &ConnectionId, line: &str) -> String {
    format!("CMD conn={} line={:?}", conn.short(), line)
}
fn event_rejected(conn: &ConnectionId, line: &str, reason: &str) -> String {
    format!("REJECT conn={} line={:?} reason={}", conn.short(), line, reason)
}
fn event_sent(conn: &ConnectionId, bytes: u64, files: u64) -> String {
    format!("SEND conn={} bytes={bytes} files={files}", conn.short())
}
fn event_refused(conn: &ConnectionId, msg: &str) -> String {
    format!("REFUSE conn={} msg={}", conn.short(), msg)
}
fn event_error(conn: Option<&ConnectionId>, context: &str, msg: &str) -> String {
    format!("ERROR conn={} ctx={} msg={}", conn_tag(conn), context, msg)
}
fn event_closed(conn: &ConnectionId, commands: u64) -> String {
    format!("CLOSE conn={} commands={commands}", conn.short())
}

/// Appends timestamped event lines to a file
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn listening(&self, instance: &ServerInstance, addr: &str) {
        self.line(&event_listening(instance, addr));
    }
    fn session_open(&self, conn: &ConnectionId, peer: &str) {
        self.line(&event_open(conn, peer));
    }
    fn command(&self, conn: &ConnectionId, line: &str) {
        self.line(&event_command(conn, line));
    }
    fn rejected(&self, conn: &ConnectionId, line: &str, reason: &str) {
        self.line(&event_rejected(conn, line, reason));
    }
    fn transfer_sent(&self, conn: &ConnectionId, bytes: u64, files: u64) {
        self.line(&event_sent(conn, bytes, files));
    }
    fn transfer_refused(&self, conn: &ConnectionId, msg: &str) {
        self.line(&event_refused(conn, msg));
    }
    fn error(&self, conn: Option<&ConnectionId>, context: &str, msg: &str) {
        self.line(&event_error(conn, context, msg));
    }
    fn session_closed(&self, conn: &ConnectionId, commands: u64) {
        self.line(&event_closed(conn, commands));
    }
}

/// Same event lines as [`TextLogger`], written to stderr
pub struct ConsoleLogger;

impl ConsoleLogger {
    fn line(&self, s: &str) {
        eprintln!("[{}] {}", Utc::now().format("%H:%M:%S%.3f"), s);
    }
}

impl Logger for ConsoleLogger {
    fn listening(&self, instance: &ServerInstance, addr: &str) {
        self.line(&event_listening(instance, addr));
    }
    fn session_open(&self, conn: &ConnectionId, peer: &str) {
        self.line(&event_open(conn, peer));
    }
    fn command(&self, conn: &ConnectionId, line: &str) {
        self.line(&event_command(conn, line));
    }
    fn rejected(&self, conn: &ConnectionId, line: &str, reason: &str) {
        self.line(&event_rejected(conn, line, reason));
    }
    fn transfer_sent(&self, conn: &ConnectionId, bytes: u64, files: u64) {
        self.line(&event_sent(conn, bytes, files));
    }
    fn transfer_refused(&self, conn: &ConnectionId, msg: &str) {
        self.line(&event_refused(conn, msg));
    }
    fn error(&self, conn: Option<&ConnectionId>, context: &str, msg: &str) {
        self.line(&event_error(conn, context, msg));
    }
    fn session_closed(&self, conn: &ConnectionId, commands: u64) {
        self.line(&event_closed(conn, commands));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Role;
    use tempfile::TempDir;

    #[test]
    fn test_text_logger_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/server.log");
        let logger = TextLogger::new(&path).unwrap();
        let conn = ConnectionId::new();
        let instance = ServerInstance {
            role: Role::Mirror(1),
            port: 6970,
        };

        logger.listening(&instance, "0.0.0.0:6970");
        logger.session_open(&conn, "127.0.0.1:5000");
        logger.command(&conn, "dirlist -a");
        logger.error(None, "accept", "boom");
        logger.session_closed(&conn, 1);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("LISTEN instance=mirror1 port=6970"));
        assert!(lines[1].contains(&format!("OPEN conn={}", conn.short())));
        assert!(lines[2].contains("line=\"dirlist -a\""));
        assert!(lines[3].contains("ERROR conn=- ctx=accept msg=boom"));
        assert!(lines[4].contains("commands=1"));
        assert!(lines.iter().all(|l| l.starts_with('[')));
    }
}
