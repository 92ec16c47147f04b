//! Async (Tokio) transport for the w24 daemon and client.
//!
//! The server side runs one accept loop per instance and one task per
//! connection. The client side owns a single persistent connection and
//! alternates strictly between sending a command line and reading its reply.

pub mod server {
    use anyhow::{Context, Result};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tokio::fs::File;
    use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::time::{sleep, Duration};

    use crate::backend::Backend;
    use crate::command::normalize_line;
    use crate::dispatch::{dispatch, CommandResult};
    use crate::logger::Logger;
    use crate::protocol::{reply, MAX_COMMAND_LEN};
    use crate::selector::ServerInstance;
    use crate::transfer::{send_failure, send_file};
    use crate::workspace::{ensure_dir_exists, ConnectionId, ConnectionWorkspace};

    const ACCEPT_BACKOFF_MS: u64 = 100;

    /// Immutable state shared by every handler of one instance
    pub struct ServerContext {
        pub instance: ServerInstance,
        pub backend: Arc<dyn Backend>,
        /// Parent of the per-connection `conn-<id>` directories
        pub workspace_root: PathBuf,
        pub logger: Arc<dyn Logger>,
    }

    pub async fn serve(bind_host: &str, ctx: ServerContext) -> Result<()> {
        let addr = format!("{}:{}", bind_host, ctx.instance.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("bind {}", addr))?;
        serve_listener(listener, Arc::new(ctx)).await
    }

    /// Accept connections forever, one task per connection.
    ///
    /// Accept errors are logged and the loop keeps going. Whatever happens
    /// inside a handler, including a panic, stays inside its task.
    pub async fn serve_listener(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
        ensure_dir_exists(&ctx.workspace_root)?;
        let local = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".to_string());
        ctx.logger.listening(&ctx.instance, &local);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    ctx.logger.error(None, "accept", &e.to_string());
                    sleep(Duration::from_millis(ACCEPT_BACKOFF_MS)).await;
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);
            let conn = ConnectionId::new();
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                ctx.logger.session_open(&conn, &peer.to_string());
                if let Err(e) = handle_connection(stream, &conn, &ctx).await {
                    ctx.logger.error(Some(&conn), "session", &format!("{:#}", e));
                }
            });
        }
    }

    /// Serve one client until it disconnects or sends `quitc`.
    ///
    /// The connection's workspace is removed on every exit path.
    pub async fn handle_connection<S>(stream: S, conn: &ConnectionId, ctx: &ServerContext) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut workspace = ConnectionWorkspace::new(&ctx.workspace_root, conn);
        let mut commands = 0u64;
        let result = session_loop(stream, conn, ctx, &mut workspace, &mut commands).await;
        ctx.logger.session_closed(conn, commands);
        result
    }

    async fn session_loop<S>(
        stream: S,
        conn: &ConnectionId,
        ctx: &ServerContext,
        workspace: &mut ConnectionWorkspace,
        commands: &mut u64,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (rd, mut wr) = tokio::io::split(stream);
        let mut reader = BufReader::new(rd);
        let mut buf = Vec::with_capacity(MAX_COMMAND_LEN + 1);

        loop {
            buf.clear();
            let n = (&mut reader)
                .take(MAX_COMMAND_LEN as u64 + 1)
                .read_until(b'\n', &mut buf)
                .await
                .context("read command")?;
            if n == 0 {
                return Ok(());
            }
            *commands += 1;

            if buf.last() != Some(&b'\n') && n > MAX_COMMAND_LEN {
                // The tail of this line is still unread, so there is no way
                // to find the start of the next command.
                ctx.logger.rejected(conn, "<oversized>", "command line too long");
                write_text(&mut wr, reply::INVALID_COMMAND).await?;
                return Ok(());
            }

            let text = match std::str::from_utf8(&buf) {
                Ok(t) => t,
                Err(_) => {
                    ctx.logger
                        .rejected(conn, &String::from_utf8_lossy(&buf), "not UTF-8");
                    write_text(&mut wr, reply::INVALID_COMMAND).await?;
                    continue;
                }
            };
            let line = normalize_line(text);
            ctx.logger.command(conn, line);

            let dispatched = dispatch(line, &ctx.backend, workspace).await;
            if let Some(reason) = &dispatched.rejection {
                ctx.logger.rejected(conn, line, reason);
            }
            if let Some(err) = &dispatched.error {
                ctx.logger.error(Some(conn), line, err);
            }

            match dispatched.result {
                CommandResult::Text(reply_text) => write_text(&mut wr, &reply_text).await?,
                CommandResult::Transfer(payload) => {
                    let sent = send_archive(&mut wr, &payload.path).await;
                    let _ = tokio::fs::remove_file(&payload.path).await;
                    match sent? {
                        Some(bytes) => ctx.logger.transfer_sent(conn, bytes, payload.file_count),
                        None => ctx.logger.transfer_refused(conn, reply::ARCHIVE_FAILED),
                    }
                }
                CommandResult::TransferFailure(msg) => {
                    send_failure(&mut wr, &msg).await?;
                    ctx.logger.transfer_refused(conn, &msg);
                }
                CommandResult::Close => return Ok(()),
            }
        }
    }

    async fn write_text<W>(wr: &mut W, text: &str) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        wr.write_all(text.as_bytes()).await?;
        wr.flush().await?;
        Ok(())
    }

    /// Send the archive at `path`. If it cannot be opened a failure frame
    /// goes out instead and `None` is returned.
    async fn send_archive<W>(wr: &mut W, path: &Path) -> Result<Option<u64>>
    where
        W: AsyncWrite + Unpin,
    {
        let mut file = match File::open(path).await {
            Ok(f) => f,
            Err(_) => {
                send_failure(wr, reply::ARCHIVE_FAILED).await?;
                return Ok(None);
            }
        };
        let bytes = send_file(wr, &mut file)
            .await
            .with_context(|| format!("send {}", path.display()))?;
        Ok(Some(bytes))
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::backend::{ArchiveDepths, FsBackend};
        use crate::logger::NoopLogger;
        use crate::selector::Role;
        use crate::transfer::{receive_to_vec, Received};
        use tempfile::TempDir;

        fn context(root: &Path, ws: &Path) -> ServerContext {
            ServerContext {
                instance: ServerInstance {
                    role: Role::Primary,
                    port: 0,
                },
                backend: Arc::new(FsBackend::new(root, ArchiveDepths::default()).unwrap()),
                workspace_root: ws.to_path_buf(),
                logger: Arc::new(NoopLogger),
            }
        }

        #[tokio::test]
        async fn test_handler_over_duplex() {
            let root = TempDir::new().unwrap();
            let ws = TempDir::new().unwrap();
            std::fs::create_dir(root.path().join("docs")).unwrap();
            std::fs::write(root.path().join("a.txt"), b"alpha").unwrap();
            let ctx = context(root.path(), ws.path());

            let (mut client, server) = tokio::io::duplex(64 * 1024);
            let conn = ConnectionId::new();
            let handler = tokio::spawn(async move { handle_connection(server, &conn, &ctx).await });

            client.write_all(b"nonsense\r\n").await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"Invalid command");

            client.write_all(b"dirlist -a\n").await.unwrap();
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"docs\n");

            client.write_all(b"w24ft txt\n").await.unwrap();
            match receive_to_vec(&mut client).await.unwrap() {
                Received::Payload(bytes) => assert!(bytes.starts_with(&[0x1f, 0x8b])),
                other => panic!("unexpected {:?}", other),
            }

            client.write_all(b"quitc\n").await.unwrap();
            handler.await.unwrap().unwrap();
            assert_eq!(std::fs::read_dir(ws.path()).unwrap().count(), 0);
        }

        #[tokio::test]
        async fn test_oversized_line_closes_connection() {
            let root = TempDir::new().unwrap();
            let ws = TempDir::new().unwrap();
            let ctx = context(root.path(), ws.path());

            let (mut client, server) = tokio::io::duplex(8 * 1024);
            let conn = ConnectionId::new();
            let handler = tokio::spawn(async move { handle_connection(server, &conn, &ctx).await });

            let mut line = vec![b'x'; MAX_COMMAND_LEN + 10];
            line.push(b'\n');
            client.write_all(&line).await.unwrap();

            let mut reply_buf = Vec::new();
            client.read_to_end(&mut reply_buf).await.unwrap();
            assert_eq!(reply_buf, b"Invalid command");
            handler.await.unwrap().unwrap();
        }

        #[tokio::test]
        async fn test_eof_ends_session_cleanly() {
            let root = TempDir::new().unwrap();
            let ws = TempDir::new().unwrap();
            let ctx = context(root.path(), ws.path());

            let (client, server) = tokio::io::duplex(1024);
            drop(client);
            handle_connection(server, &ConnectionId::new(), &ctx)
                .await
                .unwrap();
        }
    }
}

pub mod client {
    use anyhow::{Context, Result};
    use indicatif::{ProgressBar, ProgressStyle};
    use std::io::Write as _;
    use std::path::{Path, PathBuf};
    use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
    use tokio::net::TcpStream;

    use crate::command::{normalize_line, Command};
    use crate::log::{TransferLog, TransferLogEntry, TransferStatus};
    use crate::protocol::{verb, ARCHIVE_FILE_NAME, MAX_COMMAND_LEN, MAX_TEXT_REPLY};
    use crate::transfer::{receive_to_file, Saved};

    const PROMPT: &str = "Enter command ('dirlist -a', 'dirlist -t', 'w24fn <filename>', \
                          'w24fz <size1> <size2>', 'w24ft <extensions>', 'w24fdb <date>', \
                          'w24fda <date>', 'quitc'):- ";

    pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("connect {}", addr))?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    /// Outcome of one command as seen by the client
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Response {
        Text(String),
        /// The server sent zero bytes where a text reply was expected
        NoResponse,
        Downloaded { path: PathBuf, bytes: u64 },
        /// Framed failure in place of an archive
        TransferFailed(String),
        /// `quitc` was sent; nothing more may be sent on this connection
        Closed,
        /// Not sent: the server would drop the connection over this line
        Rejected(String),
    }

    /// One persistent connection to a server instance
    pub struct Session<S> {
        stream: S,
        download_dir: PathBuf,
        show_progress: bool,
        journal: TransferLog,
        sequence: u64,
    }

    impl<S> Session<S>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        pub fn new(stream: S, download_dir: &Path) -> Self {
            Self {
                stream,
                download_dir: download_dir.to_path_buf(),
                show_progress: false,
                journal: TransferLog::new(download_dir),
                sequence: 0,
            }
        }

        pub fn with_progress(mut self, show: bool) -> Self {
            self.show_progress = show;
            self
        }

        pub fn download_dir(&self) -> &Path {
            &self.download_dir
        }

        pub fn journal(&self) -> &TransferLog {
            &self.journal
        }

        /// Send one command line and wait for its complete reply.
        ///
        /// The local parse only decides which kind of reply to expect; the
        /// line goes to the server even when it is invalid, and the server's
        /// `Invalid command` comes back as text. Lines longer than
        /// `MAX_COMMAND_LEN` are the exception and never leave the client.
        pub async fn execute(&mut self, line: &str) -> Result<Response> {
            let line = normalize_line(line);
            if line.len() > MAX_COMMAND_LEN {
                return Ok(Response::Rejected(format!(
                    "Command too long ({} bytes, limit {})",
                    line.len(),
                    MAX_COMMAND_LEN
                )));
            }
            self.send_line(line).await?;
            match Command::parse(line) {
                Ok(Command::Quit) => Ok(Response::Closed),
                Ok(cmd) if cmd.expects_transfer() => self.receive_archive(line).await,
                _ => Ok(match self.read_text_reply().await? {
                    Some(text) => Response::Text(text),
                    None => Response::NoResponse,
                }),
            }
        }

        async fn send_line(&mut self, line: &str) -> Result<()> {
            let mut wire = Vec::with_capacity(line.len() + 1);
            wire.extend_from_slice(line.as_bytes());
            wire.push(b'\n');
            self.stream.write_all(&wire).await.context("send command")?;
            self.stream.flush().await?;
            Ok(())
        }

        /// Single read of an unframed text reply; `None` on a zero-byte read.
        async fn read_text_reply(&mut self) -> Result<Option<String>> {
            let mut buf = vec![0u8; MAX_TEXT_REPLY];
            let n = self.stream.read(&mut buf).await.context("read reply")?;
            if n == 0 {
                return Ok(None);
            }
            Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned()))
        }

        async fn receive_archive(&mut self, line: &str) -> Result<Response> {
            self.sequence += 1;
            let mut entry = TransferLogEntry::new(self.sequence, line, TransferStatus::Completed);

            let bar = if self.show_progress {
                ProgressBar::new(0)
            } else {
                ProgressBar::hidden()
            };
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{bytes}/{total_bytes} [{bar:30.cyan/blue}] {bytes_per_sec}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );

            let result = receive_to_file(
                &mut self.stream,
                &self.download_dir,
                ARCHIVE_FILE_NAME,
                |len| bar.set_length(len),
                |done| bar.set_position(done),
            )
            .await;
            bar.finish_and_clear();

            let response = match result {
                Ok(Saved::File { path, bytes }) => {
                    entry.destination = Some(path.clone());
                    entry.bytes_transferred = bytes;
                    Response::Downloaded { path, bytes }
                }
                Ok(Saved::Failure(msg)) => {
                    entry.status = TransferStatus::Refused;
                    entry.error = Some(msg.clone());
                    Response::TransferFailed(msg)
                }
                Err(e) => {
                    entry.status = TransferStatus::Failed;
                    entry.error = Some(format!("{:#}", e));
                    self.record(&entry);
                    return Err(e);
                }
            };
            self.record(&entry);
            Ok(response)
        }

        fn record(&self, entry: &TransferLogEntry) {
            if let Err(e) = self.journal.add_entry(entry) {
                eprintln!("warning: could not update download journal: {:#}", e);
            }
        }
    }

    /// Prompt, send, print, repeat until `quitc`, end of input, or a dead
    /// connection. End of input sends `quitc` on the user's behalf.
    pub async fn run_interactive<S, I>(session: &mut Session<S>, input: I) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        I: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            print!("{}", PROMPT);
            std::io::stdout().flush()?;

            let raw = match lines.next_line().await? {
                Some(l) => l,
                None => {
                    println!();
                    let _ = session.execute(verb::QUIT).await;
                    break;
                }
            };
            let line = normalize_line(&raw);
            if line.is_empty() {
                continue;
            }

            match session.execute(line).await {
                Ok(Response::Text(text)) => println!("Server response:\n{}", text),
                Ok(Response::TransferFailed(msg)) => println!("Server response:\n{}", msg),
                Ok(Response::Downloaded { path, .. }) => {
                    println!("File downloaded successfully: {}", path.display())
                }
                Ok(Response::Rejected(msg)) => println!("{}", msg),
                Ok(Response::Closed) => break,
                Ok(Response::NoResponse) => {
                    println!("No response from server or connection error.");
                    break;
                }
                Err(e) => {
                    println!("No response from server or connection error.");
                    eprintln!("error: {:#}", e);
                    break;
                }
            }
        }
        println!("Connection closed. Exiting client...");
        Ok(())
    }

}
