//! Command routing for one connection handler

use std::sync::Arc;

use crate::archive::ArchivePayload;
use crate::backend::{ArchiveOutcome, Backend};
use crate::command::{ArchiveQuery, Command, ListOrder};
use crate::protocol::{reply, MAX_TEXT_BODY};
use crate::workspace::ConnectionWorkspace;

/// What the handler writes back for one command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Raw text, never empty
    Text(String),
    /// Archive on disk, sent framed and then deleted
    Transfer(ArchivePayload),
    /// Framed failure in place of an archive
    TransferFailure(String),
    /// Close the connection without replying
    Close,
}

/// Diagnostic detail kept for the log alongside the result
pub struct Dispatched {
    pub result: CommandResult,
    pub rejection: Option<String>,
    pub error: Option<String>,
}

impl Dispatched {
    fn ok(result: CommandResult) -> Self {
        Self {
            result,
            rejection: None,
            error: None,
        }
    }

    fn failed(result: CommandResult, error: String) -> Self {
        Self {
            result,
            rejection: None,
            error: Some(error),
        }
    }
}

/// Parse `line` and run it against `backend`.
///
/// Filesystem work runs on the blocking pool; the handler awaits it before
/// reading the next command. Backend errors and panics become failure
/// replies and never escape.
pub async fn dispatch(
    line: &str,
    backend: &Arc<dyn Backend>,
    workspace: &mut ConnectionWorkspace,
) -> Dispatched {
    let command = match Command::parse(line) {
        Ok(c) => c,
        Err(e) => {
            return Dispatched {
                result: CommandResult::Text(reply::INVALID_COMMAND.to_string()),
                rejection: Some(format!("{:#}", e)),
                error: None,
            }
        }
    };

    match command {
        Command::Quit => Dispatched::ok(CommandResult::Close),
        Command::DirList(order) => list_directories(backend, order).await,
        Command::FindFile(name) => find_file(backend, name).await,
        Command::Archive(query) => archive(backend, query, workspace).await,
    }
}

async fn list_directories(backend: &Arc<dyn Backend>, order: ListOrder) -> Dispatched {
    let backend = Arc::clone(backend);
    match tokio::task::spawn_blocking(move || backend.list_directories(order)).await {
        Ok(Ok(names)) if names.is_empty() => {
            Dispatched::ok(CommandResult::Text(format!("{}\n", reply::NO_DIRECTORIES)))
        }
        Ok(Ok(names)) => Dispatched::ok(CommandResult::Text(listing_body(&names))),
        Ok(Err(e)) => Dispatched::failed(
            CommandResult::Text(format!("{}\n", reply::DIR_OPEN_FAILED)),
            format!("{:#}", e),
        ),
        Err(e) => Dispatched::failed(
            CommandResult::Text(format!("{}\n", reply::DIR_OPEN_FAILED)),
            format!("listing task failed: {}", e),
        ),
    }
}

// Room kept at the end of a listing for the truncation line
const MARKER_ROOM: usize = 64;

/// One name per line, stopping short of `MAX_TEXT_BODY`.
///
/// Names that do not fit are counted in a closing marker line so the
/// client sees the listing was cut.
fn listing_body(names: &[String]) -> String {
    let mut body = String::new();
    for (i, n) in names.iter().enumerate() {
        if body.len() + n.len() + 1 > MAX_TEXT_BODY - MARKER_ROOM {
            body.push_str(&format!(
                "{} {} more not listed\n",
                reply::LISTING_TRUNCATED,
                names.len() - i
            ));
            break;
        }
        body.push_str(n);
        body.push('\n');
    }
    body
}

/// Cut `text` to `MAX_TEXT_BODY` on a char boundary, keeping the final newline.
fn cap_text(mut text: String) -> String {
    if text.len() <= MAX_TEXT_BODY {
        return text;
    }
    let mut end = MAX_TEXT_BODY - 1;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push('\n');
    text
}

async fn find_file(backend: &Arc<dyn Backend>, name: String) -> Dispatched {
    let backend = Arc::clone(backend);
    match tokio::task::spawn_blocking(move || backend.find_file(&name)).await {
        Ok(Ok(Some(info))) => {
            Dispatched::ok(CommandResult::Text(cap_text(format!("{}\n", info))))
        }
        Ok(Ok(None)) => {
            Dispatched::ok(CommandResult::Text(format!("{}\n", reply::FILE_NOT_PRESENT)))
        }
        Ok(Err(e)) => Dispatched::failed(
            CommandResult::Text(format!("{}\n", reply::FILE_NOT_PRESENT)),
            format!("{:#}", e),
        ),
        Err(e) => Dispatched::failed(
            CommandResult::Text(format!("{}\n", reply::FILE_NOT_PRESENT)),
            format!("search task failed: {}", e),
        ),
    }
}

async fn archive(
    backend: &Arc<dyn Backend>,
    query: ArchiveQuery,
    workspace: &mut ConnectionWorkspace,
) -> Dispatched {
    let dest = match workspace.archive_path() {
        Ok(p) => p,
        Err(e) => {
            return Dispatched::failed(
                CommandResult::TransferFailure(reply::ARCHIVE_FAILED.to_string()),
                format!("{:#}", e),
            )
        }
    };
    let backend = Arc::clone(backend);
    let job_dest = dest.clone();
    let outcome = tokio::task::spawn_blocking(move || backend.archive(&query, &job_dest)).await;

    let failure = |msg: String| {
        let _ = std::fs::remove_file(&dest);
        Dispatched::failed(
            CommandResult::TransferFailure(reply::ARCHIVE_FAILED.to_string()),
            msg,
        )
    };
    match outcome {
        Ok(Ok(ArchiveOutcome::Created(payload))) => {
            if payload.size > u32::MAX as u64 {
                let _ = std::fs::remove_file(&payload.path);
                return Dispatched::failed(
                    CommandResult::TransferFailure(reply::ARCHIVE_TOO_LARGE.to_string()),
                    format!("archive is {} bytes", payload.size),
                );
            }
            Dispatched::ok(CommandResult::Transfer(payload))
        }
        Ok(Ok(ArchiveOutcome::NoMatches)) => {
            Dispatched::ok(CommandResult::TransferFailure(reply::NO_FILES.to_string()))
        }
        Ok(Err(e)) => failure(format!("{:#}", e)),
        Err(e) => failure(format!("archive task failed: {}", e)),
    }
}
