//! w24fs - distributed file-query service
//!
//! A client picks one of several interchangeable server instances through a
//! persisted round-robin counter, then issues text commands over one TCP
//! connection. Servers answer with text or with a length-prefixed gzip tar
//! archive of the matching files.

pub mod archive;
pub mod backend;
pub mod cli;
pub mod command;
pub mod config;
pub mod counter;
pub mod dispatch;
pub mod fs_enum;
pub mod log;
pub mod logger;
pub mod net_async;
pub mod protocol;
pub mod selector;
pub mod transfer;
pub mod workspace;
