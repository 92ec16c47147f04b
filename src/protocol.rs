//! Shared protocol constants for the w24 command protocol

// Instance layout: primary on BASE, mirrors on BASE+1, BASE+2, ...
pub const DEFAULT_BASE_PORT: u16 = 6969;
pub const DEFAULT_INSTANCE_COUNT: usize = 3;

// Consecutive sessions routed to the same instance before moving on
pub const SESSIONS_PER_BLOCK: u64 = 3;

// Longest accepted command line, not counting the newline
pub const MAX_COMMAND_LEN: usize = 1024;

// Text replies are read once into a buffer of this size
pub const MAX_TEXT_REPLY: usize = 64 * 1024;

// Largest text reply the server sends; leaves headroom so one segment
// carries it whole on loopback
pub const MAX_TEXT_BODY: usize = 60 * 1024;

// Transfer payloads move in chunks of this size
pub const CHUNK_SIZE: usize = 1024;

// Upper bound for the error text carried by a failure frame
pub const MAX_FAILURE_TEXT: usize = 4096;

// File name the client gives a downloaded archive
pub const ARCHIVE_FILE_NAME: &str = "temp.tar.gz";

// Command verbs (closed set)
pub mod verb {
    pub const DIRLIST: &str = "dirlist";
    pub const FIND: &str = "w24fn";
    pub const SIZE_RANGE: &str = "w24fz";
    pub const EXTENSIONS: &str = "w24ft";
    pub const BEFORE: &str = "w24fdb";
    pub const AFTER: &str = "w24fda";
    pub const QUIT: &str = "quitc";

    pub const SORT_ALPHA: &str = "-a";
    pub const SORT_MTIME: &str = "-t";
}

// Fixed reply texts
pub mod reply {
    pub const INVALID_COMMAND: &str = "Invalid command";
    pub const FILE_NOT_PRESENT: &str = "File is not present";
    pub const NO_DIRECTORIES: &str = "No directories found";
    pub const DIR_OPEN_FAILED: &str = "Failed to open directory.";
    pub const NO_FILES: &str = "No file found or file created is empty.";
    pub const ARCHIVE_FAILED: &str = "Failed to create tar file.";
    pub const ARCHIVE_TOO_LARGE: &str = "Archive exceeds the maximum transfer size.";
    pub const LISTING_TRUNCATED: &str = "... listing truncated:";
}
