//! Round-robin instance selection
//!
//! The client turns its persisted session count into a server instance.
//! Selection is a pure function of the count: the first sessions fill each
//! instance in blocks of three, then instances rotate one session at a time.

use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;

use crate::protocol::{DEFAULT_BASE_PORT, DEFAULT_INSTANCE_COUNT, SESSIONS_PER_BLOCK};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    /// 1-based mirror number
    Mirror(usize),
}

impl Role {
    pub fn from_index(index: usize) -> Self {
        if index == 0 {
            Role::Primary
        } else {
            Role::Mirror(index)
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Role::Primary => 0,
            Role::Mirror(k) => *k,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Mirror(k) => write!(f, "mirror{}", k),
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    /// Accepts `primary`, `mirrorN`, or a bare instance index.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "primary" {
            return Ok(Role::Primary);
        }
        if let Some(k) = s.strip_prefix("mirror") {
            return match k.parse::<usize>() {
                Ok(k) if k > 0 => Ok(Role::Mirror(k)),
                _ => bail!("invalid mirror number in {:?}", s),
            };
        }
        match s.parse::<usize>() {
            Ok(i) => Ok(Role::from_index(i)),
            Err(_) => bail!("unknown instance {:?} (expected primary, mirrorN or an index)", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerInstance {
    pub role: Role,
    pub port: u16,
}

impl fmt::Display for ServerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (port {})", self.role, self.port)
    }
}

/// The fixed set of instances: `count` servers on consecutive ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSet {
    base_port: u16,
    count: usize,
}

impl Default for InstanceSet {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            count: DEFAULT_INSTANCE_COUNT,
        }
    }
}

impl InstanceSet {
    pub fn new(base_port: u16, count: usize) -> Result<Self> {
        if count == 0 {
            bail!("instance set must contain at least one instance");
        }
        if base_port as usize + (count - 1) > u16::MAX as usize {
            bail!(
                "instance ports overflow: base {} with {} instances",
                base_port,
                count
            );
        }
        Ok(Self { base_port, count })
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, role: Role) -> Option<ServerInstance> {
        let index = role.index();
        if index >= self.count {
            return None;
        }
        Some(ServerInstance {
            role,
            port: self.base_port + index as u16,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = ServerInstance> + '_ {
        (0..self.count).filter_map(move |i| self.get(Role::from_index(i)))
    }

    /// Instance serving the session numbered `count`.
    pub fn select(&self, count: u64) -> ServerInstance {
        let index = instance_index(count, self.count);
        ServerInstance {
            role: Role::from_index(index),
            port: self.base_port + index as u16,
        }
    }
}

/// Index of the instance that serves session number `count`.
///
/// Sessions `1..=3*n` go to instances in blocks of three; after that the
/// index is `(count - 1) % n`. A count of 0 is treated as 1.
pub fn instance_index(count: u64, instances: usize) -> usize {
    let n = instances.max(1) as u64;
    let count = count.max(1);
    let index = if count <= SESSIONS_PER_BLOCK * n {
        (count - 1) / SESSIONS_PER_BLOCK
    } else {
        (count - 1) % n
    };
    index as usize
}

/// Port for session `count` in the default three-instance layout.
pub fn select_port(count: u64, base_port: u16) -> u16 {
    base_port + instance_index(count, DEFAULT_INSTANCE_COUNT) as u16
}
