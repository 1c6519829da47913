//! Server version detection and the feature set derived from it.
//!
//! The version is parsed from the `redis_version` line of the `INFO` reply
//! during connection open; command builders can consult the feature flags
//! before choosing between older and newer command shapes.

use std::fmt;

/// A parsed `major.minor.patch` server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> ServerVersion {
        ServerVersion {
            major,
            minor,
            patch,
        }
    }

    /// Parses a dotted version string; missing trailing components default
    /// to zero, anything unparseable is `None`.
    pub fn parse(text: &str) -> Option<ServerVersion> {
        let mut parts = text.trim().split('.');

        let major = parts.next()?.parse::<u32>().ok()?;
        let minor = match parts.next() {
            Some(part) => part.parse::<u32>().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(part) => part.parse::<u32>().ok()?,
            None => 0,
        };

        Some(ServerVersion::new(major, minor, patch))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

const V2_1_1: ServerVersion = ServerVersion::new(2, 1, 1);
const V2_1_2: ServerVersion = ServerVersion::new(2, 1, 2);
const V2_1_3: ServerVersion = ServerVersion::new(2, 1, 3);
const V2_1_8: ServerVersion = ServerVersion::new(2, 1, 8);
const V2_2_0: ServerVersion = ServerVersion::new(2, 2, 0);
const V2_4_0: ServerVersion = ServerVersion::new(2, 4, 0);

/// Basic information about the features available on a particular server
/// version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerFeatures {
    version: ServerVersion,
}

impl ServerFeatures {
    pub fn new(version: ServerVersion) -> ServerFeatures {
        ServerFeatures { version }
    }

    pub fn version(&self) -> ServerVersion {
        self.version
    }

    /// Is `PERSIST` available?
    pub fn persist(&self) -> bool {
        self.version >= V2_1_2
    }

    /// Can `EXPIRE` overwrite the expiry of an already volatile key?
    pub fn expire_overwrite(&self) -> bool {
        self.version >= V2_1_3
    }

    /// Does `HDEL` accept multiple fields?
    pub fn hash_varadic_delete(&self) -> bool {
        self.version > V2_2_0
    }

    /// Is `STRLEN` available?
    pub fn string_length(&self) -> bool {
        self.version >= V2_1_2
    }

    /// Is `SETRANGE` available?
    pub fn string_set_range(&self) -> bool {
        self.version >= V2_1_8
    }

    /// Are `RPUSHX` and `LPUSHX` available?
    pub fn push_if_not_exists(&self) -> bool {
        self.version >= V2_1_1
    }

    /// Do `SADD` and `SREM` accept multiple members?
    pub fn set_varadic_add_remove(&self) -> bool {
        self.version >= V2_4_0
    }

    /// Is `LINSERT` available?
    pub fn list_insert(&self) -> bool {
        self.version >= V2_1_1
    }
}

impl fmt::Display for ServerFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Features in {}", self.version)?;
        writeln!(f, "ExpireOverwrite: {}", self.expire_overwrite())?;
        writeln!(f, "Persist: {}", self.persist())
    }
}
