//! `major.minor.patch` protocol versions.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version of the EagleTunnel protocol this build speaks.
pub const PROTOCOL_VERSION: Version = Version::new(1, 5, 0);

/// Oldest peer version this build still interoperates with.
pub const PROTOCOL_COMPATIBLE_VERSION: Version = Version::new(1, 3, 0);

/// Reasons a version string is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version {0:?}: expected major.minor.patch")]
    Format(String),

    #[error("invalid version {raw:?}: {part:?} is not a number")]
    Number { raw: String, part: String },
}

/// A three-part version with standard ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        raw.parse()
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionError::Format(raw.to_string()));
        }

        let number = |part: &str| {
            part.parse::<u32>().map_err(|_| VersionError::Number {
                raw: raw.to_string(),
                part: part.to_string(),
            })
        };

        Ok(Self::new(number(parts[0])?, number(parts[1])?, number(parts[2])?))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
