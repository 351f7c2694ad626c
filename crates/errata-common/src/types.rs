//! Package identifiers shared by the sync engine and the read API

use crate::{ErrataError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed `name-[epoch:]version-release.arch` package identifier
///
/// Upstream advisories list the packages they fix in this form, e.g.
/// `kernel-5.10.13-200.fc31.x86_64` or `perl-4:5.26.3-419.el8.x86_64`.
/// Parsing splits from the right because package names may themselves
/// contain dashes (`python3-perf`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Nevra {
    pub name: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl Nevra {
    /// Parse a NEVRA string
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();

        let (rest, arch) = value
            .rsplit_once('.')
            .ok_or_else(|| ErrataError::invalid_nevra(value, "missing architecture"))?;
        let (rest, release) = rest
            .rsplit_once('-')
            .ok_or_else(|| ErrataError::invalid_nevra(value, "missing release"))?;
        let (name, epoch_version) = rest
            .rsplit_once('-')
            .ok_or_else(|| ErrataError::invalid_nevra(value, "missing version"))?;

        let (epoch, version) = match epoch_version.split_once(':') {
            Some((epoch, version)) => {
                let epoch = epoch.parse::<u32>().map_err(|e| {
                    ErrataError::invalid_nevra(value, format!("invalid epoch '{}': {}", epoch, e))
                })?;
                (epoch, version)
            },
            None => (0, epoch_version),
        };

        for (part, label) in [
            (name, "name"),
            (version, "version"),
            (release, "release"),
            (arch, "architecture"),
        ] {
            if part.is_empty() {
                return Err(ErrataError::invalid_nevra(value, format!("empty {}", label)));
            }
        }

        Ok(Self {
            name: name.to_string(),
            epoch,
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
        })
    }

    /// The `epoch:version-release.arch` part identifying one build
    ///
    /// A zero epoch is omitted, matching how package rows are keyed.
    pub fn evra(&self) -> String {
        if self.epoch == 0 {
            format!("{}-{}.{}", self.version, self.release, self.arch)
        } else {
            format!("{}:{}-{}.{}", self.epoch, self.version, self.release, self.arch)
        }
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.evra())
    }
}

impl std::str::FromStr for Nevra {
    type Err = ErrataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
