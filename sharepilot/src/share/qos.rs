//! Export bandwidth control.
//!
//! The three QoS kinds the NFS module understands are separate variants, so a
//! per-client policy can never carry an export limit and vice versa. Invalid
//! combinations are rejected when the policy is parsed from config.
//!
//! ```toml
//! [shares.template.options.qos]
//! type = "PerShare_PerClient"
//! max_export_combined_bw = "200MB"
//! max_client_combined_bw = "50MB"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QosError {
    #[error("Invalid bandwidth '{0}': expected a positive number followed by KB, MB or GB")]
    InvalidBandwidth(String),

    #[error("{kind} QoS requires {what}")]
    MissingLimit { kind: &'static str, what: &'static str },

    #[error("{kind} QoS does not accept {field}")]
    UnexpectedField { kind: &'static str, field: &'static str },

    #[error("{scope} limit must be either combined or read/write, not both")]
    MixedLimits { scope: &'static str },

    #[error("{scope} read and write limits must be given together")]
    PartialReadWrite { scope: &'static str },
}

/// Bandwidth in kilobytes per second, written as `10MB`, `512KB` or `1GB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bandwidth {
    kilobytes: u64,
}

impl Bandwidth {
    pub fn from_megabytes(mb: u64) -> Self {
        Self {
            kilobytes: mb * 1024,
        }
    }

    pub fn kilobytes(&self) -> u64 {
        self.kilobytes
    }
}

impl FromStr for Bandwidth {
    type Err = QosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || QosError::InvalidBandwidth(s.to_string());
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (digits, unit) = trimmed.split_at(split);
        let value: u64 = digits.parse().map_err(|_| invalid())?;
        let scale = match unit.to_ascii_uppercase().as_str() {
            "KB" => 1,
            "MB" => 1024,
            "GB" => 1024 * 1024,
            _ => return Err(invalid()),
        };
        let kilobytes = value.checked_mul(scale).ok_or_else(invalid)?;
        if kilobytes == 0 {
            return Err(invalid());
        }
        Ok(Self { kilobytes })
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MB: u64 = 1024;
        const GB: u64 = 1024 * 1024;
        if self.kilobytes % GB == 0 {
            write!(f, "{}GB", self.kilobytes / GB)
        } else if self.kilobytes % MB == 0 {
            write!(f, "{}MB", self.kilobytes / MB)
        } else {
            write!(f, "{}KB", self.kilobytes)
        }
    }
}

impl Serialize for Bandwidth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Bandwidth {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthLimit {
    Combined(Bandwidth),
    ReadWrite { read: Bandwidth, write: Bandwidth },
}

impl BandwidthLimit {
    fn from_parts(
        scope: &'static str,
        combined: Option<Bandwidth>,
        read: Option<Bandwidth>,
        write: Option<Bandwidth>,
    ) -> Result<Option<Self>, QosError> {
        match (combined, read, write) {
            (None, None, None) => Ok(None),
            (Some(c), None, None) => Ok(Some(BandwidthLimit::Combined(c))),
            (None, Some(read), Some(write)) => Ok(Some(BandwidthLimit::ReadWrite { read, write })),
            (None, _, _) => Err(QosError::PartialReadWrite { scope }),
            (Some(_), _, _) => Err(QosError::MixedLimits { scope }),
        }
    }

    fn push_args(&self, scope: &str, args: &mut Vec<String>) {
        match self {
            BandwidthLimit::Combined(bw) => {
                args.push(format!("--max_{}_combined_bw={}", scope, bw));
            }
            BandwidthLimit::ReadWrite { read, write } => {
                args.push(format!("--max_{}_read_bw={}", scope, read));
                args.push(format!("--max_{}_write_bw={}", scope, write));
            }
        }
    }

    fn split(&self) -> (Option<Bandwidth>, Option<Bandwidth>, Option<Bandwidth>) {
        match *self {
            BandwidthLimit::Combined(c) => (Some(c), None, None),
            BandwidthLimit::ReadWrite { read, write } => (None, Some(read), Some(write)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawQos", into = "RawQos")]
pub enum QosPolicy {
    PerShare {
        export: BandwidthLimit,
    },
    PerClient {
        client: BandwidthLimit,
    },
    PerSharePerClient {
        export: BandwidthLimit,
        client: BandwidthLimit,
    },
}

impl QosPolicy {
    /// Name the NFS module uses for this kind.
    pub fn kind(&self) -> &'static str {
        match self {
            QosPolicy::PerShare { .. } => "PerShare",
            QosPolicy::PerClient { .. } => "PerClient",
            QosPolicy::PerSharePerClient { .. } => "PerShare_PerClient",
        }
    }

    /// `--max_*_bw=` arguments for `ceph nfs export qos enable`.
    pub fn limit_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match self {
            QosPolicy::PerShare { export } => export.push_args("export", &mut args),
            QosPolicy::PerClient { client } => client.push_args("client", &mut args),
            QosPolicy::PerSharePerClient { export, client } => {
                export.push_args("export", &mut args);
                client.push_args("client", &mut args);
            }
        }
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum QosKind {
    PerShare,
    PerClient,
    #[serde(rename = "PerShare_PerClient")]
    PerSharePerClient,
}

/// Flat on-disk shape of a [`QosPolicy`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawQos {
    #[serde(rename = "type")]
    kind: QosKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_export_combined_bw: Option<Bandwidth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_export_read_bw: Option<Bandwidth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_export_write_bw: Option<Bandwidth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_client_combined_bw: Option<Bandwidth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_client_read_bw: Option<Bandwidth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_client_write_bw: Option<Bandwidth>,
}

impl TryFrom<RawQos> for QosPolicy {
    type Error = QosError;

    fn try_from(raw: RawQos) -> Result<Self, Self::Error> {
        let export = BandwidthLimit::from_parts(
            "export",
            raw.max_export_combined_bw,
            raw.max_export_read_bw,
            raw.max_export_write_bw,
        )?;
        let client = BandwidthLimit::from_parts(
            "client",
            raw.max_client_combined_bw,
            raw.max_client_read_bw,
            raw.max_client_write_bw,
        )?;

        match raw.kind {
            QosKind::PerShare => {
                if client.is_some() {
                    return Err(QosError::UnexpectedField {
                        kind: "PerShare",
                        field: "client limits",
                    });
                }
                let export = export.ok_or(QosError::MissingLimit {
                    kind: "PerShare",
                    what: "an export limit",
                })?;
                Ok(QosPolicy::PerShare { export })
            }
            QosKind::PerClient => {
                if export.is_some() {
                    return Err(QosError::UnexpectedField {
                        kind: "PerClient",
                        field: "export limits",
                    });
                }
                let client = client.ok_or(QosError::MissingLimit {
                    kind: "PerClient",
                    what: "a client limit",
                })?;
                Ok(QosPolicy::PerClient { client })
            }
            QosKind::PerSharePerClient => match (export, client) {
                (Some(export), Some(client)) => Ok(QosPolicy::PerSharePerClient { export, client }),
                _ => Err(QosError::MissingLimit {
                    kind: "PerShare_PerClient",
                    what: "both export and client limits",
                }),
            },
        }
    }
}

impl From<QosPolicy> for RawQos {
    fn from(policy: QosPolicy) -> Self {
        let (kind, export, client) = match policy {
            QosPolicy::PerShare { export } => (QosKind::PerShare, Some(export), None),
            QosPolicy::PerClient { client } => (QosKind::PerClient, None, Some(client)),
            QosPolicy::PerSharePerClient { export, client } => {
                (QosKind::PerSharePerClient, Some(export), Some(client))
            }
        };
        let (ec, er, ew) = export.map(|l| l.split()).unwrap_or_default();
        let (cc, cr, cw) = client.map(|l| l.split()).unwrap_or_default();
        RawQos {
            kind,
            max_export_combined_bw: ec,
            max_export_read_bw: er,
            max_export_write_bw: ew,
            max_client_combined_bw: cc,
            max_client_read_bw: cr,
            max_client_write_bw: cw,
        }
    }
}
