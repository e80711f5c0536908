//! Structured resource names
//!
//! Every resource the reconciler owns is named `prefix-identity` (endpoints) or
//! `prefix-identity-generation` (models and configs), where the generation is
//! `YYYYMMDDHHMMSS-xxxxxxxx`. Ownership is decided by parsing a name back into
//! its parts, never by substring matching, so `mlops-ep1` does not claim
//! `mlops-ep10-...`.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use rand::Rng;

use crate::Error;

/// Platform limit on resource name length
pub const MAX_NAME_LEN: usize = 63;

/// Maximum length of the naming prefix
pub const MAX_PREFIX_LEN: usize = 16;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LEN: usize = 14;
const SEQUENCE_LEN: usize = 8;

/// Length of `-YYYYMMDDHHMMSS-xxxxxxxx`
const GENERATION_SUFFIX_LEN: usize = 1 + TIMESTAMP_LEN + 1 + SEQUENCE_LEN;

/// Process-wide sequence, started at a random offset on first use
fn next_sequence() -> u32 {
    static SEQUENCE: OnceLock<AtomicU32> = OnceLock::new();
    SEQUENCE
        .get_or_init(|| AtomicU32::new(rand::thread_rng().gen()))
        .fetch_add(1, Ordering::Relaxed)
}

/// Uniqueness suffix for one deploy's model and config
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation {
    timestamp: NaiveDateTime,
    sequence: u32,
}

impl Generation {
    /// A fresh generation stamped with the current time
    pub fn next() -> Self {
        Self::at(Utc::now())
    }

    /// A fresh generation stamped with the given time
    pub fn at(time: DateTime<Utc>) -> Self {
        let timestamp = time.naive_utc();
        // Drop sub-second precision so format/parse round-trips exactly
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        Self {
            timestamp,
            sequence: next_sequence(),
        }
    }

    fn parse(timestamp: &str, sequence: &str) -> Option<Self> {
        if timestamp.len() != TIMESTAMP_LEN
            || sequence.len() != SEQUENCE_LEN
            || !timestamp.bytes().all(|b| b.is_ascii_digit())
            || !sequence.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return None;
        }
        let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        let sequence = u32::from_str_radix(sequence, 16).ok()?;
        Some(Self {
            timestamp,
            sequence,
        })
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:08x}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.sequence
        )
    }
}

/// A parsed resource name
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceName {
    prefix: String,
    identity: String,
    generation: Option<Generation>,
}

impl ResourceName {
    /// Name of the endpoint serving `identity`
    pub fn endpoint(prefix: &str, identity: &str) -> Result<Self, Error> {
        validate_prefix(prefix)?;
        validate_identity(prefix, identity)?;
        Ok(Self {
            prefix: prefix.to_string(),
            identity: identity.to_string(),
            generation: None,
        })
    }

    /// Name for a model/config belonging to this endpoint's identity
    pub fn with_generation(&self, generation: Generation) -> Self {
        Self {
            prefix: self.prefix.clone(),
            identity: self.identity.clone(),
            generation: Some(generation),
        }
    }

    /// Parse a platform name back into its parts
    ///
    /// Fails for names that do not follow the convention; callers treat such
    /// names as belonging to someone else.
    pub fn parse(name: &str) -> Result<Self, Error> {
        let (prefix, rest) = name
            .split_once('-')
            .ok_or_else(|| Error::validation(format!("'{name}' has no prefix separator")))?;
        validate_prefix(prefix)?;

        let mut tail = rest.rsplitn(3, '-');
        let sequence = tail.next();
        let timestamp = tail.next();
        let identity = tail.next();

        let parsed = match (identity, timestamp, sequence) {
            (Some(identity), Some(ts), Some(seq)) => {
                Generation::parse(ts, seq).map(|g| (identity, Some(g)))
            }
            _ => None,
        };
        let (identity, generation) = parsed.unwrap_or((rest, None));

        validate_identity(prefix, identity)?;
        Ok(Self {
            prefix: prefix.to_string(),
            identity: identity.to_string(),
            generation,
        })
    }

    /// Naming prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Logical endpoint identity
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Generation suffix, absent for endpoint names
    pub fn generation(&self) -> Option<Generation> {
        self.generation
    }

    /// Whether this name belongs to the given prefix
    pub fn owned_by(&self, prefix: &str) -> bool {
        self.prefix == prefix
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix, self.identity)?;
        if let Some(g) = &self.generation {
            write!(f, "-{g}")?;
        }
        Ok(())
    }
}

/// The string used to ask the platform for resources under a prefix
pub fn list_prefix(prefix: &str) -> String {
    format!("{prefix}-")
}

/// Prefixes are short, lowercase alphanumeric, and contain no hyphen
pub fn validate_prefix(prefix: &str) -> Result<(), Error> {
    if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN {
        return Err(Error::validation_for_field(
            "namePrefix",
            format!("prefix must be 1-{MAX_PREFIX_LEN} characters, got '{prefix}'"),
        ));
    }
    if !prefix
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return Err(Error::validation_for_field(
            "namePrefix",
            format!("prefix '{prefix}' must be lowercase alphanumeric"),
        ));
    }
    Ok(())
}

/// Identities are alphanumeric words joined by single hyphens
///
/// The identity must leave room for the generation suffix within the platform
/// name limit, and must not itself end in something shaped like a generation
/// (which would make parsing ambiguous).
pub fn validate_identity(prefix: &str, identity: &str) -> Result<(), Error> {
    let max = MAX_NAME_LEN.saturating_sub(prefix.len() + 1 + GENERATION_SUFFIX_LEN);
    if identity.is_empty() || identity.len() > max {
        return Err(Error::validation_for_field(
            "endpointIdentity",
            format!("identity must be 1-{max} characters with prefix '{prefix}', got '{identity}'"),
        ));
    }
    let words_ok = identity.split('-').all(|word| {
        !word.is_empty() && word.bytes().all(|b| b.is_ascii_alphanumeric())
    });
    if !words_ok {
        return Err(Error::validation_for_field(
            "endpointIdentity",
            format!("identity '{identity}' must be alphanumeric words joined by single hyphens"),
        ));
    }
    let mut tail = identity.rsplitn(3, '-');
    if let (Some(seq), Some(ts), Some(_)) = (tail.next(), tail.next(), tail.next()) {
        if Generation::parse(ts, seq).is_some() {
            return Err(Error::validation_for_field(
                "endpointIdentity",
                format!("identity '{identity}' must not end with a generation suffix"),
            ));
        }
    }
    Ok(())
}
