// SPDX-License-Identifier: MIT OR Apache-2.0

//! File fingerprints: a content hash fused with selected metadata.
//!
//! The fingerprint is the dedup key of the whole engine. It is MD5 of
//! (MD5 of the content bytes ++ folded modification time ++ folded creation
//! time ++ hidden flag). It is not a security primitive: collisions are
//! caught by the mandatory byte-for-byte re-check before any hard link is
//! created. The composition is a wire format; changing any component
//! invalidates every hashtable ever written.

use std::fmt;
use std::io::Read;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::fsutil::FileAttrs;

/// Width of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 16;

const CHUNK_SIZE: usize = 64 * 1024;

/// Stable 16-byte identity of a regular file.
///
/// Totally ordered and hashable so it can key both the in-memory index and
/// the sorted on-disk hashtable. The text form is uppercase hex pairs joined
/// by dashes (47 ASCII characters); parsing accepts either case.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

#[derive(Debug, Error)]
#[error("invalid fingerprint '{0}': expected 16 hex pairs separated by dashes")]
pub struct ParseFingerprintError(String);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl From<[u8; FINGERPRINT_LEN]> for Fingerprint {
    fn from(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "-")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        let mut count = 0;
        for pair in s.split('-') {
            if count == FINGERPRINT_LEN || pair.len() != 2 {
                return Err(ParseFingerprintError(s.to_string()));
            }
            bytes[count] = u8::from_str_radix(pair, 16)
                .map_err(|_| ParseFingerprintError(s.to_string()))?;
            count += 1;
        }
        if count != FINGERPRINT_LEN {
            return Err(ParseFingerprintError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// Compute the fingerprint of the content behind `reader` with the given
/// attributes. The reader is consumed to end-of-stream.
pub fn fingerprint_reader(reader: &mut dyn Read, attrs: &FileAttrs) -> Result<Fingerprint> {
    let mut hasher = Md5::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buf).context("read content chunk")?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    let content = hasher.finalize();

    let mut composite = Md5::new();
    composite.update(content);
    composite.update(fold_ticks(time_ticks(attrs.modified)).to_le_bytes());
    composite.update(fold_ticks(time_ticks(attrs.effective_created())).to_le_bytes());
    composite.update([u8::from(attrs.hidden)]);
    Ok(Fingerprint(composite.finalize().into()))
}

/// A timestamp as a signed 64-bit tick count: nanoseconds relative to the
/// Unix epoch. Part of the fingerprint wire format.
fn time_ticks(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_nanos() as i64,
        Err(before_epoch) => -(before_epoch.duration().as_nanos() as i64),
    }
}

/// Fold a 64-bit tick count to 32 bits by XOR of the high and low halves.
fn fold_ticks(ticks: i64) -> i32 {
    ((ticks >> 32) as i32) ^ (ticks as i32)
}
