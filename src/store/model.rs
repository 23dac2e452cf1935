//! The entities kept by the observation store.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use domain::base::Name;
use domain::utils::base64;
use ring::digest;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::error::Error;

/// Bit 0 of the DNSKEY flags, the secure entry point marker.
///
/// Keys with this bit set are treated as key signing keys.
pub const SEP_FLAG: u16 = 0x0001;

//------------ ZoneName ------------------------------------------------------

/// A fully-qualified zone name.
///
/// The textual form is lower case and always ends in a dot, so that
/// `Example.TEST` and `example.test.` refer to the same zone.
#[derive(Clone, Debug)]
pub struct ZoneName {
    text: String,
    name: Name<Vec<u8>>,
}

impl ZoneName {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn as_name(&self) -> &Name<Vec<u8>> {
        &self.name
    }
}

impl FromStr for ZoneName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("zone name is empty".into());
        }
        let mut text = s.to_lowercase();
        if !text.ends_with('.') {
            text.push('.');
        }
        let name = Name::from_str(&text)
            .map_err(|e| Error::from(format!("invalid zone name '{s}': {e}")))?;
        Ok(ZoneName { text, name })
    }
}

impl PartialEq for ZoneName {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for ZoneName {}

impl Hash for ZoneName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state)
    }
}

impl PartialOrd for ZoneName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ZoneName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text.cmp(&other.text)
    }
}

impl fmt::Display for ZoneName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl ToSql for ZoneName {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.text.as_str()))
    }
}

impl FromSql for ZoneName {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: Error| FromSqlError::Other(Box::new(e)))
    }
}

//------------ KeysetId ------------------------------------------------------

/// The identifier of a keyset, a digest over its member keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeysetId(String);

impl KeysetId {
    /// Compute the identifier of the keyset with the given members.
    ///
    /// The members are put in canonical (bytewise) order and duplicates are
    /// dropped before hashing, so any permutation of the same keys yields
    /// the same identifier. Each member is length-prefixed so that member
    /// boundaries are part of the digest.
    pub fn from_members<'a>(members: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut members: Vec<&[u8]> = members.into_iter().collect();
        members.sort_unstable();
        members.dedup();

        let mut ctx = digest::Context::new(&digest::SHA256);
        for member in members {
            ctx.update(&(member.len() as u32).to_be_bytes());
            ctx.update(member);
        }
        KeysetId(base64::encode_string(&ctx.finish()))
    }
}

impl fmt::Display for KeysetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ToSql for KeysetId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_str()))
    }
}

impl FromSql for KeysetId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(KeysetId(value.as_str()?.into()))
    }
}

//------------ Observations --------------------------------------------------

/// A DNSKEY as seen in a response.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObservedKey {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
    pub key_tag: u16,
}

/// An RRSIG as seen in a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedSignature {
    /// The record type covered by the signature.
    pub rtype: u16,

    /// The TTL of the signature record set.
    pub ttl: u32,

    pub key_tag: u16,
    pub algorithm: u8,
    pub inception: u32,
    pub expiration: u32,

    /// The raw signature, which identifies the signature.
    pub signature: Vec<u8>,
}

/// Whether an upsert created a new row or refreshed an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Refreshed,
}

//------------ Rows ----------------------------------------------------------

/// One serial of a zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneRow {
    pub name: ZoneName,
    pub serial: u32,
    pub nameserver: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRow {
    pub zone: ZoneName,
    pub key_tag: u16,
    pub public_key: Vec<u8>,
    pub flags: u16,
    pub algorithm: u8,
    pub protocol: u8,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeysetRow {
    pub id: KeysetId,
    pub zone: ZoneName,
    pub ttl: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureRow {
    pub signature: Vec<u8>,
    pub rtype: u16,
    pub zone: ZoneName,
    pub ttl: u32,
    pub key_tag: u16,
    pub algorithm: u8,
    pub inception: u32,
    pub expiration: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// The key tag of a keyset member, marked when it is a KSK.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemberTag {
    pub key_tag: u16,
    pub ksk: bool,
}

impl fmt::Display for MemberTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ksk {
            true => write!(f, "{}*", self.key_tag),
            false => write!(f, "{}", self.key_tag),
        }
    }
}

/// Format a timestamp the way it is shown to users.
pub fn display_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
