use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};

use super::model::{KeyRow, KeysetId, KeysetRow, MemberTag, SignatureRow, ZoneName, ZoneRow};
use super::{time_column, to_secs, Result, SEP_FLAG};

/// The record type of DNSKEY, whose signatures are left out of the audit.
const DNSKEY: u16 = 48;

/// Which end of a signature's lifetime to match on.
#[derive(Clone, Copy, Debug)]
pub enum SeenAt {
    First(DateTime<Utc>),
    Last(DateTime<Utc>),
}

/// A consistent read-only view of the store.
pub struct Snapshot<'a> {
    tx: Transaction<'a>,
}

impl<'a> Snapshot<'a> {
    pub(super) fn new(tx: Transaction<'a>) -> Self {
        Snapshot { tx }
    }

    /// The names of all zones ever polled, in name order.
    pub fn zone_names(&self) -> Result<Vec<ZoneName>> {
        let mut stmt = self
            .tx
            .prepare("SELECT DISTINCT name FROM zones ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(names)
    }

    /// The most recently seen serial of every zone, in name order.
    pub fn zones(&self) -> Result<Vec<ZoneRow>> {
        let mut stmt = self.tx.prepare(
            "SELECT name, serial, nameserver, first_seen, last_seen FROM zones AS z
             WHERE id = (SELECT id FROM zones WHERE name = z.name
                         ORDER BY last_seen DESC, id DESC LIMIT 1)
             ORDER BY name",
        )?;
        let zones = stmt
            .query_map([], zone_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(zones)
    }

    /// Every serial seen for `zone`, oldest first.
    pub fn zone_history(&self, zone: &ZoneName) -> Result<Vec<ZoneRow>> {
        let mut stmt = self.tx.prepare(
            "SELECT name, serial, nameserver, first_seen, last_seen FROM zones
             WHERE name = ?1 ORDER BY first_seen, id",
        )?;
        let zones = stmt
            .query_map(params![zone], zone_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(zones)
    }

    /// All keys of `zone`, ordered by tag.
    pub fn keys(&self, zone: &ZoneName) -> Result<Vec<KeyRow>> {
        self.select_keys(zone, false)
    }

    /// The keys of `zone` without the SEP flag.
    pub fn signing_keys(&self, zone: &ZoneName) -> Result<Vec<KeyRow>> {
        self.select_keys(zone, true)
    }

    fn select_keys(&self, zone: &ZoneName, zsk_only: bool) -> Result<Vec<KeyRow>> {
        let mut stmt = self.tx.prepare(
            "SELECT name, key_tag, key, flags, algorithm, protocol, first_seen, last_seen
             FROM keys WHERE name = ?1 AND (?2 = 0 OR flags & ?3 = 0)
             ORDER BY key_tag, first_seen",
        )?;
        let keys = stmt
            .query_map(params![zone, zsk_only, SEP_FLAG], |row| {
                Ok(KeyRow {
                    zone: row.get(0)?,
                    key_tag: row.get(1)?,
                    public_key: row.get(2)?,
                    flags: row.get(3)?,
                    algorithm: row.get(4)?,
                    protocol: row.get(5)?,
                    first_seen: time_column(row, 6)?,
                    last_seen: time_column(row, 7)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(keys)
    }

    /// The keyset of `zone` without `key` that was last seen most recently
    /// among those first seen no later than `at`.
    pub fn keyset_before(
        &self,
        zone: &ZoneName,
        key: &[u8],
        at: DateTime<Utc>,
    ) -> Result<Option<KeysetRow>> {
        let keyset = self
            .tx
            .query_row(
                "SELECT id, name, ttl, first_seen, last_seen FROM keysets
                 WHERE name = ?1 AND first_seen <= ?2
                   AND id NOT IN (SELECT id FROM keyset_members WHERE member = ?3)
                 ORDER BY last_seen DESC LIMIT 1",
                params![zone, to_secs(at), key],
                keyset_row,
            )
            .optional()?;
        Ok(keyset)
    }

    /// The earliest keyset of `zone` without `key` first seen at or after
    /// `at`.
    pub fn keyset_after(
        &self,
        zone: &ZoneName,
        key: &[u8],
        at: DateTime<Utc>,
    ) -> Result<Option<KeysetRow>> {
        let keyset = self
            .tx
            .query_row(
                "SELECT id, name, ttl, first_seen, last_seen FROM keysets
                 WHERE name = ?1 AND first_seen >= ?2
                   AND id NOT IN (SELECT id FROM keyset_members WHERE member = ?3)
                 ORDER BY first_seen ASC LIMIT 1",
                params![zone, to_secs(at), key],
                keyset_row,
            )
            .optional()?;
        Ok(keyset)
    }

    /// Signatures of `zone` by `key_tag` first seen strictly before
    /// `cutoff`, oldest first. DNSKEY signatures are excluded.
    pub fn signatures_first_seen_before(
        &self,
        zone: &ZoneName,
        key_tag: u16,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SignatureRow>> {
        let mut stmt = self.tx.prepare(
            "SELECT signature, type, name, ttl, key_tag, algorithm,
                    inception, expiration, first_seen, last_seen
             FROM signatures
             WHERE name = ?1 AND key_tag = ?2 AND type != ?3 AND first_seen < ?4
             ORDER BY first_seen, signature",
        )?;
        let signatures = stmt
            .query_map(
                params![zone, key_tag, DNSKEY, to_secs(cutoff)],
                signature_row,
            )?
            .collect::<rusqlite::Result<_>>()?;
        Ok(signatures)
    }

    /// The most recently seen signature of `zone` by `key_tag` that may
    /// still have been cached at `at`. DNSKEY signatures are excluded.
    pub fn latest_signature_cached_at(
        &self,
        zone: &ZoneName,
        key_tag: u16,
        at: DateTime<Utc>,
    ) -> Result<Option<SignatureRow>> {
        let signature = self
            .tx
            .query_row(
                "SELECT signature, type, name, ttl, key_tag, algorithm,
                        inception, expiration, first_seen, last_seen
                 FROM signatures
                 WHERE name = ?1 AND key_tag = ?2 AND type != ?3
                   AND last_seen + ttl >= ?4
                 ORDER BY last_seen DESC LIMIT 1",
                params![zone, key_tag, DNSKEY, to_secs(at)],
                signature_row,
            )
            .optional()?;
        Ok(signature)
    }

    /// Whether a key other than `key_tag` signed the same record type of
    /// `zone` with a signature first or last seen at the same time.
    pub fn has_cosignature(
        &self,
        zone: &ZoneName,
        rtype: u16,
        seen: SeenAt,
        key_tag: u16,
    ) -> Result<bool> {
        let (sql, at) = match seen {
            SeenAt::First(at) => (
                "SELECT EXISTS (SELECT 1 FROM signatures
                     WHERE name = ?1 AND type = ?2 AND first_seen = ?3 AND key_tag != ?4)",
                at,
            ),
            SeenAt::Last(at) => (
                "SELECT EXISTS (SELECT 1 FROM signatures
                     WHERE name = ?1 AND type = ?2 AND last_seen = ?3 AND key_tag != ?4)",
                at,
            ),
        };
        let found = self
            .tx
            .query_row(sql, params![zone, rtype, to_secs(at), key_tag], |row| {
                row.get(0)
            })?;
        Ok(found)
    }

    /// The keysets of `zone`, oldest first.
    pub fn keysets(&self, zone: &ZoneName) -> Result<Vec<KeysetRow>> {
        let mut stmt = self.tx.prepare(
            "SELECT id, name, ttl, first_seen, last_seen FROM keysets
             WHERE name = ?1 ORDER BY first_seen, id",
        )?;
        let keysets = stmt
            .query_map(params![zone], keyset_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(keysets)
    }

    /// The tags of the members of keyset `id` that are known keys of
    /// `zone`.
    pub fn keyset_member_tags(&self, id: &KeysetId, zone: &ZoneName) -> Result<Vec<MemberTag>> {
        let mut stmt = self.tx.prepare(
            "SELECT k.key_tag, k.flags FROM keyset_members AS m
             JOIN keys AS k ON k.key = m.member AND k.name = ?2
             WHERE m.id = ?1
             ORDER BY k.key_tag, k.flags",
        )?;
        let tags = stmt
            .query_map(params![id, zone], |row| {
                let flags: u16 = row.get(1)?;
                Ok(MemberTag {
                    key_tag: row.get(0)?,
                    ksk: flags & SEP_FLAG != 0,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(tags)
    }
}

fn zone_row(row: &Row<'_>) -> rusqlite::Result<ZoneRow> {
    Ok(ZoneRow {
        name: row.get(0)?,
        serial: row.get(1)?,
        nameserver: row.get(2)?,
        first_seen: time_column(row, 3)?,
        last_seen: time_column(row, 4)?,
    })
}

fn keyset_row(row: &Row<'_>) -> rusqlite::Result<KeysetRow> {
    Ok(KeysetRow {
        id: row.get(0)?,
        zone: row.get(1)?,
        ttl: row.get(2)?,
        first_seen: time_column(row, 3)?,
        last_seen: time_column(row, 4)?,
    })
}

fn signature_row(row: &Row<'_>) -> rusqlite::Result<SignatureRow> {
    Ok(SignatureRow {
        signature: row.get(0)?,
        rtype: row.get(1)?,
        zone: row.get(2)?,
        ttl: row.get(3)?,
        key_tag: row.get(4)?,
        algorithm: row.get(5)?,
        inception: row.get(6)?,
        expiration: row.get(7)?,
        first_seen: time_column(row, 8)?,
        last_seen: time_column(row, 9)?,
    })
}
