use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};

use crate::events::Event;

use super::model::{KeysetId, MemberTag, ObservedKey, ObservedSignature, Upsert, ZoneName};
use super::{to_secs, Result, SEP_FLAG};

/// The writes of one poll.
///
/// Every upsert that creates a row worth announcing records an [`Event`].
/// The events are handed out by [`StoreTransaction::commit`] so that they
/// are only acted upon once the observations are durable.
pub struct StoreTransaction<'a> {
    tx: Transaction<'a>,
    events: Vec<Event>,
}

impl<'a> StoreTransaction<'a> {
    pub(super) fn new(tx: Transaction<'a>) -> Self {
        StoreTransaction {
            tx,
            events: Vec::new(),
        }
    }

    /// Record that `zone` was seen with `serial` at `nameserver`.
    ///
    /// Only a change of serial, compared to the most recently seen one,
    /// creates a new row. Otherwise that row is refreshed.
    pub fn upsert_zone(
        &mut self,
        zone: &ZoneName,
        serial: u32,
        nameserver: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<Upsert> {
        let now = to_secs(observed_at);
        let latest: Option<(i64, u32)> = self
            .tx
            .query_row(
                "SELECT id, serial FROM zones WHERE name = ?1
                 ORDER BY last_seen DESC, id DESC LIMIT 1",
                params![zone],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match latest {
            Some((id, latest_serial)) if latest_serial == serial => {
                self.tx.execute(
                    "UPDATE zones SET last_seen = MAX(last_seen, ?1), nameserver = ?2
                     WHERE id = ?3",
                    params![now, nameserver, id],
                )?;
                Ok(Upsert::Refreshed)
            }
            _ => {
                self.tx.execute(
                    "INSERT INTO zones (name, serial, nameserver, first_seen, last_seen)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![zone, serial, nameserver, now],
                )?;
                Ok(Upsert::Created)
            }
        }
    }

    /// Record that `key` was published in `zone`.
    pub fn upsert_key(
        &mut self,
        zone: &ZoneName,
        key: &ObservedKey,
        observed_at: DateTime<Utc>,
    ) -> Result<Upsert> {
        let now = to_secs(observed_at);
        let refreshed = self.tx.execute(
            "UPDATE keys SET last_seen = MAX(last_seen, ?1) WHERE name = ?2 AND key = ?3",
            params![now, zone, key.public_key],
        )?;
        if refreshed > 0 {
            return Ok(Upsert::Refreshed);
        }

        self.tx.execute(
            "INSERT INTO keys
                 (name, key_tag, key, flags, algorithm, protocol, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                zone,
                key.key_tag,
                key.public_key,
                key.flags,
                key.algorithm,
                key.protocol,
                now
            ],
        )?;
        self.events.push(Event::NewKey {
            zone: zone.clone(),
            key_tag: key.key_tag,
            flags: key.flags,
            algorithm: key.algorithm,
        });
        Ok(Upsert::Created)
    }

    /// Record that the keys in `members` were published together in `zone`.
    ///
    /// The membership of a keyset is stored once, when its identifier is
    /// seen for the first time in any zone.
    pub fn upsert_keyset<'m>(
        &mut self,
        zone: &ZoneName,
        members: impl IntoIterator<Item = &'m [u8]>,
        ttl: u32,
        observed_at: DateTime<Utc>,
    ) -> Result<(Upsert, KeysetId)> {
        let mut members: Vec<&[u8]> = members.into_iter().collect();
        members.sort_unstable();
        members.dedup();
        let id = KeysetId::from_members(members.iter().copied());
        let now = to_secs(observed_at);

        let refreshed = self.tx.execute(
            "UPDATE keysets SET last_seen = MAX(last_seen, ?1), ttl = ?2
             WHERE id = ?3 AND name = ?4",
            params![now, ttl, id, zone],
        )?;
        if refreshed > 0 {
            return Ok((Upsert::Refreshed, id));
        }

        let known: bool = self.tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM keyset_members WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if !known {
            let mut insert = self
                .tx
                .prepare_cached("INSERT INTO keyset_members (id, member) VALUES (?1, ?2)")?;
            for member in &members {
                insert.execute(params![id, member])?;
            }
        }

        self.tx.execute(
            "INSERT INTO keysets (id, name, ttl, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id, zone, ttl, now],
        )?;

        let members = self.member_tags(zone, &members)?;
        self.events.push(Event::NewKeyset {
            zone: zone.clone(),
            id: id.clone(),
            ttl,
            members,
        });
        Ok((Upsert::Created, id))
    }

    /// Record that `signature` was served for a record set of `zone`.
    pub fn upsert_signature(
        &mut self,
        zone: &ZoneName,
        signature: &ObservedSignature,
        observed_at: DateTime<Utc>,
    ) -> Result<Upsert> {
        let now = to_secs(observed_at);
        let refreshed = self.tx.execute(
            "UPDATE signatures SET last_seen = MAX(last_seen, ?1) WHERE signature = ?2",
            params![now, signature.signature],
        )?;
        if refreshed > 0 {
            return Ok(Upsert::Refreshed);
        }

        self.tx.execute(
            "INSERT INTO signatures
                 (signature, type, name, ttl, key_tag, algorithm,
                  inception, expiration, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                signature.signature,
                signature.rtype,
                zone,
                signature.ttl,
                signature.key_tag,
                signature.algorithm,
                signature.inception,
                signature.expiration,
                now
            ],
        )?;
        Ok(Upsert::Created)
    }

    /// Make the writes durable and return the events they produced.
    pub fn commit(self) -> Result<Vec<Event>> {
        let StoreTransaction { tx, events } = self;
        tx.commit()?;
        Ok(events)
    }

    /// The tags of the given keys as known for `zone`.
    ///
    /// Keys that were never stored for the zone are left out.
    fn member_tags(&self, zone: &ZoneName, members: &[&[u8]]) -> Result<Vec<MemberTag>> {
        let mut select = self
            .tx
            .prepare_cached("SELECT key_tag, flags FROM keys WHERE name = ?1 AND key = ?2")?;
        let mut tags = Vec::with_capacity(members.len());
        for member in members {
            let tag = select
                .query_row(params![zone, member], |row| {
                    let flags: u16 = row.get(1)?;
                    Ok(MemberTag {
                        key_tag: row.get(0)?,
                        ksk: flags & SEP_FLAG != 0,
                    })
                })
                .optional()?;
            tags.extend(tag);
        }
        tags.sort();
        Ok(tags)
    }
}
