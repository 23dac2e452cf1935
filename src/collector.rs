//! Turning one poll of a zone into observations.

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use domain::base::Rtype;
use tracing::{debug, warn};

use crate::events::Event;
use crate::resolver::{Answer, ResolveError, ZoneResolver};
use crate::store::{KeysetId, ObservationStore, ObservedKey, StoreError, ZoneName};

//------------ ZonePoll ------------------------------------------------------

/// Everything one nameserver said about a zone.
#[derive(Clone, Debug)]
pub struct ZonePoll {
    pub zone: ZoneName,
    pub nameserver: IpAddr,
    pub dnskey: Answer,
    pub soa: Answer,
    pub ns: Answer,
}

//------------ PollReport ----------------------------------------------------

/// What a committed poll recorded.
#[derive(Clone, Debug)]
pub struct PollReport {
    pub zone: ZoneName,
    pub serial: u32,
    pub keyset: KeysetId,
    pub keys: usize,

    /// The events produced by the poll, in the order they happened.
    pub events: Vec<Event>,

    /// Signatures made by keys that were not in the published keyset.
    pub unknown_signers: Vec<UnknownSigner>,
}

/// A signature whose key tag matches none of the zone's keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnknownSigner {
    pub rtype: Rtype,
    pub key_tag: u16,
}

//------------ PollError -----------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("{rtype} query for {zone} at {nameserver} failed: {source}")]
    Resolve {
        zone: ZoneName,
        rtype: Rtype,
        nameserver: IpAddr,
        #[source]
        source: ResolveError,
    },

    #[error("no {rtype} records for {zone} at {nameserver}")]
    MissingRecords {
        zone: ZoneName,
        rtype: Rtype,
        nameserver: IpAddr,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

//------------ Collector -----------------------------------------------------

pub struct Collector<R> {
    resolver: R,
}

impl<R: ZoneResolver> Collector<R> {
    pub fn new(resolver: R) -> Self {
        Collector { resolver }
    }

    /// Ask `nameserver` for the DNSKEY, SOA and NS records of `zone`.
    pub async fn fetch(&self, zone: &ZoneName, nameserver: IpAddr) -> Result<ZonePoll, PollError> {
        let dnskey = self.query(zone, Rtype::DNSKEY, nameserver).await?;
        let soa = self.query(zone, Rtype::SOA, nameserver).await?;
        let ns = self.query(zone, Rtype::NS, nameserver).await?;
        Ok(ZonePoll {
            zone: zone.clone(),
            nameserver,
            dnskey,
            soa,
            ns,
        })
    }

    async fn query(
        &self,
        zone: &ZoneName,
        rtype: Rtype,
        nameserver: IpAddr,
    ) -> Result<Answer, PollError> {
        let answer = self
            .resolver
            .resolve(zone, rtype, nameserver)
            .await
            .map_err(|source| PollError::Resolve {
                zone: zone.clone(),
                rtype,
                nameserver,
                source,
            })?;
        debug!(
            "{zone}/{rtype} at {nameserver}: {} record(s), {} signature(s)",
            answer.records.len(),
            answer.signatures.len()
        );
        Ok(answer)
    }

    /// Record a poll in the store.
    ///
    /// The poll is checked for completeness first and then written in a
    /// single transaction. On error nothing is written.
    pub fn ingest(
        &self,
        store: &mut ObservationStore,
        poll: &ZonePoll,
        observed_at: DateTime<Utc>,
    ) -> Result<PollReport, PollError> {
        let missing = |rtype| PollError::MissingRecords {
            zone: poll.zone.clone(),
            rtype,
            nameserver: poll.nameserver,
        };

        let keys: BTreeSet<&ObservedKey> = poll.dnskey.keys().collect();
        if keys.is_empty() {
            return Err(missing(Rtype::DNSKEY));
        }
        let serial = poll.soa.serial().ok_or_else(|| missing(Rtype::SOA))?;
        if poll.ns.is_empty() {
            return Err(missing(Rtype::NS));
        }

        let zone = &poll.zone;
        let ttl = poll.dnskey.ttl().unwrap_or_default();
        let mut tx = store.transaction()?;

        for key in &keys {
            tx.upsert_key(zone, key, observed_at)?;
        }
        let (_, keyset) = tx.upsert_keyset(
            zone,
            keys.iter().map(|k| k.public_key.as_slice()),
            ttl,
            observed_at,
        )?;
        for signature in &poll.dnskey.signatures {
            tx.upsert_signature(zone, signature, observed_at)?;
        }

        tx.upsert_zone(zone, serial, &poll.nameserver.to_string(), observed_at)?;

        let tags: BTreeSet<u16> = keys.iter().map(|k| k.key_tag).collect();
        let mut unknown_signers = Vec::new();
        for (rtype, answer) in [(Rtype::SOA, &poll.soa), (Rtype::NS, &poll.ns)] {
            for signature in &answer.signatures {
                if !tags.contains(&signature.key_tag) {
                    warn!(
                        "{zone}/{rtype} signed with {} which is not in the keyset",
                        signature.key_tag
                    );
                    unknown_signers.push(UnknownSigner {
                        rtype,
                        key_tag: signature.key_tag,
                    });
                }
                tx.upsert_signature(zone, signature, observed_at)?;
            }
        }

        let events = tx.commit()?;
        Ok(PollReport {
            zone: zone.clone(),
            serial,
            keyset,
            keys: keys.len(),
            events,
            unknown_signers,
        })
    }
}
