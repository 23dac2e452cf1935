//! Checking the timing of key rollovers.
//!
//! A resolver may cache a keyset for its TTL after it was last served. A
//! signature made with a key that is not in that keyset cannot be
//! validated by such a resolver. So a new key must not sign anything until
//! every cached copy of the previous keyset has expired, and a retired key
//! must not have signatures in caches once its successor keyset is live.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::store::{display_time, KeyRow, SeenAt, Snapshot, StoreError, ZoneName};

//------------ Violation -----------------------------------------------------

/// A signature that was served at a time it could not be validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    /// A new key signed while the previous keyset could still be cached.
    Premature {
        zone: ZoneName,
        key_tag: u16,
        signed_at: DateTime<Utc>,
        keyset_last_seen: DateTime<Utc>,
        ttl: u32,
    },

    /// A retired key's signature could still be cached after the keyset
    /// without it was published.
    Lingering {
        zone: ZoneName,
        key_tag: u16,
        signed_at: DateTime<Utc>,
        ttl: u32,
        retired_at: DateTime<Utc>,
    },
}

impl Violation {
    pub fn zone(&self) -> &ZoneName {
        match self {
            Violation::Premature { zone, .. } | Violation::Lingering { zone, .. } => zone,
        }
    }

    pub fn key_tag(&self) -> u16 {
        match self {
            Violation::Premature { key_tag, .. } | Violation::Lingering { key_tag, .. } => {
                *key_tag
            }
        }
    }

    /// When the offending signature was seen.
    pub fn signed_at(&self) -> DateTime<Utc> {
        match self {
            Violation::Premature { signed_at, .. } | Violation::Lingering { signed_at, .. } => {
                *signed_at
            }
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Premature {
                zone,
                key_tag,
                signed_at,
                keyset_last_seen,
                ttl,
            } => write!(
                f,
                "signature of zone {zone} first seen at {} while the last keyset \
                 before key {key_tag} was last seen at {} and its TTL was {ttl}",
                display_time(signed_at),
                display_time(keyset_last_seen),
            ),
            Violation::Lingering {
                zone,
                key_tag,
                signed_at,
                ttl,
                retired_at,
            } => write!(
                f,
                "signature of zone {zone} last seen at {} (with a TTL of {ttl}) \
                 while the key {key_tag} was retired at {}",
                display_time(signed_at),
                display_time(retired_at),
            ),
        }
    }
}

//------------ Auditor -------------------------------------------------------

/// Looks for rollover timing violations in a snapshot of the store.
///
/// Only keys without the SEP flag are checked.
pub struct Auditor<'a> {
    snapshot: Snapshot<'a>,
}

impl<'a> Auditor<'a> {
    pub fn new(snapshot: Snapshot<'a>) -> Self {
        Auditor { snapshot }
    }

    /// Audit every zone in the store, in name order.
    pub fn audit_all(&self) -> Result<Vec<Violation>, StoreError> {
        let zones = self.snapshot.zone_names()?;
        self.audit_zones(&zones)
    }

    pub fn audit_zones(&self, zones: &[ZoneName]) -> Result<Vec<Violation>, StoreError> {
        let mut violations = Vec::new();
        for zone in zones {
            violations.extend(self.audit_zone(zone)?);
        }
        Ok(violations)
    }

    pub fn audit_zone(&self, zone: &ZoneName) -> Result<Vec<Violation>, StoreError> {
        debug!("Auditing {zone}");
        let mut violations = Vec::new();
        for key in self.snapshot.signing_keys(zone)? {
            self.check_activation(&key, &mut violations)?;
            self.check_retirement(&key, &mut violations)?;
        }
        Ok(violations)
    }

    fn check_activation(
        &self,
        key: &KeyRow,
        violations: &mut Vec<Violation>,
    ) -> Result<(), StoreError> {
        let zone = &key.zone;
        let Some(previous) = self
            .snapshot
            .keyset_before(zone, &key.public_key, key.first_seen)?
        else {
            return Ok(());
        };
        debug!(
            "Key {} of {zone} first seen at {}, previous keyset {} last seen at {} (TTL {})",
            key.key_tag,
            display_time(&key.first_seen),
            previous.id,
            display_time(&previous.last_seen),
            previous.ttl
        );

        let cutoff = previous.last_seen + Duration::seconds(i64::from(previous.ttl));
        for signature in self
            .snapshot
            .signatures_first_seen_before(zone, key.key_tag, cutoff)?
        {
            // A resolver that cannot validate this signature can still use
            // one made by another key over the same data.
            if self.snapshot.has_cosignature(
                zone,
                signature.rtype,
                SeenAt::First(signature.first_seen),
                key.key_tag,
            )? {
                continue;
            }
            violations.push(Violation::Premature {
                zone: zone.clone(),
                key_tag: key.key_tag,
                signed_at: signature.first_seen,
                keyset_last_seen: previous.last_seen,
                ttl: previous.ttl,
            });
        }
        Ok(())
    }

    fn check_retirement(
        &self,
        key: &KeyRow,
        violations: &mut Vec<Violation>,
    ) -> Result<(), StoreError> {
        let zone = &key.zone;
        let Some(successor) = self
            .snapshot
            .keyset_after(zone, &key.public_key, key.first_seen)?
        else {
            // Not retired yet.
            return Ok(());
        };
        debug!(
            "Key {} of {zone} retired at {}",
            key.key_tag,
            display_time(&successor.first_seen)
        );

        let Some(signature) =
            self.snapshot
                .latest_signature_cached_at(zone, key.key_tag, successor.first_seen)?
        else {
            return Ok(());
        };
        if self.snapshot.has_cosignature(
            zone,
            signature.rtype,
            SeenAt::Last(signature.last_seen),
            key.key_tag,
        )? {
            return Ok(());
        }
        violations.push(Violation::Lingering {
            zone: zone.clone(),
            key_tag: key.key_tag,
            signed_at: signature.last_seen,
            ttl: signature.ttl,
            retired_at: successor.first_seen,
        });
        Ok(())
    }
}
