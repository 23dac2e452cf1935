//! The observation store.
//!
//! A SQLite database that remembers when zones, keys, keysets and
//! signatures were first and last seen. Rows are created on the first
//! sighting and afterwards only refreshed, never removed.
//!
//! All writes go through a [`StoreTransaction`]; all reads for an audit go
//! through a [`Snapshot`]. Both wrap a database transaction, so a poll is
//! applied completely or not at all and an audit never sees half of one.

mod model;
mod read;
mod write;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, TransactionBehavior};
use tracing::{debug, warn};

pub use self::model::{
    display_time, KeyRow, KeysetId, KeysetRow, MemberTag, ObservedKey, ObservedSignature,
    SignatureRow, Upsert, ZoneName, ZoneRow, SEP_FLAG,
};
pub use self::read::{SeenAt, Snapshot};
pub use self::write::StoreTransaction;

/// How long to wait for a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS zones (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        serial INTEGER NOT NULL,
        nameserver TEXT NOT NULL,
        first_seen INTEGER NOT NULL,
        last_seen INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS zones_by_name ON zones(name, last_seen);

    CREATE TABLE IF NOT EXISTS keys (
        name TEXT NOT NULL,
        key_tag INTEGER NOT NULL,
        key BLOB NOT NULL,
        flags INTEGER NOT NULL,
        algorithm INTEGER NOT NULL,
        protocol INTEGER NOT NULL,
        first_seen INTEGER NOT NULL,
        last_seen INTEGER NOT NULL,
        PRIMARY KEY (name, key)
    );

    CREATE TABLE IF NOT EXISTS keysets (
        id TEXT NOT NULL,
        name TEXT NOT NULL,
        ttl INTEGER NOT NULL,
        first_seen INTEGER NOT NULL,
        last_seen INTEGER NOT NULL,
        PRIMARY KEY (id, name)
    );
    CREATE INDEX IF NOT EXISTS keysets_by_name ON keysets(name, first_seen);

    CREATE TABLE IF NOT EXISTS keyset_members (
        id TEXT NOT NULL,
        member BLOB NOT NULL,
        PRIMARY KEY (id, member)
    );
    CREATE INDEX IF NOT EXISTS keyset_members_by_member ON keyset_members(member);

    CREATE TABLE IF NOT EXISTS signatures (
        signature BLOB PRIMARY KEY,
        type INTEGER NOT NULL,
        name TEXT NOT NULL,
        ttl INTEGER NOT NULL,
        key_tag INTEGER NOT NULL,
        algorithm INTEGER NOT NULL,
        inception INTEGER NOT NULL,
        expiration INTEGER NOT NULL,
        first_seen INTEGER NOT NULL,
        last_seen INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS signatures_by_signer ON signatures(name, key_tag);
    CREATE INDEX IF NOT EXISTS signatures_by_type ON signatures(name, type, first_seen);
";

//------------ StoreError ----------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unable to open observation database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("observation database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = core::result::Result<T, StoreError>;

//------------ ObservationStore ----------------------------------------------

pub struct ObservationStore {
    conn: Connection,
}

impl ObservationStore {
    /// Open or create the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // Readers do not block the single writer and vice versa.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!("Observation database {} uses journal mode {mode}", path.display());
        }
        debug!("Opened observation database {}", path.display());
        Self::init(conn)
    }

    /// Create a fresh database that only lives in memory.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(ObservationStore { conn })
    }

    /// Start a write transaction.
    ///
    /// The database write lock is taken immediately, so two pollers never
    /// interleave their writes. Dropping the transaction without calling
    /// [`StoreTransaction::commit`] discards everything written through it.
    pub fn transaction(&mut self) -> Result<StoreTransaction<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(StoreTransaction::new(tx))
    }

    /// Start a read-only view of the committed state.
    pub fn snapshot(&mut self) -> Result<Snapshot<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?;
        Ok(Snapshot::new(tx))
    }
}

//------------ Helpers -------------------------------------------------------

fn to_secs(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    DateTime::from_timestamp(secs, 0).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, secs))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rusqlite::params;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn count(store: &ObservationStore, table: &str) -> i64 {
        store
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    fn zone(name: &str) -> ZoneName {
        name.parse().unwrap()
    }

    fn key(tag: u16, flags: u16, material: &[u8]) -> ObservedKey {
        ObservedKey {
            flags,
            protocol: 3,
            algorithm: 13,
            public_key: material.to_vec(),
            key_tag: tag,
        }
    }

    fn signature(tag: u16, bytes: &[u8]) -> ObservedSignature {
        ObservedSignature {
            rtype: 6,
            ttl: 3600,
            key_tag: tag,
            algorithm: 13,
            inception: 1_000,
            expiration: 2_000,
            signature: bytes.to_vec(),
        }
    }

    /// Apply one poll worth of observations.
    fn observe(store: &mut ObservationStore, zone: &ZoneName, time: i64) {
        let ksk = key(257, 257, b"ksk");
        let zsk = key(4711, 256, b"zsk");
        let mut tx = store.transaction().unwrap();
        tx.upsert_zone(zone, 2024010101, "192.0.2.53", at(time))
            .unwrap();
        tx.upsert_key(zone, &ksk, at(time)).unwrap();
        tx.upsert_key(zone, &zsk, at(time)).unwrap();
        tx.upsert_keyset(zone, [&b"zsk"[..], &b"ksk"[..]], 3600, at(time))
            .unwrap();
        tx.upsert_signature(zone, &signature(4711, b"sig"), at(time))
            .unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn repeated_observation_only_refreshes() {
        let mut store = ObservationStore::open_in_memory().unwrap();
        let zone = zone("example.test");

        observe(&mut store, &zone, 100);
        observe(&mut store, &zone, 200);

        assert_eq!(count(&store, "zones"), 1);
        assert_eq!(count(&store, "keys"), 2);
        assert_eq!(count(&store, "keysets"), 1);
        assert_eq!(count(&store, "keyset_members"), 2);
        assert_eq!(count(&store, "signatures"), 1);

        for table in ["zones", "keys", "keysets", "signatures"] {
            let (first, last): (i64, i64) = store
                .conn
                .query_row(
                    &format!("SELECT MIN(first_seen), MAX(last_seen) FROM {table}"),
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .unwrap();
            assert_eq!((first, last), (100, 200), "{table}");
        }
    }

    #[test]
    fn last_seen_never_moves_backwards() {
        let mut store = ObservationStore::open_in_memory().unwrap();
        let zone = zone("example.test");

        observe(&mut store, &zone, 200);
        observe(&mut store, &zone, 150);

        let (first, last): (i64, i64) = store
            .conn
            .query_row("SELECT first_seen, last_seen FROM keys LIMIT 1", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!((first, last), (200, 200));
    }

    #[test]
    fn serial_changes_create_zone_rows() {
        let mut store = ObservationStore::open_in_memory().unwrap();
        let zone = zone("example.test");

        let mut tx = store.transaction().unwrap();
        assert_eq!(
            tx.upsert_zone(&zone, 1, "192.0.2.1", at(10)).unwrap(),
            Upsert::Created
        );
        assert_eq!(
            tx.upsert_zone(&zone, 1, "192.0.2.2", at(20)).unwrap(),
            Upsert::Refreshed
        );
        assert_eq!(
            tx.upsert_zone(&zone, 2, "192.0.2.2", at(30)).unwrap(),
            Upsert::Created
        );
        // Going back to an older serial is a change as well.
        assert_eq!(
            tx.upsert_zone(&zone, 1, "192.0.2.2", at(40)).unwrap(),
            Upsert::Created
        );
        tx.commit().unwrap();

        let history = store.snapshot().unwrap().zone_history(&zone).unwrap();
        let serials: Vec<_> = history.iter().map(|z| z.serial).collect();
        assert_eq!(serials, [1, 2, 1]);
        assert_eq!(history[0].nameserver, "192.0.2.2");
        assert_eq!(history[0].last_seen, at(20));
    }

    #[test]
    fn membership_is_written_once_per_keyset() {
        let mut store = ObservationStore::open_in_memory().unwrap();
        let one = zone("one.test");
        let two = zone("two.test");
        let members = [&b"shared-a"[..], &b"shared-b"[..]];

        let mut tx = store.transaction().unwrap();
        let (first, id_one) = tx.upsert_keyset(&one, members, 60, at(1)).unwrap();
        let (second, id_two) = tx
            .upsert_keyset(&two, [members[1], members[0]], 60, at(2))
            .unwrap();
        tx.commit().unwrap();

        assert_eq!(first, Upsert::Created);
        assert_eq!(second, Upsert::Created);
        assert_eq!(id_one, id_two);
        assert_eq!(count(&store, "keysets"), 2);
        assert_eq!(count(&store, "keyset_members"), 2);
    }

    #[test]
    fn events_are_only_emitted_for_new_material() {
        use crate::events::Event;

        let mut store = ObservationStore::open_in_memory().unwrap();
        let zone = zone("example.test");

        let mut tx = store.transaction().unwrap();
        tx.upsert_key(&zone, &key(257, 257, b"ksk"), at(1)).unwrap();
        tx.upsert_key(&zone, &key(4711, 256, b"zsk"), at(1)).unwrap();
        tx.upsert_keyset(&zone, [&b"ksk"[..], &b"zsk"[..]], 300, at(1))
            .unwrap();
        let events = tx.commit().unwrap();

        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            Event::NewKey { key_tag: 257, flags: 257, .. }
        ));
        assert!(matches!(
            &events[1],
            Event::NewKey { key_tag: 4711, flags: 256, .. }
        ));
        let Event::NewKeyset { ttl, members, .. } = &events[2] else {
            panic!("expected a new keyset event");
        };
        assert_eq!(*ttl, 300);
        assert_eq!(
            members,
            &[
                MemberTag { key_tag: 257, ksk: true },
                MemberTag { key_tag: 4711, ksk: false }
            ]
        );

        let mut tx = store.transaction().unwrap();
        tx.upsert_key(&zone, &key(257, 257, b"ksk"), at(2)).unwrap();
        tx.upsert_keyset(&zone, [&b"zsk"[..], &b"ksk"[..]], 300, at(2))
            .unwrap();
        assert!(tx.commit().unwrap().is_empty());
    }

    #[test]
    fn dropped_transaction_writes_nothing() {
        let mut store = ObservationStore::open_in_memory().unwrap();
        let zone = zone("example.test");

        {
            let mut tx = store.transaction().unwrap();
            tx.upsert_zone(&zone, 1, "192.0.2.1", at(1)).unwrap();
            tx.upsert_key(&zone, &key(1, 256, b"k"), at(1)).unwrap();
        }

        assert_eq!(count(&store, "zones"), 0);
        assert_eq!(count(&store, "keys"), 0);
    }

    #[test]
    fn database_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keywatch.sqlite");
        let zone = zone("example.test");

        {
            let mut store = ObservationStore::open(&path).unwrap();
            observe(&mut store, &zone, 100);
        }

        let mut store = ObservationStore::open(&path).unwrap();
        observe(&mut store, &zone, 300);
        assert_eq!(count(&store, "keys"), 2);

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.zone_names().unwrap(), [zone.clone()]);
        let keys = snapshot.keys(&zone).unwrap();
        assert!(keys.iter().all(|k| k.first_seen == at(100)));
        assert!(keys.iter().all(|k| k.last_seen == at(300)));
        drop(snapshot);

        // Plain SQL access keeps working on the same file.
        let n: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM signatures WHERE name = ?1",
                params![zone],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn snapshots_only_see_committed_polls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.sqlite");
        let zone = zone("example.test");
        let mut writer = ObservationStore::open(&path).unwrap();
        let mut reader = ObservationStore::open(&path).unwrap();

        let snapshot = reader.snapshot().unwrap();
        let mut tx = writer.transaction().unwrap();
        tx.upsert_zone(&zone, 1, "192.0.2.53", at(100)).unwrap();
        assert!(snapshot.zone_names().unwrap().is_empty());

        tx.commit().unwrap();
        assert!(snapshot.zone_names().unwrap().is_empty());
        drop(snapshot);

        let snapshot = reader.snapshot().unwrap();
        assert_eq!(snapshot.zone_names().unwrap(), [zone]);
    }

    #[test]
    fn writers_take_turns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.sqlite");
        let zone = zone("example.test");
        let mut first = ObservationStore::open(&path).unwrap();
        let mut second = ObservationStore::open(&path).unwrap();
        second.conn.busy_timeout(Duration::from_millis(10)).unwrap();

        let mut tx = first.transaction().unwrap();
        tx.upsert_zone(&zone, 1, "192.0.2.53", at(100)).unwrap();
        assert!(matches!(second.transaction(), Err(StoreError::Sqlite(_))));

        tx.commit().unwrap();
        let mut tx = second.transaction().unwrap();
        assert_eq!(
            tx.upsert_zone(&zone, 1, "192.0.2.54", at(200)).unwrap(),
            Upsert::Refreshed
        );
        tx.commit().unwrap();
    }
}
