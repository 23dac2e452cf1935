//! Notifications about newly seen key material.

use std::fmt::Write as _;

use tracing::info;

use crate::store::{KeysetId, MemberTag, ZoneName, SEP_FLAG};

/// Something new that a poll found in a zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    NewKey {
        zone: ZoneName,
        key_tag: u16,
        flags: u16,
        algorithm: u8,
    },
    NewKeyset {
        zone: ZoneName,
        id: KeysetId,
        ttl: u32,
        members: Vec<MemberTag>,
    },
}

impl Event {
    /// A one line summary, usable as a mail subject.
    pub fn subject(&self) -> String {
        match self {
            Event::NewKey { zone, key_tag, .. } => format!("New key {key_tag} in zone {zone}"),
            Event::NewKeyset { zone, .. } => format!("New keyset in zone {zone}"),
        }
    }

    pub fn body(&self) -> String {
        match self {
            Event::NewKey {
                zone,
                key_tag,
                flags,
                algorithm,
            } => {
                let kind = if flags & SEP_FLAG != 0 { "KSK" } else { "ZSK" };
                format!(
                    "A new {kind} with tag {key_tag} (flags {flags}, algorithm {algorithm}) \
                     was published in zone {zone}."
                )
            }
            Event::NewKeyset {
                zone,
                id,
                ttl,
                members,
            } => {
                let mut body = format!("Keyset {id} with TTL {ttl} was published in zone {zone}.");
                if !members.is_empty() {
                    body.push_str(" Members:");
                    for member in members {
                        let _ = write!(body, " {member}");
                    }
                }
                body
            }
        }
    }
}

/// Where events go once a poll has been committed.
pub trait NotificationSink {
    fn deliver(&mut self, event: &Event);
}

/// Reports events through the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&mut self, event: &Event) {
        info!("{}: {}", event.subject(), event.body());
    }
}

impl NotificationSink for Vec<Event> {
    fn deliver(&mut self, event: &Event) {
        self.push(event.clone());
    }
}
