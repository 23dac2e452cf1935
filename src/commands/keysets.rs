use crate::config::Config;
use crate::env::Env;
use crate::error::Error;
use crate::store::{display_time, ZoneName};

use super::open_store;

#[derive(Clone, Debug, clap::Args)]
pub struct Keysets {
    /// The zone to list the keysets of
    #[arg(value_name = "ZONE")]
    zone: ZoneName,
}

impl Keysets {
    pub fn execute(self, env: impl Env, config: &Config) -> Result<(), Error> {
        let mut store = open_store(&env, config)?;
        let snapshot = store.snapshot()?;
        let zone = &self.zone;

        let mut out = env.stdout();
        let mut number = 0;
        for keyset in snapshot.keysets(zone)? {
            let members = snapshot.keyset_member_tags(&keyset.id, zone)?;
            if members.is_empty() {
                continue;
            }
            number += 1;
            let members: Vec<String> = members.iter().map(ToString::to_string).collect();
            writeln!(
                out,
                "#{number} of {zone}: [{}]\t(first {}, last {}, TTL {})",
                members.join(", "),
                display_time(&keyset.first_seen),
                display_time(&keyset.last_seen),
                keyset.ttl,
            );
        }
        Ok(())
    }
}
