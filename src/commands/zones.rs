use crate::config::Config;
use crate::env::Env;
use crate::error::Error;
use crate::store::display_time;

use super::open_store;

#[derive(Clone, Debug, clap::Args)]
pub struct Zones {}

impl Zones {
    pub fn execute(self, env: impl Env, config: &Config) -> Result<(), Error> {
        let mut store = open_store(&env, config)?;
        let snapshot = store.snapshot()?;

        let mut out = env.stdout();
        for zone in snapshot.zones()? {
            writeln!(
                out,
                "{}\tserial {}\tat {}\t(last seen {})",
                zone.name,
                zone.serial,
                zone.nameserver,
                display_time(&zone.last_seen),
            );
        }
        Ok(())
    }
}
