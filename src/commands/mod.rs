//! The commands of _keywatch_.
pub mod audit;
pub mod keysets;
pub mod poll;
pub mod zones;

use crate::config::Config;
use crate::env::Env;
use crate::error::{Context, Error};
use crate::store::ObservationStore;

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Command {
    /// Record the DNSSEC key material a nameserver serves for a zone
    ///
    /// The DNSKEY, SOA and NS records of the zone are queried, together
    /// with their signatures. Everything is stored in the observation
    /// database in one transaction: either the whole poll is recorded or
    /// nothing is.
    ///
    /// New keys and keysets are reported in the log.
    #[command(name = "poll")]
    Poll(self::poll::Poll),

    /// Check the recorded history for badly timed key rollovers
    ///
    /// A signature is reported when it was served while a resolver may
    /// still have had a keyset without its key cached, or when it may
    /// still have been cached after the keyset without its key appeared.
    /// Key signing keys are not checked.
    #[command(name = "audit")]
    Audit(self::audit::Audit),

    /// List the keysets recorded for a zone
    ///
    /// Key signing keys are marked with a '*'.
    #[command(name = "keysets")]
    Keysets(self::keysets::Keysets),

    /// List the recorded zones with their latest serial
    #[command(name = "zones")]
    Zones(self::zones::Zones),
}

impl Command {
    pub fn execute(self, env: impl Env, config: &Config) -> Result<(), Error> {
        match self {
            Self::Poll(poll) => poll.execute(env, config),
            Self::Audit(audit) => audit.execute(env, config),
            Self::Keysets(keysets) => keysets.execute(env, config),
            Self::Zones(zones) => zones.execute(env, config),
        }
    }
}

/// Open the observation database named in `config`.
fn open_store(env: &impl Env, config: &Config) -> Result<ObservationStore, Error> {
    let path = env.in_cwd(&config.database);
    ObservationStore::open(&path)
        .map_err(Error::from)
        .context("opening the observation database")
}
