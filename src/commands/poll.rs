use std::net::IpAddr;

use tracing::info;

use crate::collector::Collector;
use crate::config::Config;
use crate::env::Env;
use crate::error::{Context, Error};
use crate::events::{LogSink, NotificationSink};
use crate::store::ZoneName;

use super::open_store;

#[derive(Clone, Debug, clap::Args)]
pub struct Poll {
    /// The zone to poll
    #[arg(value_name = "ZONE")]
    zone: ZoneName,

    /// The address of the nameserver to ask
    #[arg(value_name = "NAMESERVER")]
    nameserver: IpAddr,
}

impl Poll {
    pub fn execute(self, env: impl Env, config: &Config) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        self.run(&env, config, &runtime)
            .with_context(|| format!("polling {} at {}", self.zone, self.nameserver))
    }

    fn run(
        &self,
        env: &impl Env,
        config: &Config,
        runtime: &tokio::runtime::Runtime,
    ) -> Result<(), Error> {
        let Poll { zone, nameserver } = self;
        let mut store = open_store(env, config)?;
        let resolver_config = config.resolver_config();
        let collector = Collector::new(env.zone_resolver(&resolver_config));

        info!("Starting {zone} ({nameserver})...");
        let poll = runtime.block_on(collector.fetch(zone, *nameserver))?;
        let report = collector.ingest(&mut store, &poll, env.now())?;

        let mut sink = LogSink;
        for event in &report.events {
            sink.deliver(event);
        }
        info!(
            "Successfully done for {zone} ({nameserver}): serial {}, {} key(s), keyset {}",
            report.serial, report.keys, report.keyset
        );
        Ok(())
    }
}
