use tracing::info;

use crate::audit::Auditor;
use crate::config::Config;
use crate::env::Env;
use crate::error::Error;
use crate::report::{report, ViolationOrder};
use crate::store::ZoneName;

use super::open_store;

#[derive(Clone, Debug, clap::Args)]
pub struct Audit {
    /// How to sort the findings [default: zone]
    #[arg(long = "order", value_name = "ORDER")]
    order: Option<ViolationOrder>,

    /// The zones to audit, all recorded zones if none are given
    #[arg(value_name = "ZONE")]
    zones: Vec<ZoneName>,
}

impl Audit {
    pub fn execute(self, env: impl Env, config: &Config) -> Result<(), Error> {
        let mut store = open_store(&env, config)?;
        let auditor = Auditor::new(store.snapshot()?);
        let violations = if self.zones.is_empty() {
            auditor.audit_all()?
        } else {
            auditor.audit_zones(&self.zones)?
        };

        let violations = report(violations, self.order.unwrap_or(config.order));
        let mut out = env.stdout();
        for violation in &violations {
            writeln!(out, "ERROR: {violation}");
        }
        info!("Audit found {} violation(s)", violations.len());
        Ok(())
    }
}
