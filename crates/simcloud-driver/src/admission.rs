//! Quota admission
//!
//! Pure functions over a policy and an inventory snapshot. The caller holds
//! the driver lock, so the count read here cannot race another admission.

use tracing::{debug, warn};

use simcloud_common::Error;

use crate::inventory::NodeInventory;
use crate::policy::{PolicyConfig, Quota};

/// Quota governing a (region, machine type) pair
///
/// Scans the whole list and keeps the last match, so when the file carries
/// duplicate entries the one written last takes effect.
pub fn find_quota<'a>(policy: &'a PolicyConfig, region: &str, machine_type: &str) -> Option<&'a Quota> {
    policy
        .quotas
        .iter()
        .rfind(|q| q.matches(region, machine_type))
}

/// Admit or reject a create request for `(region, machine_type)`
///
/// A pair without a quota is unlimited. Otherwise the request is rejected once
/// the inventory already holds `amount` nodes for the pair.
pub fn admit(
    policy: &PolicyConfig,
    inventory: &NodeInventory,
    region: &str,
    machine_type: &str,
) -> Result<(), Error> {
    let Some(quota) = find_quota(policy, region, machine_type) else {
        debug!(region = %region, machine_type = %machine_type, "No quota configured, admitting");
        return Ok(());
    };

    let count = i64::try_from(inventory.count_by_region_and_type(region, machine_type))
        .unwrap_or(i64::MAX);
    if count >= quota.amount {
        warn!(
            region = %region,
            machine_type = %machine_type,
            amount = quota.amount,
            count,
            "Quota exhausted, rejecting"
        );
        return Err(Error::resource_exhausted(
            &quota.region,
            &quota.machine_type,
            quota.amount,
        ));
    }

    debug!(
        region = %region,
        machine_type = %machine_type,
        amount = quota.amount,
        count,
        "Admitted"
    );
    Ok(())
}
