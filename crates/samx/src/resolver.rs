//! 🕸️ Resolver: which dashboards have to travel together.
//!
//! Start from what the operator picked, fetch each bundle, follow every
//! dashboard link widget (its own and its components'), repeat until nothing
//! new shows up. A `checked` set means cycles, self-links and diamonds all end
//! the same way: every dashboard fetched once, listed once.
//!
//! Bundles are kept so the fetcher does not ask the API for them twice.
//! Links that cannot be fetched end up in `unresolved` instead of vanishing.

use std::collections::{BTreeMap, HashSet, VecDeque};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::backends::AnalyticsSource;
use crate::common::DashboardBundle;

#[derive(Debug, Default)]
pub struct Resolution {
    /// 🎯 what the operator asked for, by canonical name
    pub requested: Vec<String>,
    /// 🕸️ requested plus everything reachable, in discovery order
    pub closure: Vec<String>,
    pub bundles: BTreeMap<String, DashboardBundle>,
    /// 💀 linked, but the API would not hand them over
    pub unresolved: Vec<String>,
}

impl Resolution {
    /// 🔗 Dashboards in the closure nobody selected.
    pub fn extras(&self) -> Vec<&str> {
        self.closure
            .iter()
            .filter(|name| !self.requested.contains(name))
            .map(String::as_str)
            .collect()
    }

    /// ✂️ Keep only the requested dashboards. Links into the rest stay dangling.
    pub fn restrict_to_requested(mut self) -> Self {
        let requested = &self.requested;
        self.closure.retain(|name| requested.contains(name));
        self.bundles.retain(|name, _| requested.contains(name));
        self
    }

    /// 🎁 Bundles in closure order.
    pub fn ordered_bundles(&self) -> impl Iterator<Item = &DashboardBundle> {
        self.closure.iter().filter_map(|name| self.bundles.get(name))
    }
}

/// 🕸️ Walk the link graph from `requested`.
///
/// A requested dashboard that cannot be fetched is an error. A linked one is
/// only a gap and lands in [`Resolution::unresolved`].
pub async fn resolve<S>(source: &S, requested: &[String]) -> Result<Resolution>
where
    S: AnalyticsSource + ?Sized,
{
    let mut resolution = Resolution::default();
    let mut checked: HashSet<String> = HashSet::new();
    let mut worklist: VecDeque<(String, bool)> =
        requested.iter().map(|name| (name.clone(), true)).collect();

    while let Some((name, is_requested)) = worklist.pop_front() {
        if !checked.insert(name.clone()) {
            continue;
        }
        let bundle = match source.dashboard_bundle(&name).await {
            Ok(bundle) => bundle,
            Err(err) if !is_requested => {
                debug!("🕳️ linked dashboard {name} could not be fetched: {err:#}");
                resolution.unresolved.push(name);
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("💀 Dashboard '{name}' was selected but could not be fetched")
                });
            }
        };

        // -- requested by id, linked by name: the asset name is the one true key
        let canonical = match bundle.name() {
            "" => name.clone(),
            asset_name => asset_name.to_string(),
        };
        checked.insert(canonical.clone());
        if is_requested && !resolution.requested.contains(&canonical) {
            resolution.requested.push(canonical.clone());
        }

        for link in bundle.linked_dashboards() {
            if !checked.contains(&link) {
                worklist.push_back((link, false));
            }
        }
        if !resolution.closure.contains(&canonical) {
            resolution.closure.push(canonical.clone());
        }
        resolution.bundles.insert(canonical, bundle);
    }

    info!(
        "🕸️ resolved {} dashboard(s) from {} requested, {} unresolved",
        resolution.closure.len(),
        resolution.requested.len(),
        resolution.unresolved.len()
    );
    Ok(resolution)
}
