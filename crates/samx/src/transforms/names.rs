//! 🧼 Field name cleaning and the per-dataset rename plan.
//!
//! The destination wants names without `_`, spaces or `.`. Cleaning strips
//! the first two and turns periods into a `DOT` marker (or drops them, if the
//! config says so). Two fields that clean to the same name, compared without
//! caring about case, get a numeric suffix.
//!
//! Cleaning is idempotent: nothing it emits is something it would strip.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Deserialize;
use tracing::debug;

use crate::common::{DatasetFields, FieldKind};

/// 🔤 What a period turns into.
pub const PERIOD_MARKER: &str = "DOT";

/// 🚫 Characters that never survive cleaning. `<`, `#` and `>` are reserved for placeholder tokens.
const STRIPPED: &[char] = &['_', ' ', '<', '#', '>'];

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PeriodPolicy {
    /// `Account.Name` → `AccountDOTName`
    #[default]
    Marker,
    /// `Account.Name` → `AccountName`
    Strip,
}

/// 🔧 The `[rename]` table of the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct RenameConfig {
    #[serde(default)]
    pub period_policy: PeriodPolicy,
    /// 📐 sort fields by original name before handing out suffixes, so reruns agree
    #[serde(default = "default_sort_fields")]
    pub sort_fields: bool,
}

fn default_sort_fields() -> bool {
    true
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            period_policy: PeriodPolicy::default(),
            sort_fields: default_sort_fields(),
        }
    }
}

pub fn clean_field_name(raw: &str, policy: PeriodPolicy) -> String {
    let mut the_clean_one = String::with_capacity(raw.len() + 4);
    for c in raw.chars() {
        match c {
            '.' => {
                if policy == PeriodPolicy::Marker {
                    the_clean_one.push_str(PERIOD_MARKER);
                }
            }
            c if STRIPPED.contains(&c) => {}
            c => the_clean_one.push(c),
        }
    }
    the_clean_one
}

/// 🎟️ Hands out names that are unique within one dataset, case-insensitively.
#[derive(Debug, Default)]
pub struct NameAllocator {
    taken: HashSet<String>,
    collisions: HashMap<String, u32>,
}

impl NameAllocator {
    pub fn allocate(&mut self, base: &str) -> String {
        let base = if base.is_empty() { "Field" } else { base };
        let the_key = base.to_lowercase();
        if self.taken.insert(the_key.clone()) {
            return base.to_string();
        }
        let counter = self.collisions.entry(the_key).or_insert(0);
        loop {
            *counter += 1;
            let the_candidate = format!("{base}{counter}");
            if self.taken.insert(the_candidate.to_lowercase()) {
                return the_candidate;
            }
        }
    }
}

/// ✏️ One line of a rename plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRename {
    pub original: String,
    pub cleaned: String,
    pub kind: FieldKind,
}

/// 🗺️ Original → cleaned names for every field of one dataset, plus the dataset's new name.
#[derive(Debug, Clone, Default)]
pub struct DatasetRenamePlan {
    pub dataset: String,
    pub target_dataset: String,
    renames: Vec<FieldRename>,
    by_original: HashMap<String, usize>,
}

impl DatasetRenamePlan {
    pub fn build(fields: &DatasetFields, target_dataset: String, config: &RenameConfig) -> Self {
        let mut the_order: Vec<_> = fields.fields.iter().collect();
        if config.sort_fields {
            the_order.sort_by(|a, b| a.name.cmp(&b.name));
        }

        let mut allocator = NameAllocator::default();
        let mut plan = Self {
            dataset: fields.dataset.clone(),
            target_dataset,
            ..Default::default()
        };
        for field in the_order {
            let cleaned = allocator.allocate(&clean_field_name(&field.name, config.period_policy));
            if cleaned != field.name {
                debug!("🧼 {}.{} → {}", fields.dataset, field.name, cleaned);
            }
            plan.push(FieldRename {
                original: field.name.clone(),
                cleaned,
                kind: field.kind,
            });
        }
        plan
    }

    /// 🛠️ For callers that already know the answer (tests, hand-made plans).
    pub fn from_renames(
        dataset: &str,
        target_dataset: &str,
        renames: impl IntoIterator<Item = FieldRename>,
    ) -> Self {
        let mut plan = Self {
            dataset: dataset.to_string(),
            target_dataset: target_dataset.to_string(),
            ..Default::default()
        };
        for rename in renames {
            plan.push(rename);
        }
        plan
    }

    fn push(&mut self, rename: FieldRename) {
        self.by_original
            .insert(rename.original.clone(), self.renames.len());
        self.renames.push(rename);
    }

    pub fn renames(&self) -> &[FieldRename] {
        &self.renames
    }

    pub fn cleaned(&self, original: &str) -> Option<&str> {
        self.by_original
            .get(original)
            .map(|&i| self.renames[i].cleaned.as_str())
    }

    pub fn get(&self, original: &str) -> Option<&FieldRename> {
        self.by_original.get(original).map(|&i| &self.renames[i])
    }

    /// 📏 Cleaned names in the order the CSV columns are written: dates, dimensions, measures.
    pub fn columns(&self) -> Vec<&FieldRename> {
        let mut the_columns: Vec<&FieldRename> = Vec::with_capacity(self.renames.len());
        for kind in [FieldKind::Date, FieldKind::Dimension, FieldKind::Measure] {
            the_columns.extend(self.renames.iter().filter(|r| r.kind == kind));
        }
        the_columns
    }
}

/// 🗺️ `(dataset, original field)` → cleaned field, for every dataset of a run.
#[derive(Debug, Clone, Default)]
pub struct FieldRenameMap {
    plans: BTreeMap<String, DatasetRenamePlan>,
}

impl FieldRenameMap {
    pub fn insert(&mut self, plan: DatasetRenamePlan) {
        self.plans.insert(plan.dataset.clone(), plan);
    }

    pub fn plan(&self, dataset: &str) -> Option<&DatasetRenamePlan> {
        self.plans.get(dataset)
    }

    pub fn cleaned(&self, dataset: &str, original: &str) -> Option<&str> {
        self.plans.get(dataset)?.cleaned(original)
    }

    pub fn plans(&self) -> impl Iterator<Item = &DatasetRenamePlan> {
        self.plans.values()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FieldSpec;

    fn a_dimension(name: &str) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            label: name.into(),
            kind: FieldKind::Dimension,
            decimal_digits: 0,
            date_format: None,
            fiscal_month_offset: None,
        }
    }

    fn fields_named(names: &[&str]) -> DatasetFields {
        DatasetFields {
            dataset: "Accounts".into(),
            fields: names.iter().map(|n| a_dimension(n)).collect(),
        }
    }

    #[test]
    fn the_one_where_cleaning_twice_changes_nothing() {
        for raw in [
            "Account.Owner.Name",
            "Close_Date",
            "  spaced out  ",
            "Weird<#>Token",
            "Already",
            "a..b",
        ] {
            for policy in [PeriodPolicy::Marker, PeriodPolicy::Strip] {
                let once = clean_field_name(raw, policy);
                assert_eq!(clean_field_name(&once, policy), once, "{raw} under {policy:?}");
            }
        }
        assert_eq!(clean_field_name("Account.Name", PeriodPolicy::Marker), "AccountDOTName");
        assert_eq!(clean_field_name("Close_Date", PeriodPolicy::Marker), "CloseDate");
    }

    #[test]
    fn the_one_where_region_name_and_regionname_have_to_share() {
        let config = RenameConfig {
            period_policy: PeriodPolicy::Strip,
            sort_fields: true,
        };
        let plan = DatasetRenamePlan::build(
            &fields_named(&["Region.Name", "RegionName"]),
            "Accounts_ABC".into(),
            &config,
        );
        assert_eq!(plan.cleaned("Region.Name"), Some("RegionName"));
        assert_eq!(plan.cleaned("RegionName"), Some("RegionName1"));
    }

    #[test]
    fn the_one_where_every_cleaned_name_is_unique_even_when_case_disagrees() {
        let the_troublemakers = [
            "Region_Name",
            "RegionName",
            "regionname",
            "REGION NAME",
            "RegionName1",
            "Region.Name",
            "Region__Name",
        ];
        for policy in [PeriodPolicy::Marker, PeriodPolicy::Strip] {
            let config = RenameConfig {
                period_policy: policy,
                sort_fields: false,
            };
            let plan = DatasetRenamePlan::build(
                &fields_named(&the_troublemakers),
                "Accounts_ABC".into(),
                &config,
            );
            let mut the_seen = HashSet::new();
            for rename in plan.renames() {
                assert!(
                    the_seen.insert(rename.cleaned.to_lowercase()),
                    "{} collided under {policy:?}",
                    rename.cleaned
                );
            }
            assert_eq!(the_seen.len(), the_troublemakers.len());
        }
    }

    #[test]
    fn the_one_where_sorting_makes_reruns_agree() {
        let config = RenameConfig::default();
        let forwards = DatasetRenamePlan::build(
            &fields_named(&["Owner_Id", "OwnerId"]),
            "X".into(),
            &config,
        );
        let backwards = DatasetRenamePlan::build(
            &fields_named(&["OwnerId", "Owner_Id"]),
            "X".into(),
            &config,
        );
        assert_eq!(forwards.cleaned("Owner_Id"), backwards.cleaned("Owner_Id"));
        assert_eq!(forwards.cleaned("OwnerId"), backwards.cleaned("OwnerId"));
    }
}
