//! 🙋 UserDecisionPort: every question the pipeline asks a human, in one trait.
//!
//! The pipeline never reads stdin. When it needs an answer (which dashboards,
//! follow the links or not, which fields get record actions) it asks the
//! port. The CLI plugs in a console adapter that prompts and re-prompts; tests
//! plug in [`ScriptedDecisions`] and get the same answers every time.

use std::collections::{BTreeMap, VecDeque};

use anyhow::Result;

use crate::common::{AppSummary, DashboardSummary};
use crate::errors::SamxError;

/// 🔗 What to migrate after the resolver found more than was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardSet {
    /// the full closure; links keep working
    Closure,
    /// only what was asked for; links to the rest break on install
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationScope {
    Dashboards,
    Apps,
}

/// 🎯 A dataset as the Action Framework prompt sees it: target name and its dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetDimensions {
    pub dataset: String,
    pub dimensions: Vec<String>,
}

pub trait UserDecisionPort: Send {
    fn template_label(&mut self) -> Result<String>;

    fn auto_install(&mut self) -> Result<bool>;

    fn migration_scope(&mut self) -> Result<MigrationScope>;

    /// 📁 Indices into `apps`.
    fn select_apps(&mut self, apps: &[AppSummary]) -> Result<Vec<usize>>;

    /// 📋 Indices into `dashboards`.
    fn select_dashboards(&mut self, dashboards: &[DashboardSummary]) -> Result<Vec<usize>>;

    /// 🔗 Only asked when `closure` holds dashboards nobody selected.
    fn choose_dashboard_set(&mut self, requested: &[String], closure: &[String])
    -> Result<DashboardSet>;

    /// 🎬 `(dataset, dimension)` for one more Action Framework field, or `None` when done.
    fn next_action_field(&mut self, datasets: &[DatasetDimensions])
    -> Result<Option<(String, String)>>;

    /// 🔑 A value for an install-time variable nobody configured.
    fn variable_value(&mut self, name: &str, label: &str) -> Result<String>;

    /// 🚀 Last call before the browser opens on the destination org.
    fn confirm_install(&mut self, template: &str) -> Result<bool>;
}

/// 🎭 Canned answers. Unanswered questions fail with [`SamxError::Cancelled`].
#[derive(Debug, Clone)]
pub struct ScriptedDecisions {
    pub label: Option<String>,
    pub auto_install: bool,
    pub scope: MigrationScope,
    /// 🎯 picked by name, so fixtures don't have to care about list order
    pub apps: Vec<String>,
    pub dashboards: Vec<String>,
    pub dashboard_set: DashboardSet,
    pub action_fields: VecDeque<(String, String)>,
    pub variables: BTreeMap<String, String>,
    pub install: bool,
    /// 📝 every closure question asked, as (requested, closure)
    pub closure_questions: Vec<(Vec<String>, Vec<String>)>,
}

impl Default for ScriptedDecisions {
    fn default() -> Self {
        Self {
            label: None,
            auto_install: false,
            scope: MigrationScope::Dashboards,
            apps: Vec::new(),
            dashboards: Vec::new(),
            dashboard_set: DashboardSet::Closure,
            action_fields: VecDeque::new(),
            variables: BTreeMap::new(),
            install: true,
            closure_questions: Vec::new(),
        }
    }
}

impl UserDecisionPort for ScriptedDecisions {
    fn template_label(&mut self) -> Result<String> {
        self.label
            .clone()
            .ok_or_else(|| SamxError::Cancelled("no scripted template label".into()).into())
    }

    fn auto_install(&mut self) -> Result<bool> {
        Ok(self.auto_install)
    }

    fn migration_scope(&mut self) -> Result<MigrationScope> {
        Ok(self.scope)
    }

    fn select_apps(&mut self, apps: &[AppSummary]) -> Result<Vec<usize>> {
        Ok(apps
            .iter()
            .enumerate()
            .filter(|(_, app)| self.apps.iter().any(|wanted| *wanted == app.name))
            .map(|(i, _)| i)
            .collect())
    }

    fn select_dashboards(&mut self, dashboards: &[DashboardSummary]) -> Result<Vec<usize>> {
        Ok(dashboards
            .iter()
            .enumerate()
            .filter(|(_, d)| self.dashboards.iter().any(|wanted| *wanted == d.name))
            .map(|(i, _)| i)
            .collect())
    }

    fn choose_dashboard_set(
        &mut self,
        requested: &[String],
        closure: &[String],
    ) -> Result<DashboardSet> {
        self.closure_questions
            .push((requested.to_vec(), closure.to_vec()));
        Ok(self.dashboard_set)
    }

    fn next_action_field(
        &mut self,
        _datasets: &[DatasetDimensions],
    ) -> Result<Option<(String, String)>> {
        Ok(self.action_fields.pop_front())
    }

    fn variable_value(&mut self, name: &str, _label: &str) -> Result<String> {
        self.variables
            .get(name)
            .cloned()
            .ok_or_else(|| SamxError::Cancelled(format!("no scripted value for {name}")).into())
    }

    fn confirm_install(&mut self, _template: &str) -> Result<bool> {
        Ok(self.install)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_script_picks_by_name_not_by_position() -> Result<()> {
        let mut decisions = ScriptedDecisions {
            dashboards: vec!["Forecast".into()],
            ..Default::default()
        };
        let listed = [
            DashboardSummary {
                id: "0FK1".into(),
                name: "Pipeline".into(),
                label: "Pipeline".into(),
                folder_id: None,
                folder_name: None,
            },
            DashboardSummary {
                id: "0FK2".into(),
                name: "Forecast".into(),
                label: "Forecast".into(),
                folder_id: None,
                folder_name: None,
            },
        ];
        assert_eq!(decisions.select_dashboards(&listed)?, vec![1]);
        Ok(())
    }

    #[test]
    fn the_one_where_an_unscripted_question_is_a_cancellation() {
        let mut decisions = ScriptedDecisions::default();
        let err = decisions
            .variable_value("zAction_Framework_ID_1", "Record Id")
            .expect_err("nobody scripted this");
        assert!(matches!(
            err.downcast_ref::<SamxError>(),
            Some(SamxError::Cancelled(_))
        ));
    }
}
