//! 🙋 The console side of every question the pipeline asks.
//!
//! Invalid answers get the question again. A closed stdin is a cancellation,
//! so piping `/dev/null` in never loops forever.

use std::io::{self, BufRead, BufReader, Write};

use anyhow::{Context, Result};
use samx::common::{AppSummary, DashboardSummary};
use samx::decisions::{DashboardSet, DatasetDimensions, MigrationScope, UserDecisionPort};
use samx::errors::SamxError;

pub struct ConsoleDecisions<R> {
    input: R,
}

/// 🔒 Not `StdinLock`: the port has to be `Send`, the lock guard is not.
impl ConsoleDecisions<BufReader<io::Stdin>> {
    pub fn stdin() -> Self {
        Self {
            input: BufReader::new(io::stdin()),
        }
    }
}

impl<R: BufRead + Send> ConsoleDecisions<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    fn ask(&mut self, question: &str) -> Result<String> {
        print!("{question} ");
        io::stdout().flush().context("💀 Could not flush stdout")?;
        let mut line = String::new();
        let read = self.input.read_line(&mut line).context("💀 Could not read the answer")?;
        if read == 0 {
            return Err(SamxError::Cancelled(format!("stdin closed at '{question}'")).into());
        }
        Ok(line.trim().to_string())
    }

    fn ask_until<T>(&mut self, question: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
        loop {
            let answer = self.ask(question)?;
            match parse(&answer) {
                Some(value) => return Ok(value),
                None => println!("🤔 '{answer}' is not an answer I understand, try again"),
            }
        }
    }

    fn yes_no(&mut self, question: &str) -> Result<bool> {
        self.ask_until(&format!("{question} [y/n]"), parse_yes_no)
    }

    fn pick_many(&mut self, what: &str, entries: &[String]) -> Result<Vec<usize>> {
        for (i, entry) in entries.iter().enumerate() {
            println!("  {:>3}) {entry}", i + 1);
        }
        let count = entries.len();
        self.ask_until(&format!("{what} (numbers separated by commas, or 'all'):"), |answer| {
            parse_picks(answer, count)
        })
    }
}

fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// 🎯 `1, 3` → `[0, 2]`. One-based in, zero-based out, duplicates dropped.
fn parse_picks(answer: &str, count: usize) -> Option<Vec<usize>> {
    if answer.eq_ignore_ascii_case("all") {
        return Some((0..count).collect());
    }
    let mut the_picks = Vec::new();
    for part in answer.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let n: usize = part.parse().ok()?;
        if n == 0 || n > count {
            return None;
        }
        if !the_picks.contains(&(n - 1)) {
            the_picks.push(n - 1);
        }
    }
    (!the_picks.is_empty()).then_some(the_picks)
}

impl<R: BufRead + Send> UserDecisionPort for ConsoleDecisions<R> {
    fn template_label(&mut self) -> Result<String> {
        self.ask_until("🏷️  Template name:", |answer| {
            (!answer.is_empty()).then(|| answer.to_string())
        })
    }

    fn auto_install(&mut self) -> Result<bool> {
        self.yes_no("🤖 Install the app automatically after deploy?")
    }

    fn migration_scope(&mut self) -> Result<MigrationScope> {
        self.ask_until("📋 Migrate (d)ashboards or whole (a)pps?", |answer| {
            match answer.to_ascii_lowercase().as_str() {
                "d" | "dashboards" => Some(MigrationScope::Dashboards),
                "a" | "apps" => Some(MigrationScope::Apps),
                _ => None,
            }
        })
    }

    fn select_apps(&mut self, apps: &[AppSummary]) -> Result<Vec<usize>> {
        if apps.is_empty() {
            println!("📭 the source org has no apps");
            return Ok(Vec::new());
        }
        let entries: Vec<String> = apps.iter().map(|app| format!("{} ({})", app.label, app.name)).collect();
        self.pick_many("📁 Apps to migrate", &entries)
    }

    fn select_dashboards(&mut self, dashboards: &[DashboardSummary]) -> Result<Vec<usize>> {
        if dashboards.is_empty() {
            println!("📭 the source org has no dashboards");
            return Ok(Vec::new());
        }
        let entries: Vec<String> = dashboards
            .iter()
            .map(|d| match &d.folder_name {
                Some(folder) => format!("{} ({}) in {folder}", d.label, d.name),
                None => format!("{} ({})", d.label, d.name),
            })
            .collect();
        self.pick_many("📋 Dashboards to migrate", &entries)
    }

    fn choose_dashboard_set(&mut self, requested: &[String], closure: &[String]) -> Result<DashboardSet> {
        let extras: Vec<&str> = closure
            .iter()
            .filter(|name| !requested.contains(name))
            .map(String::as_str)
            .collect();
        println!("🔗 the selection links to dashboards nobody picked: {}", extras.join(", "));
        let follow = self.yes_no("   Bring them along? Saying no breaks those links on install.")?;
        Ok(if follow {
            DashboardSet::Closure
        } else {
            DashboardSet::Requested
        })
    }

    fn next_action_field(&mut self, datasets: &[DatasetDimensions]) -> Result<Option<(String, String)>> {
        if !self.yes_no("🎬 Add a record action (Action Framework) field?")? {
            return Ok(None);
        }
        for (i, dataset) in datasets.iter().enumerate() {
            println!("  {:>3}) {}", i + 1, dataset.dataset);
        }
        let count = datasets.len();
        let dataset = self.ask_until("   Dataset number:", |answer| {
            parse_picks(answer, count).and_then(|picks| (picks.len() == 1).then(|| picks[0]))
        })?;
        let dimensions = &datasets[dataset].dimensions;
        for (i, dimension) in dimensions.iter().enumerate() {
            println!("  {:>3}) {dimension}", i + 1);
        }
        let count = dimensions.len();
        let dimension = self.ask_until("   Record id field number:", |answer| {
            parse_picks(answer, count).and_then(|picks| (picks.len() == 1).then(|| picks[0]))
        })?;
        Ok(Some((datasets[dataset].dataset.clone(), dimensions[dimension].clone())))
    }

    fn variable_value(&mut self, name: &str, label: &str) -> Result<String> {
        self.ask_until(&format!("🔑 {label} ({name}):"), |answer| {
            (!answer.is_empty()).then(|| answer.to_string())
        })
    }

    fn confirm_install(&mut self, template: &str) -> Result<bool> {
        self.yes_no(&format!("🚀 {template} is deployed. Open Analytics Studio to install it?"))
    }
}
