//! 🔁 Field reference substitution.
//!
//! A [`FieldRewriter`] knows every reference spelling of a set of fields:
//! the bare name, the aggregate-prefixed names (`sum_Amount`), and for dates
//! all generated rollups (`CloseDate_Month`, `CloseDate_Year_Fiscal`, ...).
//!
//! It rewrites two shapes of input:
//! - a whole JSON string that *is* a reference (`"Amount"` inside a columnMap)
//! - free text that *contains* references (`'Amount'`, `"Amount"`, `[Amount]`,
//!   `(Amount)`, `~~~Amount`), after protecting punctuation with
//!   [`tokens::protect`](super::tokens::protect)
//!
//! Quoted and bracketed references are matched as whole tokens, so `Amount`
//! never bites into `AmountTotal`. The open-ended `~~~name` form takes the
//! longest known name that ends on a word boundary.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use super::names::FieldRename;
use super::tokens::{protect, restore};
use crate::common::{DATE_PARTS, FieldKind};

/// ➕ Prefixes the dashboard designer glues onto measure names.
pub const AGGREGATE_PREFIXES: &[&str] = &["unique_", "avg_", "sum_", "SA_"];

/// 🎯 One regex, five reference shapes. Leftmost match wins; nested parens recurse.
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'([^']*)'|"([^"]*)"|\[([^\[\]]*)\]|\(([^()]*)\)|~~~([\w.<>#]+)"#)
        .expect("valid regex")
});

/// ✍️ Rewrites field references for one set of renames.
#[derive(Debug, Clone, Default)]
pub struct FieldRewriter {
    /// 🎯 unprotected spelling → replacement
    exact: HashMap<String, String>,
    /// 🛡️ protected spelling → replacement, for lookups inside protected text
    parked: HashMap<String, String>,
    /// 📏 protected spellings, longest first
    longest_first: Vec<String>,
}

impl FieldRewriter {
    pub fn new<'a>(renames: impl IntoIterator<Item = &'a FieldRename>) -> Self {
        let mut rewriter = Self::default();
        for rename in renames {
            // -- identity renames stay in: they shield longer names from shorter ones
            rewriter.learn(&rename.original, &rename.cleaned);
            for prefix in AGGREGATE_PREFIXES {
                rewriter.learn(
                    &format!("{prefix}{}", rename.original),
                    &format!("{prefix}{}", rename.cleaned),
                );
            }
            if rename.kind == FieldKind::Date {
                for part in DATE_PARTS {
                    rewriter.learn(
                        &format!("{}{part}", rename.original),
                        &format!("{}{part}", rename.cleaned),
                    );
                }
            }
        }
        rewriter.longest_first = rewriter.parked.keys().cloned().collect();
        rewriter
            .longest_first
            .sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        rewriter
    }

    fn learn(&mut self, from: &str, to: &str) {
        // -- first dataset to claim a spelling keeps it
        self.exact
            .entry(from.to_string())
            .or_insert_with(|| to.to_string());
        self.parked
            .entry(protect(from))
            .or_insert_with(|| to.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// 🎯 The replacement if `candidate` is, in its entirety, a known reference.
    pub fn token(&self, candidate: &str) -> Option<&str> {
        self.exact.get(candidate).map(String::as_str)
    }

    /// 🎯 Like [`token`](Self::token), also accepting `<step>.<field>` spellings.
    pub fn qualified_token(&self, candidate: &str) -> Option<String> {
        if let Some(direct) = self.token(candidate) {
            return Some(direct.to_string());
        }
        let (step, field) = candidate.split_once('.')?;
        self.token(field).map(|renamed| format!("{step}.{renamed}"))
    }

    /// 🔑 Renames the keys of `map` that are, in their entirety, known references. Order is kept.
    pub fn keys(&self, map: &mut Map<String, Value>) {
        if self.is_empty() || !map.keys().any(|key| self.qualified_token(key).is_some()) {
            return;
        }
        *map = std::mem::take(map)
            .into_iter()
            .map(|(key, value)| match self.qualified_token(&key) {
                Some(renamed) => (renamed, value),
                None => (key, value),
            })
            .collect();
    }

    /// 📝 Rewrites references embedded in free text.
    pub fn text(&self, text: &str) -> String {
        if self.is_empty() {
            return text.to_string();
        }
        restore(&self.protected_text(&protect(text)))
    }

    /// 📝 Same as [`text`](Self::text) for input that is already protected.
    pub fn protected_text(&self, parked: &str) -> String {
        REFERENCE
            .replace_all(parked, |caps: &Captures<'_>| self.replace_reference(caps))
            .into_owned()
    }

    fn replace_reference(&self, caps: &Captures<'_>) -> String {
        let whole = &caps[0];
        if let Some(inner) = caps.get(1) {
            return self.quoted(whole, inner.as_str(), '\'', '\'');
        }
        if let Some(inner) = caps.get(2) {
            return self.quoted(whole, inner.as_str(), '"', '"');
        }
        if let Some(inner) = caps.get(3) {
            return self.nested(inner.as_str(), '[', ']');
        }
        if let Some(inner) = caps.get(4) {
            return self.nested(inner.as_str(), '(', ')');
        }
        if let Some(tail) = caps.get(5) {
            return format!("~~~{}", self.longest_prefix(tail.as_str()));
        }
        whole.to_string()
    }

    fn quoted(&self, whole: &str, inner: &str, open: char, close: char) -> String {
        match self.parked.get(inner) {
            Some(renamed) => format!("{open}{renamed}{close}"),
            None => whole.to_string(),
        }
    }

    fn nested(&self, inner: &str, open: char, close: char) -> String {
        match self.parked.get(inner) {
            Some(renamed) => format!("{open}{renamed}{close}"),
            // -- `sum('Amount')`: the parens are not the reference, what's inside might be
            None => format!("{open}{}{close}", self.protected_text(inner)),
        }
    }

    fn longest_prefix(&self, tail: &str) -> String {
        for known in &self.longest_first {
            let Some(rest) = tail.strip_prefix(known.as_str()) else {
                continue;
            };
            let on_a_boundary = rest
                .chars()
                .next()
                .is_none_or(|c| !(c.is_alphanumeric() || c == '_'));
            if on_a_boundary {
                return format!("{}{rest}", self.parked[known]);
            }
        }
        tail.to_string()
    }

    /// 🌳 Rewrites every string leaf of `value`: whole references first, embedded ones second.
    pub fn value(&self, value: &mut Value) {
        if self.is_empty() {
            return;
        }
        match value {
            Value::String(s) => {
                if let Some(renamed) = self.token(s) {
                    *s = renamed.to_string();
                } else if s.contains(['\'', '"', '[', '(', '~']) {
                    *s = self.text(s);
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|item| self.value(item)),
            Value::Object(map) => map.values_mut().for_each(|item| self.value(item)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rename(original: &str, cleaned: &str, kind: FieldKind) -> FieldRename {
        FieldRename {
            original: original.into(),
            cleaned: cleaned.into(),
            kind,
        }
    }

    #[test]
    fn the_one_where_a_date_rename_drags_its_rollups_along() {
        let the_renames = [rename("CreatedDate", "CreatedDate_csv", FieldKind::Date)];
        let rewriter = FieldRewriter::new(&the_renames);
        let mut dashboard = json!({
            "query": "q = group q by ('CreatedDate_Year', 'CreatedDate_Month'); q = foreach q generate 'CreatedDate_Year_Fiscal' as 'fy';",
            "columnMap": {"dimensionAxis": ["CreatedDate_Month"], "plots": ["CreatedDate_day_epoch"]},
            "title": "By [CreatedDate_Quarter_Fiscal]"
        });
        rewriter.value(&mut dashboard);
        assert_eq!(
            dashboard["query"],
            "q = group q by ('CreatedDate_csv_Year', 'CreatedDate_csv_Month'); q = foreach q generate 'CreatedDate_csv_Year_Fiscal' as 'fy';"
        );
        assert_eq!(dashboard["columnMap"]["dimensionAxis"][0], "CreatedDate_csv_Month");
        assert_eq!(dashboard["columnMap"]["plots"][0], "CreatedDate_csv_day_epoch");
        assert_eq!(dashboard["title"], "By [CreatedDate_csv_Quarter_Fiscal]");
    }

    #[test]
    fn the_one_where_amount_keeps_its_hands_off_amount_total() {
        let the_renames = [
            rename("Amount", "Amt", FieldKind::Measure),
            rename("AmountTotal", "AmountTotal", FieldKind::Measure),
        ];
        let rewriter = FieldRewriter::new(&the_renames);
        assert_eq!(
            rewriter.text("q = foreach q generate sum('Amount') as 'sum_Amount', 'AmountTotal';"),
            "q = foreach q generate sum('Amt') as 'sum_Amt', 'AmountTotal';"
        );
        assert_eq!(rewriter.text("~~~AmountTotal and ~~~Amount."), "~~~AmountTotal and ~~~Amt.");
        assert_eq!(rewriter.text("~~~Amounts"), "~~~Amounts");
    }

    #[test]
    fn the_one_where_dotted_names_survive_the_decimal_bodyguard() {
        let the_renames = [rename("Stage.1", "StageDOT1", FieldKind::Dimension)];
        let rewriter = FieldRewriter::new(&the_renames);
        assert_eq!(
            rewriter.text("q = filter q by 'Stage.1' > 2.5 && x in [1..3];"),
            "q = filter q by 'StageDOT1' > 2.5 && x in [1..3];"
        );
    }

    #[test]
    fn the_one_where_step_qualified_xmd_fields_get_renamed_after_the_dot() {
        let the_renames = [rename("Account.Name", "AccountDOTName", FieldKind::Dimension)];
        let rewriter = FieldRewriter::new(&the_renames);
        assert_eq!(
            rewriter.qualified_token("Account.Name").as_deref(),
            Some("AccountDOTName")
        );
        assert_eq!(
            rewriter.qualified_token("step_1.Account.Name").as_deref(),
            Some("step_1.AccountDOTName")
        );
        assert_eq!(rewriter.qualified_token("step_1.Unknown"), None);
    }

    #[test]
    fn the_one_where_keys_are_renamed_in_place() {
        let the_renames = [rename("Account.Name", "AccountDOTName", FieldKind::Dimension)];
        let rewriter = FieldRewriter::new(&the_renames);
        let mut the_map = json!({"first": 1, "Account.Name": 2, "lens_1.Account.Name": 3});
        if let Value::Object(map) = &mut the_map {
            rewriter.keys(map);
        }
        let keys: Vec<&String> = the_map.as_object().map(|map| map.keys().collect()).unwrap_or_default();
        assert_eq!(keys, ["first", "AccountDOTName", "lens_1.AccountDOTName"]);
        assert_eq!(the_map["AccountDOTName"], 2);
    }
}
