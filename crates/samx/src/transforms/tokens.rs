//! 🛡️ Protected punctuation.
//!
//! SAQL and binding strings are full of periods that are not field-name
//! periods: ranges (`1..5`), bindings (`step_1.selection`), method calls
//! (`.asDate()`), decimals (`0.25`). Before a text-level rename we park them
//! behind placeholder tokens, and put them back afterwards.
//!
//! [`restore`] undoes [`protect`] exactly for any input. A literal `<##` in
//! the input is parked as its own token, so input that already looks like a
//! placeholder survives the round trip too.

use std::sync::LazyLock;

use regex::Regex;

pub const PERIOD_TOKEN: &str = "<##PERIOD##>";
const OPEN_TOKEN: &str = "<##OPEN##>";
const OPEN: &str = "<##";

static RANGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.\.").expect("valid regex"));
static BINDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\.(result|selection)").expect("valid regex"));
static METHOD_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(as\w+\()").expect("valid regex"));
static DECIMAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.([0-9])").expect("valid regex"));
static ANY_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<##(PERIOD|OPEN)##>").expect("valid regex"));

pub fn protect(text: &str) -> String {
    let parked = text.replace(OPEN, OPEN_TOKEN);
    let parked = RANGE.replace_all(&parked, "<##PERIOD##><##PERIOD##>");
    let parked = BINDING.replace_all(&parked, "${1}<##PERIOD##>${2}");
    let parked = METHOD_CALL.replace_all(&parked, "<##PERIOD##>${1}");
    DECIMAL
        .replace_all(&parked, "<##PERIOD##>${1}")
        .into_owned()
}

pub fn restore(text: &str) -> String {
    ANY_TOKEN
        .replace_all(text, |caps: &regex::Captures<'_>| match &caps[1] {
            "PERIOD" => ".",
            _ => OPEN,
        })
        .into_owned()
}

/// 🏗️ `a.b.c` spelled with protected periods, for expressions built inside protected text.
pub fn dotted(parts: &[&str]) -> String {
    parts.join(PERIOD_TOKEN)
}
