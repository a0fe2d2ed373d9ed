//! 🔄 Transforms: where field names go to get their underscores removed.
//!
//! The destination will not load a CSV column called `Account.Owner_Name`, and
//! every dashboard that says `'Account.Owner_Name'` has to be told about its
//! new name. That sounds like `str::replace`. It is not. `Amount` lives inside
//! `AmountTotal`, `.` lives inside `0.25`, and `step_1.selection` is a binding,
//! not a field. So:
//!
//! ```text
//!   main xmd ──▶ names::DatasetRenamePlan ──▶ substitution::FieldRewriter
//!                                                      │
//!   dashboard state ──▶ dashboard::AssetRewriter ◀─────┘
//!                         ├ StepNode   (saql, soql, aggregate, staticflex)
//!                         ├ WidgetNode (chart, link, component, filterpanel, ...)
//!                         └ FilterNode
//!   dataset userXmd ──▶ xmd::{strip, rename, backfill}
//! ```
//!
//! ## Knowledge Graph 🧠
//! - Depends on: `common` (field kinds, date rollups)
//! - Used by: `fetcher` (rename plans), `schema` (user xmd), `supervisor` (asset rewrites)
//! - [`tokens`] protects the periods that must never be mistaken for field separators

pub mod dashboard;
pub mod names;
pub mod substitution;
pub mod tokens;
pub mod xmd;

pub use dashboard::{AssetRewriter, PackageIndex};
pub use names::{
    DatasetRenamePlan, FieldRename, FieldRenameMap, PeriodPolicy, RenameConfig, clean_field_name,
};
pub use substitution::FieldRewriter;
