//! 📐 Schema: the two JSON files that ride along with every exported CSV.
//!
//! - `<target>.json`, the CSV schema the external file loader reads: column
//!   types, numeric precision, date formats
//! - `<target>_XMD.json`, the user xmd: labels, colours, link templates,
//!   renamed through the plan and scrubbed of anything the loader rejects
//!
//! Date formats are sniffed from the exported sample first, because the xmd's
//! idea of a format and the CSV's actual contents are not always on speaking
//! terms.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::common::{DatasetFields, DatasetRef, FieldKind};
use crate::export::{ExportedDataset, MULTI_VALUE_SEPARATOR};
use crate::transforms::xmd;
use crate::transforms::{DatasetRenamePlan, FieldRewriter};

/// 📅 Used when neither the data nor the xmd says anything useful.
pub const DEFAULT_DATE_FORMAT: &str = "yyyy-MM-dd HH:mm:ss";

/// 📅 Approved loader formats and their chrono spelling, most specific first.
const DATE_FORMATS: &[(&str, &str)] = &[
    ("yyyy-MM-dd'T'HH:mm:ss.SSS'Z'", "%Y-%m-%dT%H:%M:%S%.3fZ"),
    ("yy-MM-dd'T'HH:mm:ss.SSS'Z'", "%y-%m-%dT%H:%M:%S%.3fZ"),
    ("yyyy-MM-dd'T'HH:mm:ss'Z'", "%Y-%m-%dT%H:%M:%SZ"),
    ("yy-MM-dd'T'HH:mm:ss'Z'", "%y-%m-%dT%H:%M:%SZ"),
    ("yyyy-MM-dd HH:mm:ss", "%Y-%m-%d %H:%M:%S"),
    ("yy-MM-dd HH:mm:ss", "%y-%m-%d %H:%M:%S"),
    ("dd.MM.yyyy HH:mm:ss", "%d.%m.%Y %H:%M:%S"),
    ("dd.MM.yy HH:mm:ss", "%d.%m.%y %H:%M:%S"),
    ("dd/MM/yyyy HH:mm:ss", "%d/%m/%Y %H:%M:%S"),
    ("dd/MM/yy HH:mm:ss", "%d/%m/%y %H:%M:%S"),
    ("dd/MM/yyyy hh:mm:ss a", "%d/%m/%Y %I:%M:%S %p"),
    ("dd/MM/yy hh:mm:ss a", "%d/%m/%y %I:%M:%S %p"),
    ("dd-MM-yyyy HH:mm:ss", "%d-%m-%Y %H:%M:%S"),
    ("dd-MM-yy HH:mm:ss", "%d-%m-%y %H:%M:%S"),
    ("dd-MM-yyyy hh:mm:ss a", "%d-%m-%Y %I:%M:%S %p"),
    ("dd-MM-yy hh:mm:ss a", "%d-%m-%y %I:%M:%S %p"),
    ("MM/dd/yyyy hh:mm:ss a", "%m/%d/%Y %I:%M:%S %p"),
    ("MM/dd/yy hh:mm:ss a", "%m/%d/%y %I:%M:%S %p"),
    ("MM-dd-yyyy hh:mm:ss a", "%m-%d-%Y %I:%M:%S %p"),
    ("MM-dd-yy hh:mm:ss a", "%m-%d-%y %I:%M:%S %p"),
    ("HH:mm:ss dd/MM/yyyy", "%H:%M:%S %d/%m/%Y"),
    ("HH:mm:ss dd/MM/yy", "%H:%M:%S %d/%m/%y"),
    ("yyyy-MM-dd", "%Y-%m-%d"),
    ("yyyy-M-d", "%Y-%-m-%-d"),
    ("yy-MM-dd", "%y-%m-%d"),
    ("yy-M-d", "%y-%-m-%-d"),
    ("dd.MM.yyyy", "%d.%m.%Y"),
    ("dd.MM.yy", "%d.%m.%y"),
    ("dd/MM/yyyy", "%d/%m/%Y"),
    ("dd/MM/yy", "%d/%m/%y"),
    ("dd-MM-yyyy", "%d-%m-%Y"),
    ("dd-MM-yy", "%d-%m-%y"),
    ("MM/dd/yyyy", "%m/%d/%Y"),
    ("MM/dd/yy", "%m/%d/%y"),
    ("MM-dd-yyyy", "%m-%d-%Y"),
    ("MM-dd-yy", "%m-%d-%y"),
    ("M-d-yy", "%-m-%-d-%y"),
    ("M-d-yyyy", "%-m-%-d-%Y"),
    ("M/d/yyyy", "%-m/%-d/%Y"),
    ("d-M-yy", "%-d-%-m-%y"),
    ("d-M-yyyy", "%-d-%-m-%Y"),
    ("d/M/yy", "%-d/%-m/%y"),
    ("d/M/yyyy", "%-d/%-m/%Y"),
    ("d.M.yy", "%-d.%-m.%y"),
    ("d.M.yyyy", "%-d.%-m.%Y"),
];

/// 🔁 chrono parses leniently, so a match only counts if formatting it back gives the input.
fn matches_format(value: &str, pattern: &str) -> bool {
    let has_time = pattern.contains("%H") || pattern.contains("%I");
    let round_trip = if has_time {
        NaiveDateTime::parse_from_str(value, pattern)
            .ok()
            .map(|parsed| parsed.format(pattern).to_string())
    } else {
        NaiveDate::parse_from_str(value, pattern)
            .ok()
            .map(|parsed| parsed.format(pattern).to_string())
    };
    round_trip.is_some_and(|formatted| formatted.eq_ignore_ascii_case(value))
}

/// 🔬 The loader format of the first sampled value that matches one.
pub fn sniff_date_format<'a>(mut values: impl Iterator<Item = &'a str>) -> Option<&'static str> {
    let value = values.next()?.trim();
    DATE_FORMATS
        .iter()
        .find(|(_, pattern)| matches_format(value, pattern))
        .map(|(loader, _)| *loader)
}

/// 🧼 `&#39;` back to `'`, and a bare `T` or `Z` quoted the way the loader wants.
pub fn clean_date_format(format: &str) -> String {
    let mut format = format.replace("&#39;", "'");
    if !format.contains("'Z'") {
        format = format.replace('Z', "'Z'");
    }
    if !format.contains("'T'") {
        format = format.replace('T', "'T'");
    }
    format
}

/// 📐 The CSV schema for one exported dataset.
///
/// Columns come from the CSV header, types from the field inventory. Columns
/// that match nothing are text. A column name seen twice keeps its first entry.
pub fn dataset_schema(plan: &DatasetRenamePlan, fields: &DatasetFields, exported: &ExportedDataset) -> Value {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut the_fields: Vec<Value> = Vec::new();

    for column in &exported.header {
        if !seen.insert(column.as_str()) {
            continue;
        }
        let spec = plan
            .renames()
            .iter()
            .find(|rename| rename.cleaned == *column)
            .and_then(|rename| fields.get(&rename.original));

        let mut entry = Map::new();
        entry.insert("fullyQualifiedName".into(), json!(column));
        entry.insert("name".into(), json!(column));
        match spec.map(|spec| (spec, spec.kind)) {
            Some((spec, FieldKind::Measure)) => {
                entry.insert("type".into(), json!("Numeric"));
                entry.insert("precision".into(), json!(18));
                entry.insert("defaultValue".into(), json!("null"));
                entry.insert("scale".into(), json!(spec.decimal_digits));
                if spec.decimal_digits > 0 {
                    entry.insert("decimalSeparator".into(), json!("."));
                } else {
                    entry.insert("format".into(), json!("0"));
                }
            }
            Some((spec, FieldKind::Date)) => {
                let format = match sniff_date_format(exported.sample_values(column)) {
                    Some(sniffed) => sniffed.to_string(),
                    None => spec
                        .date_format
                        .as_deref()
                        .map(clean_date_format)
                        .unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string()),
                };
                debug!("📅 {}.{column} is {format}", plan.target_dataset);
                entry.insert("type".into(), json!("Date"));
                entry.insert("format".into(), json!(format));
                entry.insert("isUniqueId".into(), json!(false));
                if let Some(offset) = spec.fiscal_month_offset {
                    entry.insert("fiscalMonthOffset".into(), json!(offset));
                }
            }
            Some((_, FieldKind::Dimension)) | None => {
                entry.insert("type".into(), json!("Text"));
            }
        }
        if exported.multi_value.contains(column) {
            entry.insert("isMultiValue".into(), json!(true));
            entry.insert("multiValueSeparator".into(), json!(MULTI_VALUE_SEPARATOR));
        } else {
            entry.insert("isMultiValue".into(), json!(false));
        }
        entry.insert("isSystemField".into(), json!(false));
        entry.insert("label".into(), json!(column));
        the_fields.push(Value::Object(entry));
    }

    let target = &plan.target_dataset;
    json!({
        "fileFormat": {
            "charsetName": "UTF-8",
            "fieldsDelimitedBy": ",",
            "fieldsEnclosedBy": "\"",
            "linesTerminatedBy": "\r\n"
        },
        "objects": [{
            "connector": "CSV",
            "fullyQualifiedName": format!("{target}_csv"),
            "label": format!("{target}.csv"),
            "name": format!("{target}_csv"),
            "fields": the_fields
        }]
    })
}

/// 🧬 The user xmd shipped next to the CSV.
///
/// Starts from the dataset's `userXmd`, or the main xmd when there is none.
pub fn user_xmd(
    dataset: &DatasetRef,
    main_xmd: Option<&Value>,
    plan: &DatasetRenamePlan,
    columns: &[String],
) -> Value {
    let mut the_xmd = dataset
        .user_xmd
        .clone()
        .or_else(|| main_xmd.cloned())
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}));

    xmd::strip_volatile_keys(&mut the_xmd);
    xmd::strip_volatile_field_keys(&mut the_xmd);
    if let Some(map) = the_xmd.as_object_mut() {
        map.insert("dates".into(), json!([]));
    }
    xmd::backfill_members(&mut the_xmd);
    xmd::rename_fields(&mut the_xmd, &FieldRewriter::new(plan.renames()));
    let columns: HashSet<&str> = columns.iter().map(String::as_str).collect();
    xmd::drop_derived_collisions(&mut the_xmd, &columns);
    the_xmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FieldSpec;
    use crate::transforms::FieldRename;

    fn a_spec(name: &str, kind: FieldKind) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            label: name.into(),
            kind,
            decimal_digits: 0,
            date_format: None,
            fiscal_month_offset: None,
        }
    }

    fn a_rename(original: &str, cleaned: &str, kind: FieldKind) -> FieldRename {
        FieldRename {
            original: original.into(),
            cleaned: cleaned.into(),
            kind,
        }
    }

    #[test]
    fn the_one_where_the_sample_knows_better_than_the_xmd() {
        assert_eq!(
            sniff_date_format(["2024-01-31T10:15:00.000Z"].into_iter()),
            Some("yyyy-MM-dd'T'HH:mm:ss.SSS'Z'")
        );
        assert_eq!(sniff_date_format(["31/01/2024"].into_iter()), Some("dd/MM/yyyy"));
        assert_eq!(sniff_date_format(["1/2/2024"].into_iter()), Some("M/d/yyyy"));
        assert_eq!(sniff_date_format(["24-01-31"].into_iter()), Some("yy-MM-dd"));
        assert_eq!(sniff_date_format(["01/31/2024 09:05:00 PM"].into_iter()), Some("MM/dd/yyyy hh:mm:ss a"));
        assert_eq!(sniff_date_format(["not a date"].into_iter()), None);
        assert_eq!(sniff_date_format(std::iter::empty()), None);
    }

    #[test]
    fn the_one_where_bare_t_and_z_get_their_quotes() {
        assert_eq!(
            clean_date_format("yyyy-MM-ddTHH:mm:ss.SSSZ"),
            "yyyy-MM-dd'T'HH:mm:ss.SSS'Z'"
        );
        assert_eq!(
            clean_date_format("yyyy-MM-dd&#39;T&#39;HH:mm:ss"),
            "yyyy-MM-dd'T'HH:mm:ss"
        );
    }

    #[test]
    fn the_one_where_every_column_gets_a_type() {
        let mut amount = a_spec("Amount", FieldKind::Measure);
        amount.decimal_digits = 2;
        let mut close = a_spec("CloseDate", FieldKind::Date);
        close.date_format = Some("yyyy-MM-ddTHH:mm:ssZ".into());
        close.fiscal_month_offset = Some(1);
        let fields = DatasetFields {
            dataset: "Opportunity".into(),
            fields: vec![close, a_spec("Region.Name", FieldKind::Dimension), amount, a_spec("Count", FieldKind::Measure)],
        };
        let plan = DatasetRenamePlan::from_renames(
            "Opportunity",
            "Opportunity_ABC",
            [
                a_rename("CloseDate", "CloseDate", FieldKind::Date),
                a_rename("Region.Name", "RegionDOTName", FieldKind::Dimension),
                a_rename("Amount", "Amount", FieldKind::Measure),
                a_rename("Count", "Count", FieldKind::Measure),
            ],
        );
        let exported = ExportedDataset {
            header: ["CloseDate", "RegionDOTName", "Amount", "Count", "Mystery", "Amount"]
                .map(String::from)
                .to_vec(),
            sample: vec![vec!["".into(); 6]],
            ..Default::default()
        };

        let schema = dataset_schema(&plan, &fields, &exported);
        let object = &schema["objects"][0];
        assert_eq!(object["name"], "Opportunity_ABC_csv");
        assert_eq!(object["label"], "Opportunity_ABC.csv");
        let the_fields = object["fields"].as_array().map(Vec::as_slice).unwrap_or_default();
        assert_eq!(the_fields.len(), 5);
        assert_eq!(the_fields[0]["format"], "yyyy-MM-dd'T'HH:mm:ss'Z'");
        assert_eq!(the_fields[0]["fiscalMonthOffset"], 1);
        assert_eq!(the_fields[1]["type"], "Text");
        assert_eq!(the_fields[2]["scale"], 2);
        assert_eq!(the_fields[2]["decimalSeparator"], ".");
        assert_eq!(the_fields[3]["format"], "0");
        assert_eq!(the_fields[4]["type"], "Text");
        assert_eq!(schema["fileFormat"]["linesTerminatedBy"], "\r\n");
    }

    #[test]
    fn the_one_where_array_columns_are_declared_multi_value() {
        let fields = DatasetFields {
            dataset: "Opportunity".into(),
            fields: vec![a_spec("Tags", FieldKind::Dimension), a_spec("Region.Name", FieldKind::Dimension)],
        };
        let plan = DatasetRenamePlan::from_renames(
            "Opportunity",
            "Opportunity_ABC",
            [
                a_rename("Tags", "Tags", FieldKind::Dimension),
                a_rename("Region.Name", "RegionDOTName", FieldKind::Dimension),
            ],
        );
        let exported = ExportedDataset {
            header: vec!["Tags".into(), "RegionDOTName".into()],
            multi_value: ["Tags".to_string()].into(),
            ..Default::default()
        };

        let schema = dataset_schema(&plan, &fields, &exported);
        let the_fields = &schema["objects"][0]["fields"];
        assert_eq!(the_fields[0]["isMultiValue"], true);
        assert_eq!(the_fields[0]["multiValueSeparator"], ";");
        assert_eq!(the_fields[1]["isMultiValue"], false);
        assert!(the_fields[1].get("multiValueSeparator").is_none());
    }

    #[test]
    fn the_one_where_the_user_xmd_is_scrubbed_and_renamed() {
        let dataset = DatasetRef {
            name: "Opportunity".into(),
            user_xmd: Some(json!({
                "createdBy": {"id": "005"},
                "dates": [{"fullField": "CloseDate"}],
                "dimensions": [{
                    "field": "Region.Name",
                    "origin": "Region.Name",
                    "linkTemplate": "/{{row.Region.Name}}",
                    "members": [{"member": "EMEA"}]
                }],
                "derivedDimensions": [{"field": "RegionDOTName"}, {"field": "Extra"}]
            })),
            ..Default::default()
        };
        let plan = DatasetRenamePlan::from_renames(
            "Opportunity",
            "Opportunity_ABC",
            [a_rename("Region.Name", "RegionDOTName", FieldKind::Dimension)],
        );

        let the_xmd = user_xmd(&dataset, None, &plan, &["RegionDOTName".to_string()]);
        assert!(the_xmd.get("createdBy").is_none());
        assert_eq!(the_xmd["dates"], json!([]));
        let dimension = &the_xmd["dimensions"][0];
        assert_eq!(dimension["field"], "RegionDOTName");
        assert_eq!(dimension["linkTemplate"], "/{{row.RegionDOTName}}");
        assert!(dimension.get("origin").is_none());
        assert_eq!(dimension["members"][0]["label"], "EMEA");
        assert_eq!(the_xmd["derivedDimensions"], json!([{"field": "Extra"}]));
    }
}
