//! Component C: the pure CSV↔JSON transforms — escaping, materialization,
//! projection, and coercion.

use serde_json::{Map, Value as Json};

use crate::error::{Error, LimitKind, Result};
use crate::fast_path::{FastPathEngine, Row};
use crate::options::{ConversionOptions, FastPathMode};
use crate::value::{self, Record, Value};

/// Result of a CSV→JSON conversion: either materialized records, or raw
/// rows when `fastPathMode == compact`.
pub enum Decoded {
    Records(Vec<Record>),
    Rows(Vec<Row>),
}

/// Renders one field to CSV text per §4.C.1's three-step escaping rule.
fn escape_field(text: &str, delimiter: char, prevent_csv_injection: bool) -> String {
    let mut text = text.to_string();
    if prevent_csv_injection {
        if let Some(first) = text.chars().next() {
            if matches!(first, '=' | '+' | '-' | '@') {
                text.insert(0, '\'');
            }
        }
    }
    let needs_quoting = text.contains(delimiter)
        || text.contains('"')
        || text.contains('\n')
        || text.contains('\r');
    if needs_quoting {
        let escaped = text.replace('"', "\"\"");
        format!("\"{escaped}\"")
    } else {
        text
    }
}

fn json_to_field_text(value: &Json) -> String {
    Value::from(value).to_field_text()
}

/// JSON → CSV. Derives headers from `template` or the first record, applies
/// `renameMap`, and emits rows joined by `\n` with no trailing newline.
pub fn json_to_csv(records: &[Record], options: &ConversionOptions) -> Result<String> {
    let delimiter = options.delimiter.unwrap_or(crate::options::DEFAULT_DELIMITER);

    let headers: Vec<String> = if let Some(template) = &options.template {
        template.keys.clone()
    } else if let Some(first) = records.first() {
        first.keys().cloned().collect()
    } else {
        Vec::new()
    };

    let mut lines = Vec::with_capacity(records.len() + 1);
    if options.include_headers {
        let header_line = headers
            .iter()
            .map(|h| escape_field(&options.rename(h), delimiter, options.prevent_csv_injection))
            .collect::<Vec<_>>()
            .join(&delimiter.to_string());
        lines.push(header_line);
    }

    for record in records {
        let fields: Vec<String> = headers
            .iter()
            .map(|key| {
                let text = match record.get(key) {
                    Some(Json::Null) | None => String::new(),
                    Some(v) => json_to_field_text(v),
                };
                escape_field(&text, delimiter, options.prevent_csv_injection)
            })
            .collect();
        lines.push(fields.join(&delimiter.to_string()));
    }

    Ok(lines.join("\n"))
}

/// Materializes a [`Row`] into a [`Record`] given a header set, applying
/// coercion, `renameMap`, and `template` defaults per §4.C.2.
fn materialize_record(headers: &[String], row: &Row, options: &ConversionOptions) -> Record {
    let mut record = Map::new();
    for (idx, header) in headers.iter().enumerate() {
        let raw = row.get(idx).map(String::as_str).unwrap_or("");
        let trimmed = if options.trim { raw.trim() } else { raw };
        let coerced = coerce(trimmed, options);
        let key = options.rename(header);
        record.insert(key, coerced.into());
    }
    if let Some(template) = &options.template {
        for key in &template.keys {
            let renamed = options.rename(key);
            if !record.contains_key(&renamed) {
                record.insert(renamed, template.default_for(key).into());
            }
        }
    }
    record
}

pub(crate) fn coerce(trimmed: &str, options: &ConversionOptions) -> Value {
    if options.parse_numbers {
        if let Some(value) = value::parse_number(trimmed) {
            return value;
        }
    }
    if options.parse_booleans {
        if let Some(value) = value::parse_boolean(trimmed) {
            return value;
        }
    }
    Value::Text(trimmed.to_string())
}

/// CSV → JSON. Splits rows via the fast-path engine, derives the header
/// set, and materializes records (or leaves rows untouched in `compact`
/// mode).
pub fn csv_to_json(
    input: &str,
    options: &ConversionOptions,
    engine: &mut FastPathEngine,
) -> Result<Decoded> {
    let rows = engine.parse(input, options)?;

    if let Some(max_rows) = options.max_rows {
        if rows.len() > max_rows {
            return Err(Error::limit(LimitKind::MaxRows, max_rows));
        }
    }

    let (headers, data_rows): (Vec<String>, &[Row]) = if options.has_headers {
        let header_row = rows.first().cloned().unwrap_or_default();
        let headers = header_row
            .into_iter()
            .map(|h| if options.trim { h.trim().to_string() } else { h })
            .collect();
        (headers, rows.get(1..).unwrap_or(&[]))
    } else {
        let width = rows.first().map(Row::len).unwrap_or(0);
        let headers = (1..=width).map(|n| format!("column_{n}")).collect();
        (headers, &rows[..])
    };

    if options.fast_path_mode == FastPathMode::Compact {
        return Ok(Decoded::Rows(data_rows.to_vec()));
    }

    if let Some(max_records) = options.max_records {
        if data_rows.len() > max_records {
            return Err(Error::limit(LimitKind::MaxRecords, max_records));
        }
    }

    let records = data_rows
        .iter()
        .map(|row| materialize_record(&headers, row, options))
        .collect();
    Ok(Decoded::Records(records))
}

/// Derives the canonical header set the way [`json_to_csv`] does, exposed
/// separately for the streaming runtime, which needs headers before the
/// rest of the records have arrived.
pub fn derive_headers(first_record: Option<&Record>, options: &ConversionOptions) -> Vec<String> {
    if let Some(template) = &options.template {
        return template.keys.clone();
    }
    let mut seen = Vec::new();
    if let Some(record) = first_record {
        for key in record.keys() {
            if !seen.contains(key) {
                seen.push(key.clone());
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, Json)]) -> Record {
        let mut map = Map::new();
        for (k, v) in pairs {
            map.insert((*k).to_string(), v.clone());
        }
        map
    }

    #[test]
    fn scenario_one_plain_records_round_trip_without_coercion() {
        let mut engine = FastPathEngine::default();
        let csv = "a,b,c\n1,2,3\n4,5,6";
        let options = ConversionOptions::new().with_parse_numbers(false);
        let Decoded::Records(records) = csv_to_json(csv, &options, &mut engine).unwrap() else {
            panic!("expected records");
        };
        assert_eq!(
            records,
            vec![
                record(&[("a", json!("1")), ("b", json!("2")), ("c", json!("3"))]),
                record(&[("a", json!("4")), ("b", json!("5")), ("c", json!("6"))]),
            ]
        );
    }

    #[test]
    fn scenario_one_with_parse_numbers_coerces_to_numbers() {
        let mut engine = FastPathEngine::default();
        let csv = "a,b,c\n1,2,3";
        let Decoded::Records(records) =
            csv_to_json(csv, &ConversionOptions::new(), &mut engine).unwrap()
        else {
            panic!("expected records");
        };
        assert_eq!(records[0]["a"], json!(1));
    }

    #[test]
    fn scenario_two_quoted_commas_and_escaped_quotes() {
        let mut engine = FastPathEngine::default();
        let csv = "name,note\nAlice,\"Hello, world\"\nBob,\"She said \"\"hi\"\"\"";
        let Decoded::Records(records) =
            csv_to_json(csv, &ConversionOptions::new(), &mut engine).unwrap()
        else {
            panic!("expected records");
        };
        assert_eq!(records[0]["note"], json!("Hello, world"));
        assert_eq!(records[1]["note"], json!("She said \"hi\""));
    }

    #[test]
    fn scenario_four_csv_injection_guard_prepends_apostrophe() {
        let records = vec![record(&[("a", json!("=HYPERLINK(...)"))])];
        let out = json_to_csv(&records, &ConversionOptions::new()).unwrap();
        assert_eq!(out, "a\n'=HYPERLINK(...)");
    }

    #[test]
    fn rename_map_applies_to_emitted_headers() {
        let mut map = std::collections::HashMap::new();
        map.insert("a".to_string(), "alpha".to_string());
        let options = ConversionOptions::new().with_rename_map(map);
        let records = vec![record(&[("a", json!("1"))])];
        let out = json_to_csv(&records, &options).unwrap();
        assert_eq!(out, "alpha\n1");
    }

    #[test]
    fn max_records_limit_is_enforced() {
        let mut engine = FastPathEngine::default();
        let csv = "a\n1\n2\n3";
        let options = ConversionOptions::new().with_max_records(1);
        let err = csv_to_json(csv, &options, &mut engine).unwrap_err();
        assert_eq!(err.code(), "LIMIT_EXCEEDED");
    }

    #[test]
    fn compact_mode_emits_raw_rows_without_materialization() {
        let mut engine = FastPathEngine::default();
        let csv = "a,b\n1,2";
        let options = ConversionOptions::new().with_fast_path_mode(FastPathMode::Compact);
        let Decoded::Rows(rows) = csv_to_json(csv, &options, &mut engine).unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(rows, vec![vec!["1".to_string(), "2".to_string()]]);
    }
}
