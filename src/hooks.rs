//! Component D: ordered transform pipelines layered on the codec stage.
//!
//! Hook lists are snapshotted at pipeline entry (cloned `Arc` lists) so late
//! registrations never affect an in-flight call, per §4.D's invariant.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value as Json;

use crate::error::Result;
use crate::value::Record;

/// Ambient key/value bag threaded through every hook and middleware call.
pub type Context = HashMap<String, Json>;

type BeforeConvertFn = Arc<dyn Fn(Vec<Record>, &Context) -> Result<Vec<Record>> + Send + Sync>;
type PerRowFn = Arc<dyn Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync>;
type AfterConvertFn = Arc<dyn Fn(Vec<Record>, &Context) -> Result<Vec<Record>> + Send + Sync>;

type AsyncBeforeConvertFn =
    Arc<dyn Fn(Vec<Record>, Context) -> BoxFuture<'static, Result<Vec<Record>>> + Send + Sync>;
type AsyncPerRowFn =
    Arc<dyn Fn(Record, usize, Context) -> BoxFuture<'static, Result<Option<Record>>> + Send + Sync>;
type AsyncAfterConvertFn =
    Arc<dyn Fn(Vec<Record>, Context) -> BoxFuture<'static, Result<Vec<Record>>> + Send + Sync>;

/// Ordered `beforeConvert` / `perRow` / `afterConvert` callables, run by
/// [`TransformPipeline::apply_all`] or awaited by `apply_all_async`.
///
/// `perRow` returning `Ok(None)` drops the row, which backs `filter` and
/// `validate`.
#[derive(Clone, Default)]
pub struct TransformPipeline {
    before_convert: Vec<BeforeConvertFn>,
    per_row: Vec<PerRowFn>,
    after_convert: Vec<AfterConvertFn>,
    async_before_convert: Vec<AsyncBeforeConvertFn>,
    async_per_row: Vec<AsyncPerRowFn>,
    async_after_convert: Vec<AsyncAfterConvertFn>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_convert(
        &mut self,
        f: impl Fn(Vec<Record>, &Context) -> Result<Vec<Record>> + Send + Sync + 'static,
    ) -> &mut Self {
        self.before_convert.push(Arc::new(f));
        self
    }

    pub fn per_row(
        &mut self,
        f: impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static,
    ) -> &mut Self {
        self.per_row.push(Arc::new(f));
        self
    }

    pub fn after_convert(
        &mut self,
        f: impl Fn(Vec<Record>, &Context) -> Result<Vec<Record>> + Send + Sync + 'static,
    ) -> &mut Self {
        self.after_convert.push(Arc::new(f));
        self
    }

    pub fn before_convert_async(
        &mut self,
        f: impl Fn(Vec<Record>, Context) -> BoxFuture<'static, Result<Vec<Record>>>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.async_before_convert.push(Arc::new(f));
        self
    }

    pub fn per_row_async(
        &mut self,
        f: impl Fn(Record, usize, Context) -> BoxFuture<'static, Result<Option<Record>>>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.async_per_row.push(Arc::new(f));
        self
    }

    pub fn after_convert_async(
        &mut self,
        f: impl Fn(Vec<Record>, Context) -> BoxFuture<'static, Result<Vec<Record>>>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.async_after_convert.push(Arc::new(f));
        self
    }

    /// Runs `beforeConvert`, then `perRow` over every surviving record,
    /// then `afterConvert`, against a snapshot of the hook lists taken at
    /// entry.
    pub fn apply_all(&self, data: Vec<Record>, ctx: &Context) -> Result<Vec<Record>> {
        let before = self.before_convert.clone();
        let per_row = self.per_row.clone();
        let after = self.after_convert.clone();

        let mut data = data;
        for hook in &before {
            data = hook(data, ctx)?;
        }

        let mut rows = Vec::with_capacity(data.len());
        for (index, record) in data.into_iter().enumerate() {
            let mut current = Some(record);
            for hook in &per_row {
                let Some(value) = current.take() else {
                    break;
                };
                current = hook(value, index, ctx)?;
            }
            if let Some(record) = current {
                rows.push(record);
            }
        }

        for hook in &after {
            rows = hook(rows, ctx)?;
        }
        Ok(rows)
    }

    pub async fn apply_all_async(&self, data: Vec<Record>, ctx: Context) -> Result<Vec<Record>> {
        let before = self.async_before_convert.clone();
        let per_row = self.async_per_row.clone();
        let after = self.async_after_convert.clone();

        let mut data = self.apply_all(data, &ctx)?;
        for hook in &before {
            data = hook(data, ctx.clone()).await?;
        }

        let mut rows = Vec::with_capacity(data.len());
        for (index, record) in data.into_iter().enumerate() {
            let mut current = Some(record);
            for hook in &per_row {
                let Some(value) = current.take() else {
                    break;
                };
                current = hook(value, index, ctx.clone()).await?;
            }
            if let Some(record) = current {
                rows.push(record);
            }
        }

        for hook in &after {
            rows = hook(rows, ctx.clone()).await?;
        }
        Ok(rows)
    }
}

/// Standard transform library (§4.D). Each function returns a pipeline
/// stage ready to register with [`TransformPipeline`].
pub mod stdlib {
    use super::*;

    pub fn filter(
        pred: impl Fn(&Record) -> bool + Send + Sync + 'static,
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        move |record, _index, _ctx| {
            if pred(&record) {
                Ok(Some(record))
            } else {
                Ok(None)
            }
        }
    }

    pub fn map(
        f: impl Fn(Record) -> Record + Send + Sync + 'static,
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        move |record, _index, _ctx| Ok(Some(f(record)))
    }

    pub fn sort(
        cmp: impl Fn(&Record, &Record) -> std::cmp::Ordering + Send + Sync + 'static,
    ) -> impl Fn(Vec<Record>, &Context) -> Result<Vec<Record>> + Send + Sync + 'static {
        move |mut records, _ctx| {
            records.sort_by(&cmp);
            Ok(records)
        }
    }

    pub fn limit(
        n: usize,
    ) -> impl Fn(Vec<Record>, &Context) -> Result<Vec<Record>> + Send + Sync + 'static {
        move |mut records, _ctx| {
            records.truncate(n);
            Ok(records)
        }
    }

    pub fn add_metadata(
        meta: Record,
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        move |mut record, _index, _ctx| {
            for (k, v) in &meta {
                record.insert(k.clone(), v.clone());
            }
            Ok(Some(record))
        }
    }

    pub fn transform_keys(
        f: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        move |record, _index, _ctx| {
            let mut out = Record::new();
            for (k, v) in record {
                out.insert(f(&k), v);
            }
            Ok(Some(out))
        }
    }

    pub fn transform_values(
        f: impl Fn(&Json) -> Json + Send + Sync + 'static,
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        move |record, _index, _ctx| {
            let mut out = Record::new();
            for (k, v) in record {
                out.insert(k, f(&v));
            }
            Ok(Some(out))
        }
    }

    /// `onError` receives the offending record and index; returning `true`
    /// keeps the row despite failing validation, `false` drops it. A
    /// non-callable predicate is not representable in Rust's type system,
    /// so the "registering a non-callable fails with ValidationError" rule
    /// from §4.D has no analogue here.
    pub fn validate(
        pred: impl Fn(&Record) -> bool + Send + Sync + 'static,
        on_error: impl Fn(&Record, usize) -> bool + Send + Sync + 'static,
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        move |record, index, _ctx| {
            if pred(&record) || on_error(&record, index) {
                Ok(Some(record))
            } else {
                Ok(None)
            }
        }
    }

    pub fn deduplicate(
        key_of: impl Fn(&Record) -> String + Send + Sync + 'static,
    ) -> impl Fn(Vec<Record>, &Context) -> Result<Vec<Record>> + Send + Sync + 'static {
        move |records, _ctx| {
            let mut seen = std::collections::HashSet::new();
            let mut out = Vec::with_capacity(records.len());
            for record in records {
                if seen.insert(key_of(&record)) {
                    out.push(record);
                }
            }
            Ok(out)
        }
    }

    /// Renames every key to `snake_case`, built on [`transform_keys`] and
    /// [`crate::transform::string_ops::snake_case`].
    pub fn snake_case_keys(
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        transform_keys(|k| crate::transform::string_ops::snake_case(k).into_owned())
    }

    /// Renames every key to `camelCase`, built on [`transform_keys`] and
    /// [`crate::transform::string_ops::camel_case`].
    pub fn camel_case_keys(
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        transform_keys(|k| crate::transform::string_ops::camel_case(k).into_owned())
    }

    /// Lowercases every string value, leaving non-string values untouched.
    /// Built on [`transform_values`] and
    /// [`crate::transform::string_ops::lowercase`].
    pub fn lowercase_string_values(
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        transform_values(|v| match v.as_str() {
            Some(s) => Json::String(crate::transform::string_ops::lowercase(s).into_owned()),
            None => v.clone(),
        })
    }

    /// Uppercases every string value, leaving non-string values untouched.
    /// Built on [`transform_values`] and
    /// [`crate::transform::string_ops::uppercase`].
    pub fn uppercase_string_values(
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        transform_values(|v| match v.as_str() {
            Some(s) => Json::String(crate::transform::string_ops::uppercase(s).into_owned()),
            None => v.clone(),
        })
    }

    /// Renames every key to `PascalCase`, built on [`transform_keys`] and
    /// [`crate::transform::string_ops::pascal_case`].
    pub fn pascal_case_keys(
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        transform_keys(|k| crate::transform::string_ops::pascal_case(k).into_owned())
    }

    /// Trims leading/trailing whitespace from every string value, leaving
    /// non-string values untouched. Built on [`transform_values`] and
    /// [`crate::transform::string_ops::trim`].
    pub fn trim_string_values(
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        transform_values(|v| match v.as_str() {
            Some(s) => Json::String(crate::transform::string_ops::trim(s).into_owned()),
            None => v.clone(),
        })
    }

    /// Replaces every string value with the `[start, start+length)` character
    /// substring. Built on [`transform_values`] and
    /// [`crate::transform::string_ops::substring`].
    pub fn substring_string_values(
        start: usize,
        length: usize,
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        transform_values(move |v| match v.as_str() {
            Some(s) => Json::String(crate::transform::string_ops::substring(s, start, length).into_owned()),
            None => v.clone(),
        })
    }

    /// Applies a regex replacement to every string value. Built on
    /// [`transform_values`] and [`crate::transform::string_ops::regex_replace`].
    pub fn regex_replace_string_values(
        pattern: regex::Regex,
        replacement: String,
    ) -> impl Fn(Record, usize, &Context) -> Result<Option<Record>> + Send + Sync + 'static {
        transform_values(move |v| match v.as_str() {
            Some(s) => Json::String(
                crate::transform::string_ops::regex_replace(s, &pattern, &replacement).into_owned(),
            ),
            None => v.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(n: i64) -> Record {
        let mut r = Record::new();
        r.insert("n".to_string(), json!(n));
        r
    }

    #[test]
    fn filter_drops_records_failing_the_predicate() {
        let mut pipeline = TransformPipeline::new();
        pipeline.per_row(stdlib::filter(|r| r["n"].as_i64().unwrap() % 2 == 0));
        let data = vec![rec(1), rec(2), rec(3), rec(4)];
        let out = pipeline.apply_all(data, &Context::new()).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn limit_and_sort_apply_as_after_convert_stages() {
        let mut pipeline = TransformPipeline::new();
        pipeline.after_convert(stdlib::sort(|a, b| {
            b["n"].as_i64().unwrap().cmp(&a["n"].as_i64().unwrap())
        }));
        pipeline.after_convert(stdlib::limit(2));
        let data = vec![rec(1), rec(3), rec(2)];
        let out = pipeline.apply_all(data, &Context::new()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["n"], json!(3));
    }

    #[test]
    fn deduplicate_keeps_first_occurrence() {
        let mut pipeline = TransformPipeline::new();
        pipeline.after_convert(stdlib::deduplicate(|r| r["n"].to_string()));
        let out = pipeline
            .apply_all(vec![rec(1), rec(1), rec(2)], &Context::new())
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn transform_keys_renames_every_record_key() {
        let mut pipeline = TransformPipeline::new();
        pipeline.per_row(stdlib::transform_keys(|k| k.to_uppercase()));
        let out = pipeline.apply_all(vec![rec(1)], &Context::new()).unwrap();
        assert!(out[0].contains_key("N"));
    }

    #[test]
    fn late_registration_does_not_affect_an_in_flight_snapshot() {
        let mut pipeline = TransformPipeline::new();
        pipeline.per_row(stdlib::filter(|_| true));
        let snapshot = pipeline.clone();
        pipeline.per_row(stdlib::filter(|_| false));
        // The snapshot taken before the second registration still keeps rows.
        let out = snapshot.apply_all(vec![rec(1)], &Context::new()).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn string_ops_stdlib_hooks_rename_keys_and_reshape_string_values() {
        let mut record = Record::new();
        record.insert("First Name".to_string(), json!("  Ada  "));
        record.insert("n".to_string(), json!(1));

        let mut pipeline = TransformPipeline::new();
        pipeline.per_row(stdlib::snake_case_keys());
        pipeline.per_row(stdlib::trim_string_values());
        pipeline.per_row(stdlib::uppercase_string_values());
        let out = pipeline.apply_all(vec![record], &Context::new()).unwrap();
        assert_eq!(out[0]["first_name"], json!("ADA"));
        assert_eq!(out[0]["n"], json!(1));

        let mut other = Record::new();
        other.insert("first name".to_string(), json!("hi"));
        let mut pipeline = TransformPipeline::new();
        pipeline.per_row(stdlib::camel_case_keys());
        let out = pipeline.apply_all(vec![other.clone()], &Context::new()).unwrap();
        assert!(out[0].contains_key("firstName"));

        let mut pipeline = TransformPipeline::new();
        pipeline.per_row(stdlib::pascal_case_keys());
        let out = pipeline.apply_all(vec![other], &Context::new()).unwrap();
        assert!(out[0].contains_key("FirstName"));
    }

    #[test]
    fn substring_and_regex_replace_stdlib_hooks_reshape_string_values() {
        let mut record = Record::new();
        record.insert("code".to_string(), json!("ABC-1234"));

        let mut pipeline = TransformPipeline::new();
        pipeline.per_row(stdlib::substring_string_values(0, 3));
        let out = pipeline.apply_all(vec![record], &Context::new()).unwrap();
        assert_eq!(out[0]["code"], json!("ABC"));

        let mut record = Record::new();
        record.insert("code".to_string(), json!("ABC-1234"));
        let pattern = regex::Regex::new(r"\d+").unwrap();
        let mut pipeline = TransformPipeline::new();
        pipeline.per_row(stdlib::regex_replace_string_values(pattern, "####".to_string()));
        let out = pipeline.apply_all(vec![record], &Context::new()).unwrap();
        assert_eq!(out[0]["code"], json!("ABC-####"));
    }
}
