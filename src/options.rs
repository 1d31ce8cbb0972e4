//! Per-call conversion configuration.
//!
//! An [`ConversionOptions`] is built fresh for each call per the lifecycle
//! rule in the data model: the long-lived state lives in the engine and
//! cache instances, not here.

use std::collections::HashMap;

use crate::value::Value;

/// Candidate delimiters tried during auto-detection, in the order the
/// delimiter cache and fast-path engine fall back through them.
pub const DEFAULT_CANDIDATES: [char; 4] = [';', ',', '\t', '|'];

/// Tie-break delimiter returned when detection finds no clear winner.
pub const DEFAULT_DELIMITER: char = ';';

/// Which structural engine the fast-path engine must use, bypassing its own
/// classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedEngine {
    Simple,
    QuoteAware,
    Standard,
}

/// Shape of a CSV→JSON fast-path result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FastPathMode {
    /// Rows are materialized into header-keyed records.
    #[default]
    Objects,
    /// Rows are emitted as arrays of raw strings, skipping materialization.
    Compact,
}

/// A declared default/shape for the object↔row projection (§4.C.1/§4.C.2).
/// Keys define both header order and, on CSV→JSON, the keys guaranteed to
/// exist in every emitted record.
#[derive(Debug, Clone, Default)]
pub struct Template {
    pub keys: Vec<String>,
    pub defaults: HashMap<String, Value>,
}

impl Template {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            defaults: HashMap::new(),
        }
    }

    pub fn with_default(mut self, key: impl Into<String>, default: Value) -> Self {
        self.defaults.insert(key.into(), default);
        self
    }

    pub fn default_for(&self, key: &str) -> Value {
        self.defaults.get(key).cloned().unwrap_or(Value::Text(String::new()))
    }
}

/// Conversion options shared by every component in the pipeline. Construct
/// with [`ConversionOptions::new`] and chain the `with_*` builders; each
/// call site gets its own instance, per the options lifecycle rule.
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    pub delimiter: Option<char>,
    pub candidates: Vec<char>,
    pub include_headers: bool,
    pub has_headers: bool,
    pub auto_detect: bool,
    pub use_cache: bool,
    pub prevent_csv_injection: bool,
    pub parse_numbers: bool,
    pub parse_booleans: bool,
    pub trim: bool,
    pub rfc4180_compliant: bool,
    pub max_rows: Option<usize>,
    pub max_records: Option<usize>,
    pub rename_map: HashMap<String, String>,
    pub template: Option<Template>,
    pub use_fast_path: bool,
    pub fast_path_mode: FastPathMode,
    pub force_engine: Option<ForcedEngine>,
    pub warn_extra_fields: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            candidates: DEFAULT_CANDIDATES.to_vec(),
            include_headers: true,
            has_headers: true,
            auto_detect: true,
            use_cache: true,
            prevent_csv_injection: true,
            parse_numbers: true,
            parse_booleans: false,
            trim: true,
            rfc4180_compliant: true,
            max_rows: None,
            max_records: None,
            rename_map: HashMap::new(),
            template: None,
            use_fast_path: true,
            fast_path_mode: FastPathMode::Objects,
            force_engine: None,
            warn_extra_fields: false,
        }
    }
}

impl ConversionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self.auto_detect = false;
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<char>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_include_headers(mut self, value: bool) -> Self {
        self.include_headers = value;
        self
    }

    pub fn with_has_headers(mut self, value: bool) -> Self {
        self.has_headers = value;
        self
    }

    pub fn with_auto_detect(mut self, value: bool) -> Self {
        self.auto_detect = value;
        self
    }

    pub fn with_use_cache(mut self, value: bool) -> Self {
        self.use_cache = value;
        self
    }

    pub fn with_prevent_csv_injection(mut self, value: bool) -> Self {
        self.prevent_csv_injection = value;
        self
    }

    pub fn with_parse_numbers(mut self, value: bool) -> Self {
        self.parse_numbers = value;
        self
    }

    pub fn with_parse_booleans(mut self, value: bool) -> Self {
        self.parse_booleans = value;
        self
    }

    pub fn with_trim(mut self, value: bool) -> Self {
        self.trim = value;
        self
    }

    pub fn with_rfc4180_compliant(mut self, value: bool) -> Self {
        self.rfc4180_compliant = value;
        self
    }

    pub fn with_max_rows(mut self, value: usize) -> Self {
        self.max_rows = Some(value);
        self
    }

    pub fn with_max_records(mut self, value: usize) -> Self {
        self.max_records = Some(value);
        self
    }

    pub fn with_rename_map(mut self, map: HashMap<String, String>) -> Self {
        self.rename_map = map;
        self
    }

    pub fn with_template(mut self, template: Template) -> Self {
        self.template = Some(template);
        self
    }

    pub fn with_use_fast_path(mut self, value: bool) -> Self {
        self.use_fast_path = value;
        self
    }

    pub fn with_fast_path_mode(mut self, mode: FastPathMode) -> Self {
        self.fast_path_mode = mode;
        self
    }

    pub fn with_force_engine(mut self, engine: ForcedEngine) -> Self {
        self.force_engine = Some(engine);
        self
    }

    /// TSV wrappers fix the delimiter to tab and disable auto-detection,
    /// per §6's "thin wrappers over the CSV codec with fixed delimiter".
    pub fn tsv(mut self) -> Self {
        self.delimiter = Some('\t');
        self.auto_detect = false;
        self
    }

    /// Applies `rename_map` to a header name, defaulting to the original
    /// name when no rename is registered.
    pub fn rename(&self, header: &str) -> String {
        self.rename_map
            .get(header)
            .cloned()
            .unwrap_or_else(|| header.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = ConversionOptions::new();
        assert_eq!(opts.candidates, DEFAULT_CANDIDATES.to_vec());
        assert!(opts.include_headers);
        assert!(opts.has_headers);
        assert!(opts.auto_detect);
        assert!(opts.use_cache);
        assert!(opts.prevent_csv_injection);
        assert!(opts.parse_numbers);
        assert!(!opts.parse_booleans);
        assert!(opts.trim);
        assert!(opts.rfc4180_compliant);
        assert_eq!(opts.max_rows, None);
        assert_eq!(opts.max_records, None);
        assert!(opts.use_fast_path);
        assert_eq!(opts.fast_path_mode, FastPathMode::Objects);
    }

    #[test]
    fn tsv_builder_fixes_tab_delimiter_and_disables_auto_detect() {
        let opts = ConversionOptions::new().tsv();
        assert_eq!(opts.delimiter, Some('\t'));
        assert!(!opts.auto_detect);
    }

    #[test]
    fn explicit_delimiter_disables_auto_detect() {
        let opts = ConversionOptions::new().with_delimiter(',');
        assert_eq!(opts.delimiter, Some(','));
        assert!(!opts.auto_detect);
    }

    #[test]
    fn rename_falls_back_to_original_header() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), "alpha".to_string());
        let opts = ConversionOptions::new().with_rename_map(map);
        assert_eq!(opts.rename("a"), "alpha");
        assert_eq!(opts.rename("b"), "b");
    }

    #[test]
    fn template_default_falls_back_to_empty_text() {
        let template = Template::new(vec!["a".into()]).with_default("a", Value::Int(0));
        assert_eq!(template.default_for("a"), Value::Int(0));
        assert_eq!(template.default_for("missing"), Value::Text(String::new()));
    }
}
