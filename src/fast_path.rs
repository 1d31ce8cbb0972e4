//! Component B: structure classification, compiled-parser caching, and the
//! row state machines themselves.
//!
//! The source project caches JSON-serialized closures; per the design note
//! on dynamic dispatch, this is rebuilt as a tagged enum (`EngineTag`) over
//! state-machine structs (`CompiledParser`), keyed by an immutable
//! [`StructureDescriptor`] in an `lru::LruCache`, mirroring the cache usage
//! already present for the delimiter cache.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::delimiter_cache::{detect_uncached, DelimiterCache};
use crate::error::{Error, Result};
use crate::options::{ConversionOptions, ForcedEngine};

pub type Row = Vec<String>;

/// Structural classification of `{SIMPLE, QUOTE_AWARE, STANDARD}` per §4.B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Simple,
    QuoteAware,
    Standard,
}

/// The compiled-parser cache key, matching §3's Parser Structure Descriptor
/// verbatim. `avg_fields_per_line` is compared/hashed by bit pattern so the
/// descriptor can be a clean cache key without losing the float field.
#[derive(Debug, Clone, Copy)]
pub struct StructureDescriptor {
    pub delimiter: char,
    pub has_quotes: bool,
    pub has_escaped_quotes: bool,
    pub has_newlines_in_fields: bool,
    pub has_backslashes: bool,
    pub field_consistency: bool,
    pub avg_fields_per_line: f64,
    pub max_fields: usize,
    pub recommended_engine: Engine,
}

impl PartialEq for StructureDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.delimiter == other.delimiter
            && self.has_quotes == other.has_quotes
            && self.has_escaped_quotes == other.has_escaped_quotes
            && self.has_newlines_in_fields == other.has_newlines_in_fields
            && self.has_backslashes == other.has_backslashes
            && self.field_consistency == other.field_consistency
            && self.avg_fields_per_line.to_bits() == other.avg_fields_per_line.to_bits()
            && self.max_fields == other.max_fields
            && self.recommended_engine == other.recommended_engine
    }
}
impl Eq for StructureDescriptor {}

impl std::hash::Hash for StructureDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.delimiter.hash(state);
        self.has_quotes.hash(state);
        self.has_escaped_quotes.hash(state);
        self.has_newlines_in_fields.hash(state);
        self.has_backslashes.hash(state);
        self.field_consistency.hash(state);
        self.avg_fields_per_line.to_bits().hash(state);
        self.max_fields.hash(state);
        self.recommended_engine.hash(state);
    }
}

impl std::hash::Hash for Engine {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
    }
}

/// Sample window used for structure classification: first 1,000 characters,
/// first 10 lines, per §4.B.
fn sample_window(input: &str) -> Vec<&str> {
    let truncated: &str = {
        let end = input
            .char_indices()
            .nth(1_000)
            .map(|(idx, _)| idx)
            .unwrap_or(input.len());
        &input[..end]
    };
    truncated.lines().take(10).collect()
}

fn has_odd_quote_count(line: &str) -> bool {
    line.chars().filter(|&c| c == '"').count() % 2 == 1
}

/// Picks the delimiter maximizing `fieldCount / (fieldLengthVariance + 1)`
/// across candidates present on the first sampled line, per §4.B.
fn score_delimiter(first_line: &str, candidates: &[char]) -> char {
    let mut best = crate::options::DEFAULT_DELIMITER;
    let mut best_score = f64::MIN;
    let mut found_any = false;
    for &candidate in candidates {
        if !first_line.contains(candidate) {
            continue;
        }
        let fields: Vec<&str> = first_line.split(candidate).collect();
        let field_count = fields.len() as f64;
        let mean = fields.iter().map(|f| f.len() as f64).sum::<f64>() / field_count;
        let variance = fields
            .iter()
            .map(|f| {
                let d = f.len() as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / field_count;
        let score = field_count / (variance + 1.0);
        if !found_any || score > best_score {
            best = candidate;
            best_score = score;
            found_any = true;
        }
    }
    if found_any {
        best
    } else {
        detect_uncached(first_line, candidates)
    }
}

/// Analyzes `input` and produces the immutable descriptor used as the
/// compiled-parser cache key. Resolves the delimiter without consulting any
/// delimiter cache; see [`FastPathEngine::analyze`] for the cached path used
/// by real conversions.
pub fn analyze_structure(input: &str, options: &ConversionOptions) -> StructureDescriptor {
    let lines = sample_window(input);
    let first_line = lines.first().copied().unwrap_or("");
    let delimiter = options
        .delimiter
        .unwrap_or_else(|| score_delimiter(first_line, &options.candidates));
    classify_structure(input, &lines, delimiter, options)
}

/// Builds the descriptor from an already-resolved `delimiter`, shared by both
/// the uncached [`analyze_structure`] and [`FastPathEngine::analyze`].
fn classify_structure(
    input: &str,
    lines: &[&str],
    delimiter: char,
    options: &ConversionOptions,
) -> StructureDescriptor {
    let has_quotes = lines.iter().any(|l| l.contains('"'));
    let has_escaped_quotes = lines.iter().any(|l| l.contains("\"\""));
    let has_newlines_in_fields = lines.iter().any(|l| has_odd_quote_count(l));
    let has_backslashes = input.contains('\\');

    let field_counts: Vec<usize> = lines
        .iter()
        .map(|l| l.split(delimiter).count())
        .collect();
    let max_fields = field_counts.iter().copied().max().unwrap_or(0);
    let avg_fields_per_line = if field_counts.is_empty() {
        0.0
    } else {
        field_counts.iter().sum::<usize>() as f64 / field_counts.len() as f64
    };
    let field_consistency = field_counts.iter().all(|&c| c == max_fields);

    let mut recommended_engine = if has_newlines_in_fields {
        Engine::Standard
    } else if has_quotes {
        Engine::QuoteAware
    } else {
        Engine::Simple
    };

    // Full-input upgrade: SIMPLE chosen from the sample must still yield to
    // QUOTE_AWARE if any quote appears anywhere in the input.
    if recommended_engine == Engine::Simple && input.contains('"') {
        recommended_engine = Engine::QuoteAware;
    }

    if let Some(forced) = options.force_engine {
        let forced_engine = match forced {
            ForcedEngine::Simple => Engine::Simple,
            ForcedEngine::QuoteAware => Engine::QuoteAware,
            ForcedEngine::Standard => Engine::Standard,
        };
        if forced_engine != recommended_engine {
            log::warn!(
                "forceEngine overrides recommended engine {:?} with {:?}",
                recommended_engine,
                forced_engine
            );
        }
        recommended_engine = forced_engine;
    }

    StructureDescriptor {
        delimiter,
        has_quotes,
        has_escaped_quotes,
        has_newlines_in_fields,
        has_backslashes,
        field_consistency,
        avg_fields_per_line,
        max_fields,
        recommended_engine,
    }
}

/// Tagged enum over the four row state machines named in the design notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineTag {
    Simple,
    SimpleEscaped,
    QuoteAware,
    QuoteAwareEscaped,
}

impl StructureDescriptor {
    pub fn engine_tag(&self) -> EngineTag {
        match (self.recommended_engine, self.has_backslashes) {
            (Engine::Simple, false) => EngineTag::Simple,
            (Engine::Simple, true) => EngineTag::SimpleEscaped,
            (Engine::QuoteAware | Engine::Standard, false) => EngineTag::QuoteAware,
            (Engine::QuoteAware | Engine::Standard, true) => EngineTag::QuoteAwareEscaped,
        }
    }
}

/// A state-machine struct holding the delimiter byte and escape flags, with
/// a parse method per tag, per the design notes' "compiled parser"
/// guidance.
#[derive(Debug, Clone, Copy)]
pub struct CompiledParser {
    pub tag: EngineTag,
    delimiter: char,
    has_escaped_quotes: bool,
    rfc4180_compliant: bool,
}

impl CompiledParser {
    pub fn compile(descriptor: &StructureDescriptor, options: &ConversionOptions) -> Self {
        Self {
            tag: descriptor.engine_tag(),
            delimiter: descriptor.delimiter,
            has_escaped_quotes: descriptor.has_escaped_quotes,
            rfc4180_compliant: options.rfc4180_compliant,
        }
    }

    pub fn parse(&self, input: &str, trim: bool) -> Result<Vec<Row>> {
        match self.tag {
            EngineTag::Simple => Ok(parse_simple(input, self.delimiter, false, trim)),
            EngineTag::SimpleEscaped => Ok(parse_simple(input, self.delimiter, true, trim)),
            EngineTag::QuoteAware => parse_quote_aware(
                input,
                self.delimiter,
                self.has_escaped_quotes,
                false,
                self.rfc4180_compliant,
                trim,
            ),
            EngineTag::QuoteAwareEscaped => parse_quote_aware(
                input,
                self.delimiter,
                self.has_escaped_quotes,
                true,
                self.rfc4180_compliant,
                trim,
            ),
        }
    }
}

/// SIMPLE / SIMPLE-escaped parser: single pass splitting on delimiter and
/// row terminators; blank lines dropped; `trim` strips field whitespace.
fn parse_simple(input: &str, delimiter: char, escape: bool, trim: bool) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut started = false;
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0usize;

    macro_rules! close_field {
        () => {{
            fields.push(if trim {
                current.trim().to_string()
            } else {
                std::mem::take(&mut current)
            });
            if trim {
                current.clear();
            }
        }};
    }

    macro_rules! close_row {
        () => {{
            close_field!();
            if !(fields.len() == 1 && fields[0].trim().is_empty() && !started) {
                rows.push(std::mem::take(&mut fields));
            } else {
                fields.clear();
            }
            started = false;
        }};
    }

    while i < chars.len() {
        let c = chars[i];
        if escape && c == '\\' {
            let next = chars.get(i + 1).copied();
            match next {
                Some('\n') | Some('\r') | None => {
                    current.push('\\');
                    i += 1;
                }
                Some('\\') => {
                    current.push('\\');
                    started = true;
                    i += 2;
                }
                Some(other) => {
                    current.push(other);
                    started = true;
                    i += 2;
                }
            }
            continue;
        }
        if c == delimiter {
            close_field!();
            started = true;
            i += 1;
            continue;
        }
        if c == '\r' {
            if chars.get(i + 1) == Some(&'\n') {
                close_row!();
                i += 2;
            } else {
                close_row!();
                i += 1;
            }
            continue;
        }
        if c == '\n' {
            close_row!();
            i += 1;
            continue;
        }
        current.push(c);
        started = true;
        i += 1;
    }
    if started || !current.is_empty() || !fields.is_empty() {
        close_row!();
    }
    rows
}

/// QUOTE_AWARE / QUOTE_AWARE-escaped parser: character state machine with
/// an `insideQuotes` flag, per §4.B.
fn parse_quote_aware(
    input: &str,
    delimiter: char,
    has_escaped_quotes: bool,
    escape: bool,
    rfc4180_compliant: bool,
    trim: bool,
) -> Result<Vec<Row>> {
    let chars: Vec<char> = input.chars().collect();
    let mut rows = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut inside_quotes = false;
    let mut started = false;
    let mut escape_next = false;
    let mut line_number: u64 = 1;
    let mut i = 0usize;

    let push_field = |current: &mut String, fields: &mut Vec<String>| {
        let value = if trim {
            current.trim().to_string()
        } else {
            std::mem::take(current)
        };
        fields.push(value);
        current.clear();
    };

    let push_row = |fields: &mut Vec<String>, rows: &mut Vec<Row>, started: bool| {
        if fields.len() == 1 && fields[0].trim().is_empty() && !started {
            fields.clear();
            return;
        }
        rows.push(std::mem::take(fields));
    };

    while i < chars.len() {
        let c = chars[i];

        if escape && escape_next {
            current.push(c);
            started = true;
            escape_next = false;
            i += 1;
            continue;
        }
        if escape && c == '\\' && !inside_quotes {
            escape_next = true;
            i += 1;
            continue;
        }

        if c == '"' {
            if !inside_quotes {
                inside_quotes = true;
                started = true;
                i += 1;
                continue;
            }
            // inside quotes, looking at a quote character
            let next = chars.get(i + 1).copied();
            if next == Some('"') {
                if has_escaped_quotes {
                    let after = chars.get(i + 2).copied();
                    let at_boundary = matches!(after, None | Some('\n') | Some('\r'));
                    if at_boundary {
                        inside_quotes = false;
                        i += 2;
                        continue;
                    }
                    current.push('"');
                    i += 2;
                    continue;
                } else {
                    current.push('"');
                    i += 2;
                    continue;
                }
            }
            // single quote inside quoted field
            let at_boundary = matches!(next, None | Some('\n') | Some('\r')) || next == Some(delimiter);
            if at_boundary || !rfc4180_compliant {
                if at_boundary {
                    inside_quotes = false;
                } else {
                    // tolerant mode: literal quote, remain quoted
                    current.push('"');
                }
                i += 1;
                continue;
            } else {
                // strict RFC 4180: a lone quote here is malformed; treat as
                // closing to avoid runaway states, matching engine's
                // forgiving edge-case posture elsewhere.
                inside_quotes = false;
                i += 1;
                continue;
            }
        }

        if inside_quotes {
            if c == '\n' {
                line_number += 1;
            }
            current.push(c);
            started = true;
            i += 1;
            continue;
        }

        if c == delimiter {
            push_field(&mut current, &mut fields);
            started = true;
            i += 1;
            continue;
        }
        if c == '\r' {
            push_field(&mut current, &mut fields);
            push_row(&mut fields, &mut rows, started);
            started = false;
            line_number += 1;
            if chars.get(i + 1) == Some(&'\n') {
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }
        if c == '\n' {
            push_field(&mut current, &mut fields);
            push_row(&mut fields, &mut rows, started);
            started = false;
            line_number += 1;
            i += 1;
            continue;
        }
        current.push(c);
        started = true;
        i += 1;
    }

    if inside_quotes {
        return Err(Error::unclosed_quotes(line_number));
    }
    if started || !current.is_empty() || !fields.is_empty() {
        push_field(&mut current, &mut fields);
        push_row(&mut fields, &mut rows, started);
    }
    Ok(rows)
}

/// `{simpleParserCount, quoteAwareParserCount, standardParserCount,
/// cacheHits, cacheMisses, totalParsers, hitRate}` per §4.G.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FastPathStats {
    pub simple_parser_count: u64,
    pub quote_aware_parser_count: u64,
    pub standard_parser_count: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl FastPathStats {
    pub fn total_parsers(&self) -> u64 {
        self.simple_parser_count + self.quote_aware_parser_count + self.standard_parser_count
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Two independent LRU caches (eager parsers, streaming row emitters), per
/// §4.B. Both are keyed by [`StructureDescriptor`] and store the same
/// [`CompiledParser`] value; they are kept separate so their hit/miss
/// counters stay independent, as specified.
pub struct FastPathEngine {
    eager_cache: LruCache<StructureDescriptorKey, CompiledParser>,
    emitter_cache: LruCache<StructureDescriptorKey, CompiledParser>,
    delimiter_cache: DelimiterCache,
    stats: FastPathStats,
}

type StructureDescriptorKey = StructureDescriptor;

impl FastPathEngine {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            eager_cache: LruCache::new(capacity),
            emitter_cache: LruCache::new(capacity),
            delimiter_cache: DelimiterCache::new(capacity.get()),
            stats: FastPathStats::default(),
        }
    }

    /// Resolves the descriptor for `input`, routing delimiter detection
    /// through this engine's own [`DelimiterCache`] so repeated conversions
    /// against the same sample text (the common case for a held-open
    /// engine) hit the cache instead of re-scoring candidates every time.
    fn analyze(&mut self, input: &str, options: &ConversionOptions) -> StructureDescriptor {
        let lines = sample_window(input);
        let first_line = lines.first().copied().unwrap_or("");
        let delimiter = match options.delimiter {
            Some(delimiter) => delimiter,
            None => self.delimiter_cache.get_or_detect(
                first_line,
                &options.candidates,
                options.use_cache,
                || score_delimiter(first_line, &options.candidates),
            ),
        };
        classify_structure(input, &lines, delimiter, options)
    }

    pub fn delimiter_cache_stats(&self) -> crate::delimiter_cache::DelimiterCacheStats {
        self.delimiter_cache.get_stats()
    }

    fn record_compile(&mut self, descriptor: &StructureDescriptor) {
        match descriptor.recommended_engine {
            Engine::Simple => self.stats.simple_parser_count += 1,
            Engine::QuoteAware => self.stats.quote_aware_parser_count += 1,
            Engine::Standard => self.stats.standard_parser_count += 1,
        }
    }

    pub fn compile_parser(
        &mut self,
        descriptor: &StructureDescriptor,
        options: &ConversionOptions,
    ) -> CompiledParser {
        if let Some(parser) = self.eager_cache.get(descriptor) {
            self.stats.cache_hits += 1;
            return *parser;
        }
        self.stats.cache_misses += 1;
        let parser = CompiledParser::compile(descriptor, options);
        self.record_compile(descriptor);
        self.eager_cache.put(*descriptor, parser);
        parser
    }

    pub fn compile_row_emitter(
        &mut self,
        descriptor: &StructureDescriptor,
        options: &ConversionOptions,
    ) -> CompiledParser {
        if let Some(parser) = self.emitter_cache.get(descriptor) {
            self.stats.cache_hits += 1;
            return *parser;
        }
        self.stats.cache_misses += 1;
        let parser = CompiledParser::compile(descriptor, options);
        self.emitter_cache.put(*descriptor, parser);
        parser
    }

    /// Eager parse: analyzes structure, compiles (or reuses) a parser, and
    /// returns every row.
    pub fn parse(&mut self, input: &str, options: &ConversionOptions) -> Result<Vec<Row>> {
        let descriptor = self.analyze(input, options);
        let parser = self.compile_parser(&descriptor, options);
        parser.parse(input, options.trim)
    }

    /// Lazy row sequence. The fast-path engine itself operates over an
    /// already-resident `input`; true bounded-memory, chunk-incremental
    /// iteration lives in the streaming runtime (§4.F), which drives the
    /// same compiled parsers over arriving chunks instead of a whole
    /// string. Here "lazy" means the rows are produced by an iterator
    /// rather than forcing the caller to pre-allocate a materialized
    /// `Vec<Record>` at the codec layer.
    pub fn iterate_rows(&mut self, input: &str, options: &ConversionOptions) -> Result<RowIter> {
        let descriptor = self.analyze(input, options);
        let parser = self.compile_row_emitter(&descriptor, options);
        let rows = parser.parse(input, options.trim)?;
        Ok(RowIter {
            rows: rows.into_iter(),
        })
    }

    /// Callback-driven emission, sharing the same compiled parser as
    /// [`FastPathEngine::parse`].
    pub fn parse_rows(
        &mut self,
        input: &str,
        options: &ConversionOptions,
        mut on_row: impl FnMut(&Row),
    ) -> Result<()> {
        for row in self.parse(input, options)? {
            on_row(&row);
        }
        Ok(())
    }

    pub fn get_stats(&self) -> FastPathStats {
        self.stats
    }

    pub fn reset(&mut self) {
        self.eager_cache.clear();
        self.emitter_cache.clear();
        self.delimiter_cache.clear();
        self.stats = FastPathStats::default();
    }
}

impl Default for FastPathEngine {
    fn default() -> Self {
        Self::new(crate::delimiter_cache::DEFAULT_CAPACITY)
    }
}

pub struct RowIter {
    rows: std::vec::IntoIter<Row>,
}

impl Iterator for RowIter {
    type Item = Row;
    fn next(&mut self) -> Option<Row> {
        self.rows.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ConversionOptions {
        ConversionOptions::new()
    }

    #[test]
    fn simple_engine_splits_plain_rows_and_drops_blank_lines() {
        let input = "a,b,c\n1,2,3\n\n4,5,6";
        let rows = parse_simple(input, ',', false, true);
        assert_eq!(
            rows,
            vec![
                vec!["a", "b", "c"],
                vec!["1", "2", "3"],
                vec!["4", "5", "6"],
            ]
        );
    }

    #[test]
    fn delimiter_only_lines_are_not_blank() {
        // "Open question — blank-row rule": ",,," is not blank.
        let rows = parse_simple(",,,", ',', false, true);
        assert_eq!(rows, vec![vec!["", "", "", ""]]);
    }

    #[test]
    fn quote_aware_handles_embedded_delimiter_and_escaped_quotes() {
        let input = "name,note\nAlice,\"Hello, world\"\nBob,\"She said \"\"hi\"\"\"";
        let rows = parse_quote_aware(input, ',', true, false, true, true).unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["name", "note"],
                vec!["Alice", "Hello, world"],
                vec!["Bob", "She said \"hi\""],
            ]
        );
    }

    #[test]
    fn escaped_quote_pair_immediately_before_delimiter_stays_inside_the_field() {
        // A doubled quote pair followed by the delimiter (rather than EOL/EOF)
        // is a literal embedded quote, not a field-closing boundary: the
        // delimiter that follows it is still inside the still-open field.
        let input = "\"ab\"\",c\"";
        let rows = parse_quote_aware(input, ',', true, false, true, true).unwrap();
        assert_eq!(rows, vec![vec!["ab\",c"]]);
    }

    #[test]
    fn unclosed_quote_fails_with_line_number() {
        let err = parse_quote_aware("a,\"unterminated", ',', true, false, true, true).unwrap_err();
        match err {
            Error::Parsing { line_number, .. } => assert_eq!(line_number, 1),
            other => panic!("expected Parsing error, got {other:?}"),
        }
    }

    #[test]
    fn engine_never_downgrades_to_simple_when_input_contains_a_quote() {
        let descriptor = analyze_structure("a,b\n1,\"2\"", &opts());
        assert_ne!(descriptor.recommended_engine, Engine::Simple);
    }

    #[test]
    fn force_engine_overrides_classification() {
        crate::init_test_logging();
        let forced = opts().with_force_engine(ForcedEngine::Simple);
        let descriptor = analyze_structure("a,b\n1,\"2\"", &forced);
        assert_eq!(descriptor.recommended_engine, Engine::Simple);
    }

    #[test]
    fn eager_parse_and_lazy_iterate_rows_agree() {
        let mut engine = FastPathEngine::default();
        let input = "a,b\n1,2\n3,4";
        let eager = engine.parse(input, &opts()).unwrap();
        let lazy: Vec<Row> = engine.iterate_rows(input, &opts()).unwrap().collect();
        assert_eq!(eager, lazy);
    }

    #[test]
    fn repeated_parses_of_the_same_auto_detected_sample_hit_the_delimiter_cache() {
        let mut engine = FastPathEngine::default();
        let input = "a;b\n1;2";
        engine.parse(input, &opts()).unwrap();
        engine.parse(input, &opts()).unwrap();
        let stats = engine.delimiter_cache_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn compiled_parser_cache_hits_on_repeat_descriptor() {
        let mut engine = FastPathEngine::default();
        let input = "a,b\n1,2";
        engine.parse(input, &opts()).unwrap();
        engine.parse(input, &opts()).unwrap();
        let stats = engine.get_stats();
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 1);
    }
}
