//! Recognizes YCSB status-line segments and failure lines.
//!
//! A status line looks like:
//!
//! ```text
//! 729.39 current ops/sec; [READ: Count=510, Max=195327, Min=2011, Avg=4598.69, 90=5743,
//! 99=12583, 99.9=194815, 99.99=195327] [CLEANUP: Count=5, ...]
//! ```
//!
//! Latencies are reported in microseconds.

use std::sync::LazyLock;

use regex::Regex;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Operation {
    Read,
    Insert,
    Update,
    ReadFailed,
    UpdateFailed,
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum StatField {
    Count,
    Max,
    Min,
    Avg,
    P90,
    P99,
    P999,
    P9999,
}

impl StatField {
    pub const ALL: [StatField; 8] = [
        StatField::Count,
        StatField::Max,
        StatField::Min,
        StatField::Avg,
        StatField::P90,
        StatField::P99,
        StatField::P999,
        StatField::P9999,
    ];

    /// Maps the key used inside a status segment (`Count`, `99.9`, ...).
    fn from_log_key(key: &str) -> Option<Self> {
        let field = match key {
            "90" => Self::P90,
            "99" => Self::P99,
            "99.9" => Self::P999,
            "99.99" => Self::P9999,
            k if k.eq_ignore_ascii_case("count") => Self::Count,
            k if k.eq_ignore_ascii_case("max") => Self::Max,
            k if k.eq_ignore_ascii_case("min") => Self::Min,
            k if k.eq_ignore_ascii_case("avg") => Self::Avg,
            _ => return None,
        };
        Some(field)
    }

    fn index(self) -> usize {
        self as usize
    }

    /// Everything but `count` is a latency.
    pub fn is_latency(self) -> bool {
        self != Self::Count
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatName {
    Field(StatField),
    /// A `Return(<status>)=<count>` record of a verify segment.
    Status(String),
}

impl StatName {
    pub fn as_label(&self) -> &str {
        match self {
            Self::Field(f) => (*f).into(),
            Self::Status(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationStat {
    pub operation: Operation,
    pub name: StatName,
    pub value: f64,
}

/// Raw field text of one complete operation segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStats<'a> {
    pub operation: Operation,
    fields: [&'a str; 8],
}

impl<'a> OperationStats<'a> {
    pub fn raw(&self, field: StatField) -> &'a str {
        self.fields[field.index()]
    }

    /// Converted values in [`StatField::ALL`] order.
    pub fn stats(&self) -> impl Iterator<Item = OperationStat> + '_ {
        StatField::ALL.into_iter().map(|field| OperationStat {
            operation: self.operation,
            name: StatName::Field(field),
            value: scale_value(field, self.raw(field)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("field `{field}` appears more than once in the {operation} segment")]
    DuplicateField {
        operation: Operation,
        field: StatField,
    },
}

/// Converts one field's text. Latencies go from microseconds to
/// milliseconds; text that does not parse becomes 0.0.
pub fn scale_value(field: StatField, raw: &str) -> f64 {
    let Ok(value) = raw.trim().parse::<f64>() else {
        return 0.0;
    };
    if field.is_latency() {
        value / 1000.0
    } else {
        value
    }
}

static SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\[(read-failed|update-failed|read|insert|update|verify):([^\]]*)\]")
});

static VERIFY_STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"Return\((?P<status>.*?)\)=(?P<value>\d+)"));

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid built-in pattern {pattern:?}: {err}"),
    }
}

/// Finds every complete operation segment in `line`.
///
/// Segments missing one of the eight fields are not matches. A segment that
/// repeats a field is reported as an error for the caller to log.
pub fn classify_line(line: &str) -> Vec<Result<OperationStats<'_>, ClassifyError>> {
    SEGMENT_RE
        .captures_iter(line)
        .filter_map(|caps| {
            let token = caps.get(1)?.as_str();
            let body = caps.get(2)?.as_str();
            let operation: Operation = token.parse().ok()?;
            parse_segment(operation, body).transpose()
        })
        .collect()
}

fn parse_segment(
    operation: Operation,
    body: &str,
) -> Result<Option<OperationStats<'_>>, ClassifyError> {
    let mut fields: [Option<&str>; 8] = [None; 8];

    for part in body.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let Some(field) = StatField::from_log_key(key.trim()) else {
            continue;
        };
        let slot = &mut fields[field.index()];
        if slot.is_some() {
            return Err(ClassifyError::DuplicateField { operation, field });
        }
        *slot = Some(value.trim());
    }

    let mut out = [""; 8];
    for (dst, src) in out.iter_mut().zip(fields) {
        let Some(v) = src else {
            return Ok(None);
        };
        *dst = v;
    }

    Ok(Some(OperationStats {
        operation,
        fields: out,
    }))
}

/// Extracts `Return(<status>)=<count>` records from every `[VERIFY: ...]`
/// segment of `line`. Counts are published as-is.
pub fn verify_stats(line: &str) -> Vec<OperationStat> {
    SEGMENT_RE
        .captures_iter(line)
        .filter(|caps| {
            caps.get(1)
                .is_some_and(|t| t.as_str().eq_ignore_ascii_case("verify"))
        })
        .filter_map(|caps| caps.get(2))
        .flat_map(|body| VERIFY_STATUS_RE.captures_iter(body.as_str()))
        .filter_map(|caps| {
            let status = caps.name("status")?.as_str();
            let value = caps.name("value")?.as_str().parse::<f64>().unwrap_or(0.0);
            Some(OperationStat {
                operation: Operation::Verify,
                name: StatName::Status(status.to_string()),
                value,
            })
        })
        .collect()
}

/// Matches lines of live workload output that signal an error.
pub const DEFAULT_FAILURE_PATTERN: &str = r"\sERROR|=UNEXPECTED_STATE|=ERROR";

#[derive(Debug, Clone)]
pub struct FailurePattern {
    re: Regex,
}

impl FailurePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            re: Regex::new(pattern)?,
        })
    }

    pub fn as_str(&self) -> &str {
        self.re.as_str()
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.re.is_match(line)
    }
}

impl Default for FailurePattern {
    fn default() -> Self {
        Self {
            re: compile(DEFAULT_FAILURE_PATTERN),
        }
    }
}
