//! Final-report parsing of a finished YCSB run.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

pub const OP_RATE_KEY: &str = "op rate";
pub const LATENCY_99TH_KEY: &str = "latency 99th percentile";
pub const LATENCY_MEAN_KEY: &str = "latency mean";

static OVERALL_THROUGHPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[OVERALL\],?\s+Throughput\(ops/sec\),?\s+(?P<value>.*)$")
        .unwrap_or_else(|e| panic!("invalid throughput regex: {e}"))
});

static LATENCY_99TH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(?:READ|INSERT|UPDATE)\],?\s+99thPercentileLatency\(us\),?\s+(?P<value>.*)$")
        .unwrap_or_else(|e| panic!("invalid 99th percentile regex: {e}"))
});

static LATENCY_MEAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(?:READ|INSERT|UPDATE)\],?\s+AverageLatency\(us\),?\s+(?P<value>.*)$")
        .unwrap_or_else(|e| panic!("invalid average latency regex: {e}"))
});

/// Headline numbers of a run, as text. Latencies are in milliseconds.
///
/// Latency values are folded as `(acc + v) / 2` per matching line, so with
/// more than one operation type the result weights later lines more heavily.
/// Fields no line touched stay `"0"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryResult {
    #[serde(rename = "latency 99th percentile")]
    pub latency_99th: String,
    #[serde(rename = "latency mean")]
    pub latency_mean: String,
    #[serde(rename = "op rate")]
    pub op_rate: String,
}

impl Default for SummaryResult {
    fn default() -> Self {
        Self {
            latency_99th: "0".to_string(),
            latency_mean: "0".to_string(),
            op_rate: "0".to_string(),
        }
    }
}

impl SummaryResult {
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            OP_RATE_KEY => Some(self.op_rate.as_str()),
            LATENCY_99TH_KEY => Some(self.latency_99th.as_str()),
            LATENCY_MEAN_KEY => Some(self.latency_mean.as_str()),
            _ => None,
        }
    }

    pub fn entries(&self) -> [(&'static str, &str); 3] {
        [
            (LATENCY_99TH_KEY, self.latency_99th.as_str()),
            (LATENCY_MEAN_KEY, self.latency_mean.as_str()),
            (OP_RATE_KEY, self.op_rate.as_str()),
        ]
    }
}

pub fn parse_final_output(stdout: &str) -> SummaryResult {
    let mut op_rate: Option<String> = None;
    let mut latency_99th: Option<f64> = None;
    let mut latency_mean: Option<f64> = None;

    for line in stdout.lines() {
        if let Some(value) = capture(&OVERALL_THROUGHPUT_RE, line) {
            op_rate = Some(value.to_string());
        }
        if let Some(value) = capture(&LATENCY_99TH_RE, line) {
            fold_latency(&mut latency_99th, value, line);
        }
        if let Some(value) = capture(&LATENCY_MEAN_RE, line) {
            fold_latency(&mut latency_mean, value, line);
        }
    }

    let mut result = SummaryResult::default();
    if let Some(v) = op_rate {
        result.op_rate = v;
    }
    if let Some(v) = latency_99th {
        result.latency_99th = float_text(v);
    }
    if let Some(v) = latency_mean {
        result.latency_mean = float_text(v);
    }
    result
}

fn capture<'a>(re: &Regex, line: &'a str) -> Option<&'a str> {
    re.captures(line)
        .and_then(|caps| caps.name("value"))
        .map(|m| m.as_str())
}

fn fold_latency(acc: &mut Option<f64>, raw: &str, line: &str) {
    let Ok(us) = raw.trim().parse::<f64>() else {
        tracing::warn!(line, "ignoring unparsable ycsb latency");
        return;
    };
    let current = acc.unwrap_or(0.0);
    *acc = Some((current + us / 1000.0) / 2.0);
}

/// Whole numbers keep one decimal place (`2.0`); everything else uses the
/// shortest round-trip form.
fn float_text(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}
