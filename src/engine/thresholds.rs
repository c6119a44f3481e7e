use crate::engine::AggregateMetrics;
use crate::engine::snapshot::{KNOWN_METRICS, metric_kind};
use crate::error::ConfigError;
use crate::output::{Colour, paint};
use crate::types::{Aggregation, MetricSelector, Threshold, ThresholdExpr, ThresholdOp, ThresholdResult};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdReport {
    pub passed: bool,
    pub results: Vec<ThresholdResult>,
}

impl ThresholdReport {
    pub fn failed(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Parse `http_req_duration` or `http_req_duration{scenario:load,name:search}`.
pub fn parse_selector(raw: &str) -> Result<MetricSelector, ConfigError> {
    let raw = raw.trim();
    let (name, tags) = match raw.find('{') {
        Some(open) => {
            let body = raw[open + 1..]
                .strip_suffix('}')
                .ok_or_else(|| selector_error(raw, "missing closing '}'"))?;
            let mut tags = Vec::new();
            for pair in body.split(',').filter(|p| !p.trim().is_empty()) {
                let (k, v) = pair
                    .split_once(':')
                    .ok_or_else(|| selector_error(raw, "tag filters must be key:value"))?;
                tags.push((k.trim().to_string(), v.trim().to_string()));
            }
            if tags.is_empty() {
                return Err(selector_error(raw, "empty tag filter"));
            }
            tags.sort();
            (raw[..open].trim(), tags)
        }
        None => (raw, Vec::new()),
    };

    if metric_kind(name).is_none() {
        let valid: Vec<&str> = KNOWN_METRICS.iter().map(|(n, _)| *n).collect();
        return Err(ConfigError::UnknownMetric {
            metric: name.to_string(),
            valid: valid.join(", "),
        });
    }

    Ok(MetricSelector {
        name: name.to_string(),
        tags,
    })
}

fn selector_error(raw: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidThreshold {
        metric: raw.to_string(),
        expr: String::new(),
        reason: reason.to_string(),
    }
}

/// Parse `rate<0.02`, `p(95) < 800`, `avg<=200ms`, `count>100`.
pub fn parse_expr(metric: &MetricSelector, source: &str) -> Result<ThresholdExpr, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidThreshold {
        metric: metric.to_string(),
        expr: source.to_string(),
        reason: reason.to_string(),
    };

    let text: String = source.chars().filter(|c| !c.is_whitespace()).collect();
    let op_pos = text
        .find(['<', '>', '=', '!'])
        .ok_or_else(|| invalid("missing comparison operator"))?;
    let (lhs, rest) = text.split_at(op_pos);

    let (operator, rhs) = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("!=", ThresholdOp::Ne),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ]
    .iter()
    .find_map(|(token, op)| rest.strip_prefix(*token).map(|r| (*op, r)))
    .ok_or_else(|| invalid("unknown operator"))?;

    let aggregation = parse_aggregation(lhs).ok_or_else(|| invalid("unknown aggregation"))?;
    let kind = metric_kind(&metric.name).ok_or_else(|| invalid("unknown metric"))?;
    if !kind.supports(aggregation) {
        return Err(invalid(&format!(
            "'{}' is not available, use one of: {}",
            aggregation,
            kind.aggregations()
        )));
    }

    let value = parse_value(rhs).ok_or_else(|| invalid("value is not a number"))?;

    Ok(ThresholdExpr {
        aggregation,
        operator,
        value,
        source: source.trim().to_string(),
    })
}

fn parse_aggregation(s: &str) -> Option<Aggregation> {
    match s {
        "rate" => Some(Aggregation::Rate),
        "count" => Some(Aggregation::Count),
        "avg" => Some(Aggregation::Avg),
        "min" => Some(Aggregation::Min),
        "max" => Some(Aggregation::Max),
        "med" => Some(Aggregation::Med),
        "value" => Some(Aggregation::Value),
        _ => {
            let p: f64 = s.strip_prefix("p(")?.strip_suffix(')')?.parse().ok()?;
            (p > 0.0 && p <= 100.0).then_some(Aggregation::Percentile(p))
        }
    }
}

// Trend values are compared in milliseconds; `s` suffix is converted.
fn parse_value(s: &str) -> Option<f64> {
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse().ok()
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<f64>().ok().map(|v| v * 1000.0)
    } else {
        s.parse().ok()
    }
}

pub fn evaluate_thresholds(thresholds: &[Threshold], metrics: &AggregateMetrics) -> ThresholdReport {
    let results: Vec<ThresholdResult> = thresholds
        .iter()
        .map(|t| evaluate_threshold(t, metrics))
        .collect();
    let passed = results.iter().all(|r| r.passed || r.informational);
    ThresholdReport { passed, results }
}

/// Mid-run check of `abort_on_fail` thresholds whose delay has passed.
/// Returns the first one that currently fails.
pub fn first_abort_failure(thresholds: &[Threshold], metrics: &AggregateMetrics) -> Option<ThresholdResult> {
    thresholds
        .iter()
        .filter(|t| t.abort_on_fail && !t.informational && metrics.elapsed >= t.delay_abort_eval)
        .map(|t| evaluate_threshold(t, metrics))
        // Mid-run, a metric with no samples yet is not grounds to abort
        .find(|r| !r.passed && r.actual.is_some())
}

fn evaluate_threshold(threshold: &Threshold, metrics: &AggregateMetrics) -> ThresholdResult {
    let actual = metrics.value(&threshold.metric, threshold.expr.aggregation);
    // No value means the condition cannot be shown to hold
    let passed = actual
        .map(|v| threshold.expr.operator.evaluate(v, threshold.expr.value))
        .unwrap_or(false);

    ThresholdResult {
        metric: threshold.metric.to_string(),
        condition: threshold.expr.source.clone(),
        actual,
        passed,
        informational: threshold.informational,
    }
}

pub fn print_threshold_results(report: &ThresholdReport) {
    if report.results.is_empty() {
        return;
    }

    println!("\n{}", "=".repeat(60));
    println!("THRESHOLDS");
    println!("{}", "=".repeat(60));

    for result in &report.results {
        let status = match (result.passed, result.informational) {
            (true, _) => paint(Colour::Green, "✓ PASS"),
            (false, true) => paint(Colour::Yellow, "! INFO"),
            (false, false) => paint(Colour::Red, "✗ FAIL"),
        };

        let actual_str = match result.actual {
            Some(v) => format_metric_value(&result.metric, v),
            None => "no data".to_string(),
        };
        println!(
            "  {} {} {} (actual: {})",
            status, result.metric, result.condition, actual_str
        );
    }

    println!();
    if report.passed {
        println!("{}", paint(Colour::Green, "All thresholds passed."));
    } else {
        println!(
            "{}",
            paint(Colour::Red, "Thresholds failed! Exiting with code 4.")
        );
    }
}

fn format_metric_value(metric: &str, value: f64) -> String {
    if metric.contains("duration") {
        format!("{:.2}ms", value)
    } else if metric.starts_with("http_req_failed") || metric.starts_with("checks") {
        format!("{:.4}", value)
    } else {
        format!("{:.2}", value)
    }
}
