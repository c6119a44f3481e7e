use crate::cli::RunArgs;
use crate::engine::{parse_expr, parse_selector};
use crate::error::ConfigError;
use crate::types::{
    Check, CheckCondition, ExecutorKind, HttpSettings, Pacing, RequestSpec, RunConfig,
    ScenarioConfig, Stage, Tags, Threshold,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;

const DEFAULT_GRACEFUL_RAMP_DOWN: Duration = Duration::from_secs(30);
const AD_HOC_SCENARIO: &str = "default";

#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioToml>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<ThresholdToml>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Defaults {
    pub base_url: Option<String>,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub connect_timeout: Option<Duration>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub http2: bool,
    pub follow_redirects: Option<bool>,
    #[serde(default)]
    pub disable_keepalive: bool,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Deserialize, Default)]
pub struct ScenarioToml {
    pub executor: Option<ExecutorKind>,
    pub vus: Option<u32>,
    #[serde(default, with = "humantime_serde::option")]
    pub duration: Option<Duration>,
    pub start_vus: Option<u32>,
    #[serde(default)]
    pub stages: Vec<StageToml>,
    #[serde(default, with = "humantime_serde::option")]
    pub start_time: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub graceful_ramp_down: Option<Duration>,
    pub max_vus: Option<u32>,
    pub pacing: Option<PacingToml>,
    #[serde(default)]
    pub requests: Vec<RequestToml>,
    #[serde(default)]
    pub checks: Vec<CheckToml>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Deserialize)]
pub struct StageToml {
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub target: u32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PacingToml {
    Fixed(#[serde(with = "humantime_serde")] Duration),
    Uniform {
        #[serde(with = "humantime_serde")]
        min: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
}

#[derive(Debug, Deserialize)]
pub struct RequestToml {
    pub name: Option<String>,
    pub method: Option<String>,
    pub url: String,
    #[serde(default)]
    pub query: BTreeMap<String, toml::Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub tags: Tags,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct CheckToml {
    pub name: Option<String>,
    pub condition: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ThresholdToml {
    Expr(String),
    Detailed {
        threshold: String,
        #[serde(default)]
        abort_on_fail: bool,
        #[serde(default, with = "humantime_serde::option")]
        delay_abort_eval: Option<Duration>,
        #[serde(default)]
        informational: bool,
    },
}

pub fn load_config(path: &Path, overrides: &HashMap<String, String>) -> Result<TomlConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content, overrides)
}

pub fn parse_config(content: &str, overrides: &HashMap<String, String>) -> Result<TomlConfig, ConfigError> {
    let content = interpolate_env_vars(content, overrides)?;
    Ok(toml::from_str(&content)?)
}

/// Expand `${VAR}` and `${VAR:-default}`. `overrides` win over the process environment.
fn interpolate_env_vars(content: &str, overrides: &HashMap<String, String>) -> Result<String, ConfigError> {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}").expect("static regex is valid");
    let mut result = String::with_capacity(content.len());
    let mut last = 0;

    for cap in re.captures_iter(content) {
        let (Some(full_match), Some(var_expr)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        let (var_name, default) = match var_expr.as_str().find(":-") {
            Some(pos) => (&var_expr.as_str()[..pos], Some(&var_expr.as_str()[pos + 2..])),
            None => (var_expr.as_str(), None),
        };

        let value = match overrides.get(var_name) {
            Some(v) => v.clone(),
            None => match std::env::var(var_name) {
                Ok(v) => v,
                Err(_) => match default {
                    Some(d) => d.to_string(),
                    None => return Err(ConfigError::MissingEnvVar(var_name.to_string())),
                },
            },
        };

        result.push_str(&content[last..full_match.start()]);
        result.push_str(&value);
        last = full_match.end();
    }

    result.push_str(&content[last..]);
    Ok(result)
}

pub fn parse_env_overrides(entries: &[String]) -> Result<HashMap<String, String>, ConfigError> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(ConfigError::InvalidEnvEntry(entry.clone())),
        })
        .collect()
}

/// Parse `20s:10` into a stage.
pub fn parse_stage(s: &str) -> Result<Stage, ConfigError> {
    let (duration, target) = s
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::InvalidStage(s.to_string()))?;
    let duration = humantime::parse_duration(duration.trim())
        .map_err(|_| ConfigError::InvalidStage(s.to_string()))?;
    let target = target
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidStage(s.to_string()))?;
    Ok(Stage { duration, target })
}

/// Parse `none`, `100ms` or `100ms..500ms`.
pub fn parse_pacing(s: &str) -> Result<Pacing, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidScenario {
        scenario: "--pacing".to_string(),
        reason: format!("invalid pacing '{}': {}", s, reason),
    };

    let s = s.trim();
    if s.eq_ignore_ascii_case("none") {
        return Ok(Pacing::None);
    }
    match s.split_once("..") {
        Some((min, max)) => {
            let min = humantime::parse_duration(min.trim()).map_err(|e| invalid(&e.to_string()))?;
            let max = humantime::parse_duration(max.trim()).map_err(|e| invalid(&e.to_string()))?;
            uniform_pacing(min, max).map_err(|reason| invalid(&reason))
        }
        None => {
            let d = humantime::parse_duration(s).map_err(|e| invalid(&e.to_string()))?;
            Ok(fixed_pacing(d))
        }
    }
}

fn fixed_pacing(d: Duration) -> Pacing {
    if d.is_zero() { Pacing::None } else { Pacing::Fixed(d) }
}

fn uniform_pacing(min: Duration, max: Duration) -> Result<Pacing, String> {
    if max < min {
        return Err(format!("max {:?} is below min {:?}", max, min));
    }
    Ok(Pacing::Uniform { min, max })
}

/// Parse a check condition such as `status == 200`, `status in [200, 201]`,
/// `status < 400`, `body contains 'ok'` or `body matches '^\{'`.
pub fn parse_check(condition: &str) -> Result<CheckCondition, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidCheck {
        condition: condition.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = condition.trim();
    let (subject, rest) = trimmed
        .split_once(char::is_whitespace)
        .ok_or_else(|| invalid("expected '<status|body> <operator> <value>'"))?;
    let rest = rest.trim_start();

    match subject {
        "status" => {
            let parse_code = |s: &str| {
                s.trim()
                    .parse::<u16>()
                    .map_err(|_| invalid(&format!("'{}' is not a status code", s.trim())))
            };
            if let Some(list) = rest.strip_prefix("in") {
                let list = list
                    .trim()
                    .strip_prefix('[')
                    .and_then(|l| l.strip_suffix(']'))
                    .ok_or_else(|| invalid("expected a list like [200, 201]"))?;
                let codes = list
                    .split(',')
                    .filter(|c| !c.trim().is_empty())
                    .map(parse_code)
                    .collect::<Result<Vec<_>, _>>()?;
                if codes.is_empty() {
                    return Err(invalid("status list is empty"));
                }
                Ok(CheckCondition::StatusIn(codes))
            } else if let Some(code) = rest.strip_prefix("==") {
                Ok(CheckCondition::StatusEquals(parse_code(code)?))
            } else if let Some(code) = rest.strip_prefix('<') {
                Ok(CheckCondition::StatusLt(parse_code(code)?))
            } else if let Some(code) = rest.strip_prefix('>') {
                Ok(CheckCondition::StatusGt(parse_code(code)?))
            } else {
                Err(invalid("status supports ==, <, > and in"))
            }
        }
        "body" => {
            let (op, operand) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| invalid("expected 'body <contains|!contains|matches> <text>'"))?;
            let operand = unquote(operand.trim());
            match op {
                "contains" => Ok(CheckCondition::BodyContains(operand.to_string())),
                "!contains" => Ok(CheckCondition::BodyNotContains(operand.to_string())),
                "matches" => regex_lite::Regex::new(operand)
                    .map(CheckCondition::BodyMatches)
                    .map_err(|e| invalid(&e.to_string())),
                other => Err(invalid(&format!("unknown body operator '{}'", other))),
            }
        }
        other => Err(invalid(&format!("unknown check subject '{}'", other))),
    }
}

fn unquote(s: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|s| s.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}

pub fn parse_header(h: &str) -> Result<(String, String), ConfigError> {
    match h.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ConfigError::InvalidHeader(h.to_string())),
    }
}

fn parse_method(m: &str) -> Result<reqwest::Method, ConfigError> {
    m.to_uppercase()
        .parse()
        .map_err(|_| ConfigError::InvalidMethod(m.to_string()))
}

fn query_value(scenario: &str, key: &str, value: &toml::Value) -> Result<String, ConfigError> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        _ => Err(ConfigError::InvalidScenario {
            scenario: scenario.to_string(),
            reason: format!("query parameter '{}' must be a string, number or boolean", key),
        }),
    }
}

fn resolve_url(scenario: &str, base_url: Option<&str>, url: &str) -> Result<String, ConfigError> {
    let full = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        match base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/')),
            None => {
                return Err(ConfigError::InvalidUrl {
                    scenario: scenario.to_string(),
                    url: url.to_string(),
                });
            }
        }
    };

    reqwest::Url::parse(&full).map_err(|_| ConfigError::InvalidUrl {
        scenario: scenario.to_string(),
        url: full.clone(),
    })?;
    Ok(full)
}

fn build_scenario(name: &str, toml: ScenarioToml, defaults: &Defaults) -> Result<ScenarioConfig, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidScenario {
        scenario: name.to_string(),
        reason,
    };

    let executor = toml.executor.unwrap_or(if toml.stages.is_empty() {
        ExecutorKind::ConstantVus
    } else {
        ExecutorKind::RampingVus
    });

    let (start_vus, stages) = match executor {
        ExecutorKind::ConstantVus => {
            if !toml.stages.is_empty() {
                return Err(invalid("constant-vus takes 'vus' and 'duration', not 'stages'".into()));
            }
            let vus = toml.vus.unwrap_or(1);
            let duration = toml
                .duration
                .ok_or_else(|| invalid("constant-vus requires 'duration'".into()))?;
            (vus, vec![Stage { duration, target: vus }])
        }
        ExecutorKind::RampingVus => {
            if toml.vus.is_some() || toml.duration.is_some() {
                return Err(invalid("ramping-vus takes 'stages', not 'vus'/'duration'".into()));
            }
            let stages = toml
                .stages
                .into_iter()
                .map(|s| Stage {
                    duration: s.duration,
                    target: s.target,
                })
                .collect();
            (toml.start_vus.unwrap_or(0), stages)
        }
    };

    let pacing = match toml.pacing {
        None => Pacing::None,
        Some(PacingToml::Fixed(d)) => fixed_pacing(d),
        Some(PacingToml::Uniform { min, max }) => uniform_pacing(min, max).map_err(invalid)?,
    };

    let requests = toml
        .requests
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            let query = r
                .query
                .iter()
                .map(|(k, v)| Ok((k.clone(), query_value(name, k, v)?)))
                .collect::<Result<Vec<_>, ConfigError>>()?;
            let mut headers: Vec<(String, String)> =
                r.headers.into_iter().collect();
            for (k, v) in &defaults.headers {
                if !headers.iter().any(|(hk, _)| hk.eq_ignore_ascii_case(k)) {
                    headers.push((k.clone(), v.clone()));
                }
            }
            Ok(RequestSpec {
                name: r.name.unwrap_or_else(|| format!("{}_{}", name, i + 1)),
                method: parse_method(r.method.as_deref().unwrap_or("GET"))?,
                url: resolve_url(name, defaults.base_url.as_deref(), &r.url)?,
                query,
                headers,
                body: r.body,
                weight: r.weight,
                tags: r.tags,
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    let checks = toml
        .checks
        .into_iter()
        .map(|c| {
            Ok(Check {
                condition: parse_check(&c.condition)?,
                name: c.name.unwrap_or(c.condition),
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    let mut tags = defaults.tags.clone();
    tags.extend(toml.tags);

    Ok(ScenarioConfig {
        name: name.to_string(),
        executor,
        start_vus,
        stages,
        start_time: toml.start_time.unwrap_or(Duration::ZERO),
        graceful_ramp_down: toml.graceful_ramp_down.unwrap_or(DEFAULT_GRACEFUL_RAMP_DOWN),
        max_vus: toml.max_vus,
        pacing,
        requests,
        checks,
        tags,
    })
}

fn build_ad_hoc_scenario(url: &str, args: &RunArgs, defaults: &Defaults) -> Result<ScenarioConfig, ConfigError> {
    let (executor, start_vus, stages) = if args.stages.is_empty() {
        (
            ExecutorKind::ConstantVus,
            args.vus,
            vec![Stage {
                duration: args.duration,
                target: args.vus,
            }],
        )
    } else {
        let stages = args
            .stages
            .iter()
            .map(|s| parse_stage(s))
            .collect::<Result<Vec<_>, _>>()?;
        (ExecutorKind::RampingVus, 0, stages)
    };

    let headers: Vec<(String, String)> = defaults
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let checks = args
        .checks
        .iter()
        .map(|c| {
            Ok(Check {
                name: c.clone(),
                condition: parse_check(c)?,
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(ScenarioConfig {
        name: AD_HOC_SCENARIO.to_string(),
        executor,
        start_vus,
        stages,
        start_time: Duration::ZERO,
        graceful_ramp_down: args.graceful_ramp_down,
        max_vus: None,
        pacing: Pacing::None,
        requests: vec![RequestSpec {
            name: AD_HOC_SCENARIO.to_string(),
            method: parse_method(&args.method)?,
            url: resolve_url(AD_HOC_SCENARIO, defaults.base_url.as_deref(), url)?,
            query: Vec::new(),
            headers,
            body: args.body.clone(),
            weight: 1,
            tags: Tags::new(),
        }],
        checks,
        tags: defaults.tags.clone(),
    })
}

fn build_threshold(metric: &str, toml: &ThresholdToml) -> Result<Threshold, ConfigError> {
    let selector = parse_selector(metric)?;
    let (source, abort_on_fail, delay_abort_eval, informational) = match toml {
        ThresholdToml::Expr(expr) => (expr.as_str(), false, None, false),
        ThresholdToml::Detailed {
            threshold,
            abort_on_fail,
            delay_abort_eval,
            informational,
        } => (threshold.as_str(), *abort_on_fail, *delay_abort_eval, *informational),
    };
    let expr = parse_expr(&selector, source)?;
    Ok(Threshold {
        metric: selector,
        expr,
        informational,
        abort_on_fail,
        delay_abort_eval: delay_abort_eval.unwrap_or(Duration::ZERO),
    })
}

/// Parse `http_req_duration=p(95)<800` from the command line.
fn parse_cli_threshold(s: &str) -> Result<Threshold, ConfigError> {
    // Split on the first '=' that is not part of an operator
    let split = s.char_indices().find(|&(i, c)| {
        c == '=' && !matches!(s[..i].chars().last(), Some('<' | '>' | '!' | '=')) && !s[i + 1..].starts_with('=')
    });
    let Some((pos, _)) = split else {
        return Err(ConfigError::InvalidThreshold {
            metric: s.to_string(),
            expr: String::new(),
            reason: "expected METRIC=EXPR".to_string(),
        });
    };
    build_threshold(&s[..pos], &ThresholdToml::Expr(s[pos + 1..].to_string()))
}

/// Build the run configuration from CLI arguments and the optional config file.
pub fn build_run_config(args: &RunArgs) -> Result<RunConfig, ConfigError> {
    let overrides = parse_env_overrides(&args.env)?;
    let toml = match &args.config {
        Some(path) => load_config(path, &overrides)?,
        None => TomlConfig::default(),
    };
    let TomlConfig {
        defaults,
        scenarios: scenario_tables,
        thresholds: threshold_tables,
    } = toml;

    let mut defaults = defaults;
    for h in &args.headers {
        let (k, v) = parse_header(h)?;
        defaults.headers.insert(k, v);
    }

    let mut scenarios = match &args.url {
        Some(url) => vec![build_ad_hoc_scenario(url, args, &defaults)?],
        None => scenario_tables
            .into_iter()
            .map(|(name, s)| build_scenario(&name, s, &defaults))
            .collect::<Result<Vec<_>, _>>()?,
    };

    if !args.scenarios.is_empty() {
        let available = scenarios
            .iter()
            .map(|s| s.name.clone())
            .collect::<Vec<_>>()
            .join(", ");
        for wanted in &args.scenarios {
            if !scenarios.iter().any(|s| &s.name == wanted) {
                return Err(ConfigError::UnknownScenario {
                    name: wanted.clone(),
                    available,
                });
            }
        }
        scenarios.retain(|s| args.scenarios.contains(&s.name));
    }

    if let Some(pacing) = &args.pacing {
        let pacing = parse_pacing(pacing)?;
        for scenario in &mut scenarios {
            scenario.pacing = pacing;
        }
    }
    if let Some(max_vus) = args.max_vus {
        for scenario in &mut scenarios {
            scenario.max_vus = Some(max_vus);
        }
    }

    let mut thresholds = Vec::new();
    for (metric, exprs) in &threshold_tables {
        for expr in exprs {
            thresholds.push(build_threshold(metric, expr)?);
        }
    }
    for t in &args.thresholds {
        thresholds.push(parse_cli_threshold(t)?);
    }

    let http = HttpSettings {
        timeout: args.timeout.or(defaults.timeout).unwrap_or(HttpSettings::default().timeout),
        connect_timeout: args
            .connect_timeout
            .or(defaults.connect_timeout)
            .unwrap_or(HttpSettings::default().connect_timeout),
        insecure: args.insecure || defaults.insecure,
        http2: args.http2 || defaults.http2,
        follow_redirects: !args.no_follow_redirects && defaults.follow_redirects.unwrap_or(true),
        disable_keepalive: args.disable_keepalive || defaults.disable_keepalive,
    };

    let config = RunConfig {
        scenarios,
        thresholds,
        http,
        fail_fast: args.fail_fast,
    };
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &RunConfig) -> Result<(), ConfigError> {
    if config.scenarios.is_empty() {
        return Err(ConfigError::NoScenarios);
    }

    for scenario in &config.scenarios {
        let invalid = |reason: &str| ConfigError::InvalidScenario {
            scenario: scenario.name.clone(),
            reason: reason.to_string(),
        };
        if scenario.stages.is_empty() {
            return Err(invalid("at least one stage is required"));
        }
        if scenario.stages_duration().is_zero() {
            return Err(invalid("stages must have a non-zero total duration"));
        }
        if scenario.requests.is_empty() {
            return Err(invalid("at least one request is required"));
        }
        if scenario.requests.iter().all(|r| r.weight == 0) {
            return Err(invalid("at least one request needs a non-zero weight"));
        }
        if scenario.max_vus == Some(0) {
            return Err(invalid("max_vus must be at least 1"));
        }
    }

    Ok(())
}
