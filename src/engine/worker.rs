use crate::http::execute_request;
use crate::types::{
    CheckCondition, CheckOutcome, IterationSample, Observation, Pacing, RequestSpec, ScenarioConfig,
    Tags,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VuState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

/// Shared view of one VU's lifecycle state.
#[derive(Debug, Clone, Default)]
pub struct VuStateCell(Arc<AtomicU8>);

impl VuStateCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(VuState::Idle as u8)))
    }

    pub fn get(&self) -> VuState {
        match self.0.load(Ordering::Acquire) {
            0 => VuState::Idle,
            1 => VuState::Running,
            2 => VuState::Stopping,
            _ => VuState::Stopped,
        }
    }

    /// Moves forward only: Idle → Running → Stopping → Stopped.
    pub fn advance(&self, to: VuState) {
        self.0.fetch_max(to as u8, Ordering::AcqRel);
    }
}

struct PlannedRequest {
    spec: RequestSpec,
    tags: Arc<Tags>,
}

/// Immutable per-scenario data every VU of that scenario reads.
pub struct ScenarioPlan {
    pub name: String,
    requests: Vec<PlannedRequest>,
    total_weight: u32,
    checks: Vec<(Arc<str>, CheckCondition)>,
    capture_body: bool,
    pacing: Pacing,
    iteration_tags: Arc<Tags>,
}

impl ScenarioPlan {
    pub fn new(scenario: &ScenarioConfig) -> Self {
        let mut base = scenario.tags.clone();
        base.insert("scenario".to_string(), scenario.name.clone());

        let requests: Vec<PlannedRequest> = scenario
            .requests
            .iter()
            .map(|spec| {
                let mut tags = base.clone();
                tags.insert("name".to_string(), spec.name.clone());
                tags.insert("method".to_string(), spec.method.to_string());
                tags.insert("url".to_string(), spec.url.clone());
                tags.extend(spec.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
                PlannedRequest {
                    spec: spec.clone(),
                    tags: Arc::new(tags),
                }
            })
            .collect();

        Self {
            name: scenario.name.clone(),
            total_weight: requests.iter().map(|r| r.spec.weight).sum(),
            requests,
            checks: scenario
                .checks
                .iter()
                .map(|c| (Arc::from(c.name.as_str()), c.condition.clone()))
                .collect(),
            capture_body: scenario.checks.iter().any(|c| c.condition.needs_body()),
            pacing: scenario.pacing,
            iteration_tags: Arc::new(base),
        }
    }

    fn pick<R: Rng>(&self, rng: &mut R) -> Option<&PlannedRequest> {
        if self.requests.len() <= 1 || self.total_weight == 0 {
            return self.requests.first();
        }
        let mut roll = rng.random_range(0..self.total_weight);
        for request in &self.requests {
            if roll < request.spec.weight {
                return Some(request);
            }
            roll -= request.spec.weight;
        }
        self.requests.last()
    }
}

/// One simulated user running iterations until its stop token fires.
pub struct VirtualUser {
    id: u32,
    plan: Arc<ScenarioPlan>,
    client: Client,
    result_tx: mpsc::Sender<Observation>,
    stop: CancellationToken,
    state: VuStateCell,
}

impl VirtualUser {
    pub fn new(
        id: u32,
        plan: Arc<ScenarioPlan>,
        client: Client,
        result_tx: mpsc::Sender<Observation>,
        stop: CancellationToken,
        state: VuStateCell,
    ) -> Self {
        Self {
            id,
            plan,
            client,
            result_tx,
            stop,
            state,
        }
    }

    pub async fn run(self) {
        self.state.advance(VuState::Running);
        tracing::debug!("VU {} ({}) started", self.id, self.plan.name);
        let mut rng = StdRng::from_os_rng();

        loop {
            // The only place a stop signal is honoured; in-flight requests always complete
            if self.stop.is_cancelled() {
                break;
            }

            let started = Instant::now();
            if !self.iterate(&mut rng).await {
                break;
            }

            let delay = self.plan.pacing.next_delay(&mut rng);
            if !delay.is_zero() {
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = self.stop.cancelled() => {}
                }
            }

            let iteration = Observation::Iteration(IterationSample {
                duration: started.elapsed(),
                tags: Arc::clone(&self.plan.iteration_tags),
            });
            if self.result_tx.send(iteration).await.is_err() {
                break;
            }
        }

        self.state.advance(VuState::Stopping);
        self.state.advance(VuState::Stopped);
        tracing::debug!("VU {} ({}) stopped", self.id, self.plan.name);
    }

    /// Returns false once the collector side has gone away.
    async fn iterate(&self, rng: &mut StdRng) -> bool {
        let Some(request) = self.plan.pick(rng) else {
            return false;
        };

        let response =
            execute_request(&self.client, &request.spec, &request.tags, self.plan.capture_body).await;

        let status = response.sample.status;
        let body = response.body.as_deref().unwrap_or("");
        let outcomes: Vec<CheckOutcome> = self
            .plan
            .checks
            .iter()
            .map(|(name, condition)| CheckOutcome {
                name: Arc::clone(name),
                passed: condition.evaluate(status, body),
                tags: Arc::clone(&request.tags),
            })
            .collect();

        if self
            .result_tx
            .send(Observation::Request(response.sample))
            .await
            .is_err()
        {
            return false;
        }
        for outcome in outcomes {
            if self.result_tx.send(Observation::Check(outcome)).await.is_err() {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Check, ExecutorKind, HttpSettings, Stage};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(name: &str, url: String, weight: u32) -> RequestSpec {
        RequestSpec {
            name: name.to_string(),
            method: reqwest::Method::GET,
            url,
            query: vec![],
            headers: vec![],
            body: None,
            weight,
            tags: Tags::new(),
        }
    }

    fn scenario(requests: Vec<RequestSpec>, checks: Vec<Check>) -> ScenarioConfig {
        ScenarioConfig {
            name: "smoke".to_string(),
            executor: ExecutorKind::ConstantVus,
            start_vus: 1,
            stages: vec![Stage {
                duration: Duration::from_secs(1),
                target: 1,
            }],
            start_time: Duration::ZERO,
            graceful_ramp_down: Duration::from_secs(1),
            max_vus: None,
            pacing: Pacing::Fixed(Duration::from_millis(20)),
            requests,
            checks,
            tags: Tags::new(),
        }
    }

    #[test]
    fn state_only_moves_forward() {
        let state = VuStateCell::new();
        assert_eq!(state.get(), VuState::Idle);
        state.advance(VuState::Stopping);
        state.advance(VuState::Running);
        assert_eq!(state.get(), VuState::Stopping);
        state.advance(VuState::Stopped);
        assert_eq!(state.get(), VuState::Stopped);
    }

    #[test]
    fn weighted_pick_follows_weights() {
        let plan = ScenarioPlan::new(&scenario(
            vec![
                request("health", "http://localhost/health".into(), 3),
                request("search", "http://localhost/search".into(), 1),
            ],
            vec![],
        ));
        let mut rng = StdRng::seed_from_u64(7);
        let health = (0..4000)
            .filter(|_| plan.pick(&mut rng).unwrap().spec.name == "health")
            .count();
        // Expect ~3000
        assert!((2700..3300).contains(&health), "health picked {} times", health);
    }

    #[test]
    fn request_tags_include_scenario_and_name() {
        let plan = ScenarioPlan::new(&scenario(
            vec![request("health", "http://localhost/health".into(), 1)],
            vec![],
        ));
        let tags = &plan.requests[0].tags;
        assert_eq!(tags.get("scenario").map(String::as_str), Some("smoke"));
        assert_eq!(tags.get("name").map(String::as_str), Some("health"));
        assert_eq!(tags.get("method").map(String::as_str), Some("GET"));
    }

    #[tokio::test]
    async fn vu_emits_samples_checks_and_stops_between_iterations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let checks = vec![
            Check {
                name: "status is 200".to_string(),
                condition: CheckCondition::StatusEquals(200),
            },
            Check {
                name: "body says ok".to_string(),
                condition: CheckCondition::BodyContains("ok".to_string()),
            },
        ];
        let plan = Arc::new(ScenarioPlan::new(&scenario(
            vec![request("health", format!("{}/health", server.uri()), 1)],
            checks,
        )));
        let client = crate::http::create_client(&HttpSettings::default(), 1).unwrap();
        let (tx, mut rx) = mpsc::channel(1024);
        let stop = CancellationToken::new();
        let state = VuStateCell::new();

        let vu = VirtualUser::new(0, plan, client, tx, stop.clone(), state.clone());
        let handle = tokio::spawn(vu.run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(state.get(), VuState::Running);
        stop.cancel();
        handle.await.unwrap();
        assert_eq!(state.get(), VuState::Stopped);

        let (mut requests, mut checks, mut iterations) = (0, 0, 0);
        while let Ok(observation) = rx.try_recv() {
            match observation {
                Observation::Request(sample) => {
                    assert_eq!(sample.status, Some(200));
                    requests += 1;
                }
                Observation::Check(outcome) => {
                    assert!(outcome.passed);
                    checks += 1;
                }
                Observation::Iteration(_) => iterations += 1,
            }
        }
        assert!(requests > 0);
        assert_eq!(checks, requests * 2);
        // Every request belongs to exactly one finished iteration
        assert_eq!(iterations, requests);
    }
}
