use crate::engine::worker::{ScenarioPlan, VirtualUser, VuState, VuStateCell};
use crate::error::VuError;
use crate::types::Observation;
use reqwest::Client;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DRAIN_POLL: Duration = Duration::from_millis(20);

struct VuHandle {
    id: u32,
    stop: CancellationToken,
    state: VuStateCell,
    task: JoinHandle<()>,
}

impl VuHandle {
    fn request_stop(&self) {
        self.state.advance(VuState::Stopping);
        self.stop.cancel();
    }

    fn is_done(&self) -> bool {
        self.state.get() == VuState::Stopped || self.task.is_finished()
    }
}

/// The set of VUs belonging to one scenario.
///
/// Running VUs are stopped newest-first. A stopped VU has `graceful` to finish
/// its current iteration; after that it is detached and counted as interrupted.
pub struct VuPool {
    plan: Arc<ScenarioPlan>,
    client: Client,
    result_tx: mpsc::Sender<Observation>,
    run_token: CancellationToken,
    capacity: u32,
    graceful: Duration,
    next_id: u32,
    running: Vec<VuHandle>,
    stopping: Vec<(Instant, VuHandle)>,
    active: Arc<AtomicU32>,
    interrupted: u64,
}

impl VuPool {
    pub fn new(
        plan: Arc<ScenarioPlan>,
        client: Client,
        result_tx: mpsc::Sender<Observation>,
        run_token: CancellationToken,
        capacity: u32,
        graceful: Duration,
    ) -> Self {
        Self {
            plan,
            client,
            result_tx,
            run_token,
            capacity,
            graceful,
            next_id: 0,
            running: Vec::with_capacity(capacity as usize),
            stopping: Vec::new(),
            active: Arc::new(AtomicU32::new(0)),
            interrupted: 0,
        }
    }

    /// Live count of VUs that are running or finishing an iteration.
    pub fn active_counter(&self) -> Arc<AtomicU32> {
        self.active.clone()
    }

    pub fn running(&self) -> u32 {
        self.running.len() as u32
    }

    fn start_one(&mut self) -> Result<(), VuError> {
        if self.running() >= self.capacity {
            return Err(VuError::CapacityExhausted {
                capacity: self.capacity,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        let stop = self.run_token.child_token();
        let state = VuStateCell::new();
        let vu = VirtualUser::new(
            id,
            self.plan.clone(),
            self.client.clone(),
            self.result_tx.clone(),
            stop.clone(),
            state.clone(),
        );
        let task = tokio::spawn(vu.run());
        self.running.push(VuHandle {
            id,
            stop,
            state,
            task,
        });
        Ok(())
    }

    fn stop_one(&mut self, now: Instant) {
        if let Some(handle) = self.running.pop() {
            handle.request_stop();
            self.stopping.push((now + self.graceful, handle));
        }
    }

    /// Start or stop VUs until `target` are running. Returns the start error
    /// if the pool could not reach the target.
    pub fn scale_to(&mut self, target: u32) -> Result<(), VuError> {
        let now = Instant::now();
        while self.running() > target {
            self.stop_one(now);
        }
        let mut result = Ok(());
        while self.running() < target {
            if let Err(e) = self.start_one() {
                result = Err(e);
                break;
            }
        }
        self.reap(now);
        result
    }

    /// Forget VUs that have finished and detach the ones past their deadline.
    pub fn reap(&mut self, now: Instant) {
        let mut kept = Vec::with_capacity(self.stopping.len());
        for (deadline, handle) in self.stopping.drain(..) {
            if handle.is_done() {
                continue;
            }
            if now >= deadline {
                tracing::warn!(
                    "VU {} ({}) did not finish its iteration within {:?}, detaching",
                    handle.id,
                    self.plan.name,
                    self.graceful
                );
                self.interrupted += 1;
                // Dropping the JoinHandle detaches the task; its request runs to completion or timeout
                continue;
            }
            kept.push((deadline, handle));
        }
        self.stopping = kept;

        // Runs that were cancelled at the parent token drop out of `running` here
        let mut still_running = Vec::with_capacity(self.running.len());
        for handle in self.running.drain(..) {
            if !handle.is_done() {
                still_running.push(handle);
            }
        }
        self.running = still_running;

        self.active.store(
            (self.running.len() + self.stopping.len()) as u32,
            Ordering::Relaxed,
        );
    }

    /// Stop everything and wait out the graceful window.
    pub async fn drain(&mut self) -> u64 {
        let now = Instant::now();
        while !self.running.is_empty() {
            self.stop_one(now);
        }
        loop {
            self.reap(Instant::now());
            if self.stopping.is_empty() {
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        self.interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ExecutorKind, HttpSettings, Pacing, RequestSpec, ScenarioConfig, Stage, Tags,
    };
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plan(url: String) -> Arc<ScenarioPlan> {
        Arc::new(ScenarioPlan::new(&ScenarioConfig {
            name: "pool".to_string(),
            executor: ExecutorKind::RampingVus,
            start_vus: 0,
            stages: vec![Stage {
                duration: Duration::from_secs(1),
                target: 4,
            }],
            start_time: Duration::ZERO,
            graceful_ramp_down: Duration::from_millis(200),
            max_vus: None,
            pacing: Pacing::Fixed(Duration::from_millis(10)),
            requests: vec![RequestSpec {
                name: "root".to_string(),
                method: reqwest::Method::GET,
                url,
                query: vec![],
                headers: vec![],
                body: None,
                weight: 1,
                tags: Tags::new(),
            }],
            checks: vec![],
            tags: Tags::new(),
        }))
    }

    async fn pool_for(server: &MockServer, capacity: u32, graceful: Duration) -> (VuPool, mpsc::Receiver<Observation>) {
        let client = crate::http::create_client(&HttpSettings::default(), capacity).unwrap();
        let (tx, rx) = mpsc::channel(10_000);
        let pool = VuPool::new(
            plan(server.uri()),
            client,
            tx,
            CancellationToken::new(),
            capacity,
            graceful,
        );
        (pool, rx)
    }

    #[tokio::test]
    async fn scales_up_and_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let (mut pool, _rx) = pool_for(&server, 10, Duration::from_secs(1)).await;

        pool.scale_to(6).unwrap();
        assert_eq!(pool.running(), 6);
        pool.scale_to(2).unwrap();
        assert_eq!(pool.running(), 2);

        assert_eq!(pool.drain().await, 0);
        assert_eq!(pool.running(), 0);
        assert_eq!(pool.active_counter().load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn capacity_shortfall_is_reported_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let (mut pool, _rx) = pool_for(&server, 3, Duration::from_secs(1)).await;

        let err = pool.scale_to(5).unwrap_err();
        assert_eq!(err, VuError::CapacityExhausted { capacity: 3 });
        assert_eq!(pool.running(), 3);
        pool.drain().await;
    }

    #[tokio::test]
    async fn slow_iterations_are_detached_after_graceful_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;
        let (mut pool, _rx) = pool_for(&server, 2, Duration::from_millis(200)).await;

        pool.scale_to(2).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let interrupted = pool.drain().await;
        assert_eq!(interrupted, 2);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(pool.active_counter().load(Ordering::Relaxed), 0);
    }
}
