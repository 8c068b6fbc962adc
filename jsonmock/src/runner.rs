//! Bounded-concurrency replay.
//!
//! Tasks are dispatched in waves of at most `concurrency` tasks; a wave is
//! fully drained before the next one starts.

use crate::{
    configuration::ReplayConfiguration,
    data::ResponseData,
    error::Error,
    http_client::HttpClient,
    replay::{self, Expectation, ReplayTask},
};
use futures::future::join_all;
use std::{
    fmt::{self, Display},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::runtime::Runtime;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Transport(String),
    Status(u16),
    Read(String),
    Validation(Vec<String>),
    Mismatch { expected: String, received: String },
    Aborted(String),
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport(e) => write!(f, "transport error: {}", e),
            FailureReason::Status(status_code) => {
                write!(f, "Failed with HTTP Code {}", status_code)
            }
            FailureReason::Read(e) => write!(f, "unable to read the response: {}", e),
            FailureReason::Validation(errors) => {
                write!(f, "Failed Response validation: {}", errors.join("; "))
            }
            FailureReason::Mismatch { expected, received } => {
                write!(f, "received->{} expected->{}", received, expected)
            }
            FailureReason::Aborted(e) => write!(f, "task aborted: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Passed,
    Failed(FailureReason),
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub index: usize,
    pub wave: usize,
    pub url: String,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub succeeded: u64,
    pub failed: u64,
    pub peak_in_flight: usize,
    pub results: Vec<TaskResult>,
}

impl ReplayReport {
    pub fn attempted(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// A single failed task fails the whole run.
    pub fn passed(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&TaskResult, &FailureReason)> {
        self.results.iter().filter_map(|result| match &result.outcome {
            TaskOutcome::Failed(reason) => Some((result, reason)),
            TaskOutcome::Passed => None,
        })
    }
}

impl Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total requests sent: {}: success {}, failed {}",
            self.attempted(),
            self.succeeded,
            self.failed
        )?;
        for (result, reason) in self.failures() {
            write!(f, "\n<{}:{}> {}: {}", result.wave, result.index, result.url, reason)?;
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let in_flight = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        Self(counters)
    }
}

impl<'a> Drop for InFlight<'a> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Turns a reply into a task outcome.
pub fn classify(reply: Result<ResponseData, Error>, expectation: &Expectation) -> TaskOutcome {
    let response = match reply {
        Ok(response) if response.status_code != 200 => {
            return TaskOutcome::Failed(FailureReason::Status(response.status_code))
        }
        Ok(response) => response,
        Err(Error::UnreadableBody { status_code, .. }) if status_code != 200 => {
            return TaskOutcome::Failed(FailureReason::Status(status_code))
        }
        Err(Error::UnreadableBody { reason, .. }) => {
            return TaskOutcome::Failed(FailureReason::Read(reason))
        }
        Err(Error::Transport(e)) => return TaskOutcome::Failed(FailureReason::Transport(e)),
        Err(e) => return TaskOutcome::Failed(FailureReason::Transport(e.to_string())),
    };

    match expectation {
        Expectation::Schema(schema) => {
            let validation = schema.validate(&response.body);
            if validation.valid {
                TaskOutcome::Passed
            } else {
                TaskOutcome::Failed(FailureReason::Validation(validation.errors))
            }
        }
        Expectation::Verbatim(expected) if *expected == response.body => TaskOutcome::Passed,
        Expectation::Verbatim(expected) => TaskOutcome::Failed(FailureReason::Mismatch {
            expected: expected.clone(),
            received: response.body,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct ReplayRunner {
    client: Arc<dyn HttpClient>,
    concurrency: usize,
    debug: bool,
}

impl ReplayRunner {
    pub fn new(client: Arc<dyn HttpClient>, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// HEAD liveness probe; anything but a 200 aborts the run.
    pub async fn precheck(&self, target: &str) -> Result<(), Error> {
        match self.client.probe(target).await {
            Ok(200) => Ok(()),
            Ok(status_code) => Err(Error::PrecheckFailed(format!(
                "HEAD {} answered {}",
                target, status_code
            ))),
            Err(e) => Err(Error::PrecheckFailed(format!(
                "unable to request HEAD {}: {}",
                target, e
            ))),
        }
    }

    pub async fn run(&self, tasks: Vec<ReplayTask>) -> ReplayReport {
        let counters = Arc::new(Counters::default());
        let mut results = Vec::with_capacity(tasks.len());
        let mut pending = tasks.into_iter().enumerate().peekable();
        let mut wave = 0;

        while pending.peek().is_some() {
            let mut urls = Vec::with_capacity(self.concurrency);
            let mut handles = Vec::with_capacity(self.concurrency);

            for (index, task) in pending.by_ref().take(self.concurrency) {
                urls.push((index, task.url.clone()));
                handles.push(tokio::spawn(Self::check_task(
                    self.client.clone(),
                    counters.clone(),
                    index,
                    wave,
                    task,
                    self.debug,
                )));
            }

            for ((index, url), joined) in urls.into_iter().zip(join_all(handles).await) {
                let outcome = joined.unwrap_or_else(|e| {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                    warn!("<{}:{}> {}: task aborted: {}", wave, index, url, e);
                    TaskOutcome::Failed(FailureReason::Aborted(e.to_string()))
                });

                results.push(TaskResult {
                    index,
                    wave,
                    url,
                    outcome,
                });
            }

            wave += 1;
        }

        let report = ReplayReport {
            succeeded: counters.succeeded.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            peak_in_flight: counters.peak_in_flight.load(Ordering::SeqCst),
            results,
        };
        info!(
            "Total requests sent: {}: success {}, failed {}",
            report.attempted(),
            report.succeeded,
            report.failed
        );

        report
    }

    async fn check_task(
        client: Arc<dyn HttpClient>,
        counters: Arc<Counters>,
        index: usize,
        wave: usize,
        task: ReplayTask,
        debug: bool,
    ) -> TaskOutcome {
        let request_data = task.request_data();
        if debug {
            info!("<{}:{}> Requested: {} {}", wave, index, request_data.method(), task.url);
            if let Some(body) = &request_data.body {
                info!("<{}:{}> Request Body: {}", wave, index, body);
            }
        }

        let reply = {
            let _in_flight = InFlight::enter(&counters);
            client.execute(&request_data).await
        };
        if debug {
            if let Ok(response) = &reply {
                info!("<{}:{}> Received: {}", wave, index, response.body);
            }
        }

        let outcome = classify(reply, &task.expectation);
        match &outcome {
            TaskOutcome::Passed => {
                counters.succeeded.fetch_add(1, Ordering::SeqCst);
                info!("<{}:{}> {}: received and validated", wave, index, task.url);
            }
            TaskOutcome::Failed(reason) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!("<{}:{}> {}: {}", wave, index, task.url, reason);
            }
        }

        outcome
    }
}

/// Reads the data file, plans the tasks, optionally checks that the target is
/// alive, then replays everything.
pub async fn run_replay(configuration: &ReplayConfiguration) -> Result<ReplayReport, Error> {
    info!(
        "-queryStr={} -dataFile={} -checkUp={} -concurrency={}",
        configuration.target(),
        configuration.data_file().display(),
        configuration.check_up(),
        configuration.concurrency()
    );

    let data = tokio::fs::read_to_string(configuration.data_file()).await?;
    let tasks = replay::plan(configuration.target(), &data)?;
    let runner = ReplayRunner::new(configuration.http_client()?, configuration.concurrency())
        .with_debug(configuration.forced_debug());

    if configuration.check_up() {
        runner.precheck(configuration.target()).await?;
    }

    Ok(runner.run(tasks).await)
}

pub fn run_replay_blocking(configuration: &ReplayConfiguration) -> Result<ReplayReport, Error> {
    Runtime::new()?.block_on(run_replay(configuration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::RequestData,
        http_client::ReqwestHttpClient,
        schema::{JsonSchema, Validator},
    };
    use async_trait::async_trait;
    use hyper::{
        service::{make_service_fn, service_fn},
        Body, Request, Response, Server,
    };
    use serde_json::json;
    use std::{convert::Infallible, net::SocketAddr, sync::Mutex, time::Duration};

    #[derive(Debug, Default)]
    struct FakeClient {
        probe_status: Option<u16>,
        delay: Duration,
        completed: AtomicUsize,
        started: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl HttpClient for FakeClient {
        async fn probe(&self, _url: &str) -> Result<u16, Error> {
            self.probe_status
                .ok_or_else(|| Error::Transport("connection refused".into()))
        }

        async fn execute(&self, request_data: &RequestData) -> Result<ResponseData, Error> {
            let completed = self.completed.load(Ordering::SeqCst);
            self.started
                .lock()
                .unwrap()
                .push((request_data.url.clone(), completed));

            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);

            let behaviour = request_data.url.rsplit('?').next().unwrap_or_default();
            let ok = |body: &str| {
                Ok(ResponseData {
                    status_code: 200,
                    body: body.into(),
                })
            };
            match behaviour {
                "transport" => Err(Error::Transport("connection reset".into())),
                "status" => Ok(ResponseData {
                    status_code: 204,
                    body: String::new(),
                }),
                "unreadable" => Err(Error::UnreadableBody {
                    status_code: 200,
                    reason: "corrupt deflate stream".into(),
                }),
                "invalid" => ok("{\"url\":\"ftp://x\"}"),
                _ => ok("{\"url\":\"http://x\"}"),
            }
        }
    }

    fn schema() -> Arc<dyn Validator> {
        Arc::new(
            JsonSchema::from_value(
                "response",
                &json!({
                    "type": "object",
                    "properties": { "url": { "type": "string", "pattern": "^http://" } },
                    "required": ["url"]
                }),
            )
            .unwrap(),
        )
    }

    fn task(behaviour: &str) -> ReplayTask {
        ReplayTask {
            url: format!("http://fake/mock?{}", behaviour),
            body: None,
            expectation: Expectation::Schema(schema()),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waves_never_overlap_and_respect_the_ceiling() {
        let client = Arc::new(FakeClient {
            delay: Duration::from_millis(20),
            ..FakeClient::default()
        });
        let tasks = (0..10).map(|i| task(&format!("ok{}", i))).collect();

        let report = ReplayRunner::new(client.clone(), 3).run(tasks).await;

        assert!(report.passed());
        assert_eq!(report.attempted(), 10);
        assert!(report.peak_in_flight <= 3);
        assert!(report.peak_in_flight >= 1);

        for (url, completed_before_start) in client.started.lock().unwrap().iter() {
            let index: usize = url.trim_start_matches("http://fake/mock?ok").parse().unwrap();
            let wave = index / 3;
            assert!(
                *completed_before_start >= wave * 3,
                "task {} of wave {} started after only {} completions",
                index,
                wave,
                completed_before_start
            );
        }

        let waves = report.results.iter().map(|r| r.wave).collect::<Vec<_>>();
        assert_eq!(waves, vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 3]);
    }

    #[tokio::test]
    async fn ceiling_of_one_is_sequential() {
        let client = Arc::new(FakeClient::default());
        let tasks = (0..4).map(|_| task("ok")).collect();

        let report = ReplayRunner::new(client, 0).run(tasks).await;

        assert_eq!(report.peak_in_flight, 1);
        assert_eq!(report.results.last().unwrap().wave, 3);
    }

    #[tokio::test]
    async fn one_failure_fails_the_run() {
        let client = Arc::new(FakeClient::default());
        let mut tasks: Vec<_> = (0..9).map(|_| task("ok")).collect();
        tasks.push(task("status"));

        let report = ReplayRunner::new(client, 4).run(tasks).await;

        assert_eq!(report.succeeded, 9);
        assert_eq!(report.failed, 1);
        assert!(!report.passed());
        assert_eq!(report.results.len(), 10);
        assert!(report.to_string().contains("Failed with HTTP Code 204"));
    }

    #[tokio::test]
    async fn failures_are_attributed() {
        let client = Arc::new(FakeClient::default());
        let tasks = vec![
            task("transport"),
            task("status"),
            task("unreadable"),
            task("invalid"),
            ReplayTask {
                url: "http://fake/mock?verbatim".into(),
                body: Some("{\"id\":1}".into()),
                expectation: Expectation::Verbatim("{\"url\":\"http://y\"}".into()),
            },
        ];

        let report = ReplayRunner::new(client, 2).run(tasks).await;
        let reasons = report
            .failures()
            .map(|(_, reason)| reason.clone())
            .collect::<Vec<_>>();

        assert_eq!(report.failed, 5);
        assert!(matches!(reasons[0], FailureReason::Transport(_)));
        assert_eq!(reasons[1], FailureReason::Status(204));
        assert!(matches!(reasons[2], FailureReason::Read(_)));
        assert!(matches!(&reasons[3], FailureReason::Validation(errors) if !errors.is_empty()));
        assert_eq!(
            reasons[4],
            FailureReason::Mismatch {
                expected: "{\"url\":\"http://y\"}".into(),
                received: "{\"url\":\"http://x\"}".into(),
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_task_fails_alone() {
        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_service_fn(
            |_| async {
                Ok::<_, Infallible>(service_fn(|request: Request<Body>| async move {
                    if request.uri().query() == Some("slow") {
                        tokio::time::sleep(Duration::from_secs(3)).await;
                    }
                    Ok::<_, Infallible>(Response::new(Body::from("{\"url\":\"http://x\"}")))
                }))
            },
        ));
        let addr = server.local_addr();
        tokio::spawn(server);

        let client = Arc::new(
            ReqwestHttpClient::with_settings(false, Some(Duration::from_millis(200))).unwrap(),
        );
        let tasks = ["fast", "slow", "fast", "fast"]
            .iter()
            .map(|query| ReplayTask {
                url: format!("http://{}/mock?{}", addr, query),
                body: None,
                expectation: Expectation::Schema(schema()),
            })
            .collect();

        let report = ReplayRunner::new(client, 2).run(tasks).await;

        assert_eq!(report.attempted(), 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        assert!(matches!(
            report.results[1].outcome,
            TaskOutcome::Failed(FailureReason::Transport(_))
        ));
        assert_eq!(report.results[3].outcome, TaskOutcome::Passed);
    }

    #[test]
    fn unreadable_error_bodies_count_as_status_failures() {
        let outcome = classify(
            Err(Error::UnreadableBody {
                status_code: 500,
                reason: "eof".into(),
            }),
            &Expectation::Verbatim(String::new()),
        );

        assert_eq!(outcome, TaskOutcome::Failed(FailureReason::Status(500)));
    }

    #[tokio::test]
    async fn precheck_requires_a_200() {
        let up = ReplayRunner::new(
            Arc::new(FakeClient {
                probe_status: Some(200),
                ..FakeClient::default()
            }),
            1,
        );
        let down = ReplayRunner::new(
            Arc::new(FakeClient {
                probe_status: Some(502),
                ..FakeClient::default()
            }),
            1,
        );
        let unreachable = ReplayRunner::new(Arc::new(FakeClient::default()), 1);

        assert!(up.precheck("http://fake/mock?").await.is_ok());
        assert!(matches!(
            down.precheck("http://fake/mock?").await,
            Err(Error::PrecheckFailed(_))
        ));
        assert!(matches!(
            unreachable.precheck("http://fake/mock?").await,
            Err(Error::PrecheckFailed(_))
        ));
    }

    #[tokio::test]
    async fn failed_precheck_attempts_nothing() {
        let client = Arc::new(FakeClient {
            probe_status: Some(503),
            ..FakeClient::default()
        });
        let mut data = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut data,
            br#"[{"query": "z=1", "res": {"url": "http://other"}}]"#,
        )
        .unwrap();

        let mut configuration = ReplayConfiguration::new(data.path());
        configuration.set_target("http://fake/mock?");
        configuration.set_http_client(client.clone());

        assert!(matches!(
            run_replay(&configuration).await,
            Err(Error::PrecheckFailed(_))
        ));
        assert!(client.started.lock().unwrap().is_empty());

        configuration.set_check_up(false);
        let report = run_replay(&configuration).await.unwrap();
        assert_eq!(report.attempted(), 1);
        assert!(!report.passed());
    }
}
