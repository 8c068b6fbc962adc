use jsonmock::{MockConfiguration, MockServer, ReplayConfiguration};
use std::{
    net::{IpAddr, Ipv4Addr},
    sync::{mpsc, Arc, Once},
    thread,
};
use tokio::runtime::Runtime;

pub const MOCK_PORT: u16 = 61417;

static INITIALIZE_JSONMOCK: Once = Once::new();

/// Starts the responder on loopback once per test process, serving `data/`.
pub fn start_once() {
    INITIALIZE_JSONMOCK.call_once(|| {
        let (ready, started) = mpsc::channel();

        thread::spawn(move || {
            Runtime::new().unwrap().block_on(async {
                let mut configuration = MockConfiguration::new();
                configuration.set_host(IpAddr::V4(Ipv4Addr::LOCALHOST));
                configuration.set_port(MOCK_PORT);

                let server = configuration.load().and_then(|responder| {
                    MockServer::start(configuration.address(), Arc::new(responder))
                });

                match server {
                    Ok(_server) => {
                        ready.send(None).unwrap();
                        std::future::pending::<()>().await;
                    }
                    Err(e) => ready.send(Some(e.to_string())).unwrap(),
                }
            });
        });

        if let Some(e) = started.recv().unwrap() {
            panic!("jsonmock server error: {}", e);
        }
    });
}

pub fn configure_replay(configuration: &mut ReplayConfiguration) {
    start_once();
    configuration.set_target(format!("http://127.0.0.1:{}/mock?", MOCK_PORT));
    configuration.set_concurrency(4);
}

pub fn configure_debug_replay(configuration: &mut ReplayConfiguration) {
    start_once();
    configuration.set_target(format!("http://127.0.0.1:{}/mock?debug=true&", MOCK_PORT));
    configuration.set_concurrency(1);
    configuration.set_gzip(false);
}

#[cfg(test)]
mod tests {
    use super::{configure_debug_replay, configure_replay};
    use jsonmock::{jsonmock_replay_test, ReplayReport, TaskOutcome};

    #[jsonmock_replay_test("data/queries.json", configure_replay)]
    fn replay_query_patterns(report: &ReplayReport) {
        assert_eq!(report.attempted(), 6);
        assert!(report.peak_in_flight <= 4);
    }

    #[jsonmock_replay_test("data/requestResponseMap.json", configure_replay)]
    fn replay_recorded_corpus(report: &ReplayReport) {
        assert_eq!(report.attempted(), 7);
        assert!(report
            .results
            .iter()
            .all(|result| result.outcome == TaskOutcome::Passed));
    }

    #[jsonmock_replay_test("data/requestResponseMap.json", configure_debug_replay)]
    fn replay_sequentially_in_debug_mode(report: &ReplayReport) {
        assert_eq!(report.peak_in_flight, 1);
        assert_eq!(report.results.last().map(|result| result.wave), Some(6));
    }

    #[jsonmock_replay_test("data/queries.json", configure_replay)]
    fn replay_without_inspecting_the_report() {}
}
