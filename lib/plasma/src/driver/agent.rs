use crate::concurrent::idle::BackoffIdleStrategy;
use ion::logging::{self, Logger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// One single-threaded cooperative event loop. `do_work` returns the amount
/// of work done this cycle so the runner can drive the idle strategy.
/// Implementations handle their own errors at the duty-cycle perimeter: log
/// and continue, never propagate across the agent boundary.
pub trait Agent {
    fn role(&self) -> &'static str;
    fn do_work(&mut self) -> usize;
    fn on_close(&mut self) {}
}

/// Runs an agent on its own worker thread until the shared running flag goes
/// false, then gives it a chance to release resources.
pub struct AgentRunner;

impl AgentRunner {
    pub fn start<A>(
        mut agent: A,
        mut idle: BackoffIdleStrategy,
        running: Arc<AtomicBool>,
        log: &Logger,
    ) -> JoinHandle<()>
    where
        A: Agent + Send + 'static,
    {
        let role = agent.role();
        let log = log.new(logging::o!("agent" => role));

        thread::Builder::new()
            .name(role.to_string())
            .spawn(move || {
                logging::debug!(log, "agent started"; "context" => "run");

                while running.load(Ordering::Acquire) {
                    let work = agent.do_work();
                    idle.idle(work);
                }

                agent.on_close();
                logging::debug!(log, "agent stopped"; "context" => "run");
            })
            .expect("Agent thread spawn failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingAgent {
        cycles: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl Agent for CountingAgent {
        fn role(&self) -> &'static str {
            "counting"
        }

        fn do_work(&mut self) -> usize {
            self.cycles.fetch_add(1, Ordering::Relaxed);
            1
        }

        fn on_close(&mut self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    #[test]
    fn test_runner_cycles_until_stopped() {
        let cycles = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let log = Logger::root(logging::Discard, logging::o!());

        let handle = AgentRunner::start(
            CountingAgent {
                cycles: Arc::clone(&cycles),
                closed: Arc::clone(&closed),
            },
            BackoffIdleStrategy::default_strategy(),
            Arc::clone(&running),
            &log,
        );

        while cycles.load(Ordering::Relaxed) < 10 {
            thread::yield_now();
        }

        running.store(false, Ordering::Release);
        handle.join().unwrap();

        assert!(closed.load(Ordering::Acquire));
    }
}
