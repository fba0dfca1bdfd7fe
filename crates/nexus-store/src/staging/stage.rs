use super::control::StageControl;
use super::monitor::{ExecutionMonitor, StageProgress};
use super::step::{BatchSender, Downstream, Step, StepRuntime, StepStats, Ticketed, Turnstile};
use super::StageConfig;
use crate::{Error, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::debug;

/// Output of a step, to be consumed by the next one
#[must_use = "an unconsumed pipe blocks its producing step"]
pub struct Pipe<T> {
    rx: Receiver<Ticketed<T>>,
}

/// A thread body; never panics outward
struct Worker<'env> {
    thread_name: String,
    run: Box<dyn FnOnce() + Send + 'env>,
}

/// An ordered chain of steps run on dedicated threads
///
/// Steps are connected with bounded channels of `max_queue_size` batches, so
/// a slow step blocks its upstream. Any error or panic halts every step and
/// is returned from [`Stage::execute`] as [`Error::StageFailed`] after all
/// threads have been joined.
pub struct Stage<'env> {
    name: String,
    config: StageConfig,
    control: Arc<StageControl>,
    steps: Vec<Arc<StepStats>>,
    workers: Vec<Worker<'env>>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `body`, turning errors and panics into a recorded stage failure
fn guarded(control: &StageControl, step: &str, body: impl FnOnce() -> Result<()>) {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => control.panic(err),
        Err(payload) => control.panic(Error::StepPanic {
            step: step.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

impl<'env> Stage<'env> {
    /// Empty stage
    pub fn new(name: impl Into<String>, config: StageConfig) -> Self {
        let name = name.into();
        Self {
            control: Arc::new(StageControl::new(name.clone())),
            name,
            config,
            steps: Vec::new(),
            workers: Vec::new(),
        }
    }

    /// Stage name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Control shared by all steps of this stage
    pub fn control(&self) -> &Arc<StageControl> {
        &self.control
    }

    /// Configuration the stage was built with
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    fn channel<T>(&self) -> (Downstream<T>, Pipe<T>) {
        let (tx, rx) = bounded(self.config.max_queue_size.max(1));
        (Downstream::new(tx), Pipe { rx })
    }

    /// First step: a single thread feeding batches into the stage
    pub fn producer<T, F>(&mut self, name: &str, produce: F) -> Pipe<T>
    where
        T: Send + 'env,
        F: FnOnce(&mut BatchSender<T>) -> Result<()> + Send + 'env,
    {
        let stats = Arc::new(StepStats::new(name, 1));
        self.steps.push(Arc::clone(&stats));
        let (downstream, pipe) = self.channel();
        let control = Arc::clone(&self.control);
        let step = name.to_string();

        self.workers.push(Worker {
            thread_name: format!("{}-{}", self.name, name),
            run: Box::new(move || {
                guarded(&control, &step, || {
                    stats.advance(super::StepState::Started);
                    let mut sender =
                        BatchSender::new(Some(downstream), Arc::clone(&control), Arc::clone(&stats), false);
                    produce(&mut sender)?;
                    stats.advance(super::StepState::Completed);
                    Ok(())
                })
            }),
        });
        pipe
    }

    fn add<I, O, S>(&mut self, name: &str, upstream: Pipe<I>, step: S, downstream: Option<Downstream<O>>)
    where
        I: Send + 'env,
        O: Send + 'env,
        S: Step<I, O> + 'env,
    {
        let processors = step.max_processors().clamp(1, self.config.max_processors.max(1));
        let stats = Arc::new(StepStats::new(name, processors));
        self.steps.push(Arc::clone(&stats));
        let runtime = Arc::new(StepRuntime {
            step: Arc::new(step) as Arc<dyn Step<I, O> + 'env>,
            stats,
            control: Arc::clone(&self.control),
            turnstile: Arc::new(Turnstile::default()),
            remaining: Arc::new(AtomicUsize::new(processors)),
        });

        for processor in 0..processors {
            let runtime = Arc::clone(&runtime);
            let rx = upstream.rx.clone();
            let downstream = downstream.clone();
            let step = name.to_string();
            self.workers.push(Worker {
                thread_name: format!("{}-{}-{}", self.name, name, processor),
                run: Box::new(move || {
                    let control = Arc::clone(&runtime.control);
                    guarded(&control, &step, || runtime.run_processor(rx, downstream));
                }),
            });
        }
    }

    /// Intermediate step consuming `upstream`
    pub fn step<I, O, S>(&mut self, name: &str, upstream: Pipe<I>, step: S) -> Pipe<O>
    where
        I: Send + 'env,
        O: Send + 'env,
        S: Step<I, O> + 'env,
    {
        let (downstream, pipe) = self.channel();
        self.add(name, upstream, step, Some(downstream));
        pipe
    }

    /// Final step consuming `upstream`; its output is discarded
    pub fn last_step<I, S>(&mut self, name: &str, upstream: Pipe<I>, step: S)
    where
        I: Send + 'env,
        S: Step<I, ()> + 'env,
    {
        self.add::<I, (), S>(name, upstream, step, None);
    }

    /// Run every step to completion
    ///
    /// Returns once all threads are joined. The first recorded failure, if
    /// any, comes back wrapped in [`Error::StageFailed`].
    pub fn execute(self, monitor: &dyn ExecutionMonitor) -> Result<()> {
        let Stage {
            name,
            control,
            steps,
            workers,
            ..
        } = self;
        monitor.start(&name);
        let started = Instant::now();
        debug!("Stage '{}' running {} threads", name, workers.len());

        thread::scope(|scope| {
            let (finished_tx, finished_rx) = unbounded::<()>();
            for worker in workers {
                let finished_tx = finished_tx.clone();
                let run = worker.run;
                let spawned = thread::Builder::new()
                    .name(worker.thread_name)
                    .spawn_scoped(scope, move || {
                        run();
                        let _ = finished_tx.send(());
                    });
                if let Err(err) = spawned {
                    control.panic(Error::Io(err));
                }
            }
            drop(finished_tx);

            loop {
                match finished_rx.recv_timeout(monitor.interval()) {
                    Ok(()) => {}
                    Err(RecvTimeoutError::Timeout) => {
                        monitor.check(&StageProgress::snapshot(&name, started.elapsed(), &steps));
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        monitor.end(&name, started.elapsed());
        control.assert_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::{FnStep, SilentExecutionMonitor, StepState};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn config(processors: usize) -> StageConfig {
        StageConfig {
            batch_size: 10,
            max_queue_size: 2,
            max_processors: processors,
        }
    }

    fn numbers(count: u64) -> impl FnOnce(&mut BatchSender<Vec<u64>>) -> Result<()> + Send {
        move |sender| {
            for chunk in (0..count).collect::<Vec<_>>().chunks(10) {
                sender.send(chunk.to_vec())?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_batches_flow_in_order_through_parallel_step() {
        let collected = Mutex::new(Vec::new());
        let mut stage = Stage::new("order", config(4));
        let input = stage.producer("produce", numbers(1000));
        let doubled = stage.step(
            "double",
            input,
            FnStep::parallel(4, |batch: Vec<u64>, sender: &mut BatchSender<Vec<u64>>| {
                // later batches finish first
                std::thread::sleep(Duration::from_micros(500 - batch[0] % 500));
                sender.send(batch.into_iter().map(|n| n * 2).collect())
            }),
        );
        stage.last_step(
            "collect",
            doubled,
            FnStep::new(|batch: Vec<u64>, _: &mut BatchSender<()>| {
                collected.lock().extend(batch);
                Ok(())
            }),
        );
        stage.execute(&SilentExecutionMonitor).unwrap();

        let collected = collected.into_inner();
        assert_eq!(collected, (0..1000).map(|n| n * 2).collect::<Vec<_>>());
    }

    struct Counting<'a> {
        total: &'a AtomicU64,
    }

    impl Step<Vec<u64>, u64> for Counting<'_> {
        fn process(&self, batch: Vec<u64>, _: &mut BatchSender<u64>) -> Result<()> {
            self.total.fetch_add(batch.len() as u64, Ordering::Relaxed);
            Ok(())
        }

        fn done(&self, sender: &mut BatchSender<u64>) -> Result<()> {
            sender.send(self.total.load(Ordering::Relaxed))
        }
    }

    #[test]
    fn test_done_emits_after_last_batch() {
        let total = AtomicU64::new(0);
        let reported = Mutex::new(None);
        let mut stage = Stage::new("done", config(1));
        let input = stage.producer("produce", numbers(95));
        let counts = stage.step("count", input, Counting { total: &total });
        stage.last_step(
            "report",
            counts,
            FnStep::new(|n: u64, _: &mut BatchSender<()>| {
                *reported.lock() = Some(n);
                Ok(())
            }),
        );
        stage.execute(&SilentExecutionMonitor).unwrap();
        assert_eq!(*reported.lock(), Some(95));
    }

    #[test]
    fn test_error_in_one_processor_halts_stage() {
        let processed = AtomicU64::new(0);
        let mut stage = Stage::new("faulty", config(3));
        let control = Arc::clone(stage.control());
        let input = stage.producer("produce", |sender: &mut BatchSender<u64>| {
            // unbounded input; only the halt stops it
            let mut n = 0;
            loop {
                sender.send(n)?;
                n += 1;
            }
        });
        let middle = stage.step(
            "fail",
            input,
            FnStep::parallel(3, |n: u64, sender: &mut BatchSender<u64>| {
                if n == 50 {
                    return Err(Error::capacity("injected"));
                }
                sender.send(n)
            }),
        );
        stage.last_step(
            "sink",
            middle,
            FnStep::new(|_: u64, _: &mut BatchSender<()>| {
                processed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
        );

        let started = Instant::now();
        let err = stage.execute(&SilentExecutionMonitor).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(err.root_cause(), Error::Capacity(msg) if msg == "injected"));
        assert!(control.is_halted());
        assert!(processed.load(Ordering::Relaxed) <= 50);
    }

    #[test]
    fn test_panic_in_last_step_surfaces_as_step_panic() {
        let mut stage = Stage::new("panicky", config(2));
        let input = stage.producer("produce", numbers(10_000));
        stage.last_step(
            "explode",
            input,
            FnStep::parallel(2, |batch: Vec<u64>, _: &mut BatchSender<()>| {
                if batch[0] == 500 {
                    panic!("bad batch");
                }
                Ok(())
            }),
        );
        let err = stage.execute(&SilentExecutionMonitor).unwrap_err();
        match err.root_cause() {
            Error::StepPanic { step, message } => {
                assert_eq!(step, "explode");
                assert_eq!(message, "bad batch");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_producer_failure_stops_consumers() {
        let mut stage = Stage::new("producer-fails", config(2));
        let input = stage.producer("produce", |sender: &mut BatchSender<u64>| {
            sender.send(1)?;
            Err(Error::storage("disk gone"))
        });
        stage.last_step("sink", input, FnStep::new(|_: u64, _: &mut BatchSender<()>| Ok(())));
        let err = stage.execute(&SilentExecutionMonitor).unwrap_err();
        assert!(matches!(err, Error::StageFailed { ref stage, .. } if stage == "producer-fails"));
        assert!(matches!(err.root_cause(), Error::Storage(_)));
    }

    #[test]
    fn test_step_states_complete() {
        let mut stage = Stage::new("states", config(2));
        let input = stage.producer("produce", numbers(20));
        stage.last_step("sink", input, FnStep::parallel(2, |_: Vec<u64>, _: &mut BatchSender<()>| Ok(())));
        let steps = stage.steps.clone();
        stage.execute(&SilentExecutionMonitor).unwrap();
        assert!(steps.iter().all(|s| s.state() == StepState::Completed));
        assert_eq!(steps[1].batches(), 2);
    }
}
