use super::control::StageControl;
use super::POLL_INTERVAL;
use crate::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

/// A batch plus its position in the stream of its producing step
pub(crate) type Ticketed<T> = (u64, T);

/// One step of a stage
///
/// `process` is called once per upstream batch, possibly from several
/// processor threads at once when `max_processors() > 1`. Batches handed to
/// the sender reach the next step in upstream order regardless of which
/// processor finished first.
pub trait Step<In, Out>: Send + Sync {
    /// Upper bound on parallel processors for this step
    fn max_processors(&self) -> usize {
        1
    }

    /// Handle one upstream batch
    fn process(&self, batch: In, sender: &mut BatchSender<Out>) -> Result<()>;

    /// Called once after the last batch, by the last processor to finish
    fn done(&self, _sender: &mut BatchSender<Out>) -> Result<()> {
        Ok(())
    }
}

/// Step built from a closure
pub struct FnStep<F> {
    processors: usize,
    f: F,
}

impl<F> FnStep<F> {
    /// Single-processor step
    pub fn new(f: F) -> Self {
        Self { processors: 1, f }
    }

    /// Step allowed to run on up to `processors` threads
    pub fn parallel(processors: usize, f: F) -> Self {
        Self {
            processors: processors.max(1),
            f,
        }
    }
}

impl<In, Out, F> Step<In, Out> for FnStep<F>
where
    F: Fn(In, &mut BatchSender<Out>) -> Result<()> + Send + Sync,
{
    fn max_processors(&self) -> usize {
        self.processors
    }

    fn process(&self, batch: In, sender: &mut BatchSender<Out>) -> Result<()> {
        (self.f)(batch, sender)
    }
}

/// A borrowed step, so its state can be read back once the stage ran
impl<In, Out, S> Step<In, Out> for &S
where
    S: Step<In, Out> + ?Sized,
{
    fn max_processors(&self) -> usize {
        (**self).max_processors()
    }

    fn process(&self, batch: In, sender: &mut BatchSender<Out>) -> Result<()> {
        (**self).process(batch, sender)
    }

    fn done(&self, sender: &mut BatchSender<Out>) -> Result<()> {
        (**self).done(sender)
    }
}

/// Lifecycle of a step; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum StepState {
    /// Added to a stage
    Created = 0,
    /// A processor thread is running
    Started = 1,
    /// At least one batch was received
    Processing = 2,
    /// Upstream ended; remaining work is being flushed
    Draining = 3,
    /// All processors finished and `done` ran
    Completed = 4,
}

impl StepState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::Processing,
            3 => Self::Draining,
            _ => Self::Completed,
        }
    }
}

/// Live counters of one step
#[derive(Debug)]
pub struct StepStats {
    name: String,
    processors: usize,
    state: AtomicU8,
    batches: AtomicU64,
}

impl StepStats {
    pub(crate) fn new(name: impl Into<String>, processors: usize) -> Self {
        Self {
            name: name.into(),
            processors,
            state: AtomicU8::new(StepState::Created as u8),
            batches: AtomicU64::new(0),
        }
    }

    /// Step name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of processor threads
    pub fn processors(&self) -> usize {
        self.processors
    }

    /// Current state
    pub fn state(&self) -> StepState {
        StepState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Batches processed so far
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub(crate) fn advance(&self, state: StepState) {
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    pub(crate) fn batch_done(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }
}

/// Sending end of the channel into the next step
pub(crate) struct Downstream<T> {
    tx: Sender<Ticketed<T>>,
    next_ticket: Arc<AtomicU64>,
}

impl<T> Clone for Downstream<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            next_ticket: Arc::clone(&self.next_ticket),
        }
    }
}

impl<T> Downstream<T> {
    pub(crate) fn new(tx: Sender<Ticketed<T>>) -> Self {
        Self {
            tx,
            next_ticket: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Blocks while the queue is full, polling the halt flag
    fn send(&self, batch: T, control: &StageControl, step: &str) -> Result<()> {
        let mut item = (self.next_ticket.fetch_add(1, Ordering::SeqCst), batch);
        loop {
            control.check(step)?;
            match self.tx.send_timeout(item, POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => item = back,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(Error::halted(format!(
                        "downstream of step '{}' is gone",
                        step
                    )));
                }
            }
        }
    }
}

/// Where a step puts its output batches
///
/// Inside a step, sent batches are held until the step's turn comes and then
/// forwarded in upstream order. A producer's sender forwards immediately.
pub struct BatchSender<T> {
    downstream: Option<Downstream<T>>,
    control: Arc<StageControl>,
    step: Arc<StepStats>,
    pending: Vec<T>,
    buffered: bool,
}

impl<T> BatchSender<T> {
    pub(crate) fn new(
        downstream: Option<Downstream<T>>,
        control: Arc<StageControl>,
        step: Arc<StepStats>,
        buffered: bool,
    ) -> Self {
        Self {
            downstream,
            control,
            step,
            pending: Vec::new(),
            buffered,
        }
    }

    /// Emit a batch downstream
    pub fn send(&mut self, batch: T) -> Result<()> {
        if self.buffered {
            self.control.check(self.step.name())?;
            self.pending.push(batch);
            Ok(())
        } else {
            self.forward(batch)
        }
    }

    /// Whether the stage is halting; long-running producers poll this
    pub fn is_halted(&self) -> bool {
        self.control.is_halted()
    }

    fn forward(&self, batch: T) -> Result<()> {
        match &self.downstream {
            Some(downstream) => downstream.send(batch, &self.control, self.step.name()),
            None => Ok(()),
        }
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        for batch in std::mem::take(&mut self.pending) {
            self.forward(batch)?;
        }
        Ok(())
    }
}

/// Lets processors emit strictly in ticket order
#[derive(Default)]
pub(crate) struct Turnstile {
    next: Mutex<u64>,
    turned: Condvar,
}

impl Turnstile {
    fn wait_for(&self, ticket: u64, control: &StageControl, step: &str) -> Result<()> {
        let mut next = self.next.lock();
        while *next != ticket {
            control.check(step)?;
            self.turned.wait_for(&mut next, POLL_INTERVAL);
        }
        Ok(())
    }

    fn advance(&self) {
        let mut next = self.next.lock();
        *next += 1;
        self.turned.notify_all();
    }
}

/// Shared parts of a step across its processors
pub(crate) struct StepRuntime<'env, In, Out> {
    pub(crate) step: Arc<dyn Step<In, Out> + 'env>,
    pub(crate) stats: Arc<StepStats>,
    pub(crate) control: Arc<StageControl>,
    pub(crate) turnstile: Arc<Turnstile>,
    pub(crate) remaining: Arc<AtomicUsize>,
}

impl<In, Out> StepRuntime<'_, In, Out> {
    /// Body of one processor thread
    pub(crate) fn run_processor(
        &self,
        upstream: Receiver<Ticketed<In>>,
        downstream: Option<Downstream<Out>>,
    ) -> Result<()> {
        let name = self.stats.name().to_string();
        self.stats.advance(StepState::Started);
        let mut sender = BatchSender::new(
            downstream,
            Arc::clone(&self.control),
            Arc::clone(&self.stats),
            true,
        );

        loop {
            self.control.check(&name)?;
            match upstream.recv_timeout(POLL_INTERVAL) {
                Ok((ticket, batch)) => {
                    self.stats.advance(StepState::Processing);
                    self.step.process(batch, &mut sender)?;
                    self.turnstile.wait_for(ticket, &self.control, &name)?;
                    let flushed = sender.flush();
                    self.turnstile.advance();
                    flushed?;
                    self.stats.batch_done();
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.stats.advance(StepState::Draining);
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.step.done(&mut sender)?;
            sender.flush()?;
            self.stats.advance(StepState::Completed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_only_moves_forward() {
        let stats = StepStats::new("s", 1);
        assert_eq!(stats.state(), StepState::Created);
        stats.advance(StepState::Processing);
        stats.advance(StepState::Started);
        assert_eq!(stats.state(), StepState::Processing);
        stats.advance(StepState::Completed);
        stats.advance(StepState::Draining);
        assert_eq!(stats.state(), StepState::Completed);
    }

    #[test]
    fn test_unbuffered_sender_forwards_in_order() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        let control = Arc::new(StageControl::new("t"));
        let mut sender = BatchSender::new(
            Some(Downstream::new(tx)),
            control,
            Arc::new(StepStats::new("producer", 1)),
            false,
        );
        sender.send("a").unwrap();
        sender.send("b").unwrap();
        assert_eq!(rx.try_recv().unwrap(), (0, "a"));
        assert_eq!(rx.try_recv().unwrap(), (1, "b"));
    }

    #[test]
    fn test_send_gives_up_when_halted() {
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let control = Arc::new(StageControl::new("t"));
        let mut sender = BatchSender::new(
            Some(Downstream::new(tx)),
            Arc::clone(&control),
            Arc::new(StepStats::new("producer", 1)),
            false,
        );
        sender.send(1).unwrap();

        let halter = Arc::clone(&control);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(30));
            halter.panic(Error::internal("boom"));
        });
        // queue is full, so this blocks until the halt is noticed
        assert!(matches!(sender.send(2), Err(Error::Halted(_))));
        handle.join().unwrap();
    }
}
