//! Runner stepping environments on worker threads.
use crate::{
    base::{build_envs, Runner, StepResult},
    config::ParallelRunnerConfig,
    error::{Command, RunnerError},
    rendezvous::Rendezvous,
    shard::split_shards,
    shared::SharedTransitionBlock,
    stats::EpisodeStats,
    worker::Worker,
};
use crossbeam_channel::unbounded;
use log::{info, warn};
use ndarray::ArrayD;
use paac_core::{Actions, Env, Space};
use std::{
    marker::PhantomData,
    ops::Range,
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Running,
    Failed,
    Closed,
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Steps environments in parallel on persistent worker threads.
///
/// Environments are split into contiguous shards, one per worker (see
/// [`split_shards`]). States, actions, rewards, dones and infos of all
/// environments live in a single block allocated at construction and shared
/// with the workers; each worker reads and writes the rows of its shard only.
/// Every operation is a broadcast of one command followed by a wait for the
/// acknowledgements of all workers:
///
/// ```mermaid
/// sequenceDiagram
///     participant R as ParallelRunner
///     participant W as Worker i
///     R->>R: write actions into the block
///     R->>W: Step
///     W->>W: step envs of the shard, auto-reset, write rows
///     W->>R: Done
///     R->>R: read rows after all workers acked
/// ```
///
/// A failing environment or a missing acknowledgement is fatal: the runner
/// shuts every worker down and returns [`RunnerError::WorkerFatal`]; later
/// calls return [`RunnerError::Closed`].
pub struct ParallelRunner<E: Env> {
    num_envs: usize,
    shards: Vec<Range<usize>>,
    state_space: Space,
    action_space: Space,
    block: Arc<SharedTransitionBlock>,
    rendezvous: Rendezvous,
    handles: Vec<JoinHandle<()>>,
    stats: EpisodeStats,
    close_timeout: Duration,
    state: State,
    phantom: PhantomData<E>,
}

impl<E> ParallelRunner<E>
where
    E: Env + 'static,
{
    /// Builds `num_envs` environments and spawns the workers.
    pub fn build(
        config: &ParallelRunnerConfig,
        env_config: &E::Config,
        num_envs: usize,
    ) -> Result<Self, RunnerError> {
        let num_workers = match config.num_workers {
            Some(0) => {
                return Err(RunnerError::Configuration(
                    "num_workers must be positive".to_string(),
                ))
            }
            Some(n) => n,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        };
        let num_workers = if num_workers > num_envs && num_envs > 0 {
            warn!(
                "num_workers ({}) exceeds num_envs ({}), using {} workers",
                num_workers, num_envs, num_envs
            );
            num_envs
        } else {
            num_workers
        };

        let (envs, state_space, action_space) = build_envs::<E>(env_config, num_envs, config.seed)?;
        let shards = split_shards(num_envs, num_workers);
        let block = Arc::new(SharedTransitionBlock::new(
            num_envs,
            &state_space,
            &action_space,
        ));

        let mut envs = envs.into_iter();
        let mut senders = vec![];
        let mut receivers = vec![];
        let mut handles = vec![];
        for (id, slice) in block.shard_slices(&shards).into_iter().enumerate() {
            let (command_s, command_r) = unbounded();
            let (ack_s, ack_r) = unbounded();
            let shard_envs = envs.by_ref().take(slice.range().len()).collect::<Vec<_>>();
            let worker = Worker::new(id, shard_envs, slice, command_r, ack_s);
            let handle = std::thread::Builder::new()
                .name(format!("paac-worker-{}", id))
                .spawn(move || worker.run())
                .map_err(|e| RunnerError::Spawn {
                    worker: id,
                    reason: e.to_string(),
                })?;
            senders.push(command_s);
            receivers.push(ack_r);
            handles.push(handle);
        }
        info!(
            "Started {} workers for {} environments",
            num_workers, num_envs
        );

        Ok(Self {
            num_envs,
            shards,
            state_space,
            action_space,
            block,
            rendezvous: Rendezvous::new(senders, receivers, config.ack_timeout()),
            handles,
            stats: EpisodeStats::new(num_envs, config.history_len),
            close_timeout: config.close_timeout(),
            state: State::Running,
            phantom: PhantomData,
        })
    }
}

impl<E: Env> ParallelRunner<E> {
    /// Number of workers.
    pub fn num_workers(&self) -> usize {
        self.shards.len()
    }

    /// Environments owned by each worker.
    pub fn shards(&self) -> &[Range<usize>] {
        &self.shards
    }

    fn check_running(&self) -> Result<(), RunnerError> {
        match self.state {
            State::Running => Ok(()),
            State::Failed | State::Closed => Err(RunnerError::Closed),
        }
    }

    /// Broadcasts `command` and waits for all workers; on failure shuts the
    /// workers down before returning the error.
    fn dispatch(&mut self, command: Command) -> Result<(), RunnerError> {
        self.check_running()?;
        match self.rendezvous.broadcast_and_wait(command) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("{}; shutting down workers", e);
                self.state = State::Failed;
                self.shutdown();
                Err(e)
            }
        }
    }

    /// Stops all workers without waiting for pending acknowledgements.
    fn shutdown(&mut self) {
        self.rendezvous.broadcast(Command::Close);
        self.rendezvous.hang_up();

        let deadline = Instant::now() + self.close_timeout;
        let mut handles = std::mem::take(&mut self.handles);
        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                handles.into_iter().partition(|h| h.is_finished());
            for h in finished {
                if h.join().is_err() {
                    warn!("A worker panicked outside of an environment call");
                }
            }
            handles = running;
            if handles.is_empty() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        if !handles.is_empty() {
            warn!(
                "Detached {} workers that did not stop within {:?}",
                handles.len(),
                self.close_timeout
            );
        }
        info!("Stopped workers");
    }
}

impl<E: Env> Runner for ParallelRunner<E> {
    fn num_envs(&self) -> usize {
        self.num_envs
    }

    fn state_space(&self) -> &Space {
        &self.state_space
    }

    fn action_space(&self) -> &Space {
        &self.action_space
    }

    fn reset(&mut self) -> Result<ArrayD<f32>, RunnerError> {
        self.dispatch(Command::Reset)?;
        self.stats.clear_accumulators();
        // SAFETY: all workers acknowledged and wait for the next command.
        Ok(unsafe { self.block.read_states() })
    }

    fn step(&mut self, actions: &Actions) -> Result<StepResult, RunnerError> {
        self.check_running()?;
        actions.check(&self.action_space, self.num_envs)?;
        // SAFETY: workers are idle between commands.
        unsafe { self.block.write_actions(actions)? };
        self.dispatch(Command::Step)?;

        // SAFETY: all workers acknowledged and wait for the next command.
        let (states, (rewards, dones, infos)) =
            unsafe { (self.block.read_states(), self.block.read_outcomes()) };
        self.stats.update(&rewards, &dones);
        Ok(StepResult {
            states,
            rewards,
            dones,
            infos,
        })
    }

    fn sample_random_action(&mut self) -> Result<Actions, RunnerError> {
        self.dispatch(Command::SampleAction)?;
        // SAFETY: all workers acknowledged and wait for the next command.
        Ok(unsafe { self.block.read_actions() })
    }

    fn stats(&self) -> &EpisodeStats {
        &self.stats
    }

    fn close(&mut self) -> Result<(), RunnerError> {
        if self.state == State::Running {
            self.shutdown();
        }
        self.state = State::Closed;
        Ok(())
    }
}

impl<E: Env> Drop for ParallelRunner<E> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
