//! Worker threads stepping a shard of environments.
use crate::{error::Command, shared::ShardSlice};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use paac_core::Env;
use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
};

/// Acknowledgement of a command.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Ack {
    /// The command was executed for every environment of the shard.
    Done,

    /// The command failed; the worker exits after sending this.
    Failed {
        /// Global index of the failing environment.
        env: Option<usize>,
        /// Error message or panic payload.
        reason: String,
    },
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with a non-string payload".to_string()
    }
}

/// Owns a shard of environments and executes commands on them, one at a time.
///
/// After each command the worker acknowledges and blocks on the next one. It
/// exits on [`Command::Close`], when the runner hangs up, or after a failure,
/// closing its environments in every case.
pub(crate) struct Worker<E: Env> {
    id: usize,
    envs: Vec<E>,
    shard: ShardSlice,
    commands: Receiver<Command>,
    acks: Sender<Ack>,
}

impl<E: Env> Worker<E> {
    pub fn new(
        id: usize,
        envs: Vec<E>,
        shard: ShardSlice,
        commands: Receiver<Command>,
        acks: Sender<Ack>,
    ) -> Self {
        debug_assert_eq!(envs.len(), shard.range().len());
        Self {
            id,
            envs,
            shard,
            commands,
            acks,
        }
    }

    /// Runs the command loop until the worker exits.
    pub fn run(mut self) {
        info!("Worker {} started with envs {:?}", self.id, self.shard.range());
        while let Ok(command) = self.commands.recv() {
            if command == Command::Close {
                debug!("Worker {} received close", self.id);
                break;
            }
            match self.execute(command) {
                Ok(()) => {
                    if self.acks.send(Ack::Done).is_err() {
                        break;
                    }
                }
                Err((env, reason)) => {
                    warn!(
                        "Worker {} failed on '{}' (env {:?}): {}",
                        self.id, command, env, reason
                    );
                    let _ = self.acks.send(Ack::Failed { env, reason });
                    break;
                }
            }
        }
        self.close_envs();
        info!("Worker {} stopped", self.id);
    }

    fn execute(&mut self, command: Command) -> Result<(), (Option<usize>, String)> {
        let start = self.shard.range().start;
        let Self { envs, shard, .. } = self;

        for (i, env) in envs.iter_mut().enumerate() {
            let result = catch_unwind(AssertUnwindSafe(|| -> anyhow::Result<()> {
                match command {
                    Command::Reset => {
                        let slot = shard.slot(i);
                        env.reset(slot.state)?;
                        *slot.reward = 0.0;
                        *slot.done = false;
                        slot.info.clear();
                    }
                    Command::Step => {
                        let slot = shard.slot(i);
                        slot.info.clear();
                        let outcome = env.step_with_reset(slot.action, slot.state, slot.info)?;
                        *slot.reward = outcome.reward;
                        *slot.done = outcome.done;
                    }
                    Command::SampleAction => {
                        let action = env.sample_random_action();
                        shard.write_action(i, &action)?;
                    }
                    Command::Close => {}
                }
                Ok(())
            }));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err((Some(start + i), format!("{:#}", e))),
                Err(payload) => return Err((Some(start + i), panic_message(payload))),
            }
        }
        Ok(())
    }

    fn close_envs(&mut self) {
        let start = self.shard.range().start;
        for (i, env) in self.envs.iter_mut().enumerate() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| env.close())) {
                warn!(
                    "Env {} panicked while closing: {}",
                    start + i,
                    panic_message(payload)
                );
            }
        }
    }
}
