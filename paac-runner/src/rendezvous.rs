//! Broadcast-then-await-all barrier between a runner and its workers.
use crate::{
    error::{Command, RunnerError},
    worker::Ack,
};
use crossbeam_channel::{Receiver, Select, Sender};
use log::{trace, warn};
use std::time::{Duration, Instant};

/// Command senders and acknowledgement receivers, one pair per worker.
pub(crate) struct Rendezvous {
    commands: Vec<Sender<Command>>,
    acks: Vec<Receiver<Ack>>,
    timeout: Duration,
}

impl Rendezvous {
    pub fn new(
        commands: Vec<Sender<Command>>,
        acks: Vec<Receiver<Ack>>,
        timeout: Duration,
    ) -> Self {
        debug_assert_eq!(commands.len(), acks.len());
        Self {
            commands,
            acks,
            timeout,
        }
    }

    fn fatal(worker: usize, env: Option<usize>, command: Command, reason: String) -> RunnerError {
        RunnerError::WorkerFatal {
            worker,
            env,
            command,
            reason,
        }
    }

    /// Sends `command` to every worker and blocks until all of them
    /// acknowledge it.
    ///
    /// Fails on the first failure reported by a worker, on a worker that
    /// exits without acknowledging, or when some acknowledgement is still
    /// missing after the timeout. The caller must treat a failure as fatal:
    /// other workers may still be executing the command.
    pub fn broadcast_and_wait(&self, command: Command) -> Result<(), RunnerError> {
        for (worker, sender) in self.commands.iter().enumerate() {
            sender.send(command).map_err(|_| {
                Self::fatal(worker, None, command, "worker is not running".to_string())
            })?;
        }

        let deadline = Instant::now() + self.timeout;
        let mut pending = (0..self.acks.len()).collect::<Vec<_>>();
        while !pending.is_empty() {
            let mut sel = Select::new();
            for &worker in pending.iter() {
                sel.recv(&self.acks[worker]);
            }
            let oper = match sel.select_deadline(deadline) {
                Ok(oper) => oper,
                Err(_) => {
                    warn!(
                        "Workers {:?} did not acknowledge '{}' within {:?}",
                        pending, command, self.timeout
                    );
                    return Err(Self::fatal(
                        pending[0],
                        None,
                        command,
                        format!("no acknowledgement within {:?}", self.timeout),
                    ));
                }
            };
            let k = oper.index();
            let worker = pending[k];
            match oper.recv(&self.acks[worker]) {
                Ok(Ack::Done) => {
                    trace!("Worker {} acknowledged '{}'", worker, command);
                    pending.remove(k);
                }
                Ok(Ack::Failed { env, reason }) => {
                    return Err(Self::fatal(worker, env, command, reason));
                }
                Err(_) => {
                    return Err(Self::fatal(
                        worker,
                        None,
                        command,
                        "worker exited without acknowledging".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Sends `command` to every worker still listening, without waiting.
    pub fn broadcast(&self, command: Command) {
        for sender in self.commands.iter() {
            let _ = sender.send(command);
        }
    }

    /// Drops the command senders so that workers blocked on a command exit.
    pub fn hang_up(&mut self) {
        self.commands.clear();
    }
}
