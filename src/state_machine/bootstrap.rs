use std::collections::VecDeque;

use super::StateMachine;

/// Where the client is in obtaining its first subscription channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    /// No channel exists and none is being created.
    Idle,
    /// The first request triggered channel creation; later requests are queued.
    Bootstrapping,
    /// A channel exists; requests register directly.
    Ready,
}

/// Queues subscription requests issued while the client's channel is being created.
///
/// Every queued entry is handed out exactly once: either drained when the bootstrap completes or
/// abandoned when it fails. Drain order follows insertion order but callers must not rely on it.
pub struct BootstrapMachine<E> {
    phase: BootstrapPhase,
    pending: VecDeque<E>,
    outputs: VecDeque<BootstrapOutput<E>>,
}

impl<E> BootstrapMachine<E> {
    pub fn new() -> Self {
        Self {
            phase: BootstrapPhase::Idle,
            pending: VecDeque::new(),
            outputs: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> BootstrapPhase {
        self.phase
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn request(&mut self, entry: E) {
        match self.phase {
            BootstrapPhase::Idle => {
                self.phase = BootstrapPhase::Bootstrapping;
                self.outputs.push_back(BootstrapOutput::Bootstrap(entry));
            }
            BootstrapPhase::Bootstrapping => self.pending.push_back(entry),
            BootstrapPhase::Ready => self.outputs.push_back(BootstrapOutput::Register(entry)),
        }
    }

    fn complete(&mut self) {
        if self.phase != BootstrapPhase::Bootstrapping {
            return;
        }
        self.phase = BootstrapPhase::Ready;
        self.outputs
            .extend(self.pending.drain(..).map(BootstrapOutput::Drain));
    }

    fn fail(&mut self) {
        if self.phase != BootstrapPhase::Bootstrapping {
            return;
        }
        self.phase = BootstrapPhase::Idle;
        self.outputs
            .extend(self.pending.drain(..).map(BootstrapOutput::Abandon));
    }
}

impl<E> Default for BootstrapMachine<E> {
    fn default() -> Self {
        Self::new()
    }
}

pub enum BootstrapInput<E> {
    /// A caller asked for a subscription.
    Request(E),
    /// The channel the bootstrap was waiting for exists.
    Completed,
    /// Channel creation failed.
    Failed,
}

#[derive(Debug, PartialEq)]
pub enum BootstrapOutput<E> {
    /// The entry that must create the channel and then register itself.
    Bootstrap(E),
    /// Register now; the channel already exists.
    Register(E),
    /// A queued entry released by a completed bootstrap.
    Drain(E),
    /// A queued entry released by a failed bootstrap.
    Abandon(E),
}

impl<E> StateMachine for BootstrapMachine<E> {
    type Input = BootstrapInput<E>;
    type Output = BootstrapOutput<E>;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            BootstrapInput::Request(entry) => self.request(entry),
            BootstrapInput::Completed => self.complete(),
            BootstrapInput::Failed => self.fail(),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.outputs.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_bootstraps() {
        let mut machine = BootstrapMachine::new();
        assert_eq!(machine.phase(), BootstrapPhase::Idle);

        let outputs = machine.step(BootstrapInput::Request(1));
        assert_eq!(outputs, vec![BootstrapOutput::Bootstrap(1)]);
        assert_eq!(machine.phase(), BootstrapPhase::Bootstrapping);
    }

    #[test]
    fn test_requests_queue_while_bootstrapping() {
        let mut machine = BootstrapMachine::new();
        machine.step(BootstrapInput::Request(1));

        assert!(machine.step(BootstrapInput::Request(2)).is_empty());
        assert!(machine.step(BootstrapInput::Request(3)).is_empty());
        assert_eq!(machine.pending_count(), 2);

        let mut drained = machine.step(BootstrapInput::Completed);
        drained.sort_by_key(|output| match output {
            BootstrapOutput::Drain(n) => *n,
            _ => panic!("expected drain"),
        });
        assert_eq!(
            drained,
            vec![BootstrapOutput::Drain(2), BootstrapOutput::Drain(3)]
        );
        assert_eq!(machine.phase(), BootstrapPhase::Ready);
        assert_eq!(machine.pending_count(), 0);
    }

    #[test]
    fn test_drain_happens_once() {
        let mut machine = BootstrapMachine::new();
        machine.step(BootstrapInput::Request(1));
        machine.step(BootstrapInput::Request(2));

        assert_eq!(machine.step(BootstrapInput::Completed).len(), 1);
        assert!(machine.step(BootstrapInput::Completed).is_empty());
    }

    #[test]
    fn test_ready_registers_directly() {
        let mut machine = BootstrapMachine::new();
        machine.step(BootstrapInput::Request(1));
        machine.step(BootstrapInput::Completed);

        let outputs = machine.step(BootstrapInput::Request(2));
        assert_eq!(outputs, vec![BootstrapOutput::Register(2)]);
    }

    #[test]
    fn test_failure_abandons_queue_and_resets() {
        let mut machine = BootstrapMachine::new();
        machine.step(BootstrapInput::Request(1));
        machine.step(BootstrapInput::Request(2));

        let outputs = machine.step(BootstrapInput::Failed);
        assert_eq!(outputs, vec![BootstrapOutput::Abandon(2)]);
        assert_eq!(machine.phase(), BootstrapPhase::Idle);

        // The next request starts a fresh bootstrap
        let outputs = machine.step(BootstrapInput::Request(3));
        assert_eq!(outputs, vec![BootstrapOutput::Bootstrap(3)]);
    }
}
