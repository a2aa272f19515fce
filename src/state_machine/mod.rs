pub mod bootstrap;
pub mod channel;

/// The [`StateMachine`] trait provides calling semantics and indicates the upholding of invariants
/// that guarantee deterministic behavior.
///
/// # Functionality
/// A state machine consumes a single [`Input`](StateMachine::Input) type and produces a single
/// [`Output`](StateMachine::Output) type, most often enums grouping every kind of event the
/// machine understands and every action it asks its driver to perform.
///
/// Processing an input never performs the resulting action. Outputs are buffered and handed to
/// the driver through [`poll_output`](StateMachine::poll_output), which executes them (issues
/// the remote call, sleeps, invokes the change callback) and feeds the outcome back as input.
///
/// # Invariants
/// Implementors *must* be pure so that a recorded sequence of inputs always reproduces the same
/// sequence of outputs.
///
/// ## No Interior Mutability
/// All data is either immutable or mutated through `&mut` access. No [`std::cell`] containers,
/// no [`std::sync`] locks and no reference counted pointers.
///
/// ## No IO
/// No [`std::io`], [`std::net`] or libraries wrapping them. This includes reading the system
/// clock: delays are emitted as output values for the driver to honor, never awaited in place.
///
/// ## No Concurrency
/// No threads, no async. The driver owns the machine behind whatever synchronization it needs
/// and decides when inputs arrive.
///
/// # Side Effects
/// Logging is the only permitted side effect. The logic of the machine *must not* depend on it.
///
/// # Example
/// ```ignore
/// let mut machine = BootstrapMachine::new();
/// machine.process_input(BootstrapInput::Request("first"));
/// machine.process_input(BootstrapInput::Request("second"));
///
/// assert!(matches!(machine.poll_output(), Some(BootstrapOutput::Bootstrap("first"))));
/// assert!(machine.poll_output().is_none());
///
/// machine.process_input(BootstrapInput::Completed);
/// assert!(matches!(machine.poll_output(), Some(BootstrapOutput::Drain("second"))));
/// ```
pub trait StateMachine {
    /// The type of input that is [processed](StateMachine::process_input) by the state machine.
    type Input;
    /// The type of output that is [polled](StateMachine::poll_output) from the state machine.
    type Output;

    /// Process the provided `input` into the state machine.
    fn process_input(&mut self, input: Self::Input);

    /// Poll the state machine for output, returning the first available output if present.
    fn poll_output(&mut self) -> Option<Self::Output>;

    /// Process `input` and collect every output it produced.
    fn step(&mut self, input: Self::Input) -> Vec<Self::Output> {
        self.process_input(input);
        std::iter::from_fn(|| self.poll_output()).collect()
    }
}
