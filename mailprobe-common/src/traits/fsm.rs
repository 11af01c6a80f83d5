/// A pure state transition driven by one input at a time.
///
/// Implementors keep I/O out of `transition`; the caller performs the I/O
/// that produced `input` and acts on the returned state.
pub trait FiniteStateMachine {
    type Input;
    type Context;

    #[must_use]
    fn transition(self, input: Self::Input, context: &mut Self::Context) -> Self;
}
