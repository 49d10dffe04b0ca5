use crate::context::FormulaContext;
use crate::stream::Update;

/// A composable unit of declarative state-transition logic.
///
/// `evaluate` must be pure with respect to its return value. It may declare
/// callbacks, children and stream updates through the context, which the
/// runtime reconciles against the previous pass.
pub trait Formula: 'static {
    /// Immutable input supplied by the parent or the host.
    type Input: 'static;
    /// Internal state. Evaluation runs against a snapshot, so it must be `Clone`.
    type State: Clone + 'static;
    /// Side effects handed to the parent or the host.
    type Effect: 'static;
    type RenderModel: 'static;

    fn initial_state(&self, input: &Self::Input) -> Self::State;

    fn evaluate(
        &self,
        input: &Self::Input,
        state: &Self::State,
        context: &mut FormulaContext<'_, Self::State, Self::Effect>,
    ) -> Evaluation<Self::RenderModel>;
}

/// Result of a single evaluation pass.
pub struct Evaluation<R> {
    pub render_model: R,
    /// Stream subscriptions that should be active after this pass.
    pub updates: Vec<Update>,
}

impl<R> Evaluation<R> {
    pub fn new(render_model: R) -> Self {
        Self {
            render_model,
            updates: Vec::new(),
        }
    }

    pub fn with_update(mut self, update: Update) -> Self {
        self.updates.push(update);
        self
    }

    pub fn with_updates(mut self, updates: impl IntoIterator<Item = Update>) -> Self {
        self.updates.extend(updates);
        self
    }
}

/// Outcome of a callback or stream handler: an optional new state and an
/// optional effect.
///
/// A transition carrying neither is a no-op and does not start a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct Transition<S, E> {
    pub state: Option<S>,
    pub effect: Option<E>,
}

impl<S, E> Transition<S, E> {
    pub fn none() -> Self {
        Self {
            state: None,
            effect: None,
        }
    }

    /// Replace the state.
    pub fn to(state: S) -> Self {
        Self {
            state: Some(state),
            effect: None,
        }
    }

    /// Emit an effect without touching the state.
    pub fn effect(effect: E) -> Self {
        Self {
            state: None,
            effect: Some(effect),
        }
    }

    pub fn with_effect(mut self, effect: E) -> Self {
        self.effect = Some(effect);
        self
    }

    pub fn is_none(&self) -> bool {
        self.state.is_none() && self.effect.is_none()
    }
}

impl<S, E> Default for Transition<S, E> {
    fn default() -> Self {
        Self::none()
    }
}
