use super::watch::Watched;

/// A lifecycle transition detected between two heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Reload,
    NewGame,
}

/// Classifies a change of watched values.
///
/// How a reload differs from a new game depends on the target's data layout,
/// so this is pluggable. Closures taking `(&Watched, &Watched)` implement it.
pub trait TransitionPredicate: Send + 'static {
    fn classify(&mut self, previous: &Watched, current: &Watched) -> Option<Transition>;
}

impl<F> TransitionPredicate for F
where
    F: FnMut(&Watched, &Watched) -> Option<Transition> + Send + 'static,
{
    fn classify(&mut self, previous: &Watched, current: &Watched) -> Option<Transition> {
        self(previous, current)
    }
}

/// Default classification.
///
/// - The entity manager pointer going from zero to non-zero, or being
///   reallocated, starts a new game.
/// - A load counter increase with the pointer unchanged is a reload.
/// - While the pointer is zero nothing is reported, so a zero followed by a
///   non-zero value is seen as one new game.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPredicate;

impl TransitionPredicate for DefaultPredicate {
    fn classify(&mut self, previous: &Watched, current: &Watched) -> Option<Transition> {
        if current.entity_manager == 0 {
            return None;
        }
        if previous.entity_manager != current.entity_manager {
            return Some(Transition::NewGame);
        }
        if current.load_counter > previous.load_counter {
            return Some(Transition::Reload);
        }
        None
    }
}
