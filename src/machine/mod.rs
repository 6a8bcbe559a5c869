//! # Event-driven finite state machine.
//!
//! A [`State`] is a named value with a transition table (event → destination).
//! [`StateMachine`] holds the current state plus a listener registry notified
//! synchronously on every transition.
//!
//! ## Rules
//! - An event absent from the current state's table is a [`MachineError::IllegalTransition`]
//!   and leaves the state unchanged (never a silent no-op).
//! - Listeners run in registration order, on the caller's stack, after the state changed.
//! - The first failing listener aborts notification and its error is returned to the caller.
//!
//! ```text
//! transition(event)
//!   ├─► table lookup ──(miss)──► Err(IllegalTransition)
//!   ├─► state = destination
//!   └─► for listener in registry (in order):
//!          Trigger::Any          → always
//!          Trigger::Enter(state) → when destination == state
//! ```
//!
//! ## Example
//! ```
//! use servicevisor::machine::{Label, State, StateMachine, Trigger};
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq)]
//! enum Lamp { Off, On }
//! #[derive(Clone, Copy, Debug, PartialEq, Eq)]
//! enum Switch { Flip }
//!
//! impl Label for Lamp {
//!     fn label(&self) -> &'static str { match self { Lamp::Off => "off", Lamp::On => "on" } }
//! }
//! impl Label for Switch {
//!     fn label(&self) -> &'static str { "flip" }
//! }
//! impl State for Lamp {
//!     type Event = Switch;
//!     fn on(&self, _: Switch) -> Option<Lamp> {
//!         Some(match self { Lamp::Off => Lamp::On, Lamp::On => Lamp::Off })
//!     }
//! }
//!
//! let mut lamp = StateMachine::new("lamp", Lamp::Off);
//! lamp.listen(Trigger::Enter(Lamp::On), |_| Ok(()));
//! assert_eq!(lamp.transition(Switch::Flip).unwrap(), Lamp::On);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::{ListenerError, MachineError};

/// Stable, human-readable name of a state or an event.
pub trait Label {
    fn label(&self) -> &'static str;
}

/// A state together with its transition table.
pub trait State: Label + Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Events accepted by the table.
    type Event: Label + Copy + Eq + fmt::Debug + Send + Sync + 'static;

    /// Destination for `event`, or `None` when the event is not defined here.
    fn on(&self, event: Self::Event) -> Option<Self>;
}

/// Which transitions a listener wants to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger<S> {
    /// Every transition that enters this state.
    Enter(S),
    /// Every transition.
    Any,
}

/// A completed transition, passed to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S: State> {
    pub from: S,
    pub event: S::Event,
    pub to: S,
}

type Listener<S> = Box<dyn FnMut(&Transition<S>) -> Result<(), ListenerError> + Send>;

/// Current state plus an ordered listener registry.
pub struct StateMachine<S: State> {
    name: Arc<str>,
    state: S,
    listeners: Vec<(Trigger<S>, Listener<S>)>,
}

impl<S: State> StateMachine<S> {
    /// Creates a machine in `initial` state. `name` identifies the owner in errors.
    pub fn new(name: impl Into<Arc<str>>, initial: S) -> Self {
        Self {
            name: name.into(),
            state: initial,
            listeners: Vec::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> S {
        self.state
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if `event` is defined for the current state.
    #[inline]
    pub fn accepts(&self, event: S::Event) -> bool {
        self.state.on(event).is_some()
    }

    /// Registers a listener. Listeners are never removed; they live as long as the machine.
    pub fn listen<F>(&mut self, trigger: Trigger<S>, listener: F)
    where
        F: FnMut(&Transition<S>) -> Result<(), ListenerError> + Send + 'static,
    {
        self.listeners.push((trigger, Box::new(listener)));
    }

    /// Fires `event` and returns the new state.
    pub fn transition(&mut self, event: S::Event) -> Result<S, MachineError> {
        let from = self.state;
        let to = from.on(event).ok_or_else(|| MachineError::IllegalTransition {
            machine: Arc::clone(&self.name),
            state: from.label(),
            event: event.label(),
        })?;

        self.state = to;
        let change = Transition { from, event, to };
        for (trigger, listener) in self.listeners.iter_mut() {
            let wanted = match trigger {
                Trigger::Any => true,
                Trigger::Enter(s) => *s == to,
            };
            if !wanted {
                continue;
            }
            listener(&change).map_err(|source| MachineError::Listener {
                machine: Arc::clone(&self.name),
                state: to.label(),
                source,
            })?;
        }
        Ok(to)
    }

    /// Sets the state directly without notifying listeners.
    ///
    /// Only for rehydrating from a persisted snapshot.
    pub fn restore(&mut self, state: S) {
        self.state = state;
    }
}

impl<S: State> fmt::Debug for StateMachine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
