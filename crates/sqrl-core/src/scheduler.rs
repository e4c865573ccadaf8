//! Cooperative single-threaded action scheduler (spec §4.6, §5, §9).
//!
//! The source's polymorphic callback table becomes a capability-set trait
//! (`SchedulerCallbacks`); its inheritance-based actions become the tagged
//! enum in `actions.rs`; its client singleton becomes an explicit
//! `Scheduler` value the embedder owns and drives.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::actions::{Action, ActionOutcome};
use crate::entropy::EntropyPool;
use crate::user::User;

pub type ActionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Password,
    NewPassword,
    Hint,
    RescueCode,
}

#[derive(Debug, Clone)]
pub enum Callback {
    Send { action: ActionId, url: String, payload: Vec<u8> },
    Progress { action: ActionId, percent: u8 },
    Ask { action: ActionId, message: String, first_button: String, second_button: String },
    AuthRequired { action: ActionId, kind: AuthKind },
    SelectUser { action: ActionId },
    SelectAlternateIdentity { action: ActionId },
    SaveSuggested { action: ActionId },
    ActionComplete { action: ActionId },
}

/// The capability set an embedder implements, one per scheduler (spec §9).
pub trait SchedulerCallbacks {
    fn on_send(&mut self, action: ActionId, url: &str, payload: &[u8]);
    fn on_progress(&mut self, action: ActionId, percent: u8);
    fn on_ask(&mut self, action: ActionId, message: &str, first_button: &str, second_button: &str);
    fn on_auth_required(&mut self, action: ActionId, kind: AuthKind);
    fn on_select_user(&mut self, action: ActionId);
    fn on_select_alternate_identity(&mut self, action: ActionId);
    fn on_save_suggested(&mut self, action: ActionId);
    fn on_action_complete(&mut self, action: ActionId);
}

fn dispatch(cb: Callback, on: &mut impl SchedulerCallbacks) {
    match cb {
        Callback::Send { action, url, payload } => on.on_send(action, &url, &payload),
        Callback::Progress { action, percent } => on.on_progress(action, percent),
        Callback::Ask { action, message, first_button, second_button } => {
            on.on_ask(action, &message, &first_button, &second_button)
        }
        Callback::AuthRequired { action, kind } => on.on_auth_required(action, kind),
        Callback::SelectUser { action } => on.on_select_user(action),
        Callback::SelectAlternateIdentity { action } => on.on_select_alternate_identity(action),
        Callback::SaveSuggested { action } => on.on_save_suggested(action),
        Callback::ActionComplete { action } => on.on_action_complete(action),
    }
}

struct Entry {
    id: ActionId,
    action: Action,
}

/// Owns the pending-action and pending-callback queues. `loop_once` is one
/// scheduler step: drain callbacks, advance the front action by one state,
/// report whether there's more work left.
pub struct Scheduler {
    next_id: ActionId,
    actions: VecDeque<Entry>,
    callbacks: VecDeque<Callback>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self { next_id: 1, actions: VecDeque::new(), callbacks: VecDeque::new() }
    }

    pub fn submit(&mut self, action: Action) -> ActionId {
        let id = self.next_id;
        self.next_id += 1;
        self.actions.push_back(Entry { id, action });
        id
    }

    /// Cooperative cancel: sets the flag the action's `step` consults at
    /// its next state transition. No effect if the action already finished.
    pub fn cancel(&mut self, id: ActionId) {
        if let Some(entry) = self.actions.iter_mut().find(|e| e.id == id) {
            entry.action.should_cancel = true;
        } else {
            warn!(action = id, "cancel requested for unknown or already-finished action");
        }
    }

    pub fn is_idle(&self) -> bool {
        self.actions.is_empty() && self.callbacks.is_empty()
    }

    /// One step (spec §4.6): drain callbacks in FIFO order, then advance
    /// the action at the front of the queue by exactly one state. Returns
    /// `true` iff either queue is still non-empty.
    pub fn loop_once(&mut self, user: &mut User, entropy: &mut EntropyPool, on: &mut impl SchedulerCallbacks) -> bool {
        while let Some(cb) = self.callbacks.pop_front() {
            dispatch(cb, on);
        }

        if let Some(mut entry) = self.actions.pop_front() {
            let (outcome, emitted) = entry.action.step(entry.id, user, entropy);
            self.callbacks.extend(emitted);
            match outcome {
                ActionOutcome::Continue => self.actions.push_back(entry),
                ActionOutcome::Complete(status) => {
                    debug!(action = entry.id, ?status, "action complete");
                    self.callbacks.push_back(Callback::ActionComplete { action: entry.id });
                }
            }
        }

        !self.is_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionKind};
    use crate::settings::UserOptions;

    struct RecordingCallbacks {
        completed: Vec<ActionId>,
    }

    impl SchedulerCallbacks for RecordingCallbacks {
        fn on_send(&mut self, _action: ActionId, _url: &str, _payload: &[u8]) {}
        fn on_progress(&mut self, _action: ActionId, _percent: u8) {}
        fn on_ask(&mut self, _action: ActionId, _message: &str, _first_button: &str, _second_button: &str) {}
        fn on_auth_required(&mut self, _action: ActionId, _kind: AuthKind) {}
        fn on_select_user(&mut self, _action: ActionId) {}
        fn on_select_alternate_identity(&mut self, _action: ActionId) {}
        fn on_save_suggested(&mut self, _action: ActionId) {}
        fn on_action_complete(&mut self, action: ActionId) {
            self.completed.push(action);
        }
    }

    #[test]
    fn generate_action_runs_to_completion_and_reports_done() {
        let mut user = User::new(UserOptions::default());
        user.set_password(b"the password").unwrap();
        let mut entropy = EntropyPool::new();
        entropy.add(b"seed");
        let mut scheduler = Scheduler::new();
        let id = scheduler.submit(Action::new(ActionKind::Generate));
        let mut cb = RecordingCallbacks { completed: Vec::new() };
        let mut ticks = 0;
        while scheduler.loop_once(&mut user, &mut entropy, &mut cb) {
            ticks += 1;
            assert!(ticks < 10_000, "generate action never completed");
        }
        assert_eq!(cb.completed, vec![id]);
        assert!(user.mk().is_some());
    }
}
