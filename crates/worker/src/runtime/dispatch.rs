//! Worker phases and the event dispatch table.
//!
//! `dispatch` is pure: given the current phase and an event it returns the
//! next phase and the effects the runtime has to carry out. Events a phase
//! does not accept leave it unchanged with no effects.

use harbor_core::ControlCommand;

use crate::notify::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// A failed install; the worker only passes requests through.
    Redundant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Install,
    InstallSucceeded,
    InstallFailed,
    Activate,
    Activated,
    Message { from: Option<ClientId>, command: ControlCommand },
    Push { payload: Option<String> },
    Sync { tag: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Install,
    InstallSucceeded,
    InstallFailed,
    Activate,
    Activated,
    Message,
    Push,
    Sync,
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::InstallSucceeded => EventKind::InstallSucceeded,
            WorkerEvent::InstallFailed => EventKind::InstallFailed,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Activated => EventKind::Activated,
            WorkerEvent::Message { .. } => EventKind::Message,
            WorkerEvent::Push { .. } => EventKind::Push,
            WorkerEvent::Sync { .. } => EventKind::Sync,
        }
    }
}

/// Work the runtime performs after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Install,
    SkipWaiting,
    Activate,
    CheckForUpdate,
    ForceUpdate,
    RefreshCache,
    ReplyVersion { to: Option<ClientId> },
    PushReceived { payload: Option<String> },
    SyncRequested { tag: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub phase: Phase,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(phase: Phase) -> Self {
        Self { phase, effects: Vec::new() }
    }

    fn to(phase: Phase, effects: Vec<Effect>) -> Self {
        Self { phase, effects }
    }
}

type Handler = fn(Phase, &WorkerEvent) -> Transition;

const DISPATCH_TABLE: &[(EventKind, Handler)] = &[
    (EventKind::Install, on_install),
    (EventKind::InstallSucceeded, on_install_succeeded),
    (EventKind::InstallFailed, on_install_failed),
    (EventKind::Activate, on_activate),
    (EventKind::Activated, on_activated),
    (EventKind::Message, on_message),
    (EventKind::Push, on_push),
    (EventKind::Sync, on_sync),
];

/// Next phase and effects for `event` in `phase`.
pub fn dispatch(phase: Phase, event: &WorkerEvent) -> Transition {
    let kind = event.kind();
    DISPATCH_TABLE
        .iter()
        .find(|(k, _)| *k == kind)
        .map_or_else(|| Transition::stay(phase), |(_, handler)| handler(phase, event))
}

fn on_install(phase: Phase, _: &WorkerEvent) -> Transition {
    match phase {
        Phase::Parsed | Phase::Redundant => Transition::to(Phase::Installing, vec![Effect::Install]),
        other => Transition::stay(other),
    }
}

fn on_install_succeeded(phase: Phase, _: &WorkerEvent) -> Transition {
    match phase {
        Phase::Installing => Transition::to(Phase::Installed, vec![Effect::SkipWaiting]),
        other => Transition::stay(other),
    }
}

fn on_install_failed(phase: Phase, _: &WorkerEvent) -> Transition {
    match phase {
        Phase::Installing => Transition::to(Phase::Redundant, Vec::new()),
        other => Transition::stay(other),
    }
}

/// `Activating` accepts a retry after a failed cleanup.
fn on_activate(phase: Phase, _: &WorkerEvent) -> Transition {
    match phase {
        Phase::Installed | Phase::Activating => Transition::to(Phase::Activating, vec![Effect::Activate]),
        other => Transition::stay(other),
    }
}

fn on_activated(phase: Phase, _: &WorkerEvent) -> Transition {
    match phase {
        Phase::Activating => Transition::to(Phase::Activated, Vec::new()),
        other => Transition::stay(other),
    }
}

fn on_message(phase: Phase, event: &WorkerEvent) -> Transition {
    let WorkerEvent::Message { from, command } = event else {
        return Transition::stay(phase);
    };

    let effect = match (command, phase) {
        (ControlCommand::GetVersion, _) => Effect::ReplyVersion { to: *from },
        (_, Phase::Redundant) => return Transition::stay(phase),
        (ControlCommand::SkipWaiting, Phase::Installed | Phase::Activating) => Effect::SkipWaiting,
        (ControlCommand::CheckUpdate, _) => Effect::CheckForUpdate,
        (ControlCommand::ForceUpdate, Phase::Activated) => Effect::ForceUpdate,
        (ControlCommand::UpdateCache, Phase::Activated) => Effect::RefreshCache,
        _ => return Transition::stay(phase),
    };
    Transition::to(phase, vec![effect])
}

fn on_push(phase: Phase, event: &WorkerEvent) -> Transition {
    match (phase, event) {
        (Phase::Redundant, _) => Transition::stay(phase),
        (_, WorkerEvent::Push { payload }) => {
            Transition::to(phase, vec![Effect::PushReceived { payload: payload.clone() }])
        }
        _ => Transition::stay(phase),
    }
}

fn on_sync(phase: Phase, event: &WorkerEvent) -> Transition {
    match (phase, event) {
        (Phase::Redundant, _) => Transition::stay(phase),
        (_, WorkerEvent::Sync { tag }) => Transition::to(phase, vec![Effect::SyncRequested { tag: tag.clone() }]),
        _ => Transition::stay(phase),
    }
}
