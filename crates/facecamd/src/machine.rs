//! Session state machine.
//!
//! Pure and synchronous: [`SessionMachine::apply`] takes one [`Event`] and
//! returns the [`Effect`]s the controller must carry out. Camera readiness and
//! backend readiness are tracked independently; polling starts from a single
//! guarded place once both are ready.

use serde::Serialize;
use std::fmt;

/// Identifies one camera acquisition.
pub type AttemptId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Off,
    AcquiringCamera,
    LoadingBackend,
    Ready,
    Polling,
    Error,
}

/// A terminal failure shown to the user until they retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SessionFault {
    /// Camera denied or unavailable.
    Permission(String),
    /// Model weights or reference gallery failed to load.
    BackendLoad(String),
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFault::Permission(m) => write!(f, "camera unavailable: {m}"),
            SessionFault::BackendLoad(m) => write!(f, "vision backend failed to load: {m}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Kick off backend loading. Only the first one has any effect.
    Start,
    ToggleCamera,
    CameraAcquired(AttemptId),
    CameraFailed(AttemptId, String),
    BackendLoaded,
    BackendFailed(String),
    Retry,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    AcquireCamera(AttemptId),
    /// Adopt the stream that arrived for this attempt.
    KeepStream(AttemptId),
    /// Stop the stream that arrived for this attempt without adopting it.
    DiscardStream(AttemptId),
    /// Stop the held stream and detach it from the surface.
    ReleaseCamera,
    LoadBackend,
    StartPolling,
    StopPolling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CameraSlot {
    Idle,
    /// Requested, waiting for an abandoned acquisition to settle first.
    Queued,
    Acquiring(AttemptId),
    Ready(AttemptId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendSlot {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug)]
pub struct SessionMachine {
    requested: bool,
    camera: CameraSlot,
    /// Acquisition abandoned by a toggle-off; its stream is discarded on arrival.
    orphan: Option<AttemptId>,
    backend: BackendSlot,
    polling: bool,
    fault: Option<SessionFault>,
    next_attempt: AttemptId,
    torn_down: bool,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            requested: false,
            camera: CameraSlot::Idle,
            orphan: None,
            backend: BackendSlot::Unloaded,
            polling: false,
            fault: None,
            next_attempt: 1,
            torn_down: false,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.fault.is_some() {
            return Phase::Error;
        }
        if !self.requested {
            return Phase::Off;
        }
        match self.camera {
            CameraSlot::Queued | CameraSlot::Acquiring(_) => Phase::AcquiringCamera,
            CameraSlot::Ready(_) if self.polling => Phase::Polling,
            CameraSlot::Ready(_) if self.backend == BackendSlot::Ready => Phase::Ready,
            CameraSlot::Ready(_) => Phase::LoadingBackend,
            CameraSlot::Idle => Phase::Off,
        }
    }

    pub fn camera_requested(&self) -> bool {
        self.requested
    }

    pub fn camera_ready(&self) -> bool {
        matches!(self.camera, CameraSlot::Ready(_))
    }

    pub fn models_ready(&self) -> bool {
        self.backend == BackendSlot::Ready
    }

    pub fn polling(&self) -> bool {
        self.polling
    }

    pub fn fault(&self) -> Option<&SessionFault> {
        self.fault.as_ref()
    }

    /// Whether any acquisition, live or abandoned, is still outstanding.
    pub fn acquisition_in_flight(&self) -> bool {
        self.orphan.is_some() || matches!(self.camera, CameraSlot::Acquiring(_))
    }

    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        let effects = match event {
            Event::Start => self.on_start(),
            Event::ToggleCamera => self.on_toggle(),
            Event::CameraAcquired(id) => self.on_camera_acquired(id),
            Event::CameraFailed(id, msg) => self.on_camera_failed(id, msg),
            Event::BackendLoaded => self.on_backend_loaded(),
            Event::BackendFailed(msg) => self.on_backend_failed(msg),
            Event::Retry => self.on_retry(),
            Event::Teardown => self.on_teardown(),
        };
        tracing::trace!(phase = ?self.phase(), ?effects, "session transition");
        effects
    }

    fn on_start(&mut self) -> Vec<Effect> {
        if self.torn_down || self.backend != BackendSlot::Unloaded {
            return Vec::new();
        }
        self.backend = BackendSlot::Loading;
        vec![Effect::LoadBackend]
    }

    fn on_toggle(&mut self) -> Vec<Effect> {
        if self.torn_down {
            return Vec::new();
        }
        if self.requested {
            return self.camera_off();
        }
        if self.backend == BackendSlot::Failed {
            tracing::warn!("camera toggle refused until the backend is reloaded");
            return Vec::new();
        }

        self.fault = None;
        self.requested = true;
        if self.orphan.is_some() {
            self.camera = CameraSlot::Queued;
            Vec::new()
        } else {
            vec![self.begin_acquire()]
        }
    }

    fn on_camera_acquired(&mut self, id: AttemptId) -> Vec<Effect> {
        if self.camera == CameraSlot::Acquiring(id) {
            self.camera = CameraSlot::Ready(id);
            let mut effects = vec![Effect::KeepStream(id)];
            effects.extend(self.maybe_start_polling());
            return effects;
        }
        let mut effects = vec![Effect::DiscardStream(id)];
        if self.orphan == Some(id) {
            self.orphan = None;
            effects.extend(self.resume_queued());
        }
        effects
    }

    fn on_camera_failed(&mut self, id: AttemptId, msg: String) -> Vec<Effect> {
        if self.camera == CameraSlot::Acquiring(id) {
            self.camera = CameraSlot::Idle;
            self.requested = false;
            self.fault = Some(SessionFault::Permission(msg));
            return Vec::new();
        }
        if self.orphan == Some(id) {
            self.orphan = None;
            return self.resume_queued();
        }
        Vec::new()
    }

    fn on_backend_loaded(&mut self) -> Vec<Effect> {
        if self.backend != BackendSlot::Loading {
            return Vec::new();
        }
        self.backend = BackendSlot::Ready;
        self.maybe_start_polling()
    }

    fn on_backend_failed(&mut self, msg: String) -> Vec<Effect> {
        if self.backend != BackendSlot::Loading {
            return Vec::new();
        }
        self.backend = BackendSlot::Failed;
        self.fault = Some(SessionFault::BackendLoad(msg));
        if self.requested {
            self.camera_off()
        } else {
            Vec::new()
        }
    }

    fn on_retry(&mut self) -> Vec<Effect> {
        if self.torn_down || self.fault.take().is_none() {
            return Vec::new();
        }
        if self.backend == BackendSlot::Failed {
            self.backend = BackendSlot::Loading;
            return vec![Effect::LoadBackend];
        }
        Vec::new()
    }

    fn on_teardown(&mut self) -> Vec<Effect> {
        if self.torn_down {
            return Vec::new();
        }
        self.torn_down = true;
        self.camera_off()
    }

    fn begin_acquire(&mut self) -> Effect {
        let id = self.next_attempt;
        self.next_attempt += 1;
        self.camera = CameraSlot::Acquiring(id);
        Effect::AcquireCamera(id)
    }

    fn resume_queued(&mut self) -> Vec<Effect> {
        if self.camera == CameraSlot::Queued && !self.torn_down {
            vec![self.begin_acquire()]
        } else {
            Vec::new()
        }
    }

    /// Stop polling and give up the camera, whatever state it is in.
    fn camera_off(&mut self) -> Vec<Effect> {
        self.requested = false;
        let mut effects = Vec::new();
        if self.polling {
            self.polling = false;
            effects.push(Effect::StopPolling);
        }
        match self.camera {
            CameraSlot::Ready(_) => effects.push(Effect::ReleaseCamera),
            CameraSlot::Acquiring(id) => self.orphan = Some(id),
            CameraSlot::Queued | CameraSlot::Idle => {}
        }
        self.camera = CameraSlot::Idle;
        effects
    }

    /// The only place polling is started.
    fn maybe_start_polling(&mut self) -> Vec<Effect> {
        let ready = self.requested
            && self.camera_ready()
            && self.models_ready()
            && self.fault.is_none()
            && !self.polling
            && !self.torn_down;
        if ready {
            self.polling = true;
            vec![Effect::StartPolling]
        } else {
            Vec::new()
        }
    }
}
