//! Session controller.
//!
//! A single tokio task owns the camera stream, the polling task and the
//! [`SessionMachine`]. Callers talk to it through a cloneable
//! [`SessionHandle`]; camera acquisition and backend loading run as spawned
//! tasks that report back over an internal channel, so every state change is
//! applied by the controller task in order.

use crate::machine::{AttemptId, Effect, Event, Phase, SessionFault, SessionMachine};
use crate::polling::{PollContext, PollingTask, SharedSurface};
use facecam_core::{
    build_reference_gallery, DetectionOptions, FaceGallery, GallerySpec, OverlayOptions,
    ReferenceSource, Surface, VisionBackend,
};
use facecam_hw::{CameraDevice, CameraError, VideoConstraints, VideoStream};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session controller exited")]
    ChannelClosed,
}

/// Point-in-time view of the session, returned by every command.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub camera_requested: bool,
    pub camera_ready: bool,
    pub models_ready: bool,
    pub polling: bool,
    /// A polling task handle is held.
    pub timer_active: bool,
    /// A camera stream is held.
    pub stream_held: bool,
    /// An acquisition (possibly an abandoned one) has not settled yet.
    pub acquiring: bool,
    pub last_error: Option<String>,
    pub fault: Option<SessionFault>,
}

/// Static session parameters.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub constraints: VideoConstraints,
    pub model_dir: PathBuf,
    pub poll_interval: Duration,
    pub detection: DetectionOptions,
    pub overlay: OverlayOptions,
    /// Reference gallery to build once the models are loaded.
    pub gallery: Option<GallerySpec>,
}

/// The collaborators the controller drives.
pub struct SessionParts {
    pub camera: Arc<dyn CameraDevice>,
    pub backend: Arc<dyn VisionBackend>,
    pub references: Arc<dyn ReferenceSource>,
    pub surface: Box<dyn Surface>,
}

enum Command {
    Toggle(oneshot::Sender<SessionSnapshot>),
    Retry(oneshot::Sender<SessionSnapshot>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<SessionSnapshot>),
}

/// Results of work the controller spawned.
enum Completion {
    Camera {
        attempt: AttemptId,
        result: Result<Arc<dyn VideoStream>, CameraError>,
    },
    Backend(Result<Option<FaceGallery>, String>),
}

/// Clone-safe handle to the session controller.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<SessionSnapshot>) -> Command,
    ) -> Result<SessionSnapshot, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Flip the camera on or off.
    pub async fn toggle_camera(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(Command::Toggle).await
    }

    /// Acknowledge the current error; reloads the backend if that is what failed.
    pub async fn retry(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(Command::Retry).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(Command::Snapshot).await
    }

    /// Stop polling, release the camera and end the controller.
    pub async fn shutdown(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(Command::Shutdown).await
    }
}

/// Spawn the session controller and start loading the backend.
pub fn spawn_session(settings: SessionSettings, parts: SessionParts) -> SessionHandle {
    let (tx, rx) = mpsc::channel(8);
    let (done_tx, done_rx) = mpsc::unbounded_channel();

    let controller = Controller {
        machine: SessionMachine::new(),
        settings,
        camera: parts.camera,
        backend: parts.backend,
        references: parts.references,
        surface: Arc::new(Mutex::new(parts.surface)),
        stream: None,
        landed: None,
        poller: None,
        gallery: None,
        loader: None,
        done_tx,
    };
    tokio::spawn(controller.run(rx, done_rx));

    SessionHandle { tx }
}

struct Controller {
    machine: SessionMachine,
    settings: SessionSettings,
    camera: Arc<dyn CameraDevice>,
    backend: Arc<dyn VisionBackend>,
    references: Arc<dyn ReferenceSource>,
    surface: SharedSurface,
    stream: Option<(AttemptId, Arc<dyn VideoStream>)>,
    /// Stream that just arrived, waiting for the machine to keep or discard it.
    landed: Option<(AttemptId, Arc<dyn VideoStream>)>,
    poller: Option<PollingTask>,
    gallery: Option<Arc<FaceGallery>>,
    loader: Option<JoinHandle<()>>,
    done_tx: mpsc::UnboundedSender<Completion>,
}

impl Controller {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        mut done_rx: mpsc::UnboundedReceiver<Completion>,
    ) {
        tracing::info!("session controller started");
        self.dispatch(Event::Start);

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Toggle(reply)) => {
                        self.dispatch(Event::ToggleCamera);
                        let _ = reply.send(self.snapshot());
                    }
                    Some(Command::Retry(reply)) => {
                        self.dispatch(Event::Retry);
                        let _ = reply.send(self.snapshot());
                    }
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Some(Command::Shutdown(reply)) => {
                        self.dispatch(Event::Teardown);
                        let _ = reply.send(self.snapshot());
                        break;
                    }
                    None => {
                        self.dispatch(Event::Teardown);
                        break;
                    }
                },
                Some(done) = done_rx.recv() => self.on_completion(done),
            }
        }

        if let Some(loader) = self.loader.take() {
            loader.abort();
        }
        tracing::info!("session controller exiting");
    }

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Camera {
                attempt,
                result: Ok(stream),
            } => {
                self.landed = Some((attempt, stream));
                self.dispatch(Event::CameraAcquired(attempt));
                if let Some((id, orphan)) = self.landed.take() {
                    tracing::warn!(attempt = id, "unclaimed stream stopped");
                    orphan.stop();
                }
            }
            Completion::Camera {
                attempt,
                result: Err(e),
            } => {
                tracing::warn!(attempt, error = %e, "camera acquisition failed");
                self.dispatch(Event::CameraFailed(attempt, e.to_string()));
            }
            Completion::Backend(Ok(gallery)) => {
                self.loader = None;
                self.gallery = gallery.map(Arc::new);
                self.dispatch(Event::BackendLoaded);
            }
            Completion::Backend(Err(msg)) => {
                self.loader = None;
                tracing::error!(error = %msg, "backend load failed");
                self.dispatch(Event::BackendFailed(msg));
            }
        }
    }

    fn dispatch(&mut self, event: Event) {
        for effect in self.machine.apply(event) {
            self.execute(effect);
        }
        if let Some(fault) = self.machine.fault() {
            tracing::debug!(%fault, "session in error state");
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::AcquireCamera(attempt) => self.spawn_acquire(attempt),
            Effect::KeepStream(attempt) => match self.landed.take() {
                Some((id, stream)) if id == attempt => {
                    let (w, h) = stream.resolution();
                    tracing::info!(attempt, width = w, height = h, "camera ready");
                    match self.surface.lock() {
                        Ok(mut surface) => surface.attach(w, h),
                        Err(_) => tracing::warn!("surface lock poisoned; not attached"),
                    }
                    self.stream = Some((id, stream));
                }
                other => self.landed = other,
            },
            Effect::DiscardStream(attempt) => match self.landed.take() {
                Some((id, stream)) if id == attempt => {
                    tracing::info!(attempt, "discarding stream from abandoned acquisition");
                    stream.stop();
                }
                other => self.landed = other,
            },
            Effect::ReleaseCamera => self.release_camera(),
            Effect::LoadBackend => self.spawn_load(),
            Effect::StartPolling => self.start_polling(),
            Effect::StopPolling => {
                self.poller.take();
            }
        }
    }

    fn spawn_acquire(&self, attempt: AttemptId) {
        let camera = Arc::clone(&self.camera);
        let constraints = self.settings.constraints.clone();
        let done_tx = self.done_tx.clone();
        tracing::info!(attempt, width = constraints.width, height = constraints.height, "acquiring camera");

        tokio::spawn(async move {
            let result = camera.acquire(&constraints).await;
            if let Err(mpsc::error::SendError(Completion::Camera {
                result: Ok(stream), ..
            })) = done_tx.send(Completion::Camera { attempt, result })
            {
                // Controller is gone; nobody will ever release this.
                stream.stop();
            }
        });
    }

    fn release_camera(&mut self) {
        if let Some((attempt, stream)) = self.stream.take() {
            stream.stop();
            tracing::info!(attempt, "camera released");
        }
        match self.surface.lock() {
            Ok(mut surface) => surface.detach(),
            Err(_) => tracing::warn!("surface lock poisoned; not detached"),
        }
    }

    fn spawn_load(&mut self) {
        if let Some(old) = self.loader.take() {
            old.abort();
        }
        let backend = Arc::clone(&self.backend);
        let references = Arc::clone(&self.references);
        let model_dir = self.settings.model_dir.clone();
        let gallery_spec = self.settings.gallery.clone();
        let done_tx = self.done_tx.clone();
        tracing::info!(dir = %model_dir.display(), "loading vision backend");

        self.loader = Some(tokio::spawn(async move {
            let result: Result<Option<FaceGallery>, String> = async {
                backend
                    .load_models(&model_dir)
                    .await
                    .map_err(|e| e.to_string())?;
                match gallery_spec {
                    Some(spec) => build_reference_gallery(backend.as_ref(), references.as_ref(), &spec)
                        .await
                        .map(Some)
                        .map_err(|e| e.to_string()),
                    None => Ok(None),
                }
            }
            .await;
            let _ = done_tx.send(Completion::Backend(result));
        }));
    }

    fn start_polling(&mut self) {
        let Some((_, stream)) = &self.stream else {
            tracing::error!("polling requested without a camera stream");
            return;
        };
        let ctx = PollContext {
            stream: Arc::clone(stream),
            backend: Arc::clone(&self.backend),
            gallery: self.gallery.clone(),
            surface: Arc::clone(&self.surface),
            options: self.settings.detection.clone(),
            overlay: self.settings.overlay,
        };
        self.poller = Some(PollingTask::spawn(ctx, self.settings.poll_interval));
    }

    fn snapshot(&self) -> SessionSnapshot {
        let fault = self.machine.fault().cloned();
        SessionSnapshot {
            phase: self.machine.phase(),
            camera_requested: self.machine.camera_requested(),
            camera_ready: self.machine.camera_ready(),
            models_ready: self.machine.models_ready(),
            polling: self.machine.polling(),
            timer_active: self.poller.as_ref().is_some_and(|p| !p.is_finished()),
            stream_held: self.stream.is_some(),
            acquiring: self.machine.acquisition_in_flight(),
            last_error: fault.as_ref().map(|f| f.to_string()),
            fault,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use facecam_core::{
        BackendError, BoundingBox, Descriptor, Detection, Face, Frame, GalleryError, OverlayError,
    };
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockStream {
        stopped: AtomicBool,
        live: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl VideoStream for MockStream {
        async fn read_frame(&self) -> Result<Frame, CameraError> {
            if self.stopped.load(Ordering::SeqCst) {
                return Err(CameraError::Stopped);
            }
            Ok(Frame { data: vec![0; 4], width: 2, height: 2, sequence: 0, tag: None })
        }

        fn stop(&self) {
            if !self.stopped.swap(true, Ordering::SeqCst) {
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
        }

        fn is_live(&self) -> bool {
            !self.stopped.load(Ordering::SeqCst)
        }

        fn resolution(&self) -> (u32, u32) {
            (2, 2)
        }
    }

    #[derive(Default)]
    struct MockCamera {
        deny: AtomicBool,
        delay: Duration,
        acquisitions: AtomicUsize,
        live: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CameraDevice for MockCamera {
        async fn acquire(&self, _c: &VideoConstraints) -> Result<Arc<dyn VideoStream>, CameraError> {
            self.acquisitions.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.deny.load(Ordering::SeqCst) {
                return Err(CameraError::PermissionDenied("NotAllowedError".into()));
            }
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockStream {
                stopped: AtomicBool::new(false),
                live: Arc::clone(&self.live),
            }))
        }
    }

    #[derive(Default)]
    struct MockBackend {
        fail_load: AtomicBool,
        load_delay: Duration,
        loads: AtomicUsize,
        /// Detection calls with these (0-based) indices fail.
        failing_calls: Vec<usize>,
        detect_calls: AtomicUsize,
    }

    fn detection(descriptor: Vec<f32>) -> Detection {
        Detection {
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 0.9 },
            landmarks: None,
            expressions: None,
            descriptor: Some(Descriptor::new(descriptor)),
        }
    }

    #[async_trait]
    impl VisionBackend for MockBackend {
        async fn load_models(&self, _dir: &Path) -> Result<(), BackendError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.load_delay).await;
            if self.fail_load.load(Ordering::SeqCst) {
                return Err(BackendError::ModelNotFound("tiny_face_detector_model".into()));
            }
            Ok(())
        }

        async fn detect_faces(
            &self,
            _frame: &Frame,
            _options: &DetectionOptions,
        ) -> Result<Vec<Detection>, BackendError> {
            let n = self.detect_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_calls.contains(&n) {
                return Err(BackendError::InferenceFailed("bad frame".into()));
            }
            Ok(vec![detection(vec![1.0, 0.0])])
        }

        async fn detect_single_face(&self, frame: &Frame) -> Result<Option<Detection>, BackendError> {
            match frame.tag.as_deref() {
                Some(t) if t.starts_with("alice/") => Ok(Some(detection(vec![1.0, 0.0]))),
                _ => Ok(None),
            }
        }
    }

    struct MockReferences;

    #[async_trait]
    impl ReferenceSource for MockReferences {
        async fn fetch(&self, label: &str, index: usize) -> Result<Frame, GalleryError> {
            Ok(Frame {
                data: vec![0; 4],
                width: 2,
                height: 2,
                sequence: 0,
                tag: Some(format!("{label}/{index}")),
            })
        }
    }

    #[derive(Default, Clone)]
    struct Recorder {
        renders: Arc<AtomicUsize>,
        attaches: Arc<AtomicUsize>,
        detaches: Arc<AtomicUsize>,
        labels: Arc<Mutex<Vec<String>>>,
    }

    struct RecordingSurface(Recorder);

    impl Surface for RecordingSurface {
        fn attach(&mut self, width: u32, height: u32) {
            assert_eq!((width, height), (2, 2));
            self.0.attaches.fetch_add(1, Ordering::SeqCst);
        }

        fn clear(&mut self) {}

        fn render(
            &mut self,
            _frame: &Frame,
            faces: &[Face],
            _overlay: &OverlayOptions,
        ) -> Result<(), OverlayError> {
            self.0.renders.fetch_add(1, Ordering::SeqCst);
            let mut labels = self.0.labels.lock().unwrap();
            labels.clear();
            labels.extend(faces.iter().filter_map(|f| f.identity.as_ref().map(|m| m.label.clone())));
            Ok(())
        }

        fn detach(&mut self) {
            self.0.detaches.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        handle: SessionHandle,
        camera: Arc<MockCamera>,
        backend: Arc<MockBackend>,
        recorder: Recorder,
    }

    fn settings(gallery: Option<GallerySpec>) -> SessionSettings {
        SessionSettings {
            constraints: VideoConstraints::default(),
            model_dir: PathBuf::from("/models"),
            poll_interval: Duration::from_millis(1000),
            detection: DetectionOptions::default(),
            overlay: OverlayOptions::default(),
            gallery,
        }
    }

    fn harness(camera: MockCamera, backend: MockBackend, gallery: Option<GallerySpec>) -> Harness {
        let camera = Arc::new(camera);
        let backend = Arc::new(backend);
        let recorder = Recorder::default();
        let handle = spawn_session(
            settings(gallery),
            SessionParts {
                camera: camera.clone(),
                backend: backend.clone(),
                references: Arc::new(MockReferences),
                surface: Box::new(RecordingSurface(recorder.clone())),
            },
        );
        Harness { handle, camera, backend, recorder }
    }

    async fn wait_for(
        handle: &SessionHandle,
        pred: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        for _ in 0..200 {
            let snap = handle.snapshot().await.unwrap();
            if pred(&snap) {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached: {:?}", handle.snapshot().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_on_then_off_releases_everything() {
        let h = harness(MockCamera::default(), MockBackend::default(), None);

        let snap = h.handle.toggle_camera().await.unwrap();
        assert!(snap.camera_requested);

        let snap = wait_for(&h.handle, |s| s.phase == Phase::Polling).await;
        assert!(snap.timer_active && snap.stream_held);
        assert_eq!(h.camera.live.load(Ordering::SeqCst), 1);
        assert_eq!(h.recorder.attaches.load(Ordering::SeqCst), 1);

        // Released while handling the toggle itself.
        let snap = h.handle.toggle_camera().await.unwrap();
        assert_eq!(snap.phase, Phase::Off);
        assert!(!snap.timer_active && !snap.stream_held && !snap.camera_ready);
        assert_eq!(h.camera.live.load(Ordering::SeqCst), 0);
        assert_eq!(h.recorder.detaches.load(Ordering::SeqCst), 1);

        // No ticks once stopped.
        let calls = h.backend.detect_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.backend.detect_calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_one_timer_after_readiness_race() {
        // Backend becomes ready well after the camera.
        let backend = MockBackend { load_delay: Duration::from_millis(300), ..Default::default() };
        let camera = MockCamera { delay: Duration::from_millis(50), ..Default::default() };
        let h = harness(camera, backend, None);

        h.handle.toggle_camera().await.unwrap();
        let snap = wait_for(&h.handle, |s| s.camera_ready).await;
        assert!(!snap.polling && !snap.timer_active, "must wait for models");
        assert_eq!(snap.phase, Phase::LoadingBackend);

        let snap = wait_for(&h.handle, |s| s.phase == Phase::Polling).await;
        assert!(snap.timer_active);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        // One loop at 1s period: three ticks, not six.
        assert_eq!(h.backend.detect_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied() {
        let camera = MockCamera::default();
        camera.deny.store(true, Ordering::SeqCst);
        let h = harness(camera, MockBackend::default(), None);

        h.handle.toggle_camera().await.unwrap();
        let snap = wait_for(&h.handle, |s| s.phase == Phase::Error).await;
        assert!(!snap.camera_requested && !snap.stream_held && !snap.timer_active);
        assert!(snap.last_error.unwrap().contains("NotAllowedError"));
        assert!(matches!(snap.fault, Some(SessionFault::Permission(_))));

        // Re-toggling is the retry path.
        h.camera.deny.store(false, Ordering::SeqCst);
        let snap = h.handle.toggle_camera().await.unwrap();
        assert!(snap.last_error.is_none());
        wait_for(&h.handle, |s| s.phase == Phase::Polling).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_blocks_polling_until_retry() {
        let backend = MockBackend { load_delay: Duration::from_millis(10), ..Default::default() };
        backend.fail_load.store(true, Ordering::SeqCst);
        let camera = MockCamera { delay: Duration::from_millis(200), ..Default::default() };
        let h = harness(camera, backend, None);

        h.handle.toggle_camera().await.unwrap();
        let snap = wait_for(&h.handle, |s| s.phase == Phase::Error).await;
        assert!(!snap.models_ready);
        assert!(matches!(snap.fault, Some(SessionFault::BackendLoad(_))));

        // The camera finishes opening after the failure: it must not poll.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let snap = h.handle.snapshot().await.unwrap();
        assert!(!snap.models_ready && !snap.polling && !snap.stream_held);
        assert_eq!(h.camera.live.load(Ordering::SeqCst), 0);
        assert_eq!(h.backend.detect_calls.load(Ordering::SeqCst), 0);

        // Toggling does not bypass the failure.
        let snap = h.handle.toggle_camera().await.unwrap();
        assert_eq!(snap.phase, Phase::Error);

        h.backend.fail_load.store(false, Ordering::SeqCst);
        let snap = h.handle.retry().await.unwrap();
        assert!(snap.last_error.is_none());
        wait_for(&h.handle, |s| s.models_ready).await;
        assert_eq!(h.backend.loads.load(Ordering::SeqCst), 2);

        h.handle.toggle_camera().await.unwrap();
        wait_for(&h.handle, |s| s.phase == Phase::Polling).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_error_does_not_stop_loop() {
        let backend = MockBackend { failing_calls: vec![0, 1], ..Default::default() };
        let h = harness(MockCamera::default(), backend, None);

        h.handle.toggle_camera().await.unwrap();
        wait_for(&h.handle, |s| s.phase == Phase::Polling).await;

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(h.backend.detect_calls.load(Ordering::SeqCst), 4);
        assert_eq!(h.recorder.renders.load(Ordering::SeqCst), 2);
        let snap = h.handle.snapshot().await.unwrap();
        assert!(snap.timer_active);
        assert_eq!(snap.phase, Phase::Polling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_during_acquisition_never_overlaps() {
        let camera = MockCamera { delay: Duration::from_millis(100), ..Default::default() };
        let h = harness(camera, MockBackend::default(), None);

        h.handle.toggle_camera().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.handle.toggle_camera().await.unwrap();
        let snap = h.handle.toggle_camera().await.unwrap();
        assert_eq!(snap.phase, Phase::AcquiringCamera);
        // Second acquisition waits for the abandoned one.
        assert_eq!(h.camera.acquisitions.load(Ordering::SeqCst), 1);

        wait_for(&h.handle, |s| s.phase == Phase::Polling).await;
        assert_eq!(h.camera.acquisitions.load(Ordering::SeqCst), 2);
        assert_eq!(h.camera.live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_labels_reach_surface() {
        let gallery = GallerySpec {
            labels: vec!["alice".into(), "bob".into()],
            images_per_label: 2,
            distance_threshold: 0.6,
        };
        let h = harness(MockCamera::default(), MockBackend::default(), Some(gallery));

        h.handle.toggle_camera().await.unwrap();
        wait_for(&h.handle, |s| s.phase == Phase::Polling).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(*h.recorder.labels.lock().unwrap(), vec!["alice".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_gallery_is_backend_failure() {
        let gallery = GallerySpec {
            labels: vec!["bob".into()],
            images_per_label: 2,
            distance_threshold: 0.6,
        };
        let h = harness(MockCamera::default(), MockBackend::default(), Some(gallery));

        let snap = wait_for(&h.handle, |s| s.phase == Phase::Error).await;
        assert!(!snap.models_ready);
        assert!(matches!(snap.fault, Some(SessionFault::BackendLoad(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_tears_down() {
        let h = harness(MockCamera::default(), MockBackend::default(), None);
        h.handle.toggle_camera().await.unwrap();
        wait_for(&h.handle, |s| s.phase == Phase::Polling).await;

        let snap = h.handle.shutdown().await.unwrap();
        assert!(!snap.timer_active && !snap.stream_held);
        assert_eq!(h.camera.live.load(Ordering::SeqCst), 0);
        assert!(matches!(h.handle.snapshot().await, Err(SessionError::ChannelClosed)));
    }
}
