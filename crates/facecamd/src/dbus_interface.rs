use crate::session::{SessionHandle, SessionSnapshot};
use zbus::interface;

pub const BUS_NAME: &str = "org.facecam.Session1";
pub const OBJECT_PATH: &str = "/org/facecam/Session1";

/// D-Bus interface for the facecam session daemon.
///
/// Every method returns the resulting session snapshot as JSON.
pub struct SessionService {
    session: SessionHandle,
}

impl SessionService {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }
}

fn to_json(snapshot: SessionSnapshot) -> zbus::fdo::Result<String> {
    serde_json::to_string(&snapshot).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn closed(e: crate::session::SessionError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.facecam.Session1")]
impl SessionService {
    /// Turn the camera on if it is off, off if it is on.
    async fn toggle_camera(&self) -> zbus::fdo::Result<String> {
        tracing::info!("toggle requested");
        to_json(self.session.toggle_camera().await.map_err(closed)?)
    }

    /// Clear the current error; reloads the backend if model loading failed.
    async fn retry(&self) -> zbus::fdo::Result<String> {
        tracing::info!("retry requested");
        to_json(self.session.retry().await.map_err(closed)?)
    }

    /// Return the current session state.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(self.session.snapshot().await.map_err(closed)?)
    }
}
