use thiserror::Error;
use wayland_client::globals::BindError;

/// Conditions that stop the player before anything is shown
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Failed to connect to the Wayland compositor: {0}")]
    Connect(#[from] wayland_client::ConnectError),

    #[error("Compositor does not provide {interface}")]
    MissingGlobal {
        interface: &'static str,
        #[source]
        source: BindError,
    },

    #[error("No output matches '{0}'")]
    NoMatchingOutput(String),

    #[error("Could not create a drawable on any output matching '{0}'")]
    NoDrawable(String),
}
