//! `--help-output`: print every output the compositor announces, then exit.

use anyhow::{Context, Result};
use common::outputs::{ManagedSurface, OutputGeometry, OutputRegistry, Selector, SurfaceFactory};
use smithay_client_toolkit::{
    delegate_output, delegate_registry,
    output::{OutputHandler, OutputState},
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
};
use std::convert::Infallible;
use wayland_client::{Connection, QueueHandle, globals::registry_queue_init, protocol::wl_output};

use super::daemon::output_size;
use crate::error::SetupError;

/// Placeholder surface: listing never draws
pub(crate) struct Listed;

impl ManagedSurface for Listed {
    fn configure(&mut self, _width: u32, _height: u32, _scale: u32) {}

    fn destroy(self) {}
}

struct ListFactory;

impl<H> SurfaceFactory<H> for ListFactory {
    type Surface = Listed;
    type Error = Infallible;

    fn create_surface(
        &mut self,
        _handle: &H,
        _output: &OutputGeometry,
    ) -> Result<Listed, Infallible> {
        Ok(Listed)
    }
}

struct OutputLister {
    registry_state: RegistryState,
    output_state: OutputState,
    outputs: OutputRegistry<wl_output::WlOutput, Listed>,
}

impl OutputLister {
    fn sync_output(&mut self, output: &wl_output::WlOutput) {
        let Some(info) = self.output_state.info(output) else {
            return;
        };
        let (size, scale) = output_size(&info);
        self.outputs.on_geometry(output, size, scale);
        self.outputs.on_name(output, info.name.clone(), &mut ListFactory);
        self.outputs
            .on_description(output, info.description.clone(), &mut ListFactory);
    }
}

/// Connect, wait for output identities and return one line per output.
pub fn list_outputs() -> Result<Vec<String>> {
    let conn = Connection::connect_to_env().map_err(SetupError::from)?;
    let (globals, mut event_queue) =
        registry_queue_init(&conn).context("Failed to read compositor globals")?;
    let qh: QueueHandle<OutputLister> = event_queue.handle();

    let mut lister = OutputLister {
        registry_state: RegistryState::new(&globals),
        output_state: OutputState::new(&globals, &qh),
        outputs: OutputRegistry::new(Selector::All),
    };

    // Announcements, then names and descriptions
    event_queue.roundtrip(&mut lister)?;
    event_queue.roundtrip(&mut lister)?;

    Ok(describe_outputs(&lister.outputs))
}

pub(crate) fn describe_outputs<H: PartialEq + Clone>(
    outputs: &OutputRegistry<H, Listed>,
) -> Vec<String> {
    outputs
        .entries()
        .iter()
        .filter(|entry| entry.identity().is_resolved())
        .map(|entry| {
            let identity = entry.identity();
            let name = identity.name().unwrap_or("unnamed");
            let description = identity.description().unwrap_or("no description");
            format!("Output {} ({}) found", name, description)
        })
        .collect()
}

impl OutputHandler for OutputLister {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        self.outputs.on_output_announced(output.clone());
        self.sync_output(&output);
    }

    fn update_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        self.sync_output(&output);
    }

    fn output_destroyed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        self.outputs.on_output_withdrawn(&output);
    }
}

impl ProvidesRegistryState for OutputLister {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }

    registry_handlers![OutputState];
}

delegate_output!(OutputLister);
delegate_registry!(OutputLister);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_every_resolved_output() {
        let mut outputs: OutputRegistry<u32, Listed> = OutputRegistry::new(Selector::All);
        for handle in [1, 2, 3] {
            outputs.on_output_announced(handle);
        }
        outputs.on_name(&1, Some("DP-1".into()), &mut ListFactory);
        outputs.on_description(&1, Some("Dell U2720Q (DP-1)".into()), &mut ListFactory);
        outputs.on_description(&2, None, &mut ListFactory);
        outputs.on_name(&2, Some("HDMI-A-1".into()), &mut ListFactory);
        // Output 3 never finishes resolving
        outputs.on_name(&3, Some("eDP-1".into()), &mut ListFactory);

        assert_eq!(
            describe_outputs(&outputs),
            [
                "Output DP-1 (Dell U2720Q (DP-1)) found",
                "Output HDMI-A-1 (no description) found",
            ]
        );
    }

    #[test]
    fn test_no_outputs_lists_nothing() {
        let outputs: OutputRegistry<u32, Listed> = OutputRegistry::new(Selector::All);
        assert!(describe_outputs(&outputs).is_empty());
    }
}
