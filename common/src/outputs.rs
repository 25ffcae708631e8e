//! Output identity resolution and selection.
//!
//! Each output announced by the compositor starts [`Identity::Announced`] and
//! learns its connector name and its description in two independent phases.
//! Only once both phases have arrived is the selection predicate evaluated,
//! exactly once per output: a match gets a surface from the
//! [`SurfaceFactory`], anything else is dropped on the spot.
//!
//! The registry is generic over the compositor handle `H` and the surface
//! type `S` so the player, the holder and the tests share one state machine.

use std::fmt;

/// Which outputs the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// `*` or `ALL`: every output.
    All,
    /// A connector name (`DP-1`) or an output description.
    Named(String),
}

impl Selector {
    pub fn parse(target: &str) -> Self {
        let target = target.trim();
        if target == "*" || target.eq_ignore_ascii_case("all") {
            Self::All
        } else {
            Self::Named(target.to_string())
        }
    }

    /// Whether an output with this resolved identity is wanted.
    ///
    /// Descriptions often end in `" (<connector>)"`; the bare part matches too.
    pub fn matches(&self, name: Option<&str>, description: Option<&str>) -> bool {
        match self {
            Self::All => true,
            Self::Named(target) => {
                if name == Some(target.as_str()) {
                    return true;
                }
                let Some(description) = description else {
                    return false;
                };
                if description == target {
                    return true;
                }
                description
                    .rsplit_once(" (")
                    .is_some_and(|(bare, _)| bare == target)
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all outputs"),
            Self::Named(target) => write!(f, "'{}'", target),
        }
    }
}

/// Resolution progress of one output.
///
/// A phase carries `None` when the compositor has no value for it; the phase
/// still counts as delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Announced,
    NameKnown {
        name: Option<String>,
    },
    DescriptionKnown {
        description: Option<String>,
    },
    Resolved {
        name: Option<String>,
        description: Option<String>,
    },
}

impl Identity {
    fn with_name(self, name: Option<String>) -> Self {
        match self {
            Self::Announced | Self::NameKnown { .. } => Self::NameKnown { name },
            Self::DescriptionKnown { description } | Self::Resolved { description, .. } => {
                Self::Resolved { name, description }
            }
        }
    }

    fn with_description(self, description: Option<String>) -> Self {
        match self {
            Self::Announced | Self::DescriptionKnown { .. } => {
                Self::DescriptionKnown { description }
            }
            Self::NameKnown { name } | Self::Resolved { name, .. } => {
                Self::Resolved { name, description }
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::NameKnown { name } | Self::Resolved { name, .. } => name.as_deref(),
            _ => None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::DescriptionKnown { description } | Self::Resolved { description, .. } => {
                description.as_deref()
            }
            _ => None,
        }
    }
}

/// Creates the drawable resource for a selected output.
pub trait SurfaceFactory<H> {
    type Surface: ManagedSurface;
    type Error: fmt::Display;

    fn create_surface(
        &mut self,
        handle: &H,
        output: &OutputGeometry,
    ) -> Result<Self::Surface, Self::Error>;
}

/// A per-output surface owned by the registry.
pub trait ManagedSurface {
    /// Apply (or re-apply) the compositor-assigned size, in place.
    fn configure(&mut self, width: u32, height: u32, scale: u32);

    /// Release everything, compositor objects before GPU resources.
    fn destroy(self);
}

/// Size and label of an output as far as surfaces are concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputGeometry {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub scale: u32,
}

/// Outcome of the one-time selection decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Selected,
    Rejected,
    /// Matched, but the surface could not be created.
    Failed,
}

/// Result of a configure event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Configured {
    First,
    Resized,
    Unchanged,
}

/// One compositor output known to the registry.
pub struct OutputEntry<H, S> {
    handle: H,
    identity: Identity,
    mode_size: (u32, u32),
    size: (u32, u32),
    scale: u32,
    surface: Option<S>,
    configured: bool,
}

impl<H, S> OutputEntry<H, S> {
    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Name for log lines.
    pub fn label(&self) -> String {
        self.identity
            .name()
            .or(self.identity.description())
            .unwrap_or("unnamed output")
            .to_string()
    }

    /// Surface-local size (before scaling).
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn surface_mut(&mut self) -> Option<&mut S> {
        self.surface.as_mut()
    }

    fn geometry(&self) -> OutputGeometry {
        OutputGeometry {
            label: self.label(),
            width: self.mode_size.0,
            height: self.mode_size.1,
            scale: self.scale,
        }
    }
}

/// Owns every live output and its surface.
pub struct OutputRegistry<H, S> {
    selector: Selector,
    entries: Vec<OutputEntry<H, S>>,
}

impl<H: PartialEq + Clone, S: ManagedSurface> OutputRegistry<H, S> {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            entries: Vec::new(),
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Start tracking a new output. Nothing is visible until it resolves.
    pub fn on_output_announced(&mut self, handle: H) {
        if self.position(&handle).is_some() {
            return;
        }
        log::debug!("Output announced ({} known)", self.entries.len() + 1);
        self.entries.push(OutputEntry {
            handle,
            identity: Identity::Announced,
            mode_size: (0, 0),
            size: (0, 0),
            scale: 1,
            surface: None,
            configured: false,
        });
    }

    /// Record the mode size and scale reported for an output.
    pub fn on_geometry(&mut self, handle: &H, mode_size: (u32, u32), scale: u32) {
        if let Some(index) = self.position(handle) {
            let entry = &mut self.entries[index];
            entry.mode_size = mode_size;
            entry.scale = scale.max(1);
        }
    }

    /// First resolution phase: the connector name.
    pub fn on_name<F>(
        &mut self,
        handle: &H,
        name: Option<String>,
        factory: &mut F,
    ) -> Option<Selection>
    where
        F: SurfaceFactory<H, Surface = S>,
    {
        let index = self.position(handle)?;
        let entry = &mut self.entries[index];
        let was_resolved = entry.identity.is_resolved();
        entry.identity =
            std::mem::replace(&mut entry.identity, Identity::Announced).with_name(name);
        self.complete_if_resolved(index, was_resolved, factory)
    }

    /// Second resolution phase: the human-readable description.
    pub fn on_description<F>(
        &mut self,
        handle: &H,
        description: Option<String>,
        factory: &mut F,
    ) -> Option<Selection>
    where
        F: SurfaceFactory<H, Surface = S>,
    {
        let index = self.position(handle)?;
        let entry = &mut self.entries[index];
        let was_resolved = entry.identity.is_resolved();
        entry.identity = std::mem::replace(&mut entry.identity, Identity::Announced)
            .with_description(description);
        self.complete_if_resolved(index, was_resolved, factory)
    }

    fn complete_if_resolved<F>(
        &mut self,
        index: usize,
        was_resolved: bool,
        factory: &mut F,
    ) -> Option<Selection>
    where
        F: SurfaceFactory<H, Surface = S>,
    {
        if was_resolved || !self.entries[index].identity.is_resolved() {
            return None;
        }
        Some(self.on_identity_resolved(index, factory))
    }

    /// Apply the selection predicate to a freshly resolved output.
    fn on_identity_resolved<F>(&mut self, index: usize, factory: &mut F) -> Selection
    where
        F: SurfaceFactory<H, Surface = S>,
    {
        let entry = &self.entries[index];
        let matched = self
            .selector
            .matches(entry.identity.name(), entry.identity.description());

        if !matched {
            log::info!(
                "Output {} does not match {}, releasing it",
                entry.label(),
                self.selector
            );
            self.destroy(index);
            return Selection::Rejected;
        }

        if entry.surface.is_some() {
            return Selection::Selected;
        }

        let geometry = entry.geometry();
        match factory.create_surface(&entry.handle, &geometry) {
            Ok(surface) => {
                log::info!("Output {} selected, surface created", geometry.label);
                self.entries[index].surface = Some(surface);
                Selection::Selected
            }
            Err(e) => {
                log::error!(
                    "Failed to create surface for output {}: {}",
                    geometry.label,
                    e
                );
                self.destroy(index);
                Selection::Failed
            }
        }
    }

    /// Compositor-assigned size for the surface matching `is_target`.
    ///
    /// Zero dimensions mean "pick your own" and fall back to the mode size.
    pub fn on_configure(
        &mut self,
        is_target: impl Fn(&S) -> bool,
        width: u32,
        height: u32,
    ) -> Option<(usize, Configured)> {
        let index = self
            .entries
            .iter()
            .position(|e| e.surface.as_ref().is_some_and(&is_target))?;
        let entry = &mut self.entries[index];

        let width = if width == 0 { entry.mode_size.0 } else { width };
        let height = if height == 0 { entry.mode_size.1 } else { height };

        let outcome = if !entry.configured {
            Configured::First
        } else if entry.size != (width, height) {
            Configured::Resized
        } else {
            Configured::Unchanged
        };

        entry.size = (width, height);
        entry.configured = true;
        let scale = entry.scale;
        if let Some(surface) = entry.surface.as_mut() {
            surface.configure(width, height, scale);
        }

        match outcome {
            Configured::First => {
                log::info!("Output {} configured: {}x{}", entry.label(), width, height)
            }
            Configured::Resized => log::info!(
                "Output {} resized in place: {}x{}",
                entry.label(),
                width,
                height
            ),
            Configured::Unchanged => {}
        }
        Some((index, outcome))
    }

    /// New integer scale for the surface matching `is_target`.
    pub fn on_scale(&mut self, is_target: impl Fn(&S) -> bool, scale: u32) -> Option<usize> {
        let index = self
            .entries
            .iter()
            .position(|e| e.surface.as_ref().is_some_and(&is_target))?;
        let entry = &mut self.entries[index];
        let scale = scale.max(1);
        if entry.scale == scale {
            return Some(index);
        }

        log::info!("Output {} scale changed to {}", entry.label(), scale);
        entry.scale = scale;
        if entry.configured {
            let (width, height) = entry.size;
            if let Some(surface) = entry.surface.as_mut() {
                surface.configure(width, height, scale);
            }
        }
        Some(index)
    }

    /// The compositor withdrew an output. Unknown handles are ignored.
    pub fn on_output_withdrawn(&mut self, handle: &H) -> bool {
        match self.position(handle) {
            Some(index) => {
                log::info!("Output {} withdrawn", self.entries[index].label());
                self.destroy(index);
                true
            }
            None => false,
        }
    }

    /// Unlink an output and release its surface.
    fn destroy(&mut self, index: usize) {
        let mut entry = self.entries.remove(index);
        if let Some(surface) = entry.surface.take() {
            surface.destroy();
        }
        log::debug!("Output {} destroyed", entry.label());
    }

    /// Release every output (process teardown).
    pub fn clear(&mut self) {
        while !self.entries.is_empty() {
            self.destroy(self.entries.len() - 1);
        }
    }

    fn position(&self, handle: &H) -> Option<usize> {
        self.entries.iter().position(|e| &e.handle == handle)
    }

    pub fn entries(&self) -> &[OutputEntry<H, S>] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [OutputEntry<H, S>] {
        &mut self.entries
    }

    pub fn find_mut(&mut self, is_target: impl Fn(&S) -> bool) -> Option<&mut OutputEntry<H, S>> {
        self.entries
            .iter_mut()
            .find(|e| e.surface.as_ref().is_some_and(&is_target))
    }

    /// Outputs that currently own a surface.
    pub fn selected_count(&self) -> usize {
        self.entries.iter().filter(|e| e.surface.is_some()).count()
    }

    /// Outputs still waiting for a resolution phase.
    pub fn resolving_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.identity.is_resolved())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct FakeSurface {
        id: u32,
        log: Log,
    }

    impl ManagedSurface for FakeSurface {
        fn configure(&mut self, width: u32, height: u32, scale: u32) {
            self.log
                .borrow_mut()
                .push(format!("configure {} {}x{}@{}", self.id, width, height, scale));
        }

        fn destroy(self) {
            self.log.borrow_mut().push(format!("destroy {}", self.id));
        }
    }

    struct FakeFactory {
        log: Log,
        fail_for: Option<u32>,
    }

    impl FakeFactory {
        fn new(log: &Log) -> Self {
            Self {
                log: log.clone(),
                fail_for: None,
            }
        }
    }

    impl SurfaceFactory<u32> for FakeFactory {
        type Surface = FakeSurface;
        type Error = String;

        fn create_surface(
            &mut self,
            handle: &u32,
            output: &OutputGeometry,
        ) -> Result<FakeSurface, String> {
            if self.fail_for == Some(*handle) {
                return Err("no drawable".to_string());
            }
            self.log
                .borrow_mut()
                .push(format!("create {} {}", handle, output.label));
            Ok(FakeSurface {
                id: *handle,
                log: self.log.clone(),
            })
        }
    }

    fn announce(
        registry: &mut OutputRegistry<u32, FakeSurface>,
        factory: &mut FakeFactory,
        handle: u32,
        name: &str,
        description: &str,
    ) -> Option<Selection> {
        registry.on_output_announced(handle);
        registry.on_name(&handle, Some(name.to_string()), factory);
        registry.on_description(&handle, Some(description.to_string()), factory)
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(Selector::parse("*"), Selector::All);
        assert_eq!(Selector::parse("ALL"), Selector::All);
        assert_eq!(Selector::parse("DP-1"), Selector::Named("DP-1".into()));
    }

    #[test]
    fn test_selector_matches_description() {
        let selector = Selector::parse("Dell Inc. DELL U2720Q");
        assert!(selector.matches(Some("DP-2"), Some("Dell Inc. DELL U2720Q")));
        assert!(selector.matches(Some("DP-2"), Some("Dell Inc. DELL U2720Q (DP-2)")));
        assert!(!selector.matches(Some("DP-2"), Some("BOE 0x095F")));
        assert!(!selector.matches(Some("DP-2"), None));
    }

    #[test]
    fn test_wildcard_selects_every_output() {
        let log = Log::default();
        let mut factory = FakeFactory::new(&log);
        let mut registry = OutputRegistry::new(Selector::parse("*"));

        assert_eq!(
            announce(&mut registry, &mut factory, 1, "DP-1", "Left"),
            Some(Selection::Selected)
        );
        assert_eq!(
            announce(&mut registry, &mut factory, 2, "HDMI-A-1", "Right"),
            Some(Selection::Selected)
        );
        assert_eq!(registry.selected_count(), 2);
    }

    #[test]
    fn test_named_target_rejects_the_rest() {
        let log = Log::default();
        let mut factory = FakeFactory::new(&log);
        let mut registry = OutputRegistry::new(Selector::parse("HDMI-A-1"));

        assert_eq!(
            announce(&mut registry, &mut factory, 1, "DP-1", "Left"),
            Some(Selection::Rejected)
        );
        assert_eq!(
            announce(&mut registry, &mut factory, 2, "HDMI-A-1", "Right"),
            Some(Selection::Selected)
        );

        assert_eq!(registry.entries().len(), 1);
        assert_eq!(registry.selected_count(), 1);
        assert_eq!(*log.borrow(), vec!["create 2 HDMI-A-1".to_string()]);
    }

    #[test]
    fn test_phases_in_either_order_decide_once() {
        let log = Log::default();
        let mut factory = FakeFactory::new(&log);
        let mut registry = OutputRegistry::new(Selector::parse("*"));

        registry.on_output_announced(7);
        assert_eq!(registry.on_description(&7, Some("Panel".into()), &mut factory), None);
        assert_eq!(registry.resolving_count(), 1);
        assert_eq!(
            registry.on_name(&7, Some("eDP-1".into()), &mut factory),
            Some(Selection::Selected)
        );
        // A repeated phase after resolution does not re-run selection
        assert_eq!(registry.on_name(&7, Some("eDP-1".into()), &mut factory), None);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_unresolved_output_gets_no_surface() {
        let log = Log::default();
        let mut factory = FakeFactory::new(&log);
        let mut registry = OutputRegistry::new(Selector::parse("*"));

        registry.on_output_announced(1);
        registry.on_name(&1, Some("DP-1".into()), &mut factory);
        assert_eq!(registry.selected_count(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_failed_surface_destroys_only_that_output() {
        let log = Log::default();
        let mut factory = FakeFactory::new(&log);
        factory.fail_for = Some(1);
        let mut registry = OutputRegistry::new(Selector::All);

        assert_eq!(
            announce(&mut registry, &mut factory, 1, "DP-1", "Left"),
            Some(Selection::Failed)
        );
        assert_eq!(
            announce(&mut registry, &mut factory, 2, "DP-2", "Right"),
            Some(Selection::Selected)
        );
        assert_eq!(registry.entries().len(), 1);
        assert_eq!(registry.entries()[0].label(), "DP-2");
    }

    #[test]
    fn test_withdraw_mid_resolution() {
        let log = Log::default();
        let mut factory = FakeFactory::new(&log);
        let mut registry: OutputRegistry<u32, FakeSurface> = OutputRegistry::new(Selector::All);

        registry.on_output_announced(3);
        registry.on_name(&3, Some("DP-3".into()), &mut factory);
        assert!(registry.on_output_withdrawn(&3));
        assert!(!registry.on_output_withdrawn(&3));
        // Late phase for a withdrawn output is ignored
        assert_eq!(registry.on_description(&3, None, &mut factory), None);
        assert!(registry.entries().is_empty());
    }

    #[test]
    fn test_configure_then_resize_in_place() {
        let log = Log::default();
        let mut factory = FakeFactory::new(&log);
        let mut registry = OutputRegistry::new(Selector::All);

        registry.on_output_announced(1);
        registry.on_geometry(&1, (2560, 1440), 2);
        announce(&mut registry, &mut factory, 1, "DP-1", "Main");

        assert_eq!(
            registry.on_configure(|s| s.id == 1, 1280, 720),
            Some((0, Configured::First))
        );
        assert_eq!(
            registry.on_configure(|s| s.id == 1, 1280, 720),
            Some((0, Configured::Unchanged))
        );
        assert_eq!(
            registry.on_configure(|s| s.id == 1, 1920, 1080),
            Some((0, Configured::Resized))
        );

        let created = log.borrow().iter().filter(|l| l.starts_with("create")).count();
        assert_eq!(created, 1);
        assert_eq!(log.borrow().last().unwrap(), "configure 1 1920x1080@2");
    }

    #[test]
    fn test_zero_configure_uses_mode_size() {
        let log = Log::default();
        let mut factory = FakeFactory::new(&log);
        let mut registry = OutputRegistry::new(Selector::All);

        registry.on_output_announced(1);
        registry.on_geometry(&1, (1920, 1080), 1);
        announce(&mut registry, &mut factory, 1, "DP-1", "Main");
        registry.on_configure(|s| s.id == 1, 0, 0);

        assert_eq!(registry.entries()[0].size(), (1920, 1080));
    }

    #[test]
    fn test_scale_change_reconfigures() {
        let log = Log::default();
        let mut factory = FakeFactory::new(&log);
        let mut registry = OutputRegistry::new(Selector::All);

        announce(&mut registry, &mut factory, 1, "DP-1", "Main");
        registry.on_configure(|s| s.id == 1, 800, 600);
        registry.on_scale(|s| s.id == 1, 2);

        assert_eq!(registry.entries()[0].scale(), 2);
        assert_eq!(log.borrow().last().unwrap(), "configure 1 800x600@2");
    }

    #[test]
    fn test_clear_destroys_everything() {
        let log = Log::default();
        let mut factory = FakeFactory::new(&log);
        let mut registry = OutputRegistry::new(Selector::All);

        announce(&mut registry, &mut factory, 1, "DP-1", "A");
        announce(&mut registry, &mut factory, 2, "DP-2", "B");
        registry.clear();

        assert!(registry.entries().is_empty());
        let destroyed: Vec<_> = log
            .borrow()
            .iter()
            .filter(|l| l.starts_with("destroy"))
            .cloned()
            .collect();
        assert_eq!(destroyed.len(), 2);
    }
}
