use {
    crate::{
        dpy::{DpyId, DpyIdList},
        flip::{CursorState, LayerContents, Lut},
        mode::Mode,
        mux::MuxState,
    },
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("The hardware rejected the head configuration: {}", .0)]
    Rejected(String),
    #[error("The display mux did not switch")]
    MuxFailed,
}

/// The timings that drive one head.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeadTimings {
    pub dpys: DpyIdList,
    pub mode: Mode,
    pub yuv420: bool,
    pub viewport_in: (u16, u16),
    pub desktop_position: (i32, i32),
    pub vrr: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeadCommit {
    pub disp: usize,
    pub head: usize,
    /// `None` shuts the head down.
    pub timings: Option<HeadTimings>,
}

/// The register-level side of a device.
///
/// All methods are called with the device state locked. Implementations must not call
/// back into the server.
pub trait DisplayHardware: Send + Sync {
    /// Applies a new configuration to all listed heads at once. On error the hardware
    /// must still be in its previous configuration.
    fn commit_heads(&self, heads: &[HeadCommit]) -> Result<(), HardwareError>;

    fn program_layer(&self, disp: usize, head: usize, layer: usize, contents: &LayerContents);

    fn program_cursor(&self, disp: usize, head: usize, cursor: &CursorState) {
        let _ = (disp, head, cursor);
    }

    fn program_lut(&self, disp: usize, head: usize, lut: Option<&Lut>) {
        let _ = (disp, head, lut);
    }

    /// Whether the flip channel of the head has retired all submitted work.
    fn channel_idle(&self, disp: usize, head: usize) -> bool {
        let _ = (disp, head);
        true
    }

    fn force_stop_channel(&self, disp: usize, head: usize);

    /// Returns the display to the state it was in before the first client took control.
    fn restore_console(&self);

    fn switch_mux(&self, disp: usize, dpy: DpyId, state: MuxState) -> Result<(), HardwareError> {
        let _ = (disp, dpy, state);
        Err(HardwareError::MuxFailed)
    }
}

/// Hardware that accepts everything and displays nothing.
pub struct NullHardware;

impl DisplayHardware for NullHardware {
    fn commit_heads(&self, heads: &[HeadCommit]) -> Result<(), HardwareError> {
        for head in heads {
            match &head.timings {
                Some(t) => log::debug!(
                    "disp {} head {}: {} on {:?}",
                    head.disp,
                    head.head,
                    t.mode,
                    t.dpys
                ),
                None => log::debug!("disp {} head {}: off", head.disp, head.head),
            }
        }
        Ok(())
    }

    fn program_layer(&self, disp: usize, head: usize, layer: usize, contents: &LayerContents) {
        log::trace!(
            "disp {} head {} layer {}: {:?}",
            disp,
            head,
            layer,
            contents.surface
        );
    }

    fn force_stop_channel(&self, disp: usize, head: usize) {
        log::debug!("disp {} head {}: channel stopped", disp, head);
    }

    fn restore_console(&self) {
        log::debug!("Restoring console");
    }

    fn switch_mux(&self, disp: usize, dpy: DpyId, state: MuxState) -> Result<(), HardwareError> {
        log::debug!("disp {} {}: mux switched to {:?}", disp, dpy, state);
        Ok(())
    }
}
