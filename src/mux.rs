use {
    crate::{
        dpy::DpyId,
        hardware::{DisplayHardware, HardwareError},
    },
    thiserror::Error,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MuxState {
    Integrated,
    Discrete,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MuxOperation {
    Pre,
    Switch,
    Post,
}

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("The display is not behind a mux")]
    NotSupported,
    #[error("Expected a {:?} operation but got {:?}", .0, .1)]
    OutOfOrder(MuxOperation, MuxOperation),
    #[error("The switch targets {:?} but the pending switch targets {:?}", .0, .1)]
    TargetMismatch(MuxState, MuxState),
    #[error("The mux is already in state {:?}", .0)]
    AlreadyInState(MuxState),
    #[error(transparent)]
    Hardware(Box<HardwareError>),
}
efrom!(MuxError, Hardware, HardwareError);

/// A display mux. A switch consists of a Pre, a Switch and a Post operation, in that
/// order, all targeting the same state.
pub struct Mux {
    state: MuxState,
    pending: Option<(MuxOperation, MuxState)>,
}

impl Default for Mux {
    fn default() -> Self {
        Self {
            state: MuxState::Discrete,
            pending: None,
        }
    }
}

impl Mux {
    pub fn state(&self) -> MuxState {
        self.state
    }

    pub fn switch(
        &mut self,
        hw: &dyn DisplayHardware,
        disp: usize,
        dpy: DpyId,
        op: MuxOperation,
        target: MuxState,
    ) -> Result<(), MuxError> {
        let expected = match self.pending {
            None => MuxOperation::Pre,
            Some((MuxOperation::Pre, _)) => MuxOperation::Switch,
            Some(_) => MuxOperation::Post,
        };
        if op != expected {
            return Err(MuxError::OutOfOrder(expected, op));
        }
        if let Some((_, pending)) = self.pending
            && pending != target
        {
            return Err(MuxError::TargetMismatch(target, pending));
        }
        match op {
            MuxOperation::Pre => {
                if self.state == target {
                    return Err(MuxError::AlreadyInState(target));
                }
            }
            MuxOperation::Switch => {
                if let Err(e) = hw.switch_mux(disp, dpy, target) {
                    self.pending = None;
                    return Err(e.into());
                }
            }
            MuxOperation::Post => {
                log::info!("disp {} {}: mux switched to {:?}", disp, dpy, target);
                self.state = target;
                self.pending = None;
                return Ok(());
            }
        }
        self.pending = Some((op, target));
        Ok(())
    }
}
