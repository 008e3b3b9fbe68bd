use {
    crate::{
        attributes::AttributeError,
        device::DeviceError,
        flip::{FlipError, sync::SyncptId},
        grant::GrantError,
        handle::HandleError,
        modeset::ModesetError,
        mux::MuxError,
        permissions::PermissionError,
        surface::SurfaceError,
        swapgroup::{SwapGroupError, fifo::FifoError},
        vblank::VblankError,
    },
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Client protocol version {} does not match the server version {}", .0, .1)]
    VersionMismatch(u32, u32),
    #[error("There is no GPU with id {}", .0)]
    NoHardwareAvailable(u32),
    #[error("The connection has already allocated GPU {}", .0)]
    DeviceAlreadyOpen(u32),
    #[error("The connection has been closed")]
    Closed,
    #[error("VRR semaphore {} is not in use", .0)]
    InvalidVrrSemaphore(u32),
    #[error("Sync point {} was not created by this connection", .0)]
    UnknownSyncpt(SyncptId),
    #[error(transparent)]
    Handle(Box<HandleError>),
    #[error(transparent)]
    Device(Box<DeviceError>),
    #[error(transparent)]
    Permission(Box<PermissionError>),
    #[error(transparent)]
    Grant(Box<GrantError>),
    #[error(transparent)]
    Surface(Box<SurfaceError>),
    #[error(transparent)]
    Flip(Box<FlipError>),
    #[error(transparent)]
    Modeset(Box<ModesetError>),
    #[error(transparent)]
    SwapGroup(Box<SwapGroupError>),
    #[error(transparent)]
    Fifo(Box<FifoError>),
    #[error(transparent)]
    Attribute(Box<AttributeError>),
    #[error(transparent)]
    Mux(Box<MuxError>),
    #[error(transparent)]
    Vblank(Box<VblankError>),
}

efrom!(ConnectionError, Handle, HandleError);
efrom!(ConnectionError, Device, DeviceError);
efrom!(ConnectionError, Permission, PermissionError);
efrom!(ConnectionError, Grant, GrantError);
efrom!(ConnectionError, Surface, SurfaceError);
efrom!(ConnectionError, Flip, FlipError);
efrom!(ConnectionError, Modeset, ModesetError);
efrom!(ConnectionError, SwapGroup, SwapGroupError);
efrom!(ConnectionError, Fifo, FifoError);
efrom!(ConnectionError, Attribute, AttributeError);
efrom!(ConnectionError, Mux, MuxError);
efrom!(ConnectionError, Vblank, VblankError);
