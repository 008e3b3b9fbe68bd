use crate::{
    connection::{Connection, ConnectionError, DeviceHandle, SurfaceHandle},
    flip::{CursorFlip, FlipReply, FlipRequest, HeadFlipParams, Lut, flip},
    modeset::{SetModeReply, SetModeRequest, set_mode},
};

impl Connection {
    /// Validates and, if requested, commits a modeset. Disps are identified by their
    /// position in [`AllocDeviceReply::disps`](crate::connection::AllocDeviceReply).
    pub fn set_mode(
        &self,
        device: DeviceHandle,
        req: &SetModeRequest,
    ) -> Result<SetModeReply, ConnectionError> {
        self.with_state(device, |device, state| {
            Ok(set_mode(state, &*device.hw, &device.config, self.id, req)?)
        })
    }

    pub fn flip(
        &self,
        device: DeviceHandle,
        req: &FlipRequest,
    ) -> Result<FlipReply, ConnectionError> {
        self.with_state(device, |device, state| {
            Ok(flip(state, &*device.hw, &device.config, self.id, req)?)
        })
    }

    fn flip_head(
        &self,
        device: DeviceHandle,
        disp: usize,
        head: usize,
        params: HeadFlipParams,
    ) -> Result<FlipReply, ConnectionError> {
        let req = FlipRequest {
            commit: true,
            ..Default::default()
        }
        .head(disp, head, params);
        self.flip(device, &req)
    }

    /// Sets or hides the cursor image of a head.
    pub fn set_cursor_image(
        &self,
        device: DeviceHandle,
        disp: usize,
        head: usize,
        surface: Option<SurfaceHandle>,
    ) -> Result<FlipReply, ConnectionError> {
        let params = HeadFlipParams {
            cursor: Some(CursorFlip {
                surface: Some(surface),
                position: None,
            }),
            ..Default::default()
        };
        self.flip_head(device, disp, head, params)
    }

    pub fn move_cursor(
        &self,
        device: DeviceHandle,
        disp: usize,
        head: usize,
        x: i16,
        y: i16,
    ) -> Result<FlipReply, ConnectionError> {
        let params = HeadFlipParams {
            cursor: Some(CursorFlip {
                surface: None,
                position: Some((x, y)),
            }),
            ..Default::default()
        };
        self.flip_head(device, disp, head, params)
    }

    /// Sets the output LUT of a head. `None` restores the identity mapping.
    pub fn set_lut(
        &self,
        device: DeviceHandle,
        disp: usize,
        head: usize,
        lut: Option<Lut>,
    ) -> Result<FlipReply, ConnectionError> {
        let params = HeadFlipParams {
            lut: Some(lut),
            ..Default::default()
        };
        self.flip_head(device, disp, head, params)
    }

    /// Waits for the flip channels of the heads to become idle. Returns the heads whose
    /// channels had to be stopped.
    pub fn idle_base_channel(
        &self,
        device: DeviceHandle,
        heads: &[(usize, usize)],
    ) -> Result<Vec<(usize, usize)>, ConnectionError> {
        let dev = self.device(device)?;
        dev.state.lock().open(self.id)?;
        Ok(dev.idle_base_channel(heads, dev.config.idle_timeout)?)
    }
}
