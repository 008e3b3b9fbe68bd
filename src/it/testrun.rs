use {
    crate::{
        config::{GpuDescription, ServerConfig},
        connection::{AllocDeviceReply, Connection, DeviceHandle, DispHandle, SurfaceHandle},
        device::{
            DeviceState,
            testing::{self, TestHardware},
        },
        events::Event,
        flip::{FlipReply, FlipRequest, HeadFlipParams, LayerFlip},
        format::XRGB8888,
        it::test_error::{TestErrorExt, TestResult},
        modeset::{SetModeHeadRequest, SetModeReply, SetModeRequest},
        server::{PROTOCOL_VERSION, Server},
        surface::{SurfaceId, SurfaceMemory, SurfaceParams},
    },
    std::{sync::Arc, time::Duration},
};

/// A server with a single test GPU. See [`testing::gpu`] for its topology.
pub struct TestRun {
    pub server: Server,
    pub hw: Arc<TestHardware>,
    pub gpu: GpuDescription,
}

impl TestRun {
    pub fn new() -> Self {
        Self::with_gpu(testing::gpu())
    }

    pub fn with_gpu(gpu: GpuDescription) -> Self {
        let config = ServerConfig {
            idle_timeout: Duration::from_millis(20),
            threaded_vblank: false,
            ..Default::default()
        };
        let server = Server::new(config);
        let hw = Arc::new(TestHardware::default());
        server.add_gpu(gpu.clone(), hw.clone()).unwrap();
        Self { server, hw, gpu }
    }

    /// Connects a client and allocates the test GPU.
    pub fn client(&self) -> TestResult<TestClient<'_>> {
        let conn = self.server.connect(PROTOCOL_VERSION)?;
        let dev = conn
            .alloc_device(self.gpu.gpu_id)
            .with_context(|| "Could not allocate the device")?;
        Ok(TestClient {
            run: self,
            conn,
            dev,
        })
    }

    pub fn vblank(&self) -> TestResult {
        self.server.vblank(self.gpu.gpu_id)?;
        Ok(())
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&DeviceState) -> T) -> TestResult<T> {
        let Some(device) = self.server.device(self.gpu.gpu_id) else {
            bail!("The device is not allocated");
        };
        let state = device.state.lock();
        Ok(f(&state))
    }

    pub fn head_active(&self, head: usize) -> TestResult<bool> {
        self.with_state(|s| s.head(0, head).is_ok_and(|h| h.active.is_some()))
    }

    pub fn visible(&self, head: usize, layer: usize) -> TestResult<Option<SurfaceId>> {
        self.with_state(|s| {
            s.head(0, head)
                .ok()
                .and_then(|h| h.layers.get(layer))
                .and_then(|l| l.visible.surface)
        })
    }

    pub fn pending(&self, head: usize, layer: usize) -> TestResult<usize> {
        self.with_state(|s| {
            s.head(0, head)
                .ok()
                .and_then(|h| h.layers.get(layer))
                .map(|l| l.pending.len())
                .unwrap_or(0)
        })
    }

    /// Checks that the clients of the test released everything.
    pub fn finish(&self) -> TestResult {
        if self.server.device(self.gpu.gpu_id).is_some() {
            bail!("The device is still allocated");
        }
        tassert_eq!(self.server.pending_grants(), 0);
        Ok(())
    }
}

pub struct TestClient<'a> {
    pub run: &'a TestRun,
    pub conn: Connection,
    pub dev: AllocDeviceReply,
}

impl TestClient<'_> {
    pub fn device(&self) -> DeviceHandle {
        self.dev.handle
    }

    pub fn disp(&self) -> DispHandle {
        self.dev.disps[0]
    }

    /// Registers a 1920x1080 scanout surface.
    pub fn surface(&self) -> TestResult<SurfaceHandle> {
        let params = SurfaceParams::packed(XRGB8888, 1920, 1080);
        Ok(self.conn.register_surface(self.device(), params)?)
    }

    /// Registers a system memory surface and keeps a mapping of it.
    pub fn buffer(&self, bytes: usize) -> TestResult<(SurfaceHandle, Arc<SurfaceMemory>)> {
        let params = SurfaceParams::buffer(bytes);
        let memory = params.memory.clone();
        let handle = self.conn.register_surface(self.device(), params)?;
        Ok((handle, memory))
    }

    /// The server-side id of a surface handle of this client.
    pub fn surface_id(&self, surface: SurfaceHandle) -> TestResult<SurfaceId> {
        let id = self.run.with_state(|s| {
            s.open(self.conn.id)
                .ok()
                .and_then(|o| o.surfaces.get(surface).ok())
                .map(|r| r.id)
        })?;
        match id {
            Some(id) => Ok(id),
            None => bail!("Unknown surface handle {:?}", surface),
        }
    }

    pub fn modeset_request(&self, heads: &[(usize, u32)]) -> SetModeRequest {
        let mut req = SetModeRequest::default().committing(true);
        for &(head, dpy) in heads {
            let mut h = SetModeHeadRequest::new(testing::dpys(dpy), testing::mode());
            h.allow_vrr = true;
            req = req.with_head(0, head, h);
        }
        req
    }

    /// Drives each `(head, connector)` pair of disp 0 with the default mode.
    pub fn set_heads(&self, heads: &[(usize, u32)]) -> TestResult<SetModeReply> {
        let req = self.modeset_request(heads);
        Ok(self.conn.set_mode(self.device(), &req)?)
    }

    pub fn flip(&self, head: usize, layer: usize, lf: LayerFlip) -> TestResult<FlipReply> {
        let req = FlipRequest {
            commit: true,
            ..Default::default()
        }
        .head(0, head, HeadFlipParams::default().layer(layer, lf));
        Ok(self.conn.flip(self.device(), &req)?)
    }

    pub fn events(&self) -> Vec<Event> {
        let mut res = vec![];
        while let Some(e) = self.conn.next_event() {
            res.push(e);
        }
        res
    }

    pub fn num_flips_occurred(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::FlipOccurred { .. }))
            .count()
    }
}
