
use {
    crate::{
        format::{FormatSet, format_by_name},
        mode::{Mode, SyncRange},
        permissions::{MAX_DISPS, MAX_HEADS_PER_DISP, MAX_LAYERS_PER_HEAD},
    },
    ahash::AHashSet,
    log::Level,
    serde::{Deserialize, Serialize},
    std::{path::Path, time::Duration},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read {}", .0)]
    Read(String, #[source] std::io::Error),
    #[error("Could not parse the configuration")]
    Parse(#[source] serde_json::Error),
    #[error("GPU {} is described more than once", .0)]
    DuplicateGpu(u32),
    #[error("GPU {} has {} disps but at most {} are supported", .0, .1, MAX_DISPS)]
    TooManyDisps(u32, usize),
    #[error("GPU {} disp {} has {} heads but between 1 and {} are supported", .0, .1, .2, MAX_HEADS_PER_DISP)]
    InvalidHeadCount(u32, usize, u32),
    #[error("GPU {} disp {} has {} layers per head but between 1 and {} are supported", .0, .1, .2, MAX_LAYERS_PER_HEAD)]
    InvalidLayerCount(u32, usize, u8),
    #[error("GPU {} disp {}: connector {} excludes unknown connector {}", .0, .1, .2, .3)]
    UnknownExcludedConnector(u32, usize, String, String),
    #[error("Unknown pixel format {}", .0)]
    UnknownFormat(String),
    #[error("GPU {}: display {} has no modes", .0, .1)]
    NoModes(u32, String),
}

fn default_idle_timeout_ms() -> u64 {
    2000
}

fn default_max_pending_flips() -> usize {
    64
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => Level::Trace,
            LogLevel::Debug => Level::Debug,
            LogLevel::Info => Level::Info,
            LogLevel::Warn => Level::Warn,
            LogLevel::Error => Level::Error,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_max_pending_flips")]
    pub max_pending_flips_per_layer: usize,
    #[serde(default)]
    pub threaded_vblank: bool,
    #[serde(default)]
    pub gpus: Vec<GpuDescription>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            idle_timeout_ms: default_idle_timeout_ms(),
            max_pending_flips_per_layer: default_max_pending_flips(),
            threaded_vblank: false,
            gpus: vec![],
        }
    }
}

/// Settings that apply to the whole server.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ServerConfig {
    pub idle_timeout: Duration,
    pub max_pending_flips_per_layer: usize,
    pub threaded_vblank: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Config::default().server_config()
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        Self::parse(&s)
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = AHashSet::new();
        for gpu in &self.gpus {
            if !ids.insert(gpu.gpu_id) {
                return Err(ConfigError::DuplicateGpu(gpu.gpu_id));
            }
            gpu.validate()?;
        }
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            max_pending_flips_per_layer: self.max_pending_flips_per_layer.max(1),
            threaded_vblank: self.threaded_vblank,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GpuDescription {
    pub gpu_id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub caps: CapsDescription,
    pub disps: Vec<DispDescription>,
    #[serde(default)]
    pub framelocks: Vec<FrameLockDescription>,
}

impl GpuDescription {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.disps.len() > MAX_DISPS {
            return Err(ConfigError::TooManyDisps(self.gpu_id, self.disps.len()));
        }
        for format in self.caps.layer_formats.iter().flatten() {
            if format_by_name(format).is_none() {
                return Err(ConfigError::UnknownFormat(format.clone()));
            }
        }
        for (idx, disp) in self.disps.iter().enumerate() {
            if disp.num_heads == 0 || disp.num_heads as usize > MAX_HEADS_PER_DISP {
                return Err(ConfigError::InvalidHeadCount(
                    self.gpu_id,
                    idx,
                    disp.num_heads,
                ));
            }
            if disp.layers_per_head == 0 || disp.layers_per_head as usize > MAX_LAYERS_PER_HEAD {
                return Err(ConfigError::InvalidLayerCount(
                    self.gpu_id,
                    idx,
                    disp.layers_per_head,
                ));
            }
            for connector in &disp.connectors {
                for excluded in &connector.excluded {
                    if !disp.connectors.iter().any(|c| &c.name == excluded) {
                        return Err(ConfigError::UnknownExcludedConnector(
                            self.gpu_id,
                            idx,
                            connector.name.clone(),
                            excluded.clone(),
                        ));
                    }
                }
                if let Some(dpy) = &connector.dpy
                    && dpy.modes.is_empty()
                {
                    return Err(ConfigError::NoModes(self.gpu_id, dpy.name.clone()));
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CapsDescription {
    pub max_surface_width: u32,
    pub max_surface_height: u32,
    pub max_raster_width: u16,
    pub max_raster_height: u16,
    pub max_cursor_size: u32,
    pub layer_formats: Vec<Vec<String>>,
    pub supports_syncpts: bool,
    pub requires_vrr_semaphores: bool,
    pub requires_sysmem_surfaces: bool,
    pub supports_swap_groups: bool,
    pub max_pixel_clock_khz: u32,
    pub memory_bandwidth_kbps: u64,
    pub num_vrr_semaphores: u32,
}

impl Default for CapsDescription {
    fn default() -> Self {
        Self {
            max_surface_width: 16384,
            max_surface_height: 16384,
            max_raster_width: 16384,
            max_raster_height: 16384,
            max_cursor_size: 256,
            layer_formats: vec![],
            supports_syncpts: false,
            requires_vrr_semaphores: false,
            requires_sysmem_surfaces: false,
            supports_swap_groups: true,
            max_pixel_clock_khz: 1_200_000,
            memory_bandwidth_kbps: 40_000_000,
            num_vrr_semaphores: 8,
        }
    }
}

impl CapsDescription {
    /// The formats supported by each layer. Layers without an explicit list support
    /// every format.
    pub fn layer_formats(&self, layers: u8) -> Vec<FormatSet> {
        (0..layers as usize)
            .map(|layer| match self.layer_formats.get(layer) {
                Some(names) => names.iter().filter_map(|n| format_by_name(n)).collect(),
                None => FormatSet::all(),
            })
            .collect()
    }
}

fn default_layers_per_head() -> u8 {
    3
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispDescription {
    pub num_heads: u32,
    #[serde(default = "default_layers_per_head")]
    pub layers_per_head: u8,
    #[serde(default)]
    pub connectors: Vec<ConnectorDescription>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectorKind {
    Dp,
    Hdmi,
    Dvi,
    Vga,
    Edp,
    Lvds,
}

impl ConnectorKind {
    pub fn supports_vrr(self) -> bool {
        matches!(self, Self::Dp | Self::Hdmi | Self::Edp)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectorDescription {
    pub name: String,
    pub kind: ConnectorKind,
    #[serde(default)]
    pub excluded: Vec<String>,
    #[serde(default)]
    pub max_pixel_clock_khz: Option<u32>,
    #[serde(default)]
    pub link_bandwidth_kbps: Option<u64>,
    #[serde(default)]
    pub mst: bool,
    #[serde(default)]
    pub dpy: Option<DpyDescription>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VrrKind {
    AdaptiveSync,
    Gsync,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VrrDescription {
    pub kind: VrrKind,
    pub min_refresh_hz: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DpyDescription {
    pub name: String,
    pub modes: Vec<Mode>,
    #[serde(default)]
    pub h_sync_khz: Option<SyncRange>,
    #[serde(default)]
    pub v_refresh_hz: Option<SyncRange>,
    #[serde(default)]
    pub max_pixel_clock_khz: Option<u32>,
    #[serde(default)]
    pub supports_yuv420: bool,
    #[serde(default)]
    pub vrr: Option<VrrDescription>,
    #[serde(default)]
    pub mux: bool,
    #[serde(default)]
    pub backlight: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameLockDescription {
    pub name: String,
    #[serde(default)]
    pub house_sync: bool,
}
