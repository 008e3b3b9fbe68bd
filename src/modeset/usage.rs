use {
    crate::{device::DeviceCaps, format::FormatSet, mode::Mode, permissions::MAX_LAYERS_PER_HEAD},
    arrayvec::ArrayVec,
};

/// Downscaling factors in units of 1/1024.
pub const DOWNSCALE_1X: u16 = 1024;
pub const DOWNSCALE_2X: u16 = 2048;
pub const DOWNSCALE_4X: u16 = 4096;

const DOWNSCALE_FACTORS: [u16; 3] = [DOWNSCALE_4X, DOWNSCALE_2X, DOWNSCALE_1X];

/// Bytes fetched per pixel by a layer without scaling.
const FETCH_BYTES_PER_PIXEL: u64 = 4;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LayerUsage {
    pub formats: FormatSet,
    pub max_downscale_factor: u16,
}

/// What the layers of a head can do at a given configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UsageBounds {
    pub layers: ArrayVec<LayerUsage, MAX_LAYERS_PER_HEAD>,
}

/// The memory bandwidth a head needs to scan out one unscaled layer.
pub fn base_fetch(mode: &Mode) -> u64 {
    mode.pixel_clock_khz as u64 * FETCH_BYTES_PER_PIXEL
}

fn max_factor(fetch: u64, layers: u64, headroom: u64) -> u16 {
    DOWNSCALE_FACTORS
        .iter()
        .copied()
        .find(|&f| fetch * layers * f as u64 / DOWNSCALE_1X as u64 <= headroom)
        .unwrap_or(DOWNSCALE_1X)
}

/// Computes the usage bounds of a head.
///
/// `headroom` is the memory bandwidth that is not consumed by the other heads. The
/// possible bounds apply to a single layer used on its own, the guaranteed bounds hold
/// while all layers are in use at the same time.
pub fn usage_bounds(
    caps: &DeviceCaps,
    num_layers: usize,
    mode: &Mode,
    headroom: u64,
) -> (UsageBounds, UsageBounds) {
    let fetch = base_fetch(mode);
    let possible = max_factor(fetch, 1, headroom);
    let guaranteed = max_factor(fetch, num_layers as u64, headroom);
    let mut p = UsageBounds::default();
    let mut g = UsageBounds::default();
    for layer in 0..num_layers.min(MAX_LAYERS_PER_HEAD) {
        let formats = caps.layer_formats(layer);
        p.layers.push(LayerUsage {
            formats,
            max_downscale_factor: possible,
        });
        g.layers.push(LayerUsage {
            formats,
            max_downscale_factor: guaranteed,
        });
    }
    (p, g)
}
