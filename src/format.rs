use {
    ahash::AHashMap,
    std::{
        fmt::{Debug, Formatter},
        sync::LazyLock,
    },
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PlaneInfo {
    pub bytes_per_block: u32,
    pub horizontal_subsampling: u32,
    pub vertical_subsampling: u32,
}

#[derive(Copy, Clone)]
pub struct Format {
    pub name: &'static str,
    pub id: u8,
    pub planes: &'static [PlaneInfo],
    pub has_alpha: bool,
    pub is_yuv: bool,
}

impl PartialEq for Format {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Format {}

impl Debug for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

impl Format {
    /// The minimum pitch of a plane of this format with the given width.
    pub fn min_pitch(&self, plane: usize, width: u32) -> Option<u64> {
        let info = self.planes.get(plane)?;
        let width = width.div_ceil(info.horizontal_subsampling) as u64;
        Some(width * info.bytes_per_block as u64)
    }

    pub fn plane_height(&self, plane: usize, height: u32) -> Option<u32> {
        let info = self.planes.get(plane)?;
        Some(height.div_ceil(info.vertical_subsampling))
    }
}

const fn packed_plane(bytes_per_block: u32) -> PlaneInfo {
    PlaneInfo {
        bytes_per_block,
        horizontal_subsampling: 1,
        vertical_subsampling: 1,
    }
}

const PACKED_16: &[PlaneInfo] = &[packed_plane(2)];
const PACKED_32: &[PlaneInfo] = &[packed_plane(4)];
const PACKED_64: &[PlaneInfo] = &[packed_plane(8)];

pub static ARGB8888: &Format = &Format {
    name: "argb8888",
    id: 0,
    planes: PACKED_32,
    has_alpha: true,
    is_yuv: false,
};

pub static XRGB8888: &Format = &Format {
    name: "xrgb8888",
    id: 1,
    planes: PACKED_32,
    has_alpha: false,
    is_yuv: false,
};

pub static ABGR8888: &Format = &Format {
    name: "abgr8888",
    id: 2,
    planes: PACKED_32,
    has_alpha: true,
    is_yuv: false,
};

pub static XBGR8888: &Format = &Format {
    name: "xbgr8888",
    id: 3,
    planes: PACKED_32,
    has_alpha: false,
    is_yuv: false,
};

pub static RGB565: &Format = &Format {
    name: "rgb565",
    id: 4,
    planes: PACKED_16,
    has_alpha: false,
    is_yuv: false,
};

pub static ARGB1555: &Format = &Format {
    name: "argb1555",
    id: 5,
    planes: PACKED_16,
    has_alpha: true,
    is_yuv: false,
};

pub static ARGB2101010: &Format = &Format {
    name: "argb2101010",
    id: 6,
    planes: PACKED_32,
    has_alpha: true,
    is_yuv: false,
};

pub static XBGR2101010: &Format = &Format {
    name: "xbgr2101010",
    id: 7,
    planes: PACKED_32,
    has_alpha: false,
    is_yuv: false,
};

pub static ABGR16161616F: &Format = &Format {
    name: "abgr16161616f",
    id: 8,
    planes: PACKED_64,
    has_alpha: true,
    is_yuv: false,
};

pub static YUYV: &Format = &Format {
    name: "yuyv",
    id: 9,
    planes: &[PlaneInfo {
        bytes_per_block: 4,
        horizontal_subsampling: 2,
        vertical_subsampling: 1,
    }],
    has_alpha: false,
    is_yuv: true,
};

pub static NV12: &Format = &Format {
    name: "nv12",
    id: 10,
    planes: &[
        PlaneInfo {
            bytes_per_block: 1,
            horizontal_subsampling: 1,
            vertical_subsampling: 1,
        },
        PlaneInfo {
            bytes_per_block: 2,
            horizontal_subsampling: 2,
            vertical_subsampling: 2,
        },
    ],
    has_alpha: false,
    is_yuv: true,
};

pub static YUV444: &Format = &Format {
    name: "yuv444",
    id: 11,
    planes: &[
        PlaneInfo {
            bytes_per_block: 1,
            horizontal_subsampling: 1,
            vertical_subsampling: 1,
        },
        PlaneInfo {
            bytes_per_block: 1,
            horizontal_subsampling: 1,
            vertical_subsampling: 1,
        },
        PlaneInfo {
            bytes_per_block: 1,
            horizontal_subsampling: 1,
            vertical_subsampling: 1,
        },
    ],
    has_alpha: false,
    is_yuv: true,
};

pub static FORMATS: &[&Format] = &[
    ARGB8888,
    XRGB8888,
    ABGR8888,
    XBGR8888,
    RGB565,
    ARGB1555,
    ARGB2101010,
    XBGR2101010,
    ABGR16161616F,
    YUYV,
    NV12,
    YUV444,
];

static FORMATS_BY_NAME: LazyLock<AHashMap<&'static str, &'static Format>> = LazyLock::new(|| {
    let mut map = AHashMap::new();
    for format in FORMATS {
        assert!(map.insert(format.name, *format).is_none());
    }
    map
});

pub fn format_by_name(name: &str) -> Option<&'static Format> {
    FORMATS_BY_NAME.get(name).copied()
}

/// A set of formats.
#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct FormatSet(u64);

impl FormatSet {
    pub fn all() -> Self {
        let mut set = Self::default();
        for format in FORMATS {
            set.insert(format);
        }
        set
    }

    pub fn insert(&mut self, format: &Format) {
        self.0 |= 1u64 << format.id;
    }

    pub fn contains(&self, format: &Format) -> bool {
        self.0 & (1u64 << format.id) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static Format> + use<> {
        let bits = self.0;
        FORMATS
            .iter()
            .copied()
            .filter(move |f| bits & (1u64 << f.id) != 0)
    }
}

impl Debug for FormatSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<'a> FromIterator<&'a Format> for FormatSet {
    fn from_iter<T: IntoIterator<Item = &'a Format>>(iter: T) -> Self {
        let mut set = Self::default();
        for format in iter {
            set.insert(format);
        }
        set
    }
}
