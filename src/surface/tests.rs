use {
    crate::{
        config::CapsDescription,
        device::DeviceCaps,
        format::{ARGB8888, NV12, XRGB8888},
        surface::{MemoryKind, PlaneLayout, SurfaceError, SurfaceMemory, SurfaceParams},
    },
};

fn caps() -> DeviceCaps {
    DeviceCaps::new(&CapsDescription::default(), 3)
}

#[test]
fn packed_surfaces_validate() {
    let caps = caps();
    assert_eq!(SurfaceParams::packed(XRGB8888, 64, 32).validate(&caps), Ok(()));
    let nv12 = SurfaceParams::packed(NV12, 63, 31);
    assert_eq!(nv12.planes.len(), 2);
    assert_eq!(nv12.validate(&caps), Ok(()));
}

#[test]
fn invalid_surfaces() {
    let caps = caps();
    assert_eq!(
        SurfaceParams::packed(XRGB8888, 0, 32).validate(&caps),
        Err(SurfaceError::Empty)
    );
    let mut params = SurfaceParams::packed(ARGB8888, 64, 32);
    params.planes[0].pitch = 128;
    assert_eq!(params.validate(&caps), Err(SurfaceError::PitchTooSmall(0)));
    params.planes[0].pitch = 258;
    assert_eq!(params.validate(&caps), Err(SurfaceError::PitchAlignment(0)));
    params.planes[0] = PlaneLayout {
        offset: 4,
        pitch: 256,
    };
    assert_eq!(params.validate(&caps), Err(SurfaceError::MemoryTooSmall(0)));
    let mut params = SurfaceParams::packed(NV12, 64, 32);
    params.planes.pop();
    assert_eq!(
        params.validate(&caps),
        Err(SurfaceError::PlaneCount("nv12", 2, 1))
    );
    let params = SurfaceParams::packed(ARGB8888, 20000, 1);
    assert!(matches!(
        params.validate(&caps),
        Err(SurfaceError::TooLarge(20000, 1, _, _))
    ));
}

#[test]
fn sysmem_requirement() {
    let mut desc = CapsDescription::default();
    desc.requires_sysmem_surfaces = true;
    let caps = DeviceCaps::new(&desc, 3);
    let params = SurfaceParams::packed(ARGB8888, 16, 16);
    assert_eq!(params.validate(&caps), Err(SurfaceError::RequiresSysmem));
    let params = params.with_memory_kind(MemoryKind::System);
    assert_eq!(params.validate(&caps), Ok(()));
}

#[test]
fn memory_access() {
    let mem = SurfaceMemory::new(10);
    assert_eq!(mem.len(), 12);
    assert!(mem.write_u32(4, 0x0403_0201));
    assert!(!mem.write_u32(5, 1));
    assert!(!mem.write_u32(12, 1));
    let mut buf = [0; 4];
    assert!(mem.read_bytes(4, &mut buf));
    assert_eq!(buf, [1, 2, 3, 4]);
    assert!(mem.write_bytes(5, &[9, 9]));
    assert_eq!(mem.read_u32(4), Some(0x0409_0901));
    assert!(!mem.read_bytes(10, &mut buf));
}
