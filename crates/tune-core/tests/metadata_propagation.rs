//! Statistics attached to a frame survive copies of the frame.

use tune_core::kernels::{HistogramKernel, MagicKernel, RowAverager, RowMode};
use tune_core::{Frame, PixelFormat};

fn annotated_frame() -> Frame {
    let data: Vec<u8> = (0..64u32).map(|i| ((i * 37) % 251) as u8).collect();
    let mut frame = Frame::from_u8(64, 1, data).with_sequence(3).with_timestamp(1_000);
    HistogramKernel::new(64).unwrap().annotate(&mut frame).unwrap();
    MagicKernel.annotate(&mut frame).unwrap();
    frame
}

#[test]
fn test_nth_copy_has_identical_statistics() {
    let original = annotated_frame();
    let mut copy = original.clone();
    for _ in 0..16 {
        copy = copy.clone();
    }
    assert_eq!(copy.meta, original.meta);
    assert!(copy.meta.histogram.is_some());
    assert!(copy.meta.magic.is_some());
}

#[test]
fn test_payload_rewrite_keeps_statistics() {
    let original = annotated_frame();
    let averaged = RowAverager::new(RowMode::Total).apply(&original).unwrap();
    assert_eq!(averaged.meta, original.meta);
    assert_eq!(averaged.sequence, 3);
    assert_eq!(averaged.timestamp_ns, 1_000);
}

#[test]
fn test_sixteen_bit_magic_statistics() {
    let pixels: Vec<u16> = (0..100u16).map(|i| 20_000 + (i % 2) * 100).collect();
    for format in [PixelFormat::Gray16Le, PixelFormat::Gray16Be] {
        let le = Frame::from_u16(100, 1, &pixels);
        let mut frame = Frame::from_bytes(100, 1, format, Vec::new());
        frame.store_samples(&le.samples().unwrap());
        MagicKernel.annotate(&mut frame).unwrap();
        let magic = frame.meta.magic.unwrap();
        assert_eq!(magic.column_count, 100);
        assert_eq!(magic.average, 20_050);
    }
}
