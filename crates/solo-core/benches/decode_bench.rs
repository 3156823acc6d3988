use divan::bench;
use solo_core::test_utils::{solid_rect, synthetic_activations};
use solo_core::{HeadConfig, ImageMeta, SoloHead};

fn main() {
    divan::main();
}

#[bench]
fn bench_decode_two_levels_three_instances(bencher: divan::Bencher) {
    let config = HeadConfig::builder()
        .num_classes(8)
        .strides(&[8, 16])
        .scale_ranges(&[(1.0, 96.0), (48.0, 2048.0)])
        .num_grids(&[16, 12])
        .build()
        .unwrap();
    let head = SoloHead::new(config).unwrap();

    let a = solid_rect((256, 256), 30, 30, 40, 40, 0);
    let b = solid_rect((256, 256), 120, 60, 60, 60, 3);
    let c = solid_rect((256, 256), 180, 180, 50, 50, 7);
    let (cate, seg) = synthetic_activations(
        head.config(),
        &[(64, 64), (32, 32)],
        &[&a, &b, &c],
        0,
        9,
    );
    let meta = ImageMeta {
        img_shape: (256, 256),
        ori_shape: (256, 256),
    };

    bencher.bench_local(|| head.decode_single(&cate, &seg, &meta).unwrap());
}
