use divan::bench;
use solo_core::nms::matrix_nms;
use solo_core::test_utils::random_candidates;
use solo_core::NmsKernel;

fn main() {
    divan::main();
}

#[bench(args = [64, 256, 500])]
fn bench_matrix_nms_gaussian(bencher: divan::Bencher, n: usize) {
    let (masks, labels, scores, sum_masks) = random_candidates(n, 100, 152, 80, 42);
    bencher.bench_local(|| {
        matrix_nms(
            masks.view(),
            &labels,
            scores.view(),
            NmsKernel::Gaussian,
            2.0,
            sum_masks.view(),
        )
    });
}

#[bench]
fn bench_matrix_nms_linear_500(bencher: divan::Bencher) {
    let (masks, labels, scores, sum_masks) = random_candidates(500, 100, 152, 80, 42);
    bencher.bench_local(|| {
        matrix_nms(
            masks.view(),
            &labels,
            scores.view(),
            NmsKernel::Linear,
            2.0,
            sum_masks.view(),
        )
    });
}
