use crate::bootstrap::{HeadlessDevice, HeadlessSettings};
use crate::texture::TextureJob;
use crate::transfer::TransferJob;
use crate::{GpuContext, PreprocessError};

fn context() -> GpuContext {
    HeadlessDevice::new(&HeadlessSettings::default().set_validation(true))
        .unwrap()
        .into_context()
        .unwrap()
}

#[test]
#[ignore = "requires a Vulkan 1.3 driver"]
fn test_transfer_job_states() {
    let context = context();
    let mut job = TransferJob::new(&context, "states", 64, 32).unwrap();
    let mut out = [0u8; 32];
    assert!(matches!(
        job.wait_for_completion(&mut out),
        Err(PreprocessError::NotSubmitted)
    ));
    assert!(matches!(job.is_complete(), Err(PreprocessError::NotSubmitted)));
    job.staging_mut().unwrap()[..4].copy_from_slice(&[1, 2, 3, 4]);

    job.submit().unwrap();
    assert!(matches!(job.submit(), Err(PreprocessError::AlreadySubmitted)));
    assert!(matches!(
        job.staging_mut(),
        Err(PreprocessError::AlreadySubmitted)
    ));

    let mut small = [0u8; 8];
    assert!(matches!(
        job.wait_for_completion(&mut small),
        Err(PreprocessError::DestinationTooSmall {
            expected: 32,
            actual: 8
        })
    ));
    // completes even when the first copy was rejected
    job.wait_for_completion(&mut out).unwrap();
    assert!(job.is_complete().unwrap());
    assert_eq!(&out[..4], &[1, 2, 3, 4]);
}

#[test]
#[ignore = "requires a Vulkan 1.3 driver"]
fn test_texture_job_rejects_bad_input() {
    let context = context();
    assert!(matches!(
        TextureJob::new(&context, 2, 2, 5, &[0; 20], true),
        Err(PreprocessError::UnsupportedChannelLayout(5))
    ));
    assert!(matches!(
        TextureJob::new(&context, 2, 2, 4, &[0; 15], true),
        Err(PreprocessError::InputSizeMismatch {
            expected: 16,
            actual: 15
        })
    ));
}

/// Averages each 2x2 block of an RGBA8 level
fn box_average(level: &[u8], width: usize, height: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            for c in 0..4 {
                let texel = |dx: usize, dy: usize| {
                    level[((2 * y + dy) * 2 * width + 2 * x + dx) * 4 + c] as f32
                };
                out.push((texel(0, 0) + texel(1, 0) + texel(0, 1) + texel(1, 1)) / 4.0);
            }
        }
    }
    out
}

fn assert_close(actual: &[u8], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len());
    for (index, (actual, expected)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (*actual as f32 - expected).abs() <= tolerance,
            "byte {index}: got {actual}, expected {expected}"
        );
    }
}

#[test]
#[ignore = "requires a Vulkan 1.3 driver"]
fn test_texture_job_averages_2x2() {
    let context = context();
    let pixels = [
        0u8, 40, 200, 255, //
        100, 80, 0, 0, //
        60, 120, 100, 255, //
        200, 0, 20, 128,
    ];
    let mut job = TextureJob::new(&context, 2, 2, 4, &pixels, true).unwrap();
    assert_eq!(job.mip_levels(), 2);
    job.submit().unwrap();
    let mut out = vec![0u8; job.output_size()];
    job.wait_for_completion(&mut out).unwrap();
    assert_eq!(out.len(), 16 + 4);
    assert_eq!(&out[..16], &pixels);
    assert_close(&out[16..], &[90.0, 60.0, 80.0, 159.5], 1.0);
}

#[test]
#[ignore = "requires a Vulkan 1.3 driver"]
fn test_texture_job_box_filters() {
    use rand::Rng;

    let context = context();
    let mut rng = rand::rng();
    let pixels: Vec<u8> = (0..4 * 4 * 4).map(|_| rng.random()).collect();
    let mut job = TextureJob::new(&context, 4, 4, 4, &pixels, true).unwrap();
    assert_eq!(job.mip_levels(), 3);
    job.submit().unwrap();
    let mut out = vec![0u8; job.output_size()];
    job.wait_for_completion(&mut out).unwrap();
    assert_eq!(out.len(), (16 + 4 + 1) * 4);

    let (level0, rest) = out.split_at(64);
    let (level1, level2) = rest.split_at(16);
    assert_eq!(level0, &pixels[..]);
    // each level is blitted from the one above it
    assert_close(level1, &box_average(level0, 2, 2), 1.0);
    assert_close(level2, &box_average(level1, 1, 1), 1.0);
}

#[test]
#[ignore = "requires a Vulkan 1.3 driver"]
fn test_drop_in_flight_job() {
    let context = context();
    let mut job = TransferJob::new(&context, "dropped", 16, 16).unwrap();
    job.submit().unwrap();
    assert!(job.is_pending());
    drop(job);
}
