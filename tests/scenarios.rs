//! End-to-end `prepare` scenarios exercising whole frame descriptions rather
//! than individual block/stage unit behaviour.

use ispbe::backend::BackEnd;
use ispbe::config::BayerEnables;
use ispbe::error::Error;
use ispbe::format::{FormatDescriptor, ImageFormatConfig, DEFAULT_STRIDE_ALIGN};
use ispbe::geometry::Length2;

fn input_format(width: u32, height: u32, format: FormatDescriptor) -> ImageFormatConfig {
    let mut fmt = ImageFormatConfig {
        width,
        height,
        format,
        stride: 0,
        stride2: 0,
    };
    fmt.compute_stride_align(DEFAULT_STRIDE_ALIGN, false);
    fmt
}

fn bayer_backend(width: u32, height: u32) -> BackEnd {
    let mut be = BackEnd::new();
    be.bayer_enables.insert(BayerEnables::INPUT_BAYER);
    be.set_input_format(input_format(width, height, FormatDescriptor::by_name("BAYER").unwrap()));
    be
}

fn total_output_width(tiles: &ispbe::backend::TilesConfig, branch: usize) -> i32 {
    tiles
        .tiles
        .iter()
        .filter(|t| t.input_offset_y == 0)
        .map(|t| t.branches[branch].output_w as i32)
        .sum()
}

fn total_output_height(tiles: &ispbe::backend::TilesConfig, branch: usize) -> i32 {
    tiles
        .tiles
        .iter()
        .filter(|t| t.input_offset_x == 0)
        .map(|t| t.branches[branch].output_h as i32)
        .sum()
}

/// 1920x1080 -> 1280x720 YUV420P, a plain fractional resample on both axes
/// (ratio 1.5, never crossing the >2x smart-resize split).
#[test]
fn resample_only_covers_target_resolution() {
    let mut be = bayer_backend(1920, 1080);
    be.max_tile_size = Length2::new(640, 640);

    let mut out = ispbe::blocks::OutputFormat {
        width: 1280,
        height: 720,
        format: FormatDescriptor::by_name("YUV420P").unwrap().0,
        ..Default::default()
    };
    out.high_clip = 0;
    be.set_branch_output(0, out);
    be.branches[0].resample_enabled = true;
    be.branches[0].resample.scaled_width = 1280;
    be.branches[0].resample.scaled_height = 720;

    let tiles = be.prepare().expect("prepare should succeed");
    assert!(!tiles.tiles.is_empty());
    assert_eq!(total_output_width(&tiles, 0), 1280);
    assert_eq!(total_output_height(&tiles, 0), 720);
}

/// 4096x2160 -> 1024x540, an exact 4x integer downscale on both axes.
#[test]
fn exact_integer_downscale_covers_target_resolution() {
    let mut be = bayer_backend(4096, 2160);
    be.max_tile_size = Length2::new(1024, 1024);

    let mut out = ispbe::blocks::OutputFormat {
        width: 1024,
        height: 540,
        format: FormatDescriptor::by_name("YUV420P").unwrap().0,
        ..Default::default()
    };
    out.high_clip = 0;
    be.set_branch_output(0, out);
    be.branches[0].downscale_enabled = true;
    be.branches[0].downscale.scaled_width = 1024;
    be.branches[0].downscale.scaled_height = 540;

    let tiles = be.prepare().expect("prepare should succeed");
    assert_eq!(total_output_width(&tiles, 0), 1024);
    assert_eq!(total_output_height(&tiles, 0), 540);
    assert_eq!(be.branches[0].downscale.scale_factor_x, (4 * ispbe::stage::UNITY_SCALE) as u16);
    assert_eq!(be.branches[0].downscale.scale_factor_y, (4 * ispbe::stage::UNITY_SCALE) as u16);
}

/// 1920x1080 -> 960x540 with a horizontal flip: a 2x downscale plus the
/// HFLIP coordinate fix-up, which must not make `prepare` fail or drop tiles.
#[test]
fn horizontal_flip_still_covers_target_resolution() {
    let mut be = bayer_backend(1920, 1080);
    be.max_tile_size = Length2::new(640, 640);

    let mut out = ispbe::blocks::OutputFormat {
        width: 960,
        height: 540,
        format: FormatDescriptor::by_name("YUV420P").unwrap().0,
        hflip: 1,
        ..Default::default()
    };
    out.high_clip = 0;
    be.set_branch_output(0, out);
    be.branches[0].downscale_enabled = true;
    be.branches[0].downscale.scaled_width = 960;
    be.branches[0].downscale.scaled_height = 540;

    let tiles = be.prepare().expect("prepare should succeed");
    assert_eq!(total_output_width(&tiles, 0), 960);
    assert_eq!(total_output_height(&tiles, 0), 540);

    let first = &tiles.tiles[0];
    assert_eq!(first.edge_flags & ispbe::backend::TILE_EDGE_LEFT, ispbe::backend::TILE_EDGE_LEFT);
}

/// 3840x2160 smart-resized to two branches at once: a 3.75x reduction
/// (downscaler takes 4x, resampler the small remainder) and a 16x reduction
/// (downscaler clamps at 8x, resampler takes the other half). Both branches
/// must come out with the downscaler engaged, at different factors.
#[test]
fn dual_branch_smart_resize_both_branches_scale() {
    let mut be = bayer_backend(3840, 2160);
    be.max_tile_size = Length2::new(2048, 2048);

    let mut out0 = ispbe::blocks::OutputFormat {
        width: 1024,
        height: 576,
        format: FormatDescriptor::by_name("YUV420P").unwrap().0,
        ..Default::default()
    };
    out0.high_clip = 0;
    be.set_branch_output(0, out0);
    be.set_branch_smart_resize(0, Length2::new(1024, 576));

    let mut out1 = ispbe::blocks::OutputFormat {
        width: 240,
        height: 135,
        format: FormatDescriptor::by_name("YUV420P").unwrap().0,
        ..Default::default()
    };
    out1.high_clip = 0;
    be.set_branch_output(1, out1);
    be.set_branch_smart_resize(1, Length2::new(240, 135));

    let tiles = be.prepare().expect("prepare should succeed");
    assert!(!tiles.tiles.is_empty());

    assert!(be.branches[0].downscale_enabled);
    assert!(be.branches[1].downscale_enabled);
    assert_eq!(be.branches[0].downscale.scale_factor_x, (4 * ispbe::stage::UNITY_SCALE) as u16);
    // branch1's reduction (16x) is far beyond the downscaler's own 8x
    // ceiling, so it clamps there and leaves the rest to the resampler.
    assert_eq!(be.branches[1].downscale.scale_factor_x, (8 * ispbe::stage::UNITY_SCALE) as u16);
}

/// TDN enabled with `reset` set and no TDN input wired up: allowed, because
/// `reset` stands in for a first-frame restart with no history to read.
#[test]
fn tdn_reset_without_input_is_accepted() {
    let mut be = bayer_backend(640, 480);
    let mut out = ispbe::blocks::OutputFormat {
        width: 640,
        height: 480,
        format: FormatDescriptor::by_name("YUV420P").unwrap().0,
        ..Default::default()
    };
    out.high_clip = 0;
    be.set_branch_output(0, out);

    let tdn = ispbe::blocks::Tdn {
        threshold: 10,
        reset: 1,
        ..Default::default()
    };
    be.set_tdn(tdn, false);

    be.prepare().expect("tdn.reset should satisfy the input requirement");
}

/// A compressed 8bpp bayer output format with the decompand (compression)
/// block disabled must be rejected, not silently passed through.
#[test]
fn compressed_output_without_compression_block_is_rejected() {
    let mut be = bayer_backend(1920, 1080);
    let out = ispbe::blocks::OutputFormat {
        width: 1920,
        height: 1080,
        format: FormatDescriptor::by_name("COMPRESSED_MODE1").unwrap().0,
        ..Default::default()
    };
    be.set_branch_output(0, out);

    let err = be.prepare().unwrap_err();
    assert!(matches!(err, Error::CompressedOutputRequiresCompressionBlock));
}
