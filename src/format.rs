//! Pixel format descriptor and the byte/plane arithmetic over it.
//!
//! The descriptor is a packed 32-bit value so it can sit directly in the
//! `#[repr(C)]` image-format block of the finalised configuration record
//! (`spec.md` §6). Field ranges are an implementation choice the distilled
//! spec leaves open (see `DESIGN.md`); the predicates and calculus functions
//! are what's actually load-bearing and match `spec.md` §4.2 exactly.

use ispbe_bitview::{BitMutView, BitView, SetField};

use crate::error::{Error, Result};

const CHANNELS_BIT: std::ops::Range<usize> = 0..1;
const BPS_FIELD: std::ops::Range<usize> = 1..3;
const PLANARITY_FIELD: std::ops::Range<usize> = 3..5;
const CHROMA_FIELD: std::ops::Range<usize> = 5..7;
const BYTE_ORDER_BIT: usize = 7;
const COMPRESSION_FIELD: std::ops::Range<usize> = 8..10;
const WALLPAPER_BIT: usize = 10;
const INTEGRAL_BIT: usize = 11;
const HOG_FIELD: std::ops::Range<usize> = 12..14;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Planarity {
    Interleaved,
    SemiPlanar,
    Planar,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChromaSampling {
    Yuv444,
    Yuv422,
    Yuv420,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// A packed 32-bit pixel format descriptor.
///
/// Predicates over it are total: every bit pattern decodes to *some* value
/// for every field, even if that combination is never produced by
/// [`FormatDescriptor::by_name`]. Well-formedness (e.g. "compressed implies
/// 8bps") is checked separately by [`ImageFormatConfig::validate`], because it
/// also depends on width/height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct FormatDescriptor(pub u32);

impl FormatDescriptor {
    pub fn channels(&self) -> u32 {
        if BitView::new(&self.0).bit(CHANNELS_BIT.start) {
            3
        } else {
            1
        }
    }

    pub fn bits_per_sample(&self) -> u32 {
        match BitView::new(&self.0).field(BPS_FIELD) {
            0 => 8,
            1 => 10,
            2 => 12,
            3 => 16,
            _ => unreachable!(),
        }
    }

    pub fn planarity(&self) -> Planarity {
        match BitView::new(&self.0).field(PLANARITY_FIELD) {
            0 => Planarity::Interleaved,
            1 => Planarity::SemiPlanar,
            _ => Planarity::Planar,
        }
    }

    pub fn chroma_sampling(&self) -> ChromaSampling {
        match BitView::new(&self.0).field(CHROMA_FIELD) {
            0 => ChromaSampling::Yuv444,
            1 => ChromaSampling::Yuv422,
            _ => ChromaSampling::Yuv420,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        if BitView::new(&self.0).bit(BYTE_ORDER_BIT) {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    /// 0 = uncompressed, 1..=3 = compression mode.
    pub fn compression_mode(&self) -> u32 {
        BitView::new(&self.0).field(COMPRESSION_FIELD) as u32
    }

    pub fn is_compressed(&self) -> bool {
        self.compression_mode() != 0
    }

    pub fn is_wallpaper(&self) -> bool {
        BitView::new(&self.0).bit(WALLPAPER_BIT)
    }

    pub fn is_integral(&self) -> bool {
        BitView::new(&self.0).bit(INTEGRAL_BIT)
    }

    pub fn is_hog(&self) -> bool {
        BitView::new(&self.0).field(HOG_FIELD) != 0
    }

    fn set_channels(&mut self, three: bool) {
        BitMutView::new(&mut self.0).set_bit(CHANNELS_BIT.start, three);
    }

    fn set_bps(&mut self, bps: u32) {
        let code = match bps {
            8 => 0,
            10 => 1,
            12 => 2,
            16 => 3,
            other => panic!("unsupported bits-per-sample {other}"),
        };
        BitMutView::new(&mut self.0).set_field(BPS_FIELD, code);
    }

    fn set_planarity(&mut self, p: Planarity) {
        let code = match p {
            Planarity::Interleaved => 0u32,
            Planarity::SemiPlanar => 1,
            Planarity::Planar => 2,
        };
        BitMutView::new(&mut self.0).set_field(PLANARITY_FIELD, code);
    }

    fn set_chroma(&mut self, c: ChromaSampling) {
        let code = match c {
            ChromaSampling::Yuv444 => 0u32,
            ChromaSampling::Yuv422 => 1,
            ChromaSampling::Yuv420 => 2,
        };
        BitMutView::new(&mut self.0).set_field(CHROMA_FIELD, code);
    }

    fn set_compression_mode(&mut self, mode: u32) {
        BitMutView::new(&mut self.0).set_field(COMPRESSION_FIELD, mode);
    }

    fn set_wallpaper(&mut self, v: bool) {
        BitMutView::new(&mut self.0).set_bit(WALLPAPER_BIT, v);
    }

    /// Number of image planes this format lays out: 1/2/3 from channel count
    /// and planarity (`spec.md` §4.2, `num_planes`).
    pub fn num_planes(&self) -> u32 {
        if self.channels() == 1 {
            return 1;
        }
        match self.planarity() {
            Planarity::Interleaved => 1,
            Planarity::SemiPlanar => 2,
            Planarity::Planar => 3,
        }
    }

    fn bytes_per_sample(&self) -> u32 {
        match self.bits_per_sample() {
            8 => 1,
            _ => 2,
        }
    }

    /// Byte offset of column `x` within one row of the first plane
    /// (`spec.md` §4.2, `compute_x_offset`). Branches on HoG, integral,
    /// then bps, then on interleaved multi-channel packing.
    pub fn compute_x_offset(&self, x: u32) -> u32 {
        if self.is_hog() || self.is_integral() {
            // HoG cell histograms and integral-image accumulators are always
            // 32-bit-per-element, regardless of the nominal bps field.
            return x * 4;
        }

        let bytes = self.bytes_per_sample();
        if self.channels() == 1 || self.planarity() != Planarity::Interleaved {
            return x * bytes;
        }

        match self.chroma_sampling() {
            ChromaSampling::Yuv444 => x * bytes * 3,
            ChromaSampling::Yuv422 | ChromaSampling::Yuv420 => x * bytes * 2,
        }
    }
}

/// A finalised (or about-to-be-finalised) image's format + geometry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageFormatConfig {
    pub width: u32,
    pub height: u32,
    pub format: FormatDescriptor,
    pub stride: u32,
    pub stride2: u32,
}

pub const WALLPAPER_ROLL_BYTES: u32 = 128;
pub const DEFAULT_STRIDE_ALIGN: u32 = 16;
pub const PREFERRED_STRIDE_ALIGN: u32 = 64;

fn round_up(value: u32, align: u32) -> u32 {
    debug_assert!(align > 0);
    value.div_ceil(align) * align
}

impl ImageFormatConfig {
    /// Invariant: compressed ⇒ 8bps; 4:2:0/4:2:2 ⇒ even width; 4:2:0 ⇒ even
    /// height.
    pub fn validate(&self) -> Result<()> {
        if self.format.is_compressed() && self.format.bits_per_sample() != 8 {
            return Err(Error::CompressedRequires8Bps {
                bps: self.format.bits_per_sample(),
            });
        }
        match self.format.chroma_sampling() {
            ChromaSampling::Yuv422 | ChromaSampling::Yuv420 if self.width % 2 != 0 => {
                return Err(Error::OddWidthForSubsampledChroma { width: self.width });
            }
            _ => {}
        }
        if self.format.chroma_sampling() == ChromaSampling::Yuv420 && self.height % 2 != 0 {
            return Err(Error::OddHeightForSubsampledChroma {
                height: self.height,
            });
        }
        let required_align = if self.format.is_wallpaper() {
            WALLPAPER_ROLL_BYTES
        } else {
            DEFAULT_STRIDE_ALIGN
        };
        if self.stride != 0 && self.stride % required_align != 0 {
            return Err(Error::UnalignedStride {
                stride: self.stride,
                align: required_align,
            });
        }
        Ok(())
    }

    /// Fills in `stride`/`stride2` when zero, per `spec.md` §4.2
    /// `compute_stride_align`. Idempotent: calling this twice in a row
    /// produces the same result both times (`spec.md` §8 property 5),
    /// because a nonzero stride that's already aligned is left untouched.
    pub fn compute_stride_align(&mut self, align: u32, preserve_subsample_ratio: bool) {
        if self.format.is_wallpaper() {
            if self.stride == 0 {
                self.stride = self.height * WALLPAPER_ROLL_BYTES;
            }
        } else if self.stride == 0 {
            let width_bytes = self.format.compute_x_offset(self.width);
            self.stride = round_up(width_bytes, align);
        }

        match (self.format.planarity(), self.format.chroma_sampling()) {
            (Planarity::SemiPlanar, ChromaSampling::Yuv420 | ChromaSampling::Yuv422) => {
                self.stride2 = self.stride;
            }
            (Planarity::Planar, ChromaSampling::Yuv420 | ChromaSampling::Yuv422) => {
                self.stride2 = self.stride / 2;
            }
            _ => {}
        }

        if preserve_subsample_ratio && self.stride2 != 0 {
            self.stride = 2 * self.stride2;
        }
    }

    fn num_rolls(&self) -> u32 {
        // Wallpaper rolls are `stride`-wide columns of `WALLPAPER_ROLL_BYTES`
        // each; width-in-bytes of the unrolled image divided by roll width.
        let width_bytes = self.format.compute_x_offset(self.width);
        width_bytes.div_ceil(WALLPAPER_ROLL_BYTES)
    }

    /// Byte offsets of `(x, y)` in the first plane and, if present, the
    /// chroma plane(s) (`spec.md` §4.2 `compute_addr_offset`).
    pub fn compute_addr_offset(&self, x: u32, y: u32) -> Result<(u32, Option<u32>)> {
        if self.format.is_wallpaper() && self.format.bits_per_sample() == 10 && x % 3 != 0 {
            return Err(Error::WallpaperColumnMisaligned { x });
        }

        if self.format.is_wallpaper() {
            // "Roll" geometry: each roll is one WALLPAPER_ROLL_BYTES-wide
            // column running the full image height; column x picks the
            // roll, y is the row within it.
            let roll = self.format.compute_x_offset(x) / WALLPAPER_ROLL_BYTES;
            let offset_in_roll = self.format.compute_x_offset(x) % WALLPAPER_ROLL_BYTES;
            let plane0 = roll * self.stride + y * WALLPAPER_ROLL_BYTES + offset_in_roll;
            return Ok((plane0, None));
        }

        let plane0 = y * self.stride + self.format.compute_x_offset(x);

        if self.format.num_planes() == 1 {
            return Ok((plane0, None));
        }

        // Planar-non-444 subsamples horizontally; 4:2:0 also subsamples
        // vertically. A semi-planar chroma plane interleaves two samples
        // (U and V) per position, so each chroma column is twice as wide in
        // bytes as a single planar chroma sample.
        let chroma_x = if self.format.chroma_sampling() != ChromaSampling::Yuv444
            && self.format.planarity() == Planarity::Planar
        {
            x / 2
        } else {
            x
        };
        let chroma_y = if self.format.chroma_sampling() == ChromaSampling::Yuv420 {
            y / 2
        } else {
            y
        };
        let bytes_per_chroma_sample = self.format.bytes_per_sample();
        let chroma_bytes_per_px = match self.format.planarity() {
            Planarity::SemiPlanar => 2 * bytes_per_chroma_sample,
            _ => bytes_per_chroma_sample,
        };
        let plane1 = chroma_y * self.stride2 + chroma_x * chroma_bytes_per_px;
        Ok((plane0, Some(plane1)))
    }

    /// Size in bytes of `plane` (0-indexed). Returns `Ok(0)` only for planes
    /// that don't exist; returns [`Error::PlaneSizeOverflow`], not a silent
    /// value, when the true size would be `>= 2^32`.
    pub fn get_plane_size(&self, plane: u32) -> Result<u32> {
        if plane >= self.format.num_planes() {
            return Ok(0);
        }

        let (height, stride): (u64, u64) = if self.format.is_wallpaper() {
            (self.num_rolls() as u64, self.stride as u64)
        } else if plane == 0 {
            (self.height as u64, self.stride as u64)
        } else {
            let h = if self.format.chroma_sampling() == ChromaSampling::Yuv420 {
                self.height.div_ceil(2)
            } else {
                self.height
            };
            (h as u64, self.stride2 as u64)
        };

        let size = height * stride;
        if size >= (1u64 << 32) {
            return Err(Error::PlaneSizeOverflow);
        }
        Ok(size as u32)
    }
}

/// `name <-> descriptor` table (`spec.md` §4.2).
///
/// `format!("{name}")` round-trips through [`FormatDescriptor::by_name`] /
/// [`FormatDescriptor::name`] for every entry here.
const FORMAT_TABLE: &[(&str, FormatDescriptor)] = &[
    ("YUV420P", mk(1, 8, Planarity::Planar, ChromaSampling::Yuv420, false)),
    ("YUV422P", mk(1, 8, Planarity::Planar, ChromaSampling::Yuv422, false)),
    ("YUV444P", mk(1, 8, Planarity::Planar, ChromaSampling::Yuv444, false)),
    ("NV12", mk(1, 8, Planarity::SemiPlanar, ChromaSampling::Yuv420, false)),
    ("NV21", mk(1, 8, Planarity::SemiPlanar, ChromaSampling::Yuv420, false)),
    ("YUYV", mk(1, 8, Planarity::Interleaved, ChromaSampling::Yuv422, false)),
    ("UYVY", mk(1, 8, Planarity::Interleaved, ChromaSampling::Yuv422, false)),
    ("NV16", mk(1, 8, Planarity::SemiPlanar, ChromaSampling::Yuv422, false)),
    ("NV61", mk(1, 8, Planarity::SemiPlanar, ChromaSampling::Yuv422, false)),
    ("RGB888", mk(3, 8, Planarity::Interleaved, ChromaSampling::Yuv444, false)),
    ("RGBX8888", mk(3, 8, Planarity::Interleaved, ChromaSampling::Yuv444, false)),
    ("RGB161616", mk(3, 16, Planarity::Interleaved, ChromaSampling::Yuv444, false)),
    ("BAYER", mk(1, 16, Planarity::Interleaved, ChromaSampling::Yuv444, false)),
];

const COMPRESSED_SENTINELS: &[(&str, u32)] =
    &[("COMPRESSED_MODE1", 1), ("COMPRESSED_MODE2", 2)];

const fn mk(
    channels: u32,
    bps: u32,
    planarity: Planarity,
    chroma: ChromaSampling,
    wallpaper: bool,
) -> FormatDescriptor {
    let mut raw = 0u32;
    if channels == 3 {
        raw |= 1 << 0;
    }
    let bps_code = match bps {
        8 => 0,
        10 => 1,
        12 => 2,
        16 => 3,
        _ => panic!("unsupported bps in format table"),
    };
    raw |= bps_code << 1;
    let planarity_code = match planarity {
        Planarity::Interleaved => 0,
        Planarity::SemiPlanar => 1,
        Planarity::Planar => 2,
    };
    raw |= planarity_code << 3;
    let chroma_code = match chroma {
        ChromaSampling::Yuv444 => 0,
        ChromaSampling::Yuv422 => 1,
        ChromaSampling::Yuv420 => 2,
    };
    raw |= chroma_code << 5;
    if wallpaper {
        raw |= 1 << WALLPAPER_BIT;
    }
    FormatDescriptor(raw)
}

impl FormatDescriptor {
    pub fn by_name(name: &str) -> Result<Self> {
        if let Some((_, code)) = COMPRESSED_SENTINELS.iter().find(|(n, _)| *n == name) {
            let mut fmt = mk(1, 8, Planarity::Interleaved, ChromaSampling::Yuv420, false);
            fmt.set_compression_mode(*code);
            return Ok(fmt);
        }
        FORMAT_TABLE
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, fmt)| *fmt)
            .ok_or_else(|| Error::UnknownFormatName(name.to_string()))
    }

    pub fn name(&self) -> Option<&'static str> {
        if self.is_compressed() {
            return COMPRESSED_SENTINELS
                .iter()
                .find(|(_, code)| *code == self.compression_mode())
                .map(|(n, _)| *n);
        }
        FORMAT_TABLE.iter().find(|(_, fmt)| fmt == self).map(|(n, _)| *n)
    }

    pub fn wallpaper_variant(&self) -> Self {
        let mut f = *self;
        f.set_wallpaper(true);
        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_table_entry() {
        for (name, _) in FORMAT_TABLE {
            let fmt = FormatDescriptor::by_name(name).unwrap();
            assert_eq!(fmt.name(), Some(*name), "format {name} did not round-trip");
        }
    }

    #[test]
    fn num_planes_matches_layout() {
        assert_eq!(FormatDescriptor::by_name("YUV420P").unwrap().num_planes(), 3);
        assert_eq!(FormatDescriptor::by_name("NV12").unwrap().num_planes(), 2);
        assert_eq!(FormatDescriptor::by_name("YUYV").unwrap().num_planes(), 1);
        assert_eq!(FormatDescriptor::by_name("RGB888").unwrap().num_planes(), 1);
    }

    #[test]
    fn compressed_requires_8bps() {
        let mut fmt = FormatDescriptor::by_name("BAYER").unwrap();
        fmt.set_compression_mode(1);
        let cfg = ImageFormatConfig {
            width: 64,
            height: 64,
            format: fmt,
            stride: 0,
            stride2: 0,
        };
        assert_eq!(
            cfg.validate(),
            Err(Error::CompressedRequires8Bps { bps: 16 })
        );
    }

    #[test]
    fn odd_width_rejected_for_420() {
        let cfg = ImageFormatConfig {
            width: 65,
            height: 64,
            format: FormatDescriptor::by_name("YUV420P").unwrap(),
            stride: 0,
            stride2: 0,
        };
        assert_eq!(cfg.validate(), Err(Error::OddWidthForSubsampledChroma { width: 65 }));
    }

    #[test]
    fn stride_align_is_idempotent() {
        let mut cfg = ImageFormatConfig {
            width: 1920,
            height: 1080,
            format: FormatDescriptor::by_name("YUV420P").unwrap(),
            stride: 0,
            stride2: 0,
        };
        cfg.compute_stride_align(DEFAULT_STRIDE_ALIGN, false);
        let once = cfg;
        cfg.compute_stride_align(DEFAULT_STRIDE_ALIGN, false);
        assert_eq!(cfg, once);
    }

    #[test]
    fn wallpaper_stride_is_128_aligned() {
        let mut cfg = ImageFormatConfig {
            width: 1920,
            height: 1080,
            format: FormatDescriptor::by_name("BAYER").unwrap().wallpaper_variant(),
            stride: 0,
            stride2: 0,
        };
        cfg.compute_stride_align(DEFAULT_STRIDE_ALIGN, false);
        assert_eq!(cfg.stride % WALLPAPER_ROLL_BYTES, 0);
    }

    #[test]
    fn nv12_chroma_plane_half_luma_stride() {
        let mut cfg = ImageFormatConfig {
            width: 1280,
            height: 720,
            format: FormatDescriptor::by_name("NV12").unwrap(),
            stride: 0,
            stride2: 0,
        };
        cfg.compute_stride_align(DEFAULT_STRIDE_ALIGN, false);
        // NV12 is semi-planar: chroma stride equals luma stride (one
        // interleaved U/V row per two luma rows), not half of it.
        assert_eq!(cfg.stride2, cfg.stride);
    }

    #[test]
    fn plane_size_overflow_is_reported_not_swallowed() {
        let cfg = ImageFormatConfig {
            width: 1,
            height: 1,
            format: FormatDescriptor::by_name("YUV444P").unwrap(),
            stride: u32::MAX,
            stride2: u32::MAX,
        };
        let big_height = ImageFormatConfig {
            height: u32::MAX,
            ..cfg
        };
        assert_eq!(big_height.get_plane_size(0), Err(Error::PlaneSizeOverflow));
    }
}
