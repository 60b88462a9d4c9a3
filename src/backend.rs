//! The back-end configuration preparer: one struct holding every block's
//! config plus the finalised tile array, and the `prepare` entry point that
//! validates, finalises, retiles and composes them (`spec.md` §4.5).

use crate::blocks::*;
use crate::compose;
use crate::config::{merge_dirty, BayerEnables, CatalogueEntry, DirtyMask, RgbEnables};
use crate::error::{Error, Result};
use crate::format::ImageFormatConfig;
use crate::geometry::{Crop, Crop2, Length2};
use crate::stage::RescaleMode;
use crate::tiling::{self, BranchAxisSpec, MAX_TILES};
use log::error;

/// One output branch's crop/downscale/resample/output chain, owned by
/// [`BackEnd`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Branch {
    pub crop: Crop2,
    pub downscale_enabled: bool,
    pub downscale: Downscale,
    pub resample_enabled: bool,
    pub resample: Resample,
    pub output_enabled: bool,
    pub output: OutputFormat,
    pub smart_resize_target: Option<Length2>,
}

/// The ~6.5 KiB finalised configuration record, dense and little-endian,
/// with the reserved padding regions the legacy header layout requires
/// (`spec.md` §6).
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct BackEndConfig {
    pub _head_reserved: [u8; 112],
    pub input_format: ImageFormatConfig,
    pub bayer_enables: u32,
    pub rgb_enables: u32,
    pub debin: Debin,
    pub decompand: Decompand,
    pub dpc: Dpc,
    pub geq: Geq,
    pub tdn: Tdn,
    pub sdn: Sdn,
    pub blc: Blc,
    pub stitch: Stitch,
    pub wbg: Wbg,
    pub cdn: Cdn,
    pub lsc: Lsc,
    pub cac: Cac,
    pub tonemap: Tonemap,
    pub demosaic: Demosaic,
    pub ccm: Ccm,
    pub ycbcr: Ycbcr,
    pub sharpen: Sharpen,
    pub gamma: Gamma,
    pub downscale: [Downscale; MAX_BRANCHES],
    pub resample: [Resample; MAX_BRANCHES],
    pub output: [OutputFormat; MAX_BRANCHES],
    pub hog: Hog,
    pub _tail_reserved: [u8; 84],
}

/// One branch's tile geometry and composed addresses/phases.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct BranchTile {
    pub crop_start_x: u16,
    pub crop_start_y: u16,
    pub crop_end_x: u16,
    pub crop_end_y: u16,
    pub resample_in_w: u16,
    pub resample_in_h: u16,
    pub output_offset_x: u16,
    pub output_offset_y: u16,
    pub output_w: u16,
    pub output_h: u16,
    pub output_addr_offset: u32,
    pub output_addr_offset2: u32,
    pub downscale_phase_x: [i16; 3],
    pub downscale_phase_y: [i16; 3],
    pub resample_phase_x: [i16; 3],
    pub resample_phase_y: [i16; 3],
}

/// One scheduling unit of work: a sub-rectangle of the input plus, per
/// branch, the sub-rectangle(s) of output it produces (`spec.md` §3, §6).
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Tile {
    pub edge_flags: u8,
    pub _pad0: [u8; 3],
    pub input_offset_x: u16,
    pub input_offset_y: u16,
    pub input_addr_offset: u32,
    pub tdn_input_addr_offset: u32,
    pub tdn_output_addr_offset: u32,
    pub stitch_input_addr_offset: u32,
    pub stitch_output_addr_offset: u32,
    pub lsc_grid_offset_x: i32,
    pub lsc_grid_offset_y: i32,
    pub cac_grid_offset_x: i32,
    pub cac_grid_offset_y: i32,
    pub hog_addr_offset: u32,
    pub branches: [BranchTile; MAX_BRANCHES],
    /// Keeps the record at the reference header's fixed 160 bytes as
    /// `MAX_BRANCHES` changes; carries no data.
    pub _tail_reserved: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<BranchTile>() == 52);
const _: () = assert!(std::mem::size_of::<Tile>() == 4 + 4 + 4 * 5 + 4 * 4 + 4 + MAX_BRANCHES * 52 + 8);
const _: () = assert!(std::mem::size_of::<Tile>() == 160);

/// Bit positions for `BackEnd`'s internal dirty mask, distinct from the
/// catalogue-indexed mask `merge_config` takes as a parameter: this one
/// tracks which setters have been called since the last `prepare`, so
/// `finalize_blocks` only recomputes what actually changed.
const DIRTY_INPUT_FORMAT: usize = 0;
const DIRTY_TDN: usize = 1;

fn dirty_branch_bit(branch: usize) -> usize {
    2 + branch
}

pub const TILE_EDGE_LEFT: u8 = 1 << 0;
pub const TILE_EDGE_RIGHT: u8 = 1 << 1;
pub const TILE_EDGE_TOP: u8 = 1 << 2;
pub const TILE_EDGE_BOTTOM: u8 = 1 << 3;

/// Output handed back to the caller after a successful `prepare` call
/// (`spec.md` §3 "TilesConfig").
#[derive(Clone, Debug)]
pub struct TilesConfig {
    pub tiles: Vec<Tile>,
}

/// The back-end: one config record and one tile array, overwritten in
/// place by every `prepare` call (`spec.md` §3 "Ownership").
pub struct BackEnd {
    pub config: BackEndConfig,
    pub branches: [Branch; MAX_BRANCHES],
    pub active_branches: usize,
    pub max_tile_size: Length2,
    pub image_size: Length2,
    pub bayer_enables: BayerEnables,
    pub rgb_enables: RgbEnables,
    dirty: DirtyMask,
    geometry_dirty: bool,
    last_tiles: Option<TilesConfig>,
}

impl Default for BackEnd {
    fn default() -> Self {
        Self {
            config: BackEndConfig::zeroed(),
            branches: [Branch::default(); MAX_BRANCHES],
            active_branches: 0,
            max_tile_size: Length2::new(640, 640),
            image_size: Length2::new(0, 0),
            bayer_enables: BayerEnables::empty(),
            rgb_enables: RgbEnables::empty(),
            dirty: DirtyMask::default(),
            geometry_dirty: true,
            last_tiles: None,
        }
    }
}

impl BackEndConfig {
    fn zeroed() -> Self {
        // SAFETY: every field is plain data (integers, `#[repr(C)]` structs
        // of integers); an all-zero bit pattern is a valid value for each.
        unsafe { std::mem::zeroed() }
    }
}

impl BackEnd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the input image format, marking geometry dirty so the next
    /// `prepare` retiles (`spec.md` §4.5.3).
    pub fn set_input_format(&mut self, format: ImageFormatConfig) {
        self.config.input_format = format;
        self.geometry_dirty = true;
        self.dirty.set(DIRTY_INPUT_FORMAT);
    }

    pub fn set_branch_crop(&mut self, branch: usize, crop: Crop2) {
        self.branches[branch].crop = crop;
        self.geometry_dirty = true;
        self.dirty.set(dirty_branch_bit(branch));
    }

    pub fn set_branch_output(&mut self, branch: usize, output: OutputFormat) {
        self.branches[branch].output_enabled = true;
        self.branches[branch].output = output;
        self.rgb_enables.insert(RgbEnables::output(branch));
        self.geometry_dirty = true;
        self.dirty.set(dirty_branch_bit(branch));
    }

    pub fn set_branch_smart_resize(&mut self, branch: usize, target: Length2) {
        self.branches[branch].smart_resize_target = Some(target);
        self.geometry_dirty = true;
        self.dirty.set(dirty_branch_bit(branch));
    }

    pub fn set_tdn(&mut self, tdn: Tdn, input_enabled: bool) {
        self.config.tdn = tdn;
        self.bayer_enables.set(BayerEnables::TDN, true);
        if input_enabled {
            self.bayer_enables.insert(BayerEnables::DEBIN);
        }
        self.dirty.set(DIRTY_TDN);
    }

    /// Runs the full `prepare` pipeline (`spec.md` §4.5 steps 1-6).
    pub fn prepare(&mut self) -> Result<TilesConfig> {
        match self.prepare_inner() {
            Ok(tiles) => Ok(tiles),
            Err(e) => {
                error!("prepare failed: {}", e);
                Err(e)
            }
        }
    }

    fn prepare_inner(&mut self) -> Result<TilesConfig> {
        self.check_consistency()?;
        self.resolve_smart_resize()?;
        self.finalize_blocks()?;

        if self.geometry_dirty {
            let grid = self.build_tile_grid()?;
            self.last_tiles = Some(TilesConfig {
                tiles: self.compose_tiles(&grid)?,
            });
            self.geometry_dirty = false;
        }

        self.dirty.clear();
        self.config.bayer_enables = self.bayer_enables.bits();
        self.config.rgb_enables = self.rgb_enables.bits();

        Ok(self.last_tiles.clone().expect("tile grid built above"))
    }

    fn check_consistency(&self) -> Result<()> {
        let bayer = self.bayer_enables.contains(BayerEnables::INPUT_BAYER);
        let rgb = self.rgb_enables.contains(RgbEnables::INPUT_RGB);
        if !bayer && !rgb {
            return Err(Error::NoInputEnabled);
        }
        if bayer && rgb {
            return Err(Error::AmbiguousInputEnabled);
        }
        if !(0..MAX_BRANCHES).any(|b| self.branches[b].output_enabled) {
            return Err(Error::NoOutputEnabled);
        }
        if self.bayer_enables.contains(BayerEnables::TDN)
            && !self.bayer_enables.contains(BayerEnables::DEBIN)
            && self.config.tdn.reset == 0
        {
            return Err(Error::TdnInputRequired);
        }
        Ok(())
    }

    /// `spec.md` §4.5.1: split a >2x reduction across downscaler (2x..8x,
    /// rounded up) and resampler (the remainder); otherwise pick a
    /// named filter by nearest scale from the defaults table.
    fn resolve_smart_resize(&mut self) -> Result<()> {
        for b in 0..MAX_BRANCHES {
            let Some(target) = self.branches[b].smart_resize_target else {
                continue;
            };
            if !self.branches[b].output_enabled {
                continue;
            }
            let crop = &self.branches[b].crop;
            let src = Length2::new(crop.x.total(), crop.y.total());
            let input = Length2::new(
                (self.config.input_format.width as i32 - src.x).max(1),
                (self.config.input_format.height as i32 - src.y).max(1),
            );

            let ratio_x = input.x as f64 / target.x as f64;
            let ratio_y = input.y as f64 / target.y as f64;

            if ratio_x > 2.0 || ratio_y > 2.0 {
                let downscale_x = ratio_x.clamp(2.0, 8.0).ceil() as i32;
                let downscale_y = ratio_y.clamp(2.0, 8.0).ceil() as i32;
                let down_w = (input.x / downscale_x.max(1)).max(1);
                let down_h = (input.y / downscale_y.max(1)).max(1);

                self.branches[b].downscale_enabled = ratio_x > 2.0 || ratio_y > 2.0;
                self.branches[b].downscale.scaled_width = down_w as u16;
                self.branches[b].downscale.scaled_height = down_h as u16;

                self.branches[b].resample_enabled = true;
                self.branches[b].resample.scaled_width = target.x as u16;
                self.branches[b].resample.scaled_height = target.y as u16;
            } else {
                self.branches[b].resample_enabled = true;
                self.branches[b].resample.scaled_width = target.x as u16;
                self.branches[b].resample.scaled_height = target.y as u16;
            }
            self.rgb_enables.insert(RgbEnables::resample(b));
            if self.branches[b].downscale_enabled {
                self.rgb_enables.insert(RgbEnables::downscale(b));
            }
        }
        Ok(())
    }

    fn finalize_blocks(&mut self) -> Result<()> {
        if self.bayer_enables.contains(BayerEnables::TDN) && self.dirty.is_set(DIRTY_TDN) {
            self.config
                .tdn
                .finalize_motion_threshold_recip(self.config.tdn.threshold);
        }
        if self.bayer_enables.contains(BayerEnables::STITCH) {
            self.config
                .stitch
                .finalize_motion_threshold_recip(self.config.stitch.threshold_lo);
        }

        for b in 0..MAX_BRANCHES {
            if !self.branches[b].output_enabled {
                continue;
            }
            if !self.dirty.is_set(dirty_branch_bit(b)) && !self.dirty.is_set(DIRTY_INPUT_FORMAT) {
                continue;
            }
            if self.branches[b].downscale_enabled {
                let (fx, rx) = Downscale::finalize_axis(
                    self.config.input_format.width,
                    self.branches[b].downscale.scaled_width as u32,
                )?;
                let (fy, ry) = Downscale::finalize_axis(
                    self.config.input_format.height,
                    self.branches[b].downscale.scaled_height as u32,
                )?;
                self.branches[b].downscale.scale_factor_x = fx;
                self.branches[b].downscale.scale_factor_y = fy;
                self.branches[b].downscale.scale_recip_x = rx;
                self.branches[b].downscale.scale_recip_y = ry;
            }
            if self.branches[b].resample_enabled {
                let resample_input_w = if self.branches[b].downscale_enabled {
                    self.branches[b].downscale.scaled_width as u32
                } else {
                    self.config.input_format.width
                };
                let resample_input_h = if self.branches[b].downscale_enabled {
                    self.branches[b].downscale.scaled_height as u32
                } else {
                    self.config.input_format.height
                };
                self.branches[b].resample.scale_factor_x = Resample::compute_scale_factor(
                    resample_input_w,
                    self.branches[b].resample.scaled_width as u32,
                )?;
                self.branches[b].resample.scale_factor_y = Resample::compute_scale_factor(
                    resample_input_h,
                    self.branches[b].resample.scaled_height as u32,
                )?;
            }

            compose::finalize_output_format(
                &mut self.branches[b].output,
                self.bayer_enables.contains(BayerEnables::DECOMPAND),
            )?;
            let mut out_format = ImageFormatConfig {
                width: self.branches[b].output.width as u32,
                height: self.branches[b].output.height as u32,
                format: crate::format::FormatDescriptor(self.branches[b].output.format),
                stride: self.branches[b].output.stride,
                stride2: self.branches[b].output.stride2,
            };
            compose::optimal_output_stride(&mut out_format, false);
            self.branches[b].output.stride = out_format.stride;
            self.branches[b].output.stride2 = out_format.stride2;
        }
        Ok(())
    }

    fn branch_axis_spec(&self, branch: usize, axis: crate::geometry::Axis) -> BranchAxisSpec {
        use crate::geometry::Axis;
        let b = &self.branches[branch];
        let crop = match axis {
            Axis::X => b.crop.x,
            Axis::Y => b.crop.y,
        };
        let (output_length, max_alignment, hflip_or_vflip) = match axis {
            Axis::X => (b.output.width as i32, 16, b.output.hflip != 0),
            Axis::Y => (b.output.height as i32, 2, b.output.vflip != 0),
        };
        let downscale_factor = match axis {
            Axis::X => b.downscale.scale_factor_x,
            Axis::Y => b.downscale.scale_factor_y,
        };
        let resample_factor = match axis {
            Axis::X => b.resample.scale_factor_x,
            Axis::Y => b.resample.scale_factor_y,
        };
        BranchAxisSpec {
            crop,
            downscale: b.downscale_enabled.then_some(RescaleMode::Downscale {
                scale_factor_q12: downscale_factor as i32,
            }),
            context_pad: None,
            resample: b.resample_enabled.then_some(RescaleMode::Resample {
                scale_factor_q12: resample_factor as i32,
            }),
            output_length,
            max_alignment,
            min_alignment: 2,
            mirrored: hflip_or_vflip,
        }
    }

    fn build_tile_grid(&self) -> Result<Vec<tiling::TileGeometry>> {
        use crate::geometry::Axis;
        let active: Vec<usize> = (0..MAX_BRANCHES).filter(|&b| self.branches[b].output_enabled).collect();
        let branches_x: Vec<_> = active.iter().map(|&b| self.branch_axis_spec(b, Axis::X)).collect();
        let branches_y: Vec<_> = active.iter().map(|&b| self.branch_axis_spec(b, Axis::Y)).collect();

        let image_size = Length2::new(self.config.input_format.width as i32, self.config.input_format.height as i32);
        let grid = tiling::build_tile_grid(image_size, 1, self.max_tile_size, &branches_x, &branches_y)?;
        if grid.len() > MAX_TILES {
            return Err(Error::TooManyTiles(grid.len(), MAX_TILES));
        }
        Ok(grid)
    }

    fn compose_tiles(&self, grid: &[tiling::TileGeometry]) -> Result<Vec<Tile>> {
        let active: Vec<usize> = (0..MAX_BRANCHES).filter(|&b| self.branches[b].output_enabled).collect();
        let image_size = Length2::new(self.config.input_format.width as i32, self.config.input_format.height as i32);

        let lsc_steps = self
            .bayer_enables
            .contains(BayerEnables::LSC)
            .then(|| {
                let gx = self.config.lsc.grid.compute_grid_step(image_size.x as u32, self.config.lsc.grid.offset_x as i32, "lsc.x")?;
                let gy = self.config.lsc.grid.compute_grid_step(image_size.y as u32, self.config.lsc.grid.offset_y as i32, "lsc.y")?;
                Ok::<_, Error>((gx, gy))
            })
            .transpose()?;
        let cac_steps = self
            .bayer_enables
            .contains(BayerEnables::CAC)
            .then(|| {
                let gx = self.config.cac.grid.compute_grid_step(image_size.x as u32, self.config.cac.grid.offset_x as i32, "cac.x")?;
                let gy = self.config.cac.grid.compute_grid_step(image_size.y as u32, self.config.cac.grid.offset_y as i32, "cac.y")?;
                Ok::<_, Error>((gx, gy))
            })
            .transpose()?;

        // `reset` stands in for "no history yet": there is no real TDN input
        // buffer to address in that case, so the offset stays zero
        // (`spec.md` §8 scenario 5).
        let tdn_enabled =
            self.bayer_enables.contains(BayerEnables::TDN) && self.bayer_enables.contains(BayerEnables::DEBIN);
        let stitch_enabled = self.bayer_enables.contains(BayerEnables::STITCH);

        let mut out = Vec::with_capacity(grid.len());
        for geom in grid {
            let (input_addr, _) = compose::input_addr_offset(&self.config.input_format, geom.input_offset)?;
            let tdn_addr = tdn_enabled
                .then(|| compose::auxiliary_addr_offset(&self.config.input_format, geom.input_offset))
                .transpose()?
                .unwrap_or(0);
            let stitch_addr = stitch_enabled
                .then(|| compose::auxiliary_addr_offset(&self.config.input_format, geom.input_offset))
                .transpose()?
                .unwrap_or(0);

            let mut edge_flags = 0u8;
            if geom.input_offset.x == 0 {
                edge_flags |= TILE_EDGE_LEFT;
            }
            if geom.input_offset.y == 0 {
                edge_flags |= TILE_EDGE_TOP;
            }

            let mut branch_tiles = [BranchTile::default(); MAX_BRANCHES];
            for (slot, &b) in active.iter().enumerate() {
                let bg = geom.branches[slot];
                if !bg.active {
                    branch_tiles[slot] = BranchTile {
                        crop_start_x: image_size.x as u16,
                        ..Default::default()
                    };
                    continue;
                }
                let branch = &self.branches[b];
                let out_format = ImageFormatConfig {
                    width: branch.output.width as u32,
                    height: branch.output.height as u32,
                    format: crate::format::FormatDescriptor(branch.output.format),
                    stride: branch.output.stride,
                    stride2: branch.output.stride2,
                };
                let (addr0, addr1) = compose::output_addr_offset(
                    &out_format,
                    bg.output_offset,
                    bg.output_size,
                    branch.output.hflip != 0,
                    branch.output.vflip != 0,
                )?;

                let num_planes = out_format.format.num_planes();
                let phases = compose::compose_branch_phases(
                    branch.downscale_enabled.then_some(&branch.downscale),
                    branch.resample_enabled.then_some(&branch.resample),
                    bg.resample_in_offset,
                    bg.output_offset,
                    num_planes as usize,
                    slot,
                )?;

                let mut downscale_phase_x = [0i16; 3];
                let mut downscale_phase_y = [0i16; 3];
                if let Some(ds) = phases.downscale {
                    for p in 0..3 {
                        downscale_phase_x[p] = ds[p].0 as i16;
                        downscale_phase_y[p] = ds[p].1 as i16;
                    }
                }
                let mut resample_phase_x = [0i16; 3];
                let mut resample_phase_y = [0i16; 3];
                if let Some(rs) = phases.resample {
                    for p in 0..3 {
                        resample_phase_x[p] = rs[p].0 as i16;
                        resample_phase_y[p] = rs[p].1 as i16;
                    }
                }

                branch_tiles[slot] = BranchTile {
                    crop_start_x: bg.crop_start.x as u16,
                    crop_start_y: bg.crop_start.y as u16,
                    crop_end_x: bg.crop_end.x as u16,
                    crop_end_y: bg.crop_end.y as u16,
                    resample_in_w: bg.resample_in_size.x as u16,
                    resample_in_h: bg.resample_in_size.y as u16,
                    output_offset_x: bg.output_offset.x as u16,
                    output_offset_y: bg.output_offset.y as u16,
                    output_w: bg.output_size.x as u16,
                    output_h: bg.output_size.y as u16,
                    output_addr_offset: addr0,
                    output_addr_offset2: addr1.unwrap_or(0),
                    downscale_phase_x,
                    downscale_phase_y,
                    resample_phase_x,
                    resample_phase_y,
                };
            }

            out.push(Tile {
                edge_flags,
                _pad0: [0; 3],
                input_offset_x: geom.input_offset.x as u16,
                input_offset_y: geom.input_offset.y as u16,
                input_addr_offset: input_addr,
                tdn_input_addr_offset: tdn_addr,
                tdn_output_addr_offset: tdn_addr,
                stitch_input_addr_offset: stitch_addr,
                stitch_output_addr_offset: stitch_addr,
                lsc_grid_offset_x: lsc_steps
                    .map(|(gx, _)| compose::shading_grid_offset(gx, geom.input_offset.x, self.config.lsc.grid.offset_x as i32))
                    .unwrap_or(0),
                lsc_grid_offset_y: lsc_steps
                    .map(|(_, gy)| compose::shading_grid_offset(gy, geom.input_offset.y, self.config.lsc.grid.offset_y as i32))
                    .unwrap_or(0),
                cac_grid_offset_x: cac_steps
                    .map(|(gx, _)| compose::shading_grid_offset(gx, geom.input_offset.x, self.config.cac.grid.offset_x as i32))
                    .unwrap_or(0),
                cac_grid_offset_y: cac_steps
                    .map(|(_, gy)| compose::shading_grid_offset(gy, geom.input_offset.y, self.config.cac.grid.offset_y as i32))
                    .unwrap_or(0),
                hog_addr_offset: 0,
                branches: branch_tiles,
                _tail_reserved: [0; 8],
            });
        }
        Ok(out)
    }

    /// The block catalogue used by both the dirty-merge path and the JSON
    /// introspector (`spec.md` §4.5.5). Kept as a method (rather than a
    /// free `const`) because `offset_of!` needs the concrete container
    /// type in scope at the call site.
    pub fn catalogue() -> Vec<CatalogueEntry> {
        use crate::config::catalogue_entry;
        vec![
            catalogue_entry!("debin", BackEndConfig, debin, Debin),
            catalogue_entry!("decompand", BackEndConfig, decompand, Decompand),
            catalogue_entry!("dpc", BackEndConfig, dpc, Dpc),
            catalogue_entry!("geq", BackEndConfig, geq, Geq),
            catalogue_entry!("tdn", BackEndConfig, tdn, Tdn),
            catalogue_entry!("sdn", BackEndConfig, sdn, Sdn),
            catalogue_entry!("blc", BackEndConfig, blc, Blc),
            catalogue_entry!("stitch", BackEndConfig, stitch, Stitch),
            catalogue_entry!("wbg", BackEndConfig, wbg, Wbg),
            catalogue_entry!("cdn", BackEndConfig, cdn, Cdn),
            catalogue_entry!("lsc", BackEndConfig, lsc, Lsc),
            catalogue_entry!("cac", BackEndConfig, cac, Cac),
            catalogue_entry!("tonemap", BackEndConfig, tonemap, Tonemap),
            catalogue_entry!("demosaic", BackEndConfig, demosaic, Demosaic),
            catalogue_entry!("ccm", BackEndConfig, ccm, Ccm),
            catalogue_entry!("ycbcr", BackEndConfig, ycbcr, Ycbcr),
            catalogue_entry!("sharpen", BackEndConfig, sharpen, Sharpen),
            catalogue_entry!("gamma", BackEndConfig, gamma, Gamma),
            catalogue_entry!("downscale", BackEndConfig, downscale, [Downscale; MAX_BRANCHES]),
            catalogue_entry!("resample", BackEndConfig, resample, [Resample; MAX_BRANCHES]),
            catalogue_entry!("output", BackEndConfig, output, [OutputFormat; MAX_BRANCHES]),
            catalogue_entry!("hog", BackEndConfig, hog, Hog),
        ]
    }

    /// Copies only the dirty byte ranges of `update` into `self.config`
    /// (`spec.md` §8 invariant 7).
    pub fn merge_config(&mut self, update: &BackEndConfig, dirty: DirtyMask) {
        let catalogue = Self::catalogue();
        // SAFETY: both sides are `#[repr(C)]` plain-data records of the
        // same concrete type; viewing them as byte slices for the merge is
        // exactly what the shared-memory ABI already assumes.
        let base: &mut [u8] = unsafe {
            std::slice::from_raw_parts_mut(&mut self.config as *mut _ as *mut u8, std::mem::size_of::<BackEndConfig>())
        };
        let update: &[u8] =
            unsafe { std::slice::from_raw_parts(update as *const _ as *const u8, std::mem::size_of::<BackEndConfig>()) };
        merge_dirty(base, update, dirty, &catalogue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatDescriptor;

    fn rgb888() -> FormatDescriptor {
        FormatDescriptor::by_name("RGB888").unwrap()
    }

    fn single_branch_backend(width: u32, height: u32) -> BackEnd {
        let mut be = BackEnd::new();
        be.bayer_enables.insert(BayerEnables::INPUT_BAYER);
        let mut input = ImageFormatConfig {
            width,
            height,
            format: rgb888(),
            stride: 0,
            stride2: 0,
        };
        input.compute_stride_align(crate::format::DEFAULT_STRIDE_ALIGN, false);
        be.set_input_format(input);

        let mut out = OutputFormat {
            width: width as u16,
            height: height as u16,
            format: rgb888().0,
            ..Default::default()
        };
        out.high_clip = 0;
        be.set_branch_output(0, out);
        be
    }

    #[test]
    fn prepare_rejects_no_input_enabled() {
        let mut be = BackEnd::new();
        be.set_branch_output(0, OutputFormat::default());
        let err = be.prepare().unwrap_err();
        assert!(matches!(err, Error::NoInputEnabled));
    }

    #[test]
    fn prepare_rejects_no_output_enabled() {
        let mut be = BackEnd::new();
        be.bayer_enables.insert(BayerEnables::INPUT_BAYER);
        let err = be.prepare().unwrap_err();
        assert!(matches!(err, Error::NoOutputEnabled));
    }

    #[test]
    fn prepare_single_branch_identity_tiles_cover_image() {
        let mut be = single_branch_backend(256, 128);
        be.max_tile_size = Length2::new(128, 128);
        let tiles = be.prepare().unwrap();
        assert!(!tiles.tiles.is_empty());
        let total_w: i32 = tiles
            .tiles
            .iter()
            .filter(|t| t.input_offset_y == 0)
            .map(|t| t.branches[0].output_w as i32)
            .sum();
        assert_eq!(total_w, 256);
    }
}
