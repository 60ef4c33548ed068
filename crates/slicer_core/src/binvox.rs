//! Voxel accumulation and binvox persistence, one file per material.
//!
//! Volumes are written in the run-length encoded binvox layout: a text header
//! (`#binvox 1`, `dim`, `translate`, `scale`, `data`) followed by
//! `(value, count)` byte pairs with `count <= 255`. Cells are linearised with
//! `y` varying fastest, then `z`, then `x`, as binvox readers expect.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use glam::Vec3;
use image::RgbaImage;
use tracing::{debug, info};

use crate::bounds::{Axis, BoundingBox, Order};
use crate::error::{SliceError, SliceResult};
use crate::model::Material;
use crate::orchestrator::{SliceConsumer, SliceDescriptor};
use crate::Scalar;

const MAGIC: &str = "#binvox 1";
const MAX_RUN: usize = u8::MAX as usize;

/// Sparse occupancy grid plus the binvox header values.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelSet {
    dims: [usize; 3],
    translate: Vec3,
    scale: Scalar,
    cells: BTreeSet<[usize; 3]>,
}

impl VoxelSet {
    pub fn new(dims: [usize; 3], translate: Vec3, scale: Scalar) -> Self {
        Self {
            dims,
            translate,
            scale,
            cells: BTreeSet::new(),
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn translate(&self) -> Vec3 {
        self.translate
    }

    pub fn scale(&self) -> Scalar {
        self.scale
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, x: usize, y: usize, z: usize) -> bool {
        self.cells.contains(&[x, y, z])
    }

    fn in_bounds(&self, [x, y, z]: [usize; 3]) -> bool {
        x < self.dims[0] && y < self.dims[1] && z < self.dims[2]
    }

    /// Marks a cell occupied. Returns `false` when the cell was already set or
    /// lies outside the grid; occupied cells are never cleared.
    pub fn add(&mut self, x: usize, y: usize, z: usize) -> bool {
        let cell = [x, y, z];
        self.in_bounds(cell) && self.cells.insert(cell)
    }

    /// Resizes the cross-section to the rendered raster; cells outside the new
    /// plane are dropped.
    pub fn set_plane_dims(&mut self, nx: usize, ny: usize) {
        self.dims[0] = nx;
        self.dims[1] = ny;
        let dims = self.dims;
        self.cells
            .retain(|&[x, y, z]| x < dims[0] && y < dims[1] && z < dims[2]);
    }

    /// Occupied cells ordered by `x`, then `y`, then `z`.
    pub fn iter(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        self.cells.iter().copied()
    }

    fn linear_index(&self, [x, y, z]: [usize; 3]) -> usize {
        (x * self.dims[2] + z) * self.dims[1] + y
    }

    fn cell_at(&self, index: usize) -> [usize; 3] {
        let [_, ny, nz] = self.dims;
        [index / (ny * nz), index % ny, (index / ny) % nz]
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        let [nx, ny, nz] = self.dims;
        let t = self.translate;
        writeln!(out, "{MAGIC}")?;
        writeln!(out, "dim {nx} {ny} {nz}")?;
        writeln!(out, "translate {} {} {}", t.x, t.y, t.z)?;
        writeln!(out, "scale {}", self.scale)?;
        writeln!(out, "data")?;

        let total = nx * ny * nz;
        let mut indices: Vec<usize> = self
            .cells
            .iter()
            .map(|&cell| self.linear_index(cell))
            .collect();
        indices.sort_unstable();

        let mut start = 0;
        let mut filled = 0;
        for index in indices {
            if index != start + filled {
                write_run(&mut out, 1, filled)?;
                write_run(&mut out, 0, index - start - filled)?;
                start = index;
                filled = 0;
            }
            filled += 1;
        }
        write_run(&mut out, 1, filled)?;
        write_run(&mut out, 0, total - start - filled)?;
        out.flush()
    }

    pub fn write(&self, path: impl AsRef<Path>) -> SliceResult<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| SliceError::io(path, e))?;
        self.write_to(BufWriter::new(file))
            .map_err(|e| SliceError::io(path, e))
    }

    pub fn read_from<R: BufRead>(mut input: R) -> SliceResult<Self> {
        let mut line = String::new();
        let mut next_line = |input: &mut R| -> SliceResult<Option<String>> {
            line.clear();
            let read = input
                .read_line(&mut line)
                .map_err(|e| SliceError::io("<binvox stream>", e))?;
            Ok((read > 0).then(|| line.trim().to_owned()))
        };

        match next_line(&mut input)? {
            Some(magic) if magic.starts_with("#binvox") => {}
            other => {
                return Err(SliceError::Binvox(format!(
                    "missing magic line, found {other:?}"
                )))
            }
        }

        let mut dims = None;
        let mut translate = Vec3::ZERO;
        let mut scale = 1.0;
        loop {
            let Some(header) = next_line(&mut input)? else {
                return Err(SliceError::Binvox("header ends before `data`".into()));
            };
            let mut fields = header.split_whitespace();
            match fields.next() {
                Some("data") => break,
                Some("dim") => dims = Some(parse_fields::<usize, 3>(fields, "dim")?),
                Some("translate") => {
                    translate = Vec3::from_array(parse_fields::<Scalar, 3>(fields, "translate")?)
                }
                Some("scale") => scale = parse_fields::<Scalar, 1>(fields, "scale")?[0],
                _ => debug!(header = %header, "ignoring binvox header line"),
            }
        }
        let dims = dims.ok_or_else(|| SliceError::Binvox("missing `dim` line".into()))?;

        let mut data = Vec::new();
        input
            .read_to_end(&mut data)
            .map_err(|e| SliceError::io("<binvox stream>", e))?;
        if data.len() % 2 != 0 {
            return Err(SliceError::Binvox("odd number of run-length bytes".into()));
        }

        let mut voxels = VoxelSet::new(dims, translate, scale);
        let total = dims.iter().product::<usize>();
        let mut index = 0;
        for pair in data.chunks_exact(2) {
            let (value, count) = (pair[0], pair[1] as usize);
            if index + count > total {
                return Err(SliceError::Binvox(format!(
                    "runs exceed the {total} cells of the grid"
                )));
            }
            if value != 0 {
                for i in index..index + count {
                    let cell = voxels.cell_at(i);
                    voxels.cells.insert(cell);
                }
            }
            index += count;
        }
        if index != total {
            return Err(SliceError::Binvox(format!(
                "runs cover {index} of {total} cells"
            )));
        }
        Ok(voxels)
    }

    pub fn read(path: impl AsRef<Path>) -> SliceResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SliceError::io(path, e))?;
        Self::read_from(BufReader::new(file))
    }
}

fn write_run<W: Write>(out: &mut W, value: u8, mut count: usize) -> io::Result<()> {
    while count > 0 {
        let run = count.min(MAX_RUN);
        out.write_all(&[value, run as u8])?;
        count -= run;
    }
    Ok(())
}

fn parse_fields<'a, T: std::str::FromStr, const N: usize>(
    fields: impl Iterator<Item = &'a str>,
    name: &str,
) -> SliceResult<[T; N]> {
    let values: Vec<T> = fields
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| SliceError::Binvox(format!("unparsable `{name}` values")))?;
    values
        .try_into()
        .map_err(|_| SliceError::Binvox(format!("`{name}` expects {N} values")))
}

/// Turns a Z sweep into occupied cells: every pixel with a non-zero red
/// channel marks `(column, row, slice index)`.
#[derive(Debug)]
pub struct BinvoxAccumulator<'a> {
    voxels: &'a mut VoxelSet,
    plane: Option<(u32, u32)>,
}

impl<'a> BinvoxAccumulator<'a> {
    pub fn new(voxels: &'a mut VoxelSet) -> Self {
        Self {
            voxels,
            plane: None,
        }
    }
}

impl SliceConsumer for BinvoxAccumulator<'_> {
    fn process(&mut self, slice: &SliceDescriptor, raster: &RgbaImage) -> anyhow::Result<()> {
        let found = raster.dimensions();
        match self.plane {
            None => {
                self.voxels.set_plane_dims(found.0 as usize, found.1 as usize);
                self.plane = Some(found);
            }
            Some(expected) if expected != found => {
                return Err(SliceError::RasterSizeMismatch { expected, found }.into());
            }
            Some(_) => {}
        }

        let depth = self.voxels.dims()[2];
        if slice.index >= depth {
            return Err(SliceError::Binvox(format!(
                "slice {} lies outside the {depth} slices of the volume",
                slice.index
            ))
            .into());
        }

        for (u, v, pixel) in raster.enumerate_pixels() {
            if pixel[0] > 0 {
                self.voxels.add(u as usize, v as usize, slice.index);
            }
        }
        Ok(())
    }
}

/// `<base>-matNN-<name>.binvox`, with spaces in the material name replaced by hyphens.
pub fn binvox_filename(base: &Path, material: &Material) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(format!(
        "-mat{:02}-{}.binvox",
        material.ordinal,
        material.sanitized_name()
    ));
    PathBuf::from(name)
}

/// A loaded model that can be swept slice by slice.
pub trait VolumeSlicer {
    fn num_materials(&self) -> usize;

    /// 1-based material lookup.
    fn material(&self, ordinal: usize) -> Option<Material>;

    fn bounding_box(&self) -> SliceResult<BoundingBox>;

    /// Voxel grid dimension along `axis`.
    fn num_slices(&self, axis: Axis) -> SliceResult<usize>;

    fn prepare_render(&mut self, axis: Axis) -> SliceResult<()>;

    fn render_slices(
        &mut self,
        axis: Axis,
        material: usize,
        consumer: &mut dyn SliceConsumer,
        order: Order,
    ) -> SliceResult<()>;
}

/// Slices every material along Z and writes one binvox file each.
///
/// Returns the written paths in material order. A failed sweep propagates
/// before its file is created; files of earlier materials remain.
pub fn slice_to_binvox<S>(base: impl AsRef<Path>, slicer: &mut S) -> SliceResult<Vec<PathBuf>>
where
    S: VolumeSlicer + ?Sized,
{
    let base = base.as_ref();
    let count = slicer.num_materials();
    let mut written = Vec::with_capacity(count);

    for ordinal in 1..=count {
        let material = slicer
            .material(ordinal)
            .ok_or(SliceError::MaterialOutOfRange { ordinal, count })?;
        let path = binvox_filename(base, &material);

        let bounds = slicer.bounding_box()?;
        let dims = [
            slicer.num_slices(Axis::X)?,
            slicer.num_slices(Axis::Y)?,
            slicer.num_slices(Axis::Z)?,
        ];
        let mut voxels = VoxelSet::new(dims, bounds.min(), bounds.extent(Axis::Z));

        slicer.prepare_render(Axis::Z)?;
        info!(material = %material.name, ordinal, "slicing material");
        let mut accumulator = BinvoxAccumulator::new(&mut voxels);
        slicer.render_slices(Axis::Z, ordinal, &mut accumulator, Order::MinToMax)?;

        info!(path = %path.display(), voxels = voxels.len(), "writing binvox");
        voxels.write(&path)?;
        written.push(path);
    }
    Ok(written)
}
