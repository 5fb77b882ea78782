//! Reader and encoder for `.vvd` vertex data files.
//!
//! The file holds one flat array of LOD 0 vertices. Lower LODs either use a
//! prefix of that array or, when a fixup table is present, the concatenation
//! of the fixup ranges whose `lod` is at least the requested LOD. A LOD's
//! vertex sequence is built on first access and cached for the lifetime of the
//! [`VertexFile`].

use std::sync::OnceLock;

use tracing::{debug, warn};
use winnow::Parser;
use winnow::binary::{le_f32, le_i32, le_u8, le_u32};

use crate::data::parser_utils::{
    FileView, TableView, Vector2, Vector3, Vector4, WResult, parse_byte_array, parse_f32_array,
    parse_i32_array, parse_vector3,
};
use crate::data::writer::ByteWriter;
use crate::error::{Error, ErrorKind, FileKind, IResult};
use crate::models::options::DecodeOptions;

/// "IDSV" as little-endian u32.
pub const VVD_MAGIC: u32 = 0x56534449;
pub const VVD_VERSION: i32 = 4;
pub const MAX_NUM_LODS: usize = 8;
pub const MAX_NUM_BONES_PER_VERT: usize = 3;

pub const VVD_HEADER_SIZE: usize = 64;
pub const FIXUP_SIZE: usize = 12;
pub const VERTEX_SIZE: usize = 48;
pub const TANGENT_SIZE: usize = 16;

/// `vertexFileHeader_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VertexFileHeader {
    pub id: u32,
    pub version: i32,
    pub checksum: i32,
    pub lod_count: i32,
    pub lod_vertex_counts: [i32; MAX_NUM_LODS],
    pub fixup_count: i32,
    pub fixup_table_start: i32,
    pub vertex_data_start: i32,
    /// Zero when the file carries no tangents.
    pub tangent_data_start: i32,
}

/// `vertexFileFixup_t`: `vertex_count` vertices starting at `source_vertex_id`
/// belong to every LOD up to and including `lod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Fixup {
    pub lod: i32,
    pub source_vertex_id: i32,
    pub vertex_count: i32,
}

/// `mstudioboneweight_t`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BoneWeights {
    pub weights: [f32; MAX_NUM_BONES_PER_VERT],
    pub bones: [u8; MAX_NUM_BONES_PER_VERT],
    pub bone_count: u8,
}

impl BoneWeights {
    /// `(bone, weight)` for each active influence.
    pub fn influences(&self) -> impl Iterator<Item = (u8, f32)> + '_ {
        let active = usize::from(self.bone_count).min(MAX_NUM_BONES_PER_VERT);
        self.bones[..active]
            .iter()
            .copied()
            .zip(self.weights[..active].iter().copied())
    }

    /// Active count in `1..=3` and active weights summing to 1 within `tolerance`.
    pub fn is_normalized(&self, tolerance: f32) -> bool {
        if !(1..=MAX_NUM_BONES_PER_VERT).contains(&usize::from(self.bone_count)) {
            return false;
        }
        let sum: f32 = self.influences().map(|(_, weight)| weight).sum();
        (sum - 1.0).abs() <= tolerance
    }
}

/// `mstudiovertex_t`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VertexRecord {
    pub bone_weights: BoneWeights,
    pub position: Vector3,
    pub normal: Vector3,
    pub tex_coord: Vector2,
}

fn parse_vvd_header(input: &mut &[u8]) -> WResult<VertexFileHeader> {
    Ok(VertexFileHeader {
        id: le_u32.parse_next(input)?,
        version: le_i32.parse_next(input)?,
        checksum: le_i32.parse_next(input)?,
        lod_count: le_i32.parse_next(input)?,
        lod_vertex_counts: parse_i32_array::<MAX_NUM_LODS>(input)?,
        fixup_count: le_i32.parse_next(input)?,
        fixup_table_start: le_i32.parse_next(input)?,
        vertex_data_start: le_i32.parse_next(input)?,
        tangent_data_start: le_i32.parse_next(input)?,
    })
}

fn parse_fixup(input: &mut &[u8]) -> WResult<Fixup> {
    Ok(Fixup {
        lod: le_i32.parse_next(input)?,
        source_vertex_id: le_i32.parse_next(input)?,
        vertex_count: le_i32.parse_next(input)?,
    })
}

fn parse_vertex(input: &mut &[u8]) -> WResult<VertexRecord> {
    Ok(VertexRecord {
        bone_weights: BoneWeights {
            weights: parse_f32_array::<MAX_NUM_BONES_PER_VERT>(input)?,
            bones: parse_byte_array::<MAX_NUM_BONES_PER_VERT>(input)?,
            bone_count: le_u8.parse_next(input)?,
        },
        position: parse_vector3(input)?,
        normal: parse_vector3(input)?,
        tex_coord: [le_f32.parse_next(input)?, le_f32.parse_next(input)?],
    })
}

/// One LOD's vertex sequence, materialized.
#[derive(Debug)]
struct LodVertices {
    /// `(source start, len)` runs in sequence order.
    runs: Vec<(usize, usize)>,
    /// `prefix[i]` is the sequence index of the first vertex of `runs[i]`.
    prefix: Vec<usize>,
    records: Vec<VertexRecord>,
}

impl LodVertices {
    fn source_index(&self, local: usize) -> Option<usize> {
        if local >= self.records.len() {
            return None;
        }
        let run = self.prefix.partition_point(|&start| start <= local) - 1;
        let (source, _) = self.runs[run];
        Some(source + (local - self.prefix[run]))
    }
}

/// A parsed `.vvd` file borrowing the caller's buffer.
#[derive(Debug)]
pub struct VertexFile<'a> {
    pub header: VertexFileHeader,
    pub fixups: Vec<Fixup>,
    file: FileView<'a>,
    vertices: TableView<'a>,
    tangents: Option<TableView<'a>>,
    weight_tolerance: f32,
    lods: [OnceLock<LodVertices>; MAX_NUM_LODS],
}

/// Parse a vertex file and check it belongs to the primary descriptor with `checksum`.
pub fn parse_vvd<'a>(
    data: &'a [u8],
    checksum: i32,
    options: &DecodeOptions,
) -> IResult<VertexFile<'a>> {
    let file = FileView::new(data, FileKind::Vertex);
    let id = file.parse_at("vertex header", 0, 4, le_u32)?;
    if id != VVD_MAGIC {
        return Err(Error::new(
            FileKind::Vertex,
            0,
            ErrorKind::MagicMismatch {
                expected: VVD_MAGIC,
                found: id,
            },
        ));
    }
    let header = file.parse_at("vertex header", 0, VVD_HEADER_SIZE, parse_vvd_header)?;
    if header.version != VVD_VERSION {
        return Err(Error::new(
            FileKind::Vertex,
            4,
            ErrorKind::UnsupportedVersion {
                found: header.version,
                min: VVD_VERSION,
                max: VVD_VERSION,
            },
        ));
    }
    if header.checksum != checksum {
        return Err(Error::new(
            FileKind::Vertex,
            8,
            ErrorKind::ChecksumMismatch {
                expected: checksum,
                found: header.checksum,
            },
        ));
    }
    let lod_count = usize::try_from(header.lod_count)
        .ok()
        .filter(|count| (1..=MAX_NUM_LODS).contains(count))
        .ok_or_else(|| {
            file.topology(12, format!("vertex file declares {} LODs", header.lod_count))
        })?;
    if let Some(lod) = header.lod_vertex_counts[..lod_count]
        .iter()
        .position(|count| *count < 0)
    {
        return Err(file.topology(16 + lod * 4, format!("LOD {lod} has a negative vertex count")));
    }

    let fixup_view = file.table(
        "fixups",
        0,
        header.fixup_table_start,
        header.fixup_count,
        FIXUP_SIZE,
    )?;
    let fixups = file.parse_records("fixups", &fixup_view, parse_fixup)?;
    let mut vertex_count = usize::try_from(header.lod_vertex_counts[0]).unwrap_or(0);
    for (i, fixup) in fixups.iter().enumerate() {
        let (Ok(start), Ok(len)) = (
            usize::try_from(fixup.source_vertex_id),
            usize::try_from(fixup.vertex_count),
        ) else {
            return Err(file.topology(
                fixup_view.record_base(i),
                format!("fixup {i} has a negative range"),
            ));
        };
        vertex_count = vertex_count.max(start.saturating_add(len));
    }
    if !fixups.is_empty() {
        for lod in 0..lod_count {
            let sum: i64 = fixups
                .iter()
                .filter(|fixup| usize::try_from(fixup.lod).is_ok_and(|l| l >= lod))
                .map(|fixup| i64::from(fixup.vertex_count))
                .sum();
            let declared = i64::from(header.lod_vertex_counts[lod]);
            if sum != declared {
                return Err(file.topology(
                    fixup_view.start(),
                    format!(
                        "fixups for LOD {lod} cover {sum} vertices, header declares {declared}"
                    ),
                ));
            }
        }
    } else if let Some(lod) = (1..lod_count)
        .find(|&lod| usize::try_from(header.lod_vertex_counts[lod]).unwrap_or(0) > vertex_count)
    {
        return Err(file.topology(
            16 + lod * 4,
            format!("LOD {lod} has more vertices than LOD 0"),
        ));
    }

    let table_count = i32::try_from(vertex_count)
        .map_err(|_| file.out_of_bounds("vertices", 0, usize::MAX))?;
    let vertices = file.table(
        "vertices",
        0,
        header.vertex_data_start,
        table_count,
        VERTEX_SIZE,
    )?;
    let tangents = if header.tangent_data_start != 0 {
        Some(file.table(
            "tangents",
            0,
            header.tangent_data_start,
            table_count,
            TANGENT_SIZE,
        )?)
    } else {
        None
    };

    if options.strict_weights {
        for (base, bytes) in vertices.records() {
            let vertex = parse_vertex(&mut &bytes[..])
                .map_err(|_| file.out_of_bounds("vertices", base, base + VERTEX_SIZE))?;
            if !vertex.bone_weights.is_normalized(options.weight_tolerance) {
                return Err(file.topology(
                    base,
                    format!(
                        "vertex has {} bones with weights {:?}",
                        vertex.bone_weights.bone_count, vertex.bone_weights.weights
                    ),
                ));
            }
        }
    }

    debug!(
        checksum = header.checksum,
        lods = lod_count,
        fixups = fixups.len(),
        vertices = vertex_count,
        tangents = tangents.is_some(),
        "accepted vertex file"
    );
    Ok(VertexFile {
        header,
        fixups,
        file,
        vertices,
        tangents,
        weight_tolerance: options.weight_tolerance,
        lods: std::array::from_fn(|_| OnceLock::new()),
    })
}

impl<'a> VertexFile<'a> {
    pub fn lod_count(&self) -> usize {
        usize::try_from(self.header.lod_count).unwrap_or(0)
    }

    /// Number of vertices stored in the file, which every LOD draws from.
    pub fn raw_vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Decode the stored vertex at `index`, ignoring LOD layout.
    pub fn raw_vertex(&self, index: usize) -> Option<VertexRecord> {
        if index >= self.vertices.len() {
            return None;
        }
        let start = self.vertices.record_base(index);
        let bytes = self.file.data().get(start..start + VERTEX_SIZE)?;
        parse_vertex(&mut &bytes[..]).ok()
    }

    pub fn has_tangents(&self) -> bool {
        self.tangents.is_some()
    }

    /// Tangent of the stored vertex at `index`.
    pub fn tangent(&self, index: usize) -> Option<Vector4> {
        let tangents = self.tangents.as_ref()?;
        if index >= tangents.len() {
            return None;
        }
        let start = tangents.record_base(index);
        let bytes = self.file.data().get(start..start + TANGENT_SIZE)?;
        parse_f32_array::<4>(&mut &bytes[..]).ok()
    }

    fn check_lod(&self, lod: usize) -> IResult<()> {
        if lod >= self.lod_count() {
            return Err(self.file.topology(
                12,
                format!("LOD {lod} requested, file has {}", self.lod_count()),
            ));
        }
        Ok(())
    }

    fn build_lod(&self, lod: usize) -> IResult<LodVertices> {
        let runs: Vec<(usize, usize)> = if self.fixups.is_empty() {
            let len = usize::try_from(self.header.lod_vertex_counts[lod]).unwrap_or(0);
            vec![(0, len)]
        } else {
            self.fixups
                .iter()
                .filter(|fixup| usize::try_from(fixup.lod).is_ok_and(|l| l >= lod))
                .map(|fixup| {
                    (
                        usize::try_from(fixup.source_vertex_id).unwrap_or(0),
                        usize::try_from(fixup.vertex_count).unwrap_or(0),
                    )
                })
                .collect()
        };

        let mut prefix = Vec::with_capacity(runs.len());
        let mut records = Vec::new();
        for &(start, len) in &runs {
            prefix.push(records.len());
            for index in start..start + len {
                let base = self.vertices.record_base(index);
                let vertex = self
                    .raw_vertex(index)
                    .ok_or_else(|| self.file.out_of_bounds("vertices", base, base + VERTEX_SIZE))?;
                records.push(vertex);
            }
        }

        let unnormalized = records
            .iter()
            .filter(|v| !v.bone_weights.is_normalized(self.weight_tolerance))
            .count();
        if unnormalized > 0 {
            warn!(lod, unnormalized, "vertices with bone weights outside tolerance");
        }
        debug!(lod, runs = runs.len(), vertices = records.len(), "built LOD vertex layout");
        Ok(LodVertices {
            runs,
            prefix,
            records,
        })
    }

    fn lod(&self, lod: usize) -> IResult<&LodVertices> {
        self.check_lod(lod)?;
        if let Some(built) = self.lods[lod].get() {
            return Ok(built);
        }
        let built = self.build_lod(lod)?;
        Ok(self.lods[lod].get_or_init(|| built))
    }

    /// Length of `lod`'s vertex sequence, without materializing it.
    pub fn lod_len(&self, lod: usize) -> IResult<usize> {
        self.check_lod(lod)?;
        Ok(usize::try_from(self.header.lod_vertex_counts[lod]).unwrap_or(0))
    }

    /// The full vertex sequence for `lod`, in the order meshes index it.
    pub fn lod_vertices(&self, lod: usize) -> IResult<&[VertexRecord]> {
        Ok(self.lod(lod)?.records.as_slice())
    }

    /// `len` vertices of `lod` starting at sequence index `start`.
    pub fn vertex_slice(&self, lod: usize, start: usize, len: usize) -> IResult<&[VertexRecord]> {
        let records = &self.lod(lod)?.records;
        start
            .checked_add(len)
            .and_then(|end| records.get(start..end))
            .ok_or_else(|| {
                self.file.topology(
                    self.vertices.start(),
                    format!(
                        "vertex range {start}+{len} outside LOD {lod} ({} vertices)",
                        records.len()
                    ),
                )
            })
    }

    /// Map a sequence index of `lod` back to the stored vertex it came from.
    pub fn source_index(&self, lod: usize, local: usize) -> IResult<Option<usize>> {
        Ok(self.lod(lod)?.source_index(local))
    }
}

fn write_vertex(w: &mut ByteWriter, at: usize, vertex: &VertexRecord) {
    w.record(at)
        .f32s(&vertex.bone_weights.weights)
        .bytes(&vertex.bone_weights.bones)
        .u8(vertex.bone_weights.bone_count)
        .f32s(&vertex.position)
        .f32s(&vertex.normal)
        .f32s(&vertex.tex_coord);
}

/// Re-encode a vertex file from its decoded records.
pub fn encode_vvd(vvd: &VertexFile<'_>) -> IResult<Vec<u8>> {
    let header = &vvd.header;
    let mut w = ByteWriter::with_len(FileKind::Vertex, VVD_HEADER_SIZE);
    w.record(0)
        .u32(header.id)
        .i32(header.version)
        .i32(header.checksum)
        .i32(header.lod_count)
        .i32s(&header.lod_vertex_counts)
        .i32(header.fixup_count)
        .i32(header.fixup_table_start)
        .i32(header.vertex_data_start)
        .i32(header.tangent_data_start);

    if !vvd.fixups.is_empty() {
        let start = w.resolve("fixups", 0, header.fixup_table_start)?;
        for (i, fixup) in vvd.fixups.iter().enumerate() {
            w.record(start + i * FIXUP_SIZE)
                .i32(fixup.lod)
                .i32(fixup.source_vertex_id)
                .i32(fixup.vertex_count);
        }
    }

    if vvd.raw_vertex_count() > 0 {
        let start = w.resolve("vertices", 0, header.vertex_data_start)?;
        for index in 0..vvd.raw_vertex_count() {
            let at = start + index * VERTEX_SIZE;
            let vertex = vvd
                .raw_vertex(index)
                .ok_or_else(|| vvd.file.out_of_bounds("vertices", at, at + VERTEX_SIZE))?;
            write_vertex(&mut w, at, &vertex);
        }
        if vvd.has_tangents() {
            let start = w.resolve("tangents", 0, header.tangent_data_start)?;
            for index in 0..vvd.raw_vertex_count() {
                let at = start + index * TANGENT_SIZE;
                let tangent = vvd
                    .tangent(index)
                    .ok_or_else(|| vvd.file.out_of_bounds("tangents", at, at + TANGENT_SIZE))?;
                w.record(at).f32s(&tangent);
            }
        }
    }
    Ok(w.into_inner())
}
