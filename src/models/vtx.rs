//! Reader and encoder for the optimized `.vtx` mesh-strip files.
//!
//! Layout is a tree of `(count, offset)` tables: body part, model, LOD, mesh,
//! strip group, strip. Every offset is relative to the record holding it.

use itertools::Itertools;
use tracing::debug;
use variantly::Variantly;
use winnow::Parser;
use winnow::binary::{le_f32, le_i16, le_i32, le_u8, le_u16};

use crate::data::parser_utils::{FileView, TableRef, WResult, parse_byte_array, parse_table_ref};
use crate::data::writer::ByteWriter;
use crate::error::{Error, ErrorKind, FileKind, IResult};

pub const VTX_VERSION: i32 = 7;

pub const VTX_HEADER_SIZE: usize = 36;
pub const VTX_BODY_PART_SIZE: usize = 8;
pub const VTX_MODEL_SIZE: usize = 8;
pub const VTX_LOD_SIZE: usize = 12;
pub const VTX_MESH_SIZE: usize = 9;
pub const STRIP_GROUP_SIZE: usize = 25;
pub const STRIP_SIZE: usize = 27;
pub const HARDWARE_VERTEX_SIZE: usize = 9;
pub const BONE_STATE_CHANGE_SIZE: usize = 8;
pub const MATERIAL_REPLACEMENT_LIST_SIZE: usize = 8;
pub const MATERIAL_REPLACEMENT_SIZE: usize = 6;

pub const STRIP_IS_TRILIST: u8 = 0x01;
pub const STRIP_IS_TRISTRIP: u8 = 0x02;

/// `FileHeader_t` of the optimized model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StripFileHeader {
    pub version: i32,
    pub vertex_cache_size: i32,
    pub max_bones_per_strip: u16,
    pub max_bones_per_triangle: u16,
    pub max_bones_per_vertex: i32,
    pub checksum: i32,
    pub lod_count: i32,
    /// File-relative; one list per LOD.
    pub material_replacement_list_offset: i32,
    pub body_parts: TableRef,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StripFile {
    pub header: StripFileHeader,
    pub body_parts: Vec<StripBodyPart>,
    pub material_replacements: Vec<MaterialReplacementList>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StripBodyPart {
    pub model_table: TableRef,
    pub models: Vec<StripModel>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StripModel {
    pub lod_table: TableRef,
    pub lods: Vec<StripLod>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StripLod {
    pub mesh_table: TableRef,
    /// Distance metric at which this LOD takes over.
    pub switch_point: f32,
    pub meshes: Vec<StripMesh>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StripMesh {
    pub strip_group_table: TableRef,
    pub flags: u8,
    pub strip_groups: Vec<StripGroup>,
}

/// A batch of hardware vertices and indices sharing one set of render flags.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StripGroup {
    pub vertex_table: TableRef,
    pub index_table: TableRef,
    pub strip_table: TableRef,
    pub flags: u8,
    pub vertices: Vec<HardwareVertex>,
    pub indices: Vec<u16>,
    pub strips: Vec<Strip>,
}

/// `Vertex_t`: a render vertex pointing back at a mesh-local source vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HardwareVertex {
    /// Indices into the source vertex's bone weights.
    pub bone_weight_index: [u8; 3],
    pub bone_count: u8,
    pub orig_mesh_vertex_id: u16,
    pub bone_ids: [i8; 3],
}

/// Triangle layout of a strip's index range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Variantly)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum StripTopology {
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Strip {
    /// Element range within the owning group's index array.
    pub index_range: TableRef,
    /// Element range within the owning group's vertex array.
    pub vertex_range: TableRef,
    pub bone_count: i16,
    pub flags: u8,
    pub bone_state_change_table: TableRef,
    pub bone_state_changes: Vec<BoneStateChange>,
}

/// Maps a hardware bone slot to a bone table index for the duration of a strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BoneStateChange {
    pub hardware_id: i32,
    pub new_bone_id: i32,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MaterialReplacementList {
    pub replacement_table: TableRef,
    pub replacements: Vec<MaterialReplacement>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MaterialReplacement {
    pub material_id: i16,
    pub name: String,
    pub name_offset: i32,
}

impl Strip {
    pub fn topology(&self) -> StripTopology {
        if self.flags & STRIP_IS_TRISTRIP != 0 {
            StripTopology::TriangleStrip
        } else {
            StripTopology::TriangleList
        }
    }

    fn index_span(&self) -> std::ops::Range<usize> {
        let start = usize::try_from(self.index_range.offset).unwrap_or(0);
        start..start + self.index_range.len()
    }
}

impl StripGroup {
    /// Triangles as group-local vertex indices, strips expanded with alternating winding.
    pub fn index_triangles(&self) -> Vec<[u16; 3]> {
        let mut triangles = Vec::new();
        if self.strips.is_empty() {
            triangles.extend(self.indices.iter().copied().tuples().map(|(a, b, c)| [a, b, c]));
            return triangles;
        }
        for strip in &self.strips {
            let Some(indices) = self.indices.get(strip.index_span()) else {
                continue;
            };
            match strip.topology() {
                StripTopology::TriangleList => {
                    triangles.extend(indices.iter().copied().tuples().map(|(a, b, c)| [a, b, c]));
                }
                StripTopology::TriangleStrip => {
                    triangles.extend(
                        indices
                            .iter()
                            .copied()
                            .tuple_windows()
                            .enumerate()
                            .filter(|(_, (a, b, c))| a != b && b != c && a != c)
                            .map(|(i, (a, b, c))| if i % 2 == 0 { [a, b, c] } else { [b, a, c] }),
                    );
                }
            }
        }
        triangles
    }

    /// Triangles as mesh-local source vertex ids.
    pub fn triangles(&self) -> Vec<[u16; 3]> {
        self.index_triangles()
            .into_iter()
            .filter_map(|tri| {
                let id = |i: u16| {
                    self.vertices
                        .get(usize::from(i))
                        .map(|v| v.orig_mesh_vertex_id)
                };
                Some([id(tri[0])?, id(tri[1])?, id(tri[2])?])
            })
            .collect()
    }
}

impl StripFile {
    pub fn lod_count(&self) -> usize {
        usize::try_from(self.header.lod_count).unwrap_or(0)
    }
}

fn parse_strip_header(input: &mut &[u8]) -> WResult<StripFileHeader> {
    Ok(StripFileHeader {
        version: le_i32.parse_next(input)?,
        vertex_cache_size: le_i32.parse_next(input)?,
        max_bones_per_strip: le_u16.parse_next(input)?,
        max_bones_per_triangle: le_u16.parse_next(input)?,
        max_bones_per_vertex: le_i32.parse_next(input)?,
        checksum: le_i32.parse_next(input)?,
        lod_count: le_i32.parse_next(input)?,
        material_replacement_list_offset: le_i32.parse_next(input)?,
        body_parts: parse_table_ref(input)?,
    })
}

fn parse_lod(input: &mut &[u8]) -> WResult<StripLod> {
    Ok(StripLod {
        mesh_table: parse_table_ref(input)?,
        switch_point: le_f32.parse_next(input)?,
        meshes: Vec::new(),
    })
}

fn parse_mesh(input: &mut &[u8]) -> WResult<StripMesh> {
    Ok(StripMesh {
        strip_group_table: parse_table_ref(input)?,
        flags: le_u8.parse_next(input)?,
        strip_groups: Vec::new(),
    })
}

fn parse_strip_group(input: &mut &[u8]) -> WResult<StripGroup> {
    Ok(StripGroup {
        vertex_table: parse_table_ref(input)?,
        index_table: parse_table_ref(input)?,
        strip_table: parse_table_ref(input)?,
        flags: le_u8.parse_next(input)?,
        vertices: Vec::new(),
        indices: Vec::new(),
        strips: Vec::new(),
    })
}

fn parse_strip(input: &mut &[u8]) -> WResult<Strip> {
    Ok(Strip {
        index_range: parse_table_ref(input)?,
        vertex_range: parse_table_ref(input)?,
        bone_count: le_i16.parse_next(input)?,
        flags: le_u8.parse_next(input)?,
        bone_state_change_table: parse_table_ref(input)?,
        bone_state_changes: Vec::new(),
    })
}

fn parse_hardware_vertex(input: &mut &[u8]) -> WResult<HardwareVertex> {
    Ok(HardwareVertex {
        bone_weight_index: parse_byte_array::<3>(input)?,
        bone_count: le_u8.parse_next(input)?,
        orig_mesh_vertex_id: le_u16.parse_next(input)?,
        bone_ids: parse_byte_array::<3>(input)?.map(|b| b as i8),
    })
}

fn parse_bone_state_change(input: &mut &[u8]) -> WResult<BoneStateChange> {
    Ok(BoneStateChange {
        hardware_id: le_i32.parse_next(input)?,
        new_bone_id: le_i32.parse_next(input)?,
    })
}

/// `offset + count` fits inside `0..len`.
fn range_within(range: TableRef, len: usize) -> bool {
    match (usize::try_from(range.offset), usize::try_from(range.count)) {
        (Ok(offset), Ok(count)) => offset.checked_add(count).is_some_and(|end| end <= len),
        _ => false,
    }
}

fn parse_group_contents(
    file: &FileView<'_>,
    base: usize,
    mut group: StripGroup,
) -> IResult<StripGroup> {
    let vertices = file.table_ref(
        "hardware vertices",
        base,
        group.vertex_table,
        HARDWARE_VERTEX_SIZE,
    )?;
    group.vertices = file.parse_records("hardware vertices", &vertices, parse_hardware_vertex)?;
    let indices = file.table_ref("indices", base, group.index_table, 2)?;
    group.indices = file.parse_records("indices", &indices, le_u16)?;
    if let Some(pos) = group
        .indices
        .iter()
        .position(|&index| usize::from(index) >= group.vertices.len())
    {
        return Err(file.topology(
            indices.record_base(pos),
            format!(
                "index {} past the strip group's {} vertices",
                group.indices[pos],
                group.vertices.len()
            ),
        ));
    }

    let strips = file.table_ref("strips", base, group.strip_table, STRIP_SIZE)?;
    let (index_len, vertex_len) = (group.indices.len(), group.vertices.len());
    group.strips = file.parse_table("strips", &strips, parse_strip, |strip_base, mut strip| {
        if !range_within(strip.index_range, index_len)
            || !range_within(strip.vertex_range, vertex_len)
        {
            return Err(file.topology(
                strip_base,
                format!(
                    "strip ranges {:?}/{:?} exceed group of {index_len} indices, \
                     {vertex_len} vertices",
                    strip.index_range, strip.vertex_range
                ),
            ));
        }
        let changes = file.table_ref(
            "bone state changes",
            strip_base,
            strip.bone_state_change_table,
            BONE_STATE_CHANGE_SIZE,
        )?;
        strip.bone_state_changes =
            file.parse_records("bone state changes", &changes, parse_bone_state_change)?;
        Ok(strip)
    })?;
    Ok(group)
}

fn parse_meshes(file: &FileView<'_>, lod_base: usize, table: TableRef) -> IResult<Vec<StripMesh>> {
    let meshes = file.table_ref("strip meshes", lod_base, table, VTX_MESH_SIZE)?;
    file.parse_table("strip meshes", &meshes, parse_mesh, |mesh_base, mut mesh| {
        let groups = file.table_ref(
            "strip groups",
            mesh_base,
            mesh.strip_group_table,
            STRIP_GROUP_SIZE,
        )?;
        mesh.strip_groups =
            file.parse_table("strip groups", &groups, parse_strip_group, |group_base, group| {
                parse_group_contents(file, group_base, group)
            })?;
        Ok(mesh)
    })
}

fn parse_models(
    file: &FileView<'_>,
    part_base: usize,
    table: TableRef,
) -> IResult<Vec<StripModel>> {
    let models = file.table_ref("strip models", part_base, table, VTX_MODEL_SIZE)?;
    file.parse_table("strip models", &models, parse_table_ref, |model_base, lod_table| {
        let lods = file.table_ref("strip LODs", model_base, lod_table, VTX_LOD_SIZE)?;
        let lods = file.parse_table("strip LODs", &lods, parse_lod, |lod_base, mut lod| {
            lod.meshes = parse_meshes(file, lod_base, lod.mesh_table)?;
            Ok(lod)
        })?;
        Ok(StripModel { lod_table, lods })
    })
}

fn parse_body_parts(file: &FileView<'_>, table: TableRef) -> IResult<Vec<StripBodyPart>> {
    let parts = file.table_ref("strip body parts", 0, table, VTX_BODY_PART_SIZE)?;
    file.parse_table("strip body parts", &parts, parse_table_ref, |part_base, model_table| {
        Ok(StripBodyPart {
            model_table,
            models: parse_models(file, part_base, model_table)?,
        })
    })
}

fn parse_material_replacements(
    file: &FileView<'_>,
    header: &StripFileHeader,
) -> IResult<Vec<MaterialReplacementList>> {
    if header.material_replacement_list_offset == 0 {
        return Ok(Vec::new());
    }
    let lists = file.table(
        "material replacement lists",
        0,
        header.material_replacement_list_offset,
        header.lod_count,
        MATERIAL_REPLACEMENT_LIST_SIZE,
    )?;
    file.parse_table(
        "material replacement lists",
        &lists,
        parse_table_ref,
        |list_base, replacement_table| {
            let entries = file.table_ref(
                "material replacements",
                list_base,
                replacement_table,
                MATERIAL_REPLACEMENT_SIZE,
            )?;
            let replacements = file.parse_table(
                "material replacements",
                &entries,
                |input: &mut &[u8]| Ok((le_i16.parse_next(input)?, le_i32.parse_next(input)?)),
                |base, (material_id, name_offset)| {
                    Ok(MaterialReplacement {
                        material_id,
                        name: file.name_at("material replacement name", base, name_offset)?,
                        name_offset,
                    })
                },
            )?;
            Ok(MaterialReplacementList {
                replacement_table,
                replacements,
            })
        },
    )
}

/// Parse a strip file and check it belongs to the primary descriptor with `checksum`.
///
/// Every model must carry the header's LOD count.
pub fn parse_vtx(data: &[u8], checksum: i32) -> IResult<StripFile> {
    let file = FileView::new(data, FileKind::Strip);
    let version = file.parse_at("strip header", 0, 4, le_i32)?;
    if version != VTX_VERSION {
        return Err(Error::new(
            FileKind::Strip,
            0,
            ErrorKind::UnsupportedVersion {
                found: version,
                min: VTX_VERSION,
                max: VTX_VERSION,
            },
        ));
    }
    let header = file.parse_at("strip header", 0, VTX_HEADER_SIZE, parse_strip_header)?;
    if header.checksum != checksum {
        return Err(Error::new(
            FileKind::Strip,
            16,
            ErrorKind::ChecksumMismatch {
                expected: checksum,
                found: header.checksum,
            },
        ));
    }

    let body_parts = parse_body_parts(&file, header.body_parts)?;
    for (p, part) in body_parts.iter().enumerate() {
        for (m, model) in part.models.iter().enumerate() {
            if model.lods.len() != usize::try_from(header.lod_count).unwrap_or(0) {
                return Err(file.topology(
                    20,
                    format!(
                        "body part {p} model {m} has {} LODs, header declares {}",
                        model.lods.len(),
                        header.lod_count
                    ),
                ));
            }
        }
    }
    let material_replacements = parse_material_replacements(&file, &header)?;

    debug!(
        checksum = header.checksum,
        lods = header.lod_count,
        body_parts = body_parts.len(),
        "accepted strip file"
    );
    Ok(StripFile {
        header,
        body_parts,
        material_replacements,
    })
}

fn write_group(w: &mut ByteWriter, base: usize, group: &StripGroup) -> IResult<()> {
    w.record(base)
        .table_ref(group.vertex_table)
        .table_ref(group.index_table)
        .table_ref(group.strip_table)
        .u8(group.flags);
    for (i, v) in group.vertices.iter().enumerate() {
        let at = w.table_slot(
            "hardware vertices",
            base,
            group.vertex_table,
            HARDWARE_VERTEX_SIZE,
            i,
        )?;
        w.record(at)
            .bytes(&v.bone_weight_index)
            .u8(v.bone_count)
            .u16(v.orig_mesh_vertex_id)
            .bytes(&v.bone_ids.map(|b| b as u8));
    }
    if !group.indices.is_empty() {
        let at = w.resolve("indices", base, group.index_table.offset)?;
        let mut rec = w.record(at);
        for index in &group.indices {
            rec.u16(*index);
        }
    }
    for (i, strip) in group.strips.iter().enumerate() {
        let strip_base = w.table_slot("strips", base, group.strip_table, STRIP_SIZE, i)?;
        w.record(strip_base)
            .table_ref(strip.index_range)
            .table_ref(strip.vertex_range)
            .i16(strip.bone_count)
            .u8(strip.flags)
            .table_ref(strip.bone_state_change_table);
        for (j, change) in strip.bone_state_changes.iter().enumerate() {
            let at = w.table_slot(
                "bone state changes",
                strip_base,
                strip.bone_state_change_table,
                BONE_STATE_CHANGE_SIZE,
                j,
            )?;
            w.record(at).i32(change.hardware_id).i32(change.new_bone_id);
        }
    }
    Ok(())
}

fn write_model(w: &mut ByteWriter, model_base: usize, model: &StripModel) -> IResult<()> {
    w.record(model_base).table_ref(model.lod_table);
    for (l, lod) in model.lods.iter().enumerate() {
        let lod_base = w.table_slot("strip LODs", model_base, model.lod_table, VTX_LOD_SIZE, l)?;
        w.record(lod_base)
            .table_ref(lod.mesh_table)
            .f32(lod.switch_point);
        for (k, mesh) in lod.meshes.iter().enumerate() {
            let mesh_base =
                w.table_slot("strip meshes", lod_base, lod.mesh_table, VTX_MESH_SIZE, k)?;
            w.record(mesh_base)
                .table_ref(mesh.strip_group_table)
                .u8(mesh.flags);
            for (g, group) in mesh.strip_groups.iter().enumerate() {
                let group_base = w.table_slot(
                    "strip groups",
                    mesh_base,
                    mesh.strip_group_table,
                    STRIP_GROUP_SIZE,
                    g,
                )?;
                write_group(w, group_base, group)?;
            }
        }
    }
    Ok(())
}

fn write_material_replacements(
    w: &mut ByteWriter,
    offset: i32,
    lists: &[MaterialReplacementList],
) -> IResult<()> {
    if lists.is_empty() {
        return Ok(());
    }
    let lists_base = w.resolve("material replacement lists", 0, offset)?;
    for (i, list) in lists.iter().enumerate() {
        let list_base = lists_base + i * MATERIAL_REPLACEMENT_LIST_SIZE;
        w.record(list_base).table_ref(list.replacement_table);
        for (j, replacement) in list.replacements.iter().enumerate() {
            let at = w.table_slot(
                "material replacements",
                list_base,
                list.replacement_table,
                MATERIAL_REPLACEMENT_SIZE,
                j,
            )?;
            w.record(at)
                .i16(replacement.material_id)
                .i32(replacement.name_offset);
            w.put_name(
                "material replacement name",
                at,
                replacement.name_offset,
                &replacement.name,
            )?;
        }
    }
    Ok(())
}

/// Re-encode a strip file at the positions its offsets designate.
pub fn encode_vtx(vtx: &StripFile) -> IResult<Vec<u8>> {
    let header = &vtx.header;
    let mut w = ByteWriter::with_len(FileKind::Strip, VTX_HEADER_SIZE);
    w.record(0)
        .i32(header.version)
        .i32(header.vertex_cache_size)
        .u16(header.max_bones_per_strip)
        .u16(header.max_bones_per_triangle)
        .i32(header.max_bones_per_vertex)
        .i32(header.checksum)
        .i32(header.lod_count)
        .i32(header.material_replacement_list_offset)
        .table_ref(header.body_parts);

    for (p, part) in vtx.body_parts.iter().enumerate() {
        let part_base =
            w.table_slot("strip body parts", 0, header.body_parts, VTX_BODY_PART_SIZE, p)?;
        w.record(part_base).table_ref(part.model_table);
        for (m, model) in part.models.iter().enumerate() {
            let model_base =
                w.table_slot("strip models", part_base, part.model_table, VTX_MODEL_SIZE, m)?;
            write_model(&mut w, model_base, model)?;
        }
    }
    write_material_replacements(
        &mut w,
        header.material_replacement_list_offset,
        &vtx.material_replacements,
    )?;
    Ok(w.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::VtxBuilder;
    use pretty_assertions::assert_eq;

    #[test]
    fn nested_tables_and_orig_ids() {
        let bytes = VtxBuilder::new(0x1234).mesh(&[0, 1, 2]).build();
        let vtx = parse_vtx(&bytes, 0x1234).unwrap();
        let mesh = &vtx.body_parts[0].models[0].lods[0].meshes[0];
        let group = &mesh.strip_groups[0];
        let ids: Vec<u16> = group.vertices.iter().map(|v| v.orig_mesh_vertex_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(group.strips[0].topology(), StripTopology::TriangleList);
        assert_eq!(group.strips[0].bone_state_changes.len(), 1);
        assert_eq!(group.triangles(), vec![[0, 1, 2]]);
        assert_eq!(vtx.material_replacements.len(), 1);
        assert_eq!(vtx.material_replacements[0].replacements[0].name, "alt_skin");
    }

    #[test]
    fn checksum_and_version() {
        let bytes = VtxBuilder::new(5).mesh(&[0, 1, 2]).build();
        let err = parse_vtx(&bytes, 4).unwrap_err();
        assert!(err.kind.is_checksum_mismatch());
        assert_eq!((err.file, err.offset), (FileKind::Strip, 16));

        let mut bad = bytes.clone();
        bad[0] = 6;
        assert!(parse_vtx(&bad, 5).unwrap_err().kind.is_magic_mismatch());
    }

    #[test]
    fn strip_winding_alternates() {
        let group = StripGroup {
            vertex_table: TableRef::default(),
            index_table: TableRef::default(),
            strip_table: TableRef::default(),
            flags: 0,
            vertices: (0..4)
                .map(|i| HardwareVertex {
                    bone_weight_index: [0, 1, 2],
                    bone_count: 1,
                    orig_mesh_vertex_id: 10 + i,
                    bone_ids: [0, -1, -1],
                })
                .collect(),
            indices: vec![0, 1, 2, 3],
            strips: vec![Strip {
                index_range: TableRef {
                    count: 4,
                    offset: 0,
                },
                vertex_range: TableRef {
                    count: 4,
                    offset: 0,
                },
                bone_count: 1,
                flags: STRIP_IS_TRISTRIP,
                bone_state_change_table: TableRef::default(),
                bone_state_changes: Vec::new(),
            }],
        };
        assert!(group.strips[0].topology().is_triangle_strip());
        assert_eq!(group.index_triangles(), vec![[0, 1, 2], [2, 1, 3]]);
        assert_eq!(group.triangles(), vec![[10, 11, 12], [12, 11, 13]]);
    }

    #[test]
    fn index_past_group_vertices() {
        let mut bytes = VtxBuilder::new(1).mesh(&[0, 1, 2]).build();
        let vtx = parse_vtx(&bytes, 1).unwrap();
        let first_index = VtxBuilder::first_index_offset(&vtx);
        bytes[first_index..first_index + 2].copy_from_slice(&9u16.to_le_bytes());
        let err = parse_vtx(&bytes, 1).unwrap_err();
        assert!(err.kind.is_topology_mismatch());
        assert_eq!(err.offset, first_index);
    }

    #[test]
    fn strip_overrunning_group_is_rejected() {
        let mut bytes = VtxBuilder::new(1).mesh(&[0, 1, 2]).build();
        let vtx = parse_vtx(&bytes, 1).unwrap();
        // the strip record follows the group's three indices
        let strip = VtxBuilder::first_index_offset(&vtx) + 3 * 2;
        bytes[strip..strip + 4].copy_from_slice(&4i32.to_le_bytes());
        let err = parse_vtx(&bytes, 1).unwrap_err();
        assert!(err.kind.is_topology_mismatch());
        assert_eq!((err.file, err.offset), (FileKind::Strip, strip));
    }

    #[test]
    fn model_lod_count_must_match_header() {
        let mut bytes = VtxBuilder::new(1).mesh(&[0, 1, 2]).build();
        bytes[20..24].copy_from_slice(&2i32.to_le_bytes());
        let err = parse_vtx(&bytes, 1).unwrap_err();
        assert!(err.kind.is_topology_mismatch());
        assert_eq!((err.file, err.offset), (FileKind::Strip, 20));
    }

    #[test]
    fn truncated_body_part_table() {
        let bytes = VtxBuilder::new(1).mesh(&[0, 1, 2]).build();
        let err = parse_vtx(&bytes[..40], 1).unwrap_err();
        assert!(err.kind.is_out_of_bounds());
        assert_eq!((err.file, err.offset), (FileKind::Strip, 0x24));
    }

    #[test]
    fn round_trip() {
        let bytes = VtxBuilder::new(3).mesh(&[2, 0, 1]).mesh(&[0, 1, 2, 3]).build();
        let vtx = parse_vtx(&bytes, 3).unwrap();
        assert_eq!(encode_vtx(&vtx).unwrap(), bytes);
    }
}
