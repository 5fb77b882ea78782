//! Body parts, their alternative models, and the meshes those models own.

use tracing::warn;
use winnow::Parser;
use winnow::binary::{le_f32, le_i32};

use crate::data::parser_utils::{
    FileView, TableRef, Vector3, WResult, fixed_name, parse_byte_array, parse_i32_array,
    parse_table_ref, parse_vector3,
};
use crate::data::writer::ByteWriter;
use crate::error::IResult;
use crate::models::vvd::{MAX_NUM_LODS, VERTEX_SIZE};

pub const BODY_PART_SIZE: usize = 16;
pub const MODEL_SIZE: usize = 148;
pub const MESH_SIZE: usize = 116;

/// `mstudiobodyparts_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BodyPart {
    pub name: String,
    pub name_offset: i32,
    /// Stride of this part in the combined body-group index.
    pub base: i32,
    /// Relative to this body part.
    pub model_table: TableRef,
    pub models: Vec<StudioModel>,
}

/// `mstudiomodel_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StudioModel {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub raw_name: [u8; 64],
    pub kind: i32,
    pub bounding_radius: f32,
    /// Relative to this model.
    pub mesh_table: TableRef,
    pub meshes: Vec<StudioMesh>,
    pub vertex_count: i32,
    /// Byte offset of this model's first vertex within the LOD 0 vertex array.
    pub vertex_index: i32,
    pub tangents_index: i32,
    pub attachments: TableRef,
    pub eyeballs: TableRef,
    pub vertex_data: [i32; 2],
    pub unused: [i32; 8],
}

impl StudioModel {
    /// Index of this model's first LOD 0 vertex, if `vertex_index` lands on a record boundary.
    pub fn first_vertex(&self) -> Option<usize> {
        let index = usize::try_from(self.vertex_index).ok()?;
        (index % VERTEX_SIZE == 0).then_some(index / VERTEX_SIZE)
    }
}

/// `mstudiomesh_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StudioMesh {
    pub material: i32,
    /// Negative offset back to the owning model.
    pub model_index: i32,
    pub vertex_count: i32,
    /// First vertex, relative to the owning model's first vertex.
    pub vertex_offset: i32,
    pub flexes: TableRef,
    pub material_type: i32,
    pub material_param: i32,
    pub mesh_id: i32,
    pub center: Vector3,
    pub model_vertex_data: i32,
    pub lod_vertex_counts: [i32; MAX_NUM_LODS],
    pub unused: [i32; 8],
}

impl StudioMesh {
    pub fn lod_vertex_count(&self, lod: usize) -> usize {
        self.lod_vertex_counts
            .get(lod)
            .and_then(|count| usize::try_from(*count).ok())
            .unwrap_or(0)
    }
}

fn parse_body_part(input: &mut &[u8]) -> WResult<BodyPart> {
    let name_offset = le_i32.parse_next(input)?;
    let count = le_i32.parse_next(input)?;
    let base = le_i32.parse_next(input)?;
    let offset = le_i32.parse_next(input)?;
    Ok(BodyPart {
        name: String::new(),
        name_offset,
        base,
        model_table: TableRef { count, offset },
        models: Vec::new(),
    })
}

fn parse_model(input: &mut &[u8]) -> WResult<StudioModel> {
    let raw_name = parse_byte_array::<64>(input)?;
    Ok(StudioModel {
        name: fixed_name(&raw_name),
        raw_name,
        kind: le_i32.parse_next(input)?,
        bounding_radius: le_f32.parse_next(input)?,
        mesh_table: parse_table_ref(input)?,
        vertex_count: le_i32.parse_next(input)?,
        vertex_index: le_i32.parse_next(input)?,
        tangents_index: le_i32.parse_next(input)?,
        attachments: parse_table_ref(input)?,
        eyeballs: parse_table_ref(input)?,
        vertex_data: parse_i32_array::<2>(input)?,
        unused: parse_i32_array::<8>(input)?,
        meshes: Vec::new(),
    })
}

fn parse_mesh(input: &mut &[u8]) -> WResult<StudioMesh> {
    Ok(StudioMesh {
        material: le_i32.parse_next(input)?,
        model_index: le_i32.parse_next(input)?,
        vertex_count: le_i32.parse_next(input)?,
        vertex_offset: le_i32.parse_next(input)?,
        flexes: parse_table_ref(input)?,
        material_type: le_i32.parse_next(input)?,
        material_param: le_i32.parse_next(input)?,
        mesh_id: le_i32.parse_next(input)?,
        center: parse_vector3(input)?,
        model_vertex_data: le_i32.parse_next(input)?,
        lod_vertex_counts: parse_i32_array::<MAX_NUM_LODS>(input)?,
        unused: parse_i32_array::<8>(input)?,
    })
}

pub fn parse_body_parts(file: &FileView<'_>, table: TableRef) -> IResult<Vec<BodyPart>> {
    let view = file.table_ref("body parts", 0, table, BODY_PART_SIZE)?;
    file.parse_table("body parts", &view, parse_body_part, |base, mut part| {
        part.name = file.name_at("body part name", base, part.name_offset)?;
        if part.base == 0 {
            warn!(body_part = %part.name, "body part has a zero base");
        }
        let models = file.table_ref("models", base, part.model_table, MODEL_SIZE)?;
        part.models = file.parse_table("models", &models, parse_model, |model_base, mut model| {
            let meshes = file.table_ref("meshes", model_base, model.mesh_table, MESH_SIZE)?;
            model.meshes = file.parse_records("meshes", &meshes, parse_mesh)?;
            Ok(model)
        })?;
        Ok(part)
    })
}

pub(crate) fn write_body_parts(
    w: &mut ByteWriter,
    table: TableRef,
    parts: &[BodyPart],
) -> IResult<()> {
    for (i, part) in parts.iter().enumerate() {
        let base = w.table_slot("body parts", 0, table, BODY_PART_SIZE, i)?;
        w.record(base)
            .i32(part.name_offset)
            .i32(part.model_table.count)
            .i32(part.base)
            .i32(part.model_table.offset);
        w.put_name("body part name", base, part.name_offset, &part.name)?;

        for (j, model) in part.models.iter().enumerate() {
            let model_base = w.table_slot("models", base, part.model_table, MODEL_SIZE, j)?;
            w.record(model_base)
                .bytes(&model.raw_name)
                .i32(model.kind)
                .f32(model.bounding_radius)
                .table_ref(model.mesh_table)
                .i32(model.vertex_count)
                .i32(model.vertex_index)
                .i32(model.tangents_index)
                .table_ref(model.attachments)
                .table_ref(model.eyeballs)
                .i32s(&model.vertex_data)
                .i32s(&model.unused);

            for (k, mesh) in model.meshes.iter().enumerate() {
                let at = w.table_slot("meshes", model_base, model.mesh_table, MESH_SIZE, k)?;
                w.record(at)
                    .i32(mesh.material)
                    .i32(mesh.model_index)
                    .i32(mesh.vertex_count)
                    .i32(mesh.vertex_offset)
                    .table_ref(mesh.flexes)
                    .i32(mesh.material_type)
                    .i32(mesh.material_param)
                    .i32(mesh.mesh_id)
                    .f32s(&mesh.center)
                    .i32(mesh.model_vertex_data)
                    .i32s(&mesh.lod_vertex_counts)
                    .i32s(&mesh.unused);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FileKind;
    use crate::models::test_support::MdlBuilder;

    fn body_table(bytes: &[u8]) -> TableRef {
        let read = |at: usize| {
            i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        TableRef {
            count: read(232),
            offset: read(236),
        }
    }

    #[test]
    fn nested_tables_resolve_relative_to_owner() {
        let bytes = MdlBuilder::minimal().meshes(&[3, 5]).build();
        let file = FileView::new(&bytes, FileKind::Primary);
        let parts = parse_body_parts(&file, body_table(&bytes)).unwrap();

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "body");
        let model = &parts[0].models[0];
        assert_eq!(model.name, "model0");
        assert_eq!(model.first_vertex(), Some(0));
        let counts: Vec<_> = model.meshes.iter().map(|m| m.vertex_count).collect();
        assert_eq!(counts, vec![3, 5]);
        assert_eq!(model.meshes[1].vertex_offset, 3);
        assert_eq!(model.meshes[1].lod_vertex_count(0), 5);
    }

    #[test]
    fn truncated_mesh_table_reports_table_offset() {
        let bytes = MdlBuilder::minimal().build();
        let file = FileView::new(&bytes, FileKind::Primary);
        let parts = parse_body_parts(&file, body_table(&bytes)).unwrap();
        let model_base = usize::try_from(body_table(&bytes).offset + parts[0].model_table.offset)
            .unwrap();
        let mesh_start =
            model_base + usize::try_from(parts[0].models[0].mesh_table.offset).unwrap();

        let cut = FileView::new(&bytes[..mesh_start + MESH_SIZE - 1], FileKind::Primary);
        let err = parse_body_parts(&cut, body_table(&bytes)).unwrap_err();
        assert!(err.kind.is_out_of_bounds());
        assert_eq!(err.offset, mesh_start);
    }

    #[test]
    fn misaligned_vertex_index_has_no_first_vertex() {
        let bytes = MdlBuilder::minimal().build();
        let file = FileView::new(&bytes, FileKind::Primary);
        let mut model = parse_body_parts(&file, body_table(&bytes)).unwrap()[0].models[0].clone();
        model.vertex_index = 50;
        assert_eq!(model.first_vertex(), None);
        model.vertex_index = 96;
        assert_eq!(model.first_vertex(), Some(2));
    }
}
