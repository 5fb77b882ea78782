//! The fixed `studiohdr_t` record at the start of every `.mdl` file, plus the
//! optional `studiohdr2_t` extension it points at.
//!
//! The extension is folded into [`StudioHeader`] as an optional overlay so
//! callers see one logical header regardless of which fields a file carries.

use std::ops::RangeInclusive;

use tracing::{debug, warn};
use winnow::Parser;
use winnow::binary::{le_f32, le_i32, le_u8, le_u32};

use crate::data::parser_utils::{
    FileView, TableRef, Vector3, WResult, fixed_name, parse_byte_array, parse_i32_array,
    parse_table_ref, parse_vector3,
};
use crate::data::writer::ByteWriter;
use crate::error::{Error, ErrorKind, IResult};
use crate::models::options::DecodeOptions;

/// "IDST" as little-endian u32.
pub const STUDIO_MAGIC: u32 = 0x54534449;

/// Versions whose header layout is the one decoded here.
pub const KNOWN_VERSIONS: RangeInclusive<i32> = 44..=49;

pub const STUDIO_HEADER_SIZE: usize = 408;
pub const STUDIO_HEADER2_SIZE: usize = 276;

/// The primary descriptor header.
///
/// Every `(count, offset)` pair is relative to the start of the file.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StudioHeader {
    pub id: u32,
    pub version: i32,
    /// Pairs this file with its `.vvd` and `.vtx` companions.
    pub checksum: i32,
    pub name: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub raw_name: [u8; 64],
    /// Total file length in bytes.
    pub data_length: i32,
    pub eye_position: Vector3,
    pub illum_position: Vector3,
    pub hull_min: Vector3,
    pub hull_max: Vector3,
    pub view_bbmin: Vector3,
    pub view_bbmax: Vector3,
    pub flags: i32,
    pub bones: TableRef,
    pub bone_controllers: TableRef,
    pub hitbox_sets: TableRef,
    pub local_anims: TableRef,
    pub local_seqs: TableRef,
    pub activity_list_version: i32,
    pub events_indexed: i32,
    pub textures: TableRef,
    pub texture_dirs: TableRef,
    pub skin_reference_count: i32,
    pub skin_family_count: i32,
    pub skin_reference_index: i32,
    pub body_parts: TableRef,
    pub attachments: TableRef,
    pub local_node_count: i32,
    pub local_node_index: i32,
    pub local_node_name_index: i32,
    pub flex_descs: TableRef,
    pub flex_controllers: TableRef,
    pub flex_rules: TableRef,
    pub ik_chains: TableRef,
    pub mouths: TableRef,
    pub local_pose_params: TableRef,
    pub surface_prop_index: i32,
    pub key_value_index: i32,
    pub key_value_count: i32,
    pub ik_locks: TableRef,
    pub mass: f32,
    pub contents: i32,
    pub include_models: TableRef,
    pub virtual_model: i32,
    pub anim_blocks_name_index: i32,
    pub anim_blocks: TableRef,
    pub anim_block_model: i32,
    pub bone_table_name_index: i32,
    pub vertex_base: i32,
    pub offset_base: i32,
    pub directional_dot_product: u8,
    pub root_lod: u8,
    pub num_allowed_root_lods: u8,
    pub unused0: u8,
    pub unused1: i32,
    pub flex_controller_uis: TableRef,
    pub vert_anim_fixed_point_scale: f32,
    pub unused2: i32,
    /// Offset of the extension header, zero when absent.
    pub studiohdr2_index: i32,
    pub unused3: i32,
    pub extended: Option<StudioHeader2>,
}

/// `studiohdr2_t`. Offsets inside it are relative to the extension itself.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StudioHeader2 {
    pub src_bone_transforms: TableRef,
    pub illum_position_attachment_index: i32,
    pub max_eye_deflection: f32,
    pub linear_bone_index: i32,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub reserved: [i32; 64],
}

impl StudioHeader {
    /// Absolute offset of the extension header, if any.
    pub fn studiohdr2_offset(&self) -> Option<usize> {
        usize::try_from(self.studiohdr2_index)
            .ok()
            .filter(|offset| *offset != 0)
    }

    pub fn src_bone_transforms(&self) -> TableRef {
        self.extended
            .as_ref()
            .map(|ext| ext.src_bone_transforms)
            .unwrap_or_default()
    }

    pub fn max_eye_deflection(&self) -> Option<f32> {
        self.extended.as_ref().map(|ext| ext.max_eye_deflection)
    }

    pub fn illum_position_attachment(&self) -> Option<i32> {
        self.extended
            .as_ref()
            .map(|ext| ext.illum_position_attachment_index)
    }

    pub fn linear_bone_index(&self) -> Option<i32> {
        self.extended
            .as_ref()
            .map(|ext| ext.linear_bone_index)
            .filter(|index| *index != 0)
    }
}

fn parse_header_fields(input: &mut &[u8]) -> WResult<StudioHeader> {
    let id = le_u32.parse_next(input)?;
    let version = le_i32.parse_next(input)?;
    let checksum = le_i32.parse_next(input)?;
    let raw_name = parse_byte_array::<64>(input)?;
    // Struct literal fields evaluate in source order, which is the on-disk order.
    Ok(StudioHeader {
        id,
        version,
        checksum,
        name: fixed_name(&raw_name),
        raw_name,
        data_length: le_i32.parse_next(input)?,
        eye_position: parse_vector3(input)?,
        illum_position: parse_vector3(input)?,
        hull_min: parse_vector3(input)?,
        hull_max: parse_vector3(input)?,
        view_bbmin: parse_vector3(input)?,
        view_bbmax: parse_vector3(input)?,
        flags: le_i32.parse_next(input)?,
        bones: parse_table_ref(input)?,
        bone_controllers: parse_table_ref(input)?,
        hitbox_sets: parse_table_ref(input)?,
        local_anims: parse_table_ref(input)?,
        local_seqs: parse_table_ref(input)?,
        activity_list_version: le_i32.parse_next(input)?,
        events_indexed: le_i32.parse_next(input)?,
        textures: parse_table_ref(input)?,
        texture_dirs: parse_table_ref(input)?,
        skin_reference_count: le_i32.parse_next(input)?,
        skin_family_count: le_i32.parse_next(input)?,
        skin_reference_index: le_i32.parse_next(input)?,
        body_parts: parse_table_ref(input)?,
        attachments: parse_table_ref(input)?,
        local_node_count: le_i32.parse_next(input)?,
        local_node_index: le_i32.parse_next(input)?,
        local_node_name_index: le_i32.parse_next(input)?,
        flex_descs: parse_table_ref(input)?,
        flex_controllers: parse_table_ref(input)?,
        flex_rules: parse_table_ref(input)?,
        ik_chains: parse_table_ref(input)?,
        mouths: parse_table_ref(input)?,
        local_pose_params: parse_table_ref(input)?,
        surface_prop_index: le_i32.parse_next(input)?,
        key_value_index: le_i32.parse_next(input)?,
        key_value_count: le_i32.parse_next(input)?,
        ik_locks: parse_table_ref(input)?,
        mass: le_f32.parse_next(input)?,
        contents: le_i32.parse_next(input)?,
        include_models: parse_table_ref(input)?,
        virtual_model: le_i32.parse_next(input)?,
        anim_blocks_name_index: le_i32.parse_next(input)?,
        anim_blocks: parse_table_ref(input)?,
        anim_block_model: le_i32.parse_next(input)?,
        bone_table_name_index: le_i32.parse_next(input)?,
        vertex_base: le_i32.parse_next(input)?,
        offset_base: le_i32.parse_next(input)?,
        directional_dot_product: le_u8.parse_next(input)?,
        root_lod: le_u8.parse_next(input)?,
        num_allowed_root_lods: le_u8.parse_next(input)?,
        unused0: le_u8.parse_next(input)?,
        unused1: le_i32.parse_next(input)?,
        flex_controller_uis: parse_table_ref(input)?,
        vert_anim_fixed_point_scale: le_f32.parse_next(input)?,
        unused2: le_i32.parse_next(input)?,
        studiohdr2_index: le_i32.parse_next(input)?,
        unused3: le_i32.parse_next(input)?,
        extended: None,
    })
}

fn parse_header2_fields(input: &mut &[u8]) -> WResult<StudioHeader2> {
    let src_bone_transforms = parse_table_ref(input)?;
    let illum_position_attachment_index = le_i32.parse_next(input)?;
    let max_eye_deflection = le_f32.parse_next(input)?;
    let linear_bone_index = le_i32.parse_next(input)?;
    let reserved = parse_i32_array::<64>(input)?;
    Ok(StudioHeader2 {
        src_bone_transforms,
        illum_position_attachment_index,
        max_eye_deflection,
        linear_bone_index,
        reserved,
    })
}

/// Read and validate the header, overlaying the extension header when present.
pub fn parse_header(file: &FileView<'_>, options: &DecodeOptions) -> IResult<StudioHeader> {
    let id = file.parse_at("header", 0, 4, le_u32)?;
    if id != STUDIO_MAGIC {
        return Err(Error::new(
            file.kind(),
            0,
            ErrorKind::MagicMismatch {
                expected: STUDIO_MAGIC,
                found: id,
            },
        ));
    }
    let version = file.parse_at("header", 4, 4, le_i32)?;
    if !(options.min_version..=options.max_version).contains(&version) {
        return Err(Error::new(
            file.kind(),
            4,
            ErrorKind::UnsupportedVersion {
                found: version,
                min: options.min_version,
                max: options.max_version,
            },
        ));
    }
    if !KNOWN_VERSIONS.contains(&version) {
        warn!(version, "decoding an unfamiliar studio header version with the v49 layout");
    }

    let mut header = file.parse_at("header", 0, STUDIO_HEADER_SIZE, parse_header_fields)?;
    if let Some(offset) = header.studiohdr2_offset() {
        header.extended = Some(file.parse_at(
            "studiohdr2",
            offset,
            STUDIO_HEADER2_SIZE,
            parse_header2_fields,
        )?);
    }
    debug!(
        name = %header.name,
        version = header.version,
        checksum = header.checksum,
        extended = header.extended.is_some(),
        "accepted studio header"
    );
    Ok(header)
}

pub(crate) fn write_header(w: &mut ByteWriter, header: &StudioHeader) {
    w.record(0)
        .u32(header.id)
        .i32(header.version)
        .i32(header.checksum)
        .bytes(&header.raw_name)
        .i32(header.data_length)
        .f32s(&header.eye_position)
        .f32s(&header.illum_position)
        .f32s(&header.hull_min)
        .f32s(&header.hull_max)
        .f32s(&header.view_bbmin)
        .f32s(&header.view_bbmax)
        .i32(header.flags)
        .table_ref(header.bones)
        .table_ref(header.bone_controllers)
        .table_ref(header.hitbox_sets)
        .table_ref(header.local_anims)
        .table_ref(header.local_seqs)
        .i32(header.activity_list_version)
        .i32(header.events_indexed)
        .table_ref(header.textures)
        .table_ref(header.texture_dirs)
        .i32(header.skin_reference_count)
        .i32(header.skin_family_count)
        .i32(header.skin_reference_index)
        .table_ref(header.body_parts)
        .table_ref(header.attachments)
        .i32(header.local_node_count)
        .i32(header.local_node_index)
        .i32(header.local_node_name_index)
        .table_ref(header.flex_descs)
        .table_ref(header.flex_controllers)
        .table_ref(header.flex_rules)
        .table_ref(header.ik_chains)
        .table_ref(header.mouths)
        .table_ref(header.local_pose_params)
        .i32(header.surface_prop_index)
        .i32(header.key_value_index)
        .i32(header.key_value_count)
        .table_ref(header.ik_locks)
        .f32(header.mass)
        .i32(header.contents)
        .table_ref(header.include_models)
        .i32(header.virtual_model)
        .i32(header.anim_blocks_name_index)
        .table_ref(header.anim_blocks)
        .i32(header.anim_block_model)
        .i32(header.bone_table_name_index)
        .i32(header.vertex_base)
        .i32(header.offset_base)
        .u8(header.directional_dot_product)
        .u8(header.root_lod)
        .u8(header.num_allowed_root_lods)
        .u8(header.unused0)
        .i32(header.unused1)
        .table_ref(header.flex_controller_uis)
        .f32(header.vert_anim_fixed_point_scale)
        .i32(header.unused2)
        .i32(header.studiohdr2_index)
        .i32(header.unused3);

    if let (Some(offset), Some(ext)) = (header.studiohdr2_offset(), &header.extended) {
        w.record(offset)
            .table_ref(ext.src_bone_transforms)
            .i32(ext.illum_position_attachment_index)
            .f32(ext.max_eye_deflection)
            .i32(ext.linear_bone_index)
            .i32s(&ext.reserved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FileKind;
    use crate::models::test_support::MdlBuilder;

    #[test]
    fn header_size_matches_layout() {
        let bytes = MdlBuilder::minimal().build();
        let file = FileView::new(&bytes, FileKind::Primary);
        let header = parse_header(&file, &DecodeOptions::default()).unwrap();
        let mut w = ByteWriter::new(FileKind::Primary);
        write_header(&mut w, &header);
        assert_eq!(w.len(), STUDIO_HEADER_SIZE);
        assert_eq!(header.name, "test.mdl");
    }

    #[test]
    fn wrong_magic() {
        let mut bytes = MdlBuilder::minimal().build();
        bytes[0] = b'X';
        let file = FileView::new(&bytes, FileKind::Primary);
        let err = parse_header(&file, &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MagicMismatch { .. }));
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn wrong_version() {
        let mut bytes = MdlBuilder::minimal().build();
        bytes[4..8].copy_from_slice(&12i32.to_le_bytes());
        let file = FileView::new(&bytes, FileKind::Primary);
        let err = parse_header(&file, &DecodeOptions::default()).unwrap_err();
        assert!(err.kind.is_magic_mismatch());
        assert_eq!(err.offset, 4);
    }

    #[test]
    fn truncated_header() {
        let bytes = MdlBuilder::minimal().build();
        let file = FileView::new(&bytes[..200], FileKind::Primary);
        let err = parse_header(&file, &DecodeOptions::default()).unwrap_err();
        assert!(err.kind.is_out_of_bounds());
    }

    #[test]
    fn extension_overlay() {
        let bytes = MdlBuilder::minimal().with_header2(1.5).build();
        let file = FileView::new(&bytes, FileKind::Primary);
        let header = parse_header(&file, &DecodeOptions::default()).unwrap();
        assert_eq!(header.max_eye_deflection(), Some(1.5));
        assert_eq!(header.src_bone_transforms().count, 1);

        let plain = MdlBuilder::minimal().build();
        let file = FileView::new(&plain, FileKind::Primary);
        let header = parse_header(&file, &DecodeOptions::default()).unwrap();
        assert!(header.extended.is_none());
        assert_eq!(header.max_eye_deflection(), None);
    }
}
