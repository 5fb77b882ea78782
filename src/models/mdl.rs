//! The `.mdl` primary descriptor: its header and every table it addresses.

use tracing::{debug, warn};

use crate::data::parser_utils::FileView;
use crate::data::writer::ByteWriter;
use crate::error::{FileKind, IResult};
use crate::models::animation::{
    AnimBlock, AnimDesc, IncludeModel, Sequence, parse_anim_blocks, parse_anim_descs,
    parse_include_models, parse_sequences, write_anim_blocks, write_anim_descs,
    write_include_models, write_sequences,
};
use crate::models::body::{BodyPart, parse_body_parts, write_body_parts};
use crate::models::flex::{
    FlexController, FlexDesc, Mouth, PoseParam, parse_flex_controllers, parse_flex_descs,
    parse_mouths, parse_pose_params, write_flex_controllers, write_flex_descs, write_mouths,
    write_pose_params,
};
use crate::models::header::{STUDIO_HEADER_SIZE, StudioHeader, parse_header, write_header};
use crate::models::materials::{
    SkinTable, Texture, TextureDir, parse_skin_table, parse_texture_dirs, parse_textures,
    write_skin_table, write_texture_dirs, write_textures,
};
use crate::models::options::DecodeOptions;
use crate::models::skeleton::{
    Attachment, Bone, BoneController, HitboxSet, IkChain, IkLock, SrcBoneTransform,
    parse_attachments, parse_bone_controllers, parse_bones, parse_hitbox_sets, parse_ik_chains,
    parse_ik_locks, parse_src_bone_transforms, validate_hierarchy, write_attachments,
    write_bone_controllers, write_bones, write_hitbox_sets, write_ik_chains, write_ik_locks,
    write_src_bone_transforms,
};

/// A fully decoded primary descriptor. Owns everything it parsed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StudioModelFile {
    pub header: StudioHeader,
    pub bones: Vec<Bone>,
    pub bone_controllers: Vec<BoneController>,
    pub hitbox_sets: Vec<HitboxSet>,
    pub anim_descs: Vec<AnimDesc>,
    pub sequences: Vec<Sequence>,
    pub textures: Vec<Texture>,
    pub texture_dirs: Vec<TextureDir>,
    pub skins: SkinTable,
    pub body_parts: Vec<BodyPart>,
    pub attachments: Vec<Attachment>,
    pub flex_descs: Vec<FlexDesc>,
    pub flex_controllers: Vec<FlexController>,
    pub ik_chains: Vec<IkChain>,
    pub mouths: Vec<Mouth>,
    pub pose_params: Vec<PoseParam>,
    pub ik_locks: Vec<IkLock>,
    pub include_models: Vec<IncludeModel>,
    pub anim_blocks: Vec<AnimBlock>,
    pub anim_block_name: String,
    pub surface_prop: String,
    pub bone_table_name: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub key_values: Vec<u8>,
    pub src_bone_transforms: Vec<SrcBoneTransform>,
}

impl StudioModelFile {
    pub fn checksum(&self) -> i32 {
        self.header.checksum
    }

    /// Model key-value text up to its terminator.
    pub fn key_values_text(&self) -> String {
        crate::data::parser_utils::fixed_name(&self.key_values)
    }

    /// Sum of `numvertices` across every model of every body part.
    pub fn total_model_vertices(&self) -> usize {
        self.body_parts
            .iter()
            .flat_map(|part| &part.models)
            .map(|model| usize::try_from(model.vertex_count).unwrap_or(0))
            .sum()
    }
}

/// Parse a `.mdl` buffer into an owned [`StudioModelFile`].
pub fn parse_mdl(data: &[u8], options: &DecodeOptions) -> IResult<StudioModelFile> {
    let file = FileView::new(data, FileKind::Primary);
    let header = parse_header(&file, options)?;
    if usize::try_from(header.data_length).ok() != Some(data.len()) {
        warn!(
            declared = header.data_length,
            actual = data.len(),
            "primary descriptor length differs from its header"
        );
    }

    let bones = parse_bones(&file, header.bones)?;
    validate_hierarchy(&file, header.bones, &bones)?;
    let bone_controllers = parse_bone_controllers(&file, header.bone_controllers)?;
    let hitbox_sets = parse_hitbox_sets(&file, header.hitbox_sets)?;
    let anim_descs = parse_anim_descs(&file, header.local_anims)?;
    let sequences = parse_sequences(&file, header.local_seqs, anim_descs.len(), bones.len())?;
    let textures = parse_textures(&file, header.textures)?;
    let texture_dirs = parse_texture_dirs(&file, header.texture_dirs)?;
    let skins = parse_skin_table(
        &file,
        header.skin_family_count,
        header.skin_reference_count,
        header.skin_reference_index,
    )?;
    let body_parts = parse_body_parts(&file, header.body_parts)?;
    let attachments = parse_attachments(&file, header.attachments)?;
    let flex_descs = parse_flex_descs(&file, header.flex_descs)?;
    let flex_controllers = parse_flex_controllers(&file, header.flex_controllers)?;
    let ik_chains = parse_ik_chains(&file, header.ik_chains)?;
    let mouths = parse_mouths(&file, header.mouths)?;
    let pose_params = parse_pose_params(&file, header.local_pose_params)?;
    let ik_locks = parse_ik_locks(&file, 0, header.ik_locks)?;
    let include_models = parse_include_models(&file, header.include_models)?;
    let anim_blocks = parse_anim_blocks(&file, header.anim_blocks)?;

    let anim_block_name = file.name_at("animation block name", 0, header.anim_blocks_name_index)?;
    let surface_prop = file.name_at("surface prop", 0, header.surface_prop_index)?;
    let bone_table_name = file.name_at("bone table name", 0, header.bone_table_name_index)?;
    let key_values = if header.key_value_count > 0 {
        let len = usize::try_from(header.key_value_count).unwrap_or(0);
        file.bytes_at("key values", 0, header.key_value_index, len)?
            .to_vec()
    } else {
        Vec::new()
    };
    let src_bone_transforms = match header.studiohdr2_offset() {
        Some(base) => parse_src_bone_transforms(&file, base, header.src_bone_transforms())?,
        None => Vec::new(),
    };

    debug!(
        name = %header.name,
        bones = bones.len(),
        sequences = sequences.len(),
        body_parts = body_parts.len(),
        "decoded primary descriptor"
    );
    Ok(StudioModelFile {
        header,
        bones,
        bone_controllers,
        hitbox_sets,
        anim_descs,
        sequences,
        textures,
        texture_dirs,
        skins,
        body_parts,
        attachments,
        flex_descs,
        flex_controllers,
        ik_chains,
        mouths,
        pose_params,
        ik_locks,
        include_models,
        anim_blocks,
        anim_block_name,
        surface_prop,
        bone_table_name,
        key_values,
        src_bone_transforms,
    })
}

/// Write every decoded record back at the offsets it was read from.
///
/// The output is `dataLength` bytes long (or longer if a record extends past it);
/// regions no decoded record covers, such as animation streams, are zero.
pub fn encode_mdl(mdl: &StudioModelFile) -> IResult<Vec<u8>> {
    let header = &mdl.header;
    let len = usize::try_from(header.data_length)
        .unwrap_or(0)
        .max(STUDIO_HEADER_SIZE);
    let mut w = ByteWriter::with_len(FileKind::Primary, len);

    write_header(&mut w, header);
    write_bones(&mut w, header.bones, &mdl.bones)?;
    write_bone_controllers(&mut w, header.bone_controllers, &mdl.bone_controllers)?;
    write_hitbox_sets(&mut w, header.hitbox_sets, &mdl.hitbox_sets)?;
    write_anim_descs(&mut w, header.local_anims, &mdl.anim_descs)?;
    write_sequences(&mut w, header.local_seqs, &mdl.sequences)?;
    write_textures(&mut w, header.textures, &mdl.textures)?;
    write_texture_dirs(&mut w, header.texture_dirs, &mdl.texture_dirs)?;
    write_skin_table(&mut w, header.skin_reference_index, &mdl.skins)?;
    write_body_parts(&mut w, header.body_parts, &mdl.body_parts)?;
    write_attachments(&mut w, header.attachments, &mdl.attachments)?;
    write_flex_descs(&mut w, header.flex_descs, &mdl.flex_descs)?;
    write_flex_controllers(&mut w, header.flex_controllers, &mdl.flex_controllers)?;
    write_ik_chains(&mut w, header.ik_chains, &mdl.ik_chains)?;
    write_mouths(&mut w, header.mouths, &mdl.mouths)?;
    write_pose_params(&mut w, header.local_pose_params, &mdl.pose_params)?;
    write_ik_locks(&mut w, 0, header.ik_locks, &mdl.ik_locks)?;
    write_include_models(&mut w, header.include_models, &mdl.include_models)?;
    write_anim_blocks(&mut w, header.anim_blocks, &mdl.anim_blocks)?;

    w.put_name("animation block name", 0, header.anim_blocks_name_index, &mdl.anim_block_name)?;
    w.put_name("surface prop", 0, header.surface_prop_index, &mdl.surface_prop)?;
    w.put_name("bone table name", 0, header.bone_table_name_index, &mdl.bone_table_name)?;
    if !mdl.key_values.is_empty() {
        let at = w.resolve("key values", 0, header.key_value_index)?;
        w.put_bytes(at, &mdl.key_values);
    }
    if let Some(base) = header.studiohdr2_offset() {
        write_src_bone_transforms(
            &mut w,
            base,
            header.src_bone_transforms(),
            &mdl.src_bone_transforms,
        )?;
    }
    Ok(w.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::test_support::MdlBuilder;
    use pretty_assertions::assert_eq;

    #[test]
    fn minimal_descriptor() {
        let bytes = MdlBuilder::minimal().build();
        let mdl = parse_mdl(&bytes, &DecodeOptions::default()).unwrap();
        assert_eq!(mdl.checksum(), 0x1234);
        assert_eq!(mdl.bones.len(), 1);
        assert_eq!(mdl.bones[0].name, "root");
        assert!(mdl.bones[0].is_root());
        assert_eq!(mdl.textures[0].name, "skin");
        assert_eq!(mdl.skins.texture_index(0, 0), Some(0));
        assert_eq!(mdl.surface_prop, "metal");
        assert_eq!(mdl.total_model_vertices(), 3);
    }

    #[test]
    fn bone_cycle_is_malformed_hierarchy() {
        let bytes = MdlBuilder::minimal()
            .bones(&[("root", -1), ("a", 2), ("b", 1)])
            .build();
        let err = parse_mdl(&bytes, &DecodeOptions::default()).unwrap_err();
        assert_eq!(err.file, FileKind::Primary);
        assert!(matches!(err.kind, ErrorKind::MalformedHierarchy { bone: 1 | 2 }));
    }

    #[test]
    fn truncation_reports_last_table() {
        let bytes = MdlBuilder::minimal().build();
        let mdl = parse_mdl(&bytes, &DecodeOptions::default()).unwrap();
        // body parts are laid out last; cut into the final mesh record
        let cut = &bytes[..bytes.len() - 1];
        let err = parse_mdl(cut, &DecodeOptions::default()).unwrap_err();
        assert!(err.kind.is_out_of_bounds());
        let part = &mdl.body_parts[0];
        let mesh_table = mdl.header.body_parts.offset
            + part.model_table.offset
            + part.models[0].mesh_table.offset;
        let mesh_table = usize::try_from(mesh_table).unwrap();
        assert_eq!(err.offset, mesh_table);
    }

    #[test]
    fn truncated_bone_table() {
        let bytes = MdlBuilder::minimal().build();
        let bone_table = usize::try_from(
            i32::from_le_bytes([bytes[160], bytes[161], bytes[162], bytes[163]]),
        )
        .unwrap();
        let err = parse_mdl(&bytes[..bone_table + 100], &DecodeOptions::default()).unwrap_err();
        assert!(err.kind.is_out_of_bounds());
        assert_eq!(err.offset, bone_table);
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let bytes = MdlBuilder::minimal()
            .bones(&[("root", -1), ("spine", 0), ("head", 1)])
            .meshes(&[3, 4])
            .with_header2(0.5)
            .with_sequence("walk", "footstep")
            .build();
        let mdl = parse_mdl(&bytes, &DecodeOptions::default()).unwrap();
        assert_eq!(mdl.src_bone_transforms[0].name, "root");
        assert_eq!(encode_mdl(&mdl).unwrap(), bytes);
    }
}
