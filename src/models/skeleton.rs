//! Bones and everything hung off them: bone controllers, hitbox sets,
//! attachments, IK chains and locks, and the source bone transforms carried by
//! the extension header.

use winnow::Parser;
use winnow::binary::{le_f32, le_i32};

use crate::data::parser_utils::{
    FileView, Matrix3x4, TableRef, Vector3, Vector4, WResult, parse_f32_array, parse_i32_array,
    parse_matrix3x4, parse_table_ref, parse_vector3,
};
use crate::data::writer::ByteWriter;
use crate::error::{Error, ErrorKind, IResult};

pub const BONE_SIZE: usize = 216;
pub const BONE_CONTROLLER_SIZE: usize = 56;
pub const HITBOX_SET_SIZE: usize = 12;
pub const HITBOX_SIZE: usize = 68;
pub const ATTACHMENT_SIZE: usize = 92;
pub const IK_CHAIN_SIZE: usize = 16;
pub const IK_LINK_SIZE: usize = 28;
pub const IK_LOCK_SIZE: usize = 32;
pub const SRC_BONE_TRANSFORM_SIZE: usize = 100;

/// `mstudiobone_t`. Parent references are indices into the bone table, `-1` for a root.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Bone {
    pub name: String,
    pub name_offset: i32,
    pub parent: i32,
    pub bone_controllers: [i32; 6],
    pub position: Vector3,
    pub quaternion: Vector4,
    /// Euler rotation in radians.
    pub rotation: Vector3,
    pub position_scale: Vector3,
    pub rotation_scale: Vector3,
    pub pose_to_bone: Matrix3x4,
    pub alignment: Vector4,
    pub flags: i32,
    pub proc_type: i32,
    pub proc_index: i32,
    pub physics_bone: i32,
    pub surface_prop: String,
    pub surface_prop_offset: i32,
    pub contents: i32,
    pub unused: [i32; 8],
}

impl Bone {
    pub fn parent_index(&self) -> Option<usize> {
        usize::try_from(self.parent).ok()
    }

    pub fn is_root(&self) -> bool {
        self.parent == -1
    }
}

fn parse_bone(input: &mut &[u8]) -> WResult<Bone> {
    Ok(Bone {
        name_offset: le_i32.parse_next(input)?,
        parent: le_i32.parse_next(input)?,
        bone_controllers: parse_i32_array::<6>(input)?,
        position: parse_vector3(input)?,
        quaternion: parse_f32_array::<4>(input)?,
        rotation: parse_vector3(input)?,
        position_scale: parse_vector3(input)?,
        rotation_scale: parse_vector3(input)?,
        pose_to_bone: parse_matrix3x4(input)?,
        alignment: parse_f32_array::<4>(input)?,
        flags: le_i32.parse_next(input)?,
        proc_type: le_i32.parse_next(input)?,
        proc_index: le_i32.parse_next(input)?,
        physics_bone: le_i32.parse_next(input)?,
        surface_prop_offset: le_i32.parse_next(input)?,
        contents: le_i32.parse_next(input)?,
        unused: parse_i32_array::<8>(input)?,
        name: String::new(),
        surface_prop: String::new(),
    })
}

pub fn parse_bones(file: &FileView<'_>, table: TableRef) -> IResult<Vec<Bone>> {
    let view = file.table_ref("bones", 0, table, BONE_SIZE)?;
    file.parse_table("bones", &view, parse_bone, |base, mut bone| {
        bone.name = file.name_at("bone name", base, bone.name_offset)?;
        bone.surface_prop = file.name_at("bone surface prop", base, bone.surface_prop_offset)?;
        Ok(bone)
    })
}

pub(crate) fn write_bones(w: &mut ByteWriter, table: TableRef, bones: &[Bone]) -> IResult<()> {
    for (i, bone) in bones.iter().enumerate() {
        let base = w.table_slot("bones", 0, table, BONE_SIZE, i)?;
        w.record(base)
            .i32(bone.name_offset)
            .i32(bone.parent)
            .i32s(&bone.bone_controllers)
            .f32s(&bone.position)
            .f32s(&bone.quaternion)
            .f32s(&bone.rotation)
            .f32s(&bone.position_scale)
            .f32s(&bone.rotation_scale)
            .f32s(&bone.pose_to_bone)
            .f32s(&bone.alignment)
            .i32(bone.flags)
            .i32(bone.proc_type)
            .i32(bone.proc_index)
            .i32(bone.physics_bone)
            .i32(bone.surface_prop_offset)
            .i32(bone.contents)
            .i32s(&bone.unused);
        w.put_name("bone name", base, bone.name_offset, &bone.name)?;
        w.put_name("bone surface prop", base, bone.surface_prop_offset, &bone.surface_prop)?;
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unseen,
    OnPath,
    Done,
}

/// Check that bone parents form a forest: every parent is `-1` or a valid index,
/// and no parent chain revisits a bone.
///
/// Returns the index of the first bone whose chain is broken.
pub fn find_hierarchy_fault(bones: &[Bone]) -> Option<usize> {
    let mut state = vec![Visit::Unseen; bones.len()];
    let mut path = Vec::new();
    for start in 0..bones.len() {
        let mut current = start;
        loop {
            match state[current] {
                Visit::Done => break,
                Visit::OnPath => return Some(current),
                Visit::Unseen => {}
            }
            state[current] = Visit::OnPath;
            path.push(current);
            let parent = bones[current].parent;
            if parent == -1 {
                break;
            }
            match usize::try_from(parent) {
                Ok(parent) if parent < bones.len() => current = parent,
                _ => return Some(current),
            }
        }
        for visited in path.drain(..) {
            state[visited] = Visit::Done;
        }
    }
    None
}

/// [`find_hierarchy_fault`] reported as a [`ErrorKind::MalformedHierarchy`] at the bone's record.
pub fn validate_hierarchy(file: &FileView<'_>, table: TableRef, bones: &[Bone]) -> IResult<()> {
    match find_hierarchy_fault(bones) {
        None => Ok(()),
        Some(bone) => {
            let offset = usize::try_from(table.offset).unwrap_or(0) + bone * BONE_SIZE;
            Err(Error::new(
                file.kind(),
                offset,
                ErrorKind::MalformedHierarchy { bone },
            ))
        }
    }
}

/// `mstudiobonecontroller_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BoneController {
    pub bone: i32,
    pub kind: i32,
    pub start: f32,
    pub end: f32,
    pub rest: i32,
    pub input_field: i32,
    pub unused: [i32; 8],
}

fn parse_bone_controller(input: &mut &[u8]) -> WResult<BoneController> {
    Ok(BoneController {
        bone: le_i32.parse_next(input)?,
        kind: le_i32.parse_next(input)?,
        start: le_f32.parse_next(input)?,
        end: le_f32.parse_next(input)?,
        rest: le_i32.parse_next(input)?,
        input_field: le_i32.parse_next(input)?,
        unused: parse_i32_array::<8>(input)?,
    })
}

pub fn parse_bone_controllers(
    file: &FileView<'_>,
    table: TableRef,
) -> IResult<Vec<BoneController>> {
    let view = file.table_ref("bone controllers", 0, table, BONE_CONTROLLER_SIZE)?;
    file.parse_records("bone controllers", &view, parse_bone_controller)
}

pub(crate) fn write_bone_controllers(
    w: &mut ByteWriter,
    table: TableRef,
    controllers: &[BoneController],
) -> IResult<()> {
    for (i, ctrl) in controllers.iter().enumerate() {
        let base = w.table_slot("bone controllers", 0, table, BONE_CONTROLLER_SIZE, i)?;
        w.record(base)
            .i32(ctrl.bone)
            .i32(ctrl.kind)
            .f32(ctrl.start)
            .f32(ctrl.end)
            .i32(ctrl.rest)
            .i32(ctrl.input_field)
            .i32s(&ctrl.unused);
    }
    Ok(())
}

/// `mstudiohitboxset_t` with its hitboxes resolved.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HitboxSet {
    pub name: String,
    pub name_offset: i32,
    /// Relative to this set.
    pub hitbox_table: TableRef,
    pub hitboxes: Vec<Hitbox>,
}

/// `mstudiobbox_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Hitbox {
    pub bone: i32,
    pub group: i32,
    pub bbmin: Vector3,
    pub bbmax: Vector3,
    pub name: String,
    pub name_offset: i32,
    pub unused: [i32; 8],
}

fn parse_hitbox_set(input: &mut &[u8]) -> WResult<HitboxSet> {
    Ok(HitboxSet {
        name_offset: le_i32.parse_next(input)?,
        hitbox_table: parse_table_ref(input)?,
        name: String::new(),
        hitboxes: Vec::new(),
    })
}

fn parse_hitbox(input: &mut &[u8]) -> WResult<Hitbox> {
    Ok(Hitbox {
        bone: le_i32.parse_next(input)?,
        group: le_i32.parse_next(input)?,
        bbmin: parse_vector3(input)?,
        bbmax: parse_vector3(input)?,
        name_offset: le_i32.parse_next(input)?,
        unused: parse_i32_array::<8>(input)?,
        name: String::new(),
    })
}

pub fn parse_hitbox_sets(file: &FileView<'_>, table: TableRef) -> IResult<Vec<HitboxSet>> {
    let view = file.table_ref("hitbox sets", 0, table, HITBOX_SET_SIZE)?;
    file.parse_table("hitbox sets", &view, parse_hitbox_set, |base, mut set| {
        set.name = file.name_at("hitbox set name", base, set.name_offset)?;
        let hitboxes = file.table_ref("hitboxes", base, set.hitbox_table, HITBOX_SIZE)?;
        set.hitboxes = file.parse_table("hitboxes", &hitboxes, parse_hitbox, |hb_base, mut hb| {
            hb.name = file.name_at("hitbox name", hb_base, hb.name_offset)?;
            Ok(hb)
        })?;
        Ok(set)
    })
}

pub(crate) fn write_hitbox_sets(
    w: &mut ByteWriter,
    table: TableRef,
    sets: &[HitboxSet],
) -> IResult<()> {
    for (i, set) in sets.iter().enumerate() {
        let base = w.table_slot("hitbox sets", 0, table, HITBOX_SET_SIZE, i)?;
        w.record(base).i32(set.name_offset).table_ref(set.hitbox_table);
        w.put_name("hitbox set name", base, set.name_offset, &set.name)?;
        for (j, hb) in set.hitboxes.iter().enumerate() {
            let hb_base = w.table_slot("hitboxes", base, set.hitbox_table, HITBOX_SIZE, j)?;
            w.record(hb_base)
                .i32(hb.bone)
                .i32(hb.group)
                .f32s(&hb.bbmin)
                .f32s(&hb.bbmax)
                .i32(hb.name_offset)
                .i32s(&hb.unused);
            w.put_name("hitbox name", hb_base, hb.name_offset, &hb.name)?;
        }
    }
    Ok(())
}

/// `mstudioattachment_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Attachment {
    pub name: String,
    pub name_offset: i32,
    pub flags: i32,
    pub local_bone: i32,
    pub local: Matrix3x4,
    pub unused: [i32; 8],
}

fn parse_attachment(input: &mut &[u8]) -> WResult<Attachment> {
    Ok(Attachment {
        name_offset: le_i32.parse_next(input)?,
        flags: le_i32.parse_next(input)?,
        local_bone: le_i32.parse_next(input)?,
        local: parse_matrix3x4(input)?,
        unused: parse_i32_array::<8>(input)?,
        name: String::new(),
    })
}

pub fn parse_attachments(file: &FileView<'_>, table: TableRef) -> IResult<Vec<Attachment>> {
    let view = file.table_ref("attachments", 0, table, ATTACHMENT_SIZE)?;
    file.parse_table("attachments", &view, parse_attachment, |base, mut att| {
        att.name = file.name_at("attachment name", base, att.name_offset)?;
        Ok(att)
    })
}

pub(crate) fn write_attachments(
    w: &mut ByteWriter,
    table: TableRef,
    attachments: &[Attachment],
) -> IResult<()> {
    for (i, att) in attachments.iter().enumerate() {
        let base = w.table_slot("attachments", 0, table, ATTACHMENT_SIZE, i)?;
        w.record(base)
            .i32(att.name_offset)
            .i32(att.flags)
            .i32(att.local_bone)
            .f32s(&att.local)
            .i32s(&att.unused);
        w.put_name("attachment name", base, att.name_offset, &att.name)?;
    }
    Ok(())
}

/// `mstudioikchain_t` with its links.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IkChain {
    pub name: String,
    pub name_offset: i32,
    pub link_type: i32,
    /// Relative to this chain.
    pub link_table: TableRef,
    pub links: Vec<IkLink>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IkLink {
    pub bone: i32,
    pub knee_dir: Vector3,
    pub unused: Vector3,
}

fn parse_ik_chain(input: &mut &[u8]) -> WResult<IkChain> {
    Ok(IkChain {
        name_offset: le_i32.parse_next(input)?,
        link_type: le_i32.parse_next(input)?,
        link_table: parse_table_ref(input)?,
        name: String::new(),
        links: Vec::new(),
    })
}

fn parse_ik_link(input: &mut &[u8]) -> WResult<IkLink> {
    Ok(IkLink {
        bone: le_i32.parse_next(input)?,
        knee_dir: parse_vector3(input)?,
        unused: parse_vector3(input)?,
    })
}

pub fn parse_ik_chains(file: &FileView<'_>, table: TableRef) -> IResult<Vec<IkChain>> {
    let view = file.table_ref("ik chains", 0, table, IK_CHAIN_SIZE)?;
    file.parse_table("ik chains", &view, parse_ik_chain, |base, mut chain| {
        chain.name = file.name_at("ik chain name", base, chain.name_offset)?;
        let links = file.table_ref("ik links", base, chain.link_table, IK_LINK_SIZE)?;
        chain.links = file.parse_records("ik links", &links, parse_ik_link)?;
        Ok(chain)
    })
}

pub(crate) fn write_ik_chains(
    w: &mut ByteWriter,
    table: TableRef,
    chains: &[IkChain],
) -> IResult<()> {
    for (i, chain) in chains.iter().enumerate() {
        let base = w.table_slot("ik chains", 0, table, IK_CHAIN_SIZE, i)?;
        w.record(base)
            .i32(chain.name_offset)
            .i32(chain.link_type)
            .table_ref(chain.link_table);
        w.put_name("ik chain name", base, chain.name_offset, &chain.name)?;
        for (j, link) in chain.links.iter().enumerate() {
            let link_base = w.table_slot("ik links", base, chain.link_table, IK_LINK_SIZE, j)?;
            w.record(link_base)
                .i32(link.bone)
                .f32s(&link.knee_dir)
                .f32s(&link.unused);
        }
    }
    Ok(())
}

/// `mstudioiklock_t`, used both at model level and inside sequences.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IkLock {
    pub chain: i32,
    pub pos_weight: f32,
    pub local_q_weight: f32,
    pub flags: i32,
    pub unused: [i32; 4],
}

fn parse_ik_lock(input: &mut &[u8]) -> WResult<IkLock> {
    Ok(IkLock {
        chain: le_i32.parse_next(input)?,
        pos_weight: le_f32.parse_next(input)?,
        local_q_weight: le_f32.parse_next(input)?,
        flags: le_i32.parse_next(input)?,
        unused: parse_i32_array::<4>(input)?,
    })
}

pub fn parse_ik_locks(
    file: &FileView<'_>,
    base: usize,
    table: TableRef,
) -> IResult<Vec<IkLock>> {
    let view = file.table_ref("ik locks", base, table, IK_LOCK_SIZE)?;
    file.parse_records("ik locks", &view, parse_ik_lock)
}

pub(crate) fn write_ik_locks(
    w: &mut ByteWriter,
    base: usize,
    table: TableRef,
    locks: &[IkLock],
) -> IResult<()> {
    for (i, lock) in locks.iter().enumerate() {
        let lock_base = w.table_slot("ik locks", base, table, IK_LOCK_SIZE, i)?;
        w.record(lock_base)
            .i32(lock.chain)
            .f32(lock.pos_weight)
            .f32(lock.local_q_weight)
            .i32(lock.flags)
            .i32s(&lock.unused);
    }
    Ok(())
}

/// `mstudiosrcbonetransform_t`, addressed from the extension header.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SrcBoneTransform {
    pub name: String,
    pub name_offset: i32,
    pub pre_transform: Matrix3x4,
    pub post_transform: Matrix3x4,
}

fn parse_src_bone_transform(input: &mut &[u8]) -> WResult<SrcBoneTransform> {
    Ok(SrcBoneTransform {
        name_offset: le_i32.parse_next(input)?,
        pre_transform: parse_matrix3x4(input)?,
        post_transform: parse_matrix3x4(input)?,
        name: String::new(),
    })
}

pub fn parse_src_bone_transforms(
    file: &FileView<'_>,
    header2_base: usize,
    table: TableRef,
) -> IResult<Vec<SrcBoneTransform>> {
    let view = file.table_ref(
        "source bone transforms",
        header2_base,
        table,
        SRC_BONE_TRANSFORM_SIZE,
    )?;
    file.parse_table(
        "source bone transforms",
        &view,
        parse_src_bone_transform,
        |base, mut transform| {
            transform.name = file.name_at("source bone name", base, transform.name_offset)?;
            Ok(transform)
        },
    )
}

pub(crate) fn write_src_bone_transforms(
    w: &mut ByteWriter,
    header2_base: usize,
    table: TableRef,
    transforms: &[SrcBoneTransform],
) -> IResult<()> {
    for (i, transform) in transforms.iter().enumerate() {
        let base = w.table_slot(
            "source bone transforms",
            header2_base,
            table,
            SRC_BONE_TRANSFORM_SIZE,
            i,
        )?;
        w.record(base)
            .i32(transform.name_offset)
            .f32s(&transform.pre_transform)
            .f32s(&transform.post_transform);
        w.put_name("source bone name", base, transform.name_offset, &transform.name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FileKind;

    fn bones(parents: &[i32]) -> Vec<Bone> {
        parents
            .iter()
            .map(|&parent| Bone {
                name: String::new(),
                name_offset: 0,
                parent,
                bone_controllers: [-1; 6],
                position: [0.0; 3],
                quaternion: [0.0, 0.0, 0.0, 1.0],
                rotation: [0.0; 3],
                position_scale: [0.0; 3],
                rotation_scale: [0.0; 3],
                pose_to_bone: [0.0; 12],
                alignment: [0.0; 4],
                flags: 0,
                proc_type: 0,
                proc_index: 0,
                physics_bone: 0,
                surface_prop: String::new(),
                surface_prop_offset: 0,
                contents: 0,
                unused: [0; 8],
            })
            .collect()
    }

    #[test]
    fn forest_is_accepted() {
        assert_eq!(find_hierarchy_fault(&bones(&[-1, 0, 0, 1, -1, 4])), None);
        assert_eq!(find_hierarchy_fault(&bones(&[])), None);
    }

    #[test]
    fn forward_references_are_allowed() {
        // bone 0's parent appears later in the table
        assert_eq!(find_hierarchy_fault(&bones(&[2, -1, 1])), None);
    }

    #[test]
    fn two_cycle_is_rejected() {
        let fault = find_hierarchy_fault(&bones(&[-1, 2, 1]));
        assert!(matches!(fault, Some(1 | 2)));
    }

    #[test]
    fn self_parent_is_rejected() {
        assert_eq!(find_hierarchy_fault(&bones(&[-1, 1])), Some(1));
    }

    #[test]
    fn out_of_range_parent_is_rejected() {
        assert_eq!(find_hierarchy_fault(&bones(&[-1, 7])), Some(1));
        assert_eq!(find_hierarchy_fault(&bones(&[-2])), Some(0));
    }

    #[test]
    fn cycle_reported_at_bone_record() {
        let data = [0u8; 8];
        let file = FileView::new(&data, FileKind::Primary);
        let table = TableRef {
            count: 3,
            offset: 1000,
        };
        let err = validate_hierarchy(&file, table, &bones(&[1, 2, 0])).unwrap_err();
        assert!(err.kind.is_malformed_hierarchy());
        assert_eq!(err.offset, 1000);
    }
}
