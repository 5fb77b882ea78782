//! Facial flex descriptors and controllers, mouths, and pose parameters.

use winnow::Parser;
use winnow::binary::{le_f32, le_i32};

use crate::data::parser_utils::{FileView, TableRef, Vector3, WResult, parse_vector3};
use crate::data::writer::ByteWriter;
use crate::error::IResult;

pub const FLEX_DESC_SIZE: usize = 4;
pub const FLEX_CONTROLLER_SIZE: usize = 20;
pub const MOUTH_SIZE: usize = 20;
pub const POSE_PARAM_SIZE: usize = 20;

/// `mstudioflexdesc_t`: just a FACS name.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FlexDesc {
    pub facs: String,
    pub facs_offset: i32,
}

pub fn parse_flex_descs(file: &FileView<'_>, table: TableRef) -> IResult<Vec<FlexDesc>> {
    let view = file.table_ref("flex descriptors", 0, table, FLEX_DESC_SIZE)?;
    file.parse_table("flex descriptors", &view, le_i32, |base, facs_offset| {
        Ok(FlexDesc {
            facs: file.name_at("flex descriptor name", base, facs_offset)?,
            facs_offset,
        })
    })
}

pub(crate) fn write_flex_descs(
    w: &mut ByteWriter,
    table: TableRef,
    descs: &[FlexDesc],
) -> IResult<()> {
    for (i, desc) in descs.iter().enumerate() {
        let base = w.table_slot("flex descriptors", 0, table, FLEX_DESC_SIZE, i)?;
        w.record(base).i32(desc.facs_offset);
        w.put_name("flex descriptor name", base, desc.facs_offset, &desc.facs)?;
    }
    Ok(())
}

/// `mstudioflexcontroller_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FlexController {
    pub kind: String,
    pub kind_offset: i32,
    pub name: String,
    pub name_offset: i32,
    pub local_to_global: i32,
    pub min: f32,
    pub max: f32,
}

fn parse_flex_controller(input: &mut &[u8]) -> WResult<FlexController> {
    Ok(FlexController {
        kind_offset: le_i32.parse_next(input)?,
        name_offset: le_i32.parse_next(input)?,
        local_to_global: le_i32.parse_next(input)?,
        min: le_f32.parse_next(input)?,
        max: le_f32.parse_next(input)?,
        kind: String::new(),
        name: String::new(),
    })
}

pub fn parse_flex_controllers(
    file: &FileView<'_>,
    table: TableRef,
) -> IResult<Vec<FlexController>> {
    let view = file.table_ref("flex controllers", 0, table, FLEX_CONTROLLER_SIZE)?;
    file.parse_table(
        "flex controllers",
        &view,
        parse_flex_controller,
        |base, mut ctrl| {
            ctrl.kind = file.name_at("flex controller type", base, ctrl.kind_offset)?;
            ctrl.name = file.name_at("flex controller name", base, ctrl.name_offset)?;
            Ok(ctrl)
        },
    )
}

pub(crate) fn write_flex_controllers(
    w: &mut ByteWriter,
    table: TableRef,
    controllers: &[FlexController],
) -> IResult<()> {
    for (i, ctrl) in controllers.iter().enumerate() {
        let base = w.table_slot("flex controllers", 0, table, FLEX_CONTROLLER_SIZE, i)?;
        w.record(base)
            .i32(ctrl.kind_offset)
            .i32(ctrl.name_offset)
            .i32(ctrl.local_to_global)
            .f32(ctrl.min)
            .f32(ctrl.max);
        w.put_name("flex controller type", base, ctrl.kind_offset, &ctrl.kind)?;
        w.put_name("flex controller name", base, ctrl.name_offset, &ctrl.name)?;
    }
    Ok(())
}

/// `mstudiomouth_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Mouth {
    pub bone: i32,
    pub forward: Vector3,
    pub flex_desc: i32,
}

pub fn parse_mouths(file: &FileView<'_>, table: TableRef) -> IResult<Vec<Mouth>> {
    let view = file.table_ref("mouths", 0, table, MOUTH_SIZE)?;
    file.parse_records("mouths", &view, |input: &mut &[u8]| {
        Ok(Mouth {
            bone: le_i32.parse_next(input)?,
            forward: parse_vector3(input)?,
            flex_desc: le_i32.parse_next(input)?,
        })
    })
}

pub(crate) fn write_mouths(w: &mut ByteWriter, table: TableRef, mouths: &[Mouth]) -> IResult<()> {
    for (i, mouth) in mouths.iter().enumerate() {
        let at = w.table_slot("mouths", 0, table, MOUTH_SIZE, i)?;
        w.record(at)
            .i32(mouth.bone)
            .f32s(&mouth.forward)
            .i32(mouth.flex_desc);
    }
    Ok(())
}

/// `mstudioposeparamdesc_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoseParam {
    pub name: String,
    pub name_offset: i32,
    pub flags: i32,
    pub start: f32,
    pub end: f32,
    /// Wrap range, zero when the parameter does not loop.
    pub loop_range: f32,
}

fn parse_pose_param(input: &mut &[u8]) -> WResult<PoseParam> {
    Ok(PoseParam {
        name_offset: le_i32.parse_next(input)?,
        flags: le_i32.parse_next(input)?,
        start: le_f32.parse_next(input)?,
        end: le_f32.parse_next(input)?,
        loop_range: le_f32.parse_next(input)?,
        name: String::new(),
    })
}

pub fn parse_pose_params(file: &FileView<'_>, table: TableRef) -> IResult<Vec<PoseParam>> {
    let view = file.table_ref("pose parameters", 0, table, POSE_PARAM_SIZE)?;
    file.parse_table("pose parameters", &view, parse_pose_param, |base, mut param| {
        param.name = file.name_at("pose parameter name", base, param.name_offset)?;
        Ok(param)
    })
}

pub(crate) fn write_pose_params(
    w: &mut ByteWriter,
    table: TableRef,
    params: &[PoseParam],
) -> IResult<()> {
    for (i, param) in params.iter().enumerate() {
        let base = w.table_slot("pose parameters", 0, table, POSE_PARAM_SIZE, i)?;
        w.record(base)
            .i32(param.name_offset)
            .i32(param.flags)
            .f32(param.start)
            .f32(param.end)
            .f32(param.loop_range);
        w.put_name("pose parameter name", base, param.name_offset, &param.name)?;
    }
    Ok(())
}
