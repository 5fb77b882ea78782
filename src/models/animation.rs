//! Animation descriptors, sequences and the small tables hanging off them.
//!
//! Compressed animation streams, IK rules, sections and local hierarchy data
//! are not decoded; their count/offset fields are kept so the records can be
//! written back in place.

use winnow::Parser;
use winnow::binary::{le_f32, le_i16, le_i32};

use crate::data::parser_utils::{
    FileView, TableRef, Vector3, WResult, parse_byte_array, parse_f32_array, parse_i32_array,
    parse_table_ref, parse_vector3,
};
use crate::data::writer::ByteWriter;
use crate::error::IResult;
use crate::models::skeleton::{IkLock, parse_ik_locks, write_ik_locks};

pub const ANIM_DESC_SIZE: usize = 100;
pub const MOVEMENT_SIZE: usize = 44;
pub const SEQ_DESC_SIZE: usize = 212;
pub const EVENT_SIZE: usize = 80;
pub const AUTO_LAYER_SIZE: usize = 24;
pub const ANIM_BLOCK_SIZE: usize = 8;
pub const INCLUDE_MODEL_SIZE: usize = 8;

/// `mstudioanimdesc_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AnimDesc {
    /// Negative offset back to the header.
    pub base_offset: i32,
    pub name: String,
    pub name_offset: i32,
    pub fps: f32,
    pub flags: i32,
    pub frame_count: i32,
    /// Relative to this descriptor.
    pub movement_table: TableRef,
    pub movements: Vec<Movement>,
    pub unused1: [i32; 6],
    /// Index into the animation block table, 0 when the data is stored inline.
    pub anim_block: i32,
    pub anim_index: i32,
    pub ik_rules: TableRef,
    pub anim_block_ik_rule_index: i32,
    pub local_hierarchy: TableRef,
    pub section_index: i32,
    pub section_frames: i32,
    pub zero_frame_span: i16,
    pub zero_frame_count: i16,
    pub zero_frame_index: i32,
    pub zero_frame_stall_time: f32,
}

/// `mstudiomovement_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Movement {
    pub end_frame: i32,
    pub motion_flags: i32,
    pub v0: f32,
    pub v1: f32,
    pub angle: f32,
    pub vector: Vector3,
    pub position: Vector3,
}

fn parse_anim_desc(input: &mut &[u8]) -> WResult<AnimDesc> {
    Ok(AnimDesc {
        base_offset: le_i32.parse_next(input)?,
        name_offset: le_i32.parse_next(input)?,
        fps: le_f32.parse_next(input)?,
        flags: le_i32.parse_next(input)?,
        frame_count: le_i32.parse_next(input)?,
        movement_table: parse_table_ref(input)?,
        unused1: parse_i32_array::<6>(input)?,
        anim_block: le_i32.parse_next(input)?,
        anim_index: le_i32.parse_next(input)?,
        ik_rules: parse_table_ref(input)?,
        anim_block_ik_rule_index: le_i32.parse_next(input)?,
        local_hierarchy: parse_table_ref(input)?,
        section_index: le_i32.parse_next(input)?,
        section_frames: le_i32.parse_next(input)?,
        zero_frame_span: le_i16.parse_next(input)?,
        zero_frame_count: le_i16.parse_next(input)?,
        zero_frame_index: le_i32.parse_next(input)?,
        zero_frame_stall_time: le_f32.parse_next(input)?,
        name: String::new(),
        movements: Vec::new(),
    })
}

fn parse_movement(input: &mut &[u8]) -> WResult<Movement> {
    Ok(Movement {
        end_frame: le_i32.parse_next(input)?,
        motion_flags: le_i32.parse_next(input)?,
        v0: le_f32.parse_next(input)?,
        v1: le_f32.parse_next(input)?,
        angle: le_f32.parse_next(input)?,
        vector: parse_vector3(input)?,
        position: parse_vector3(input)?,
    })
}

pub fn parse_anim_descs(file: &FileView<'_>, table: TableRef) -> IResult<Vec<AnimDesc>> {
    let view = file.table_ref("animation descriptors", 0, table, ANIM_DESC_SIZE)?;
    file.parse_table(
        "animation descriptors",
        &view,
        parse_anim_desc,
        |base, mut anim| {
            anim.name = file.name_at("animation name", base, anim.name_offset)?;
            let movements = file.table_ref("movements", base, anim.movement_table, MOVEMENT_SIZE)?;
            anim.movements = file.parse_records("movements", &movements, parse_movement)?;
            Ok(anim)
        },
    )
}

pub(crate) fn write_anim_descs(
    w: &mut ByteWriter,
    table: TableRef,
    anims: &[AnimDesc],
) -> IResult<()> {
    for (i, anim) in anims.iter().enumerate() {
        let base = w.table_slot("animation descriptors", 0, table, ANIM_DESC_SIZE, i)?;
        w.record(base)
            .i32(anim.base_offset)
            .i32(anim.name_offset)
            .f32(anim.fps)
            .i32(anim.flags)
            .i32(anim.frame_count)
            .table_ref(anim.movement_table)
            .i32s(&anim.unused1)
            .i32(anim.anim_block)
            .i32(anim.anim_index)
            .table_ref(anim.ik_rules)
            .i32(anim.anim_block_ik_rule_index)
            .table_ref(anim.local_hierarchy)
            .i32(anim.section_index)
            .i32(anim.section_frames)
            .i16(anim.zero_frame_span)
            .i16(anim.zero_frame_count)
            .i32(anim.zero_frame_index)
            .f32(anim.zero_frame_stall_time);
        w.put_name("animation name", base, anim.name_offset, &anim.name)?;
        for (j, movement) in anim.movements.iter().enumerate() {
            let mv = w.table_slot("movements", base, anim.movement_table, MOVEMENT_SIZE, j)?;
            w.record(mv)
                .i32(movement.end_frame)
                .i32(movement.motion_flags)
                .f32(movement.v0)
                .f32(movement.v1)
                .f32(movement.angle)
                .f32s(&movement.vector)
                .f32s(&movement.position);
        }
    }
    Ok(())
}

/// `mstudioseqdesc_t`. Every sub-table offset is relative to the sequence record.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Sequence {
    pub base_offset: i32,
    pub label: String,
    pub label_offset: i32,
    pub activity_name: String,
    pub activity_name_offset: i32,
    pub flags: i32,
    pub activity: i32,
    pub activity_weight: i32,
    pub event_table: TableRef,
    pub events: Vec<Event>,
    pub bbmin: Vector3,
    pub bbmax: Vector3,
    pub blend_count: i32,
    pub anim_index_index: i32,
    /// Animation descriptor indices, `group_size[0] * group_size[1]` row-major.
    pub blends: Vec<i16>,
    pub movement_index: i32,
    pub group_size: [i32; 2],
    pub param_index: [i32; 2],
    pub param_start: [f32; 2],
    pub param_end: [f32; 2],
    pub param_parent: i32,
    pub fade_in_time: f32,
    pub fade_out_time: f32,
    pub local_entry_node: i32,
    pub local_exit_node: i32,
    pub node_flags: i32,
    pub entry_phase: f32,
    pub exit_phase: f32,
    pub last_frame: f32,
    pub next_seq: i32,
    pub pose: i32,
    pub ik_rule_count: i32,
    pub auto_layer_table: TableRef,
    pub auto_layers: Vec<AutoLayer>,
    pub weight_list_index: i32,
    /// One weight per bone when present.
    pub weights: Vec<f32>,
    pub pose_key_index: i32,
    pub pose_keys: Vec<f32>,
    pub ik_lock_table: TableRef,
    pub ik_locks: Vec<IkLock>,
    pub key_value_index: i32,
    pub key_value_size: i32,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub key_values: Vec<u8>,
    pub cycle_pose_index: i32,
    pub unused: [i32; 7],
}

impl Sequence {
    /// Animation descriptor index at blend grid cell `(x, y)`.
    pub fn blend(&self, x: usize, y: usize) -> Option<usize> {
        let width = usize::try_from(self.group_size[0]).ok()?;
        if x >= width {
            return None;
        }
        let index = *self.blends.get(y * width + x)?;
        usize::try_from(index).ok()
    }

    /// The key-value text up to its terminator.
    pub fn key_values_text(&self) -> String {
        crate::data::parser_utils::fixed_name(&self.key_values)
    }

    fn blend_cells(&self) -> i32 {
        self.group_size[0]
            .max(0)
            .saturating_mul(self.group_size[1].max(0))
    }
}

/// `mstudioevent_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Event {
    pub cycle: f32,
    pub event: i32,
    pub kind: i32,
    pub options: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub raw_options: [u8; 64],
    pub name: String,
    pub name_offset: i32,
}

/// `mstudioautolayer_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AutoLayer {
    pub sequence: i16,
    pub pose: i16,
    pub flags: i32,
    pub start: f32,
    pub peak: f32,
    pub tail: f32,
    pub end: f32,
}

fn parse_sequence(input: &mut &[u8]) -> WResult<Sequence> {
    Ok(Sequence {
        base_offset: le_i32.parse_next(input)?,
        label_offset: le_i32.parse_next(input)?,
        activity_name_offset: le_i32.parse_next(input)?,
        flags: le_i32.parse_next(input)?,
        activity: le_i32.parse_next(input)?,
        activity_weight: le_i32.parse_next(input)?,
        event_table: parse_table_ref(input)?,
        bbmin: parse_vector3(input)?,
        bbmax: parse_vector3(input)?,
        blend_count: le_i32.parse_next(input)?,
        anim_index_index: le_i32.parse_next(input)?,
        movement_index: le_i32.parse_next(input)?,
        group_size: parse_i32_array::<2>(input)?,
        param_index: parse_i32_array::<2>(input)?,
        param_start: parse_f32_array::<2>(input)?,
        param_end: parse_f32_array::<2>(input)?,
        param_parent: le_i32.parse_next(input)?,
        fade_in_time: le_f32.parse_next(input)?,
        fade_out_time: le_f32.parse_next(input)?,
        local_entry_node: le_i32.parse_next(input)?,
        local_exit_node: le_i32.parse_next(input)?,
        node_flags: le_i32.parse_next(input)?,
        entry_phase: le_f32.parse_next(input)?,
        exit_phase: le_f32.parse_next(input)?,
        last_frame: le_f32.parse_next(input)?,
        next_seq: le_i32.parse_next(input)?,
        pose: le_i32.parse_next(input)?,
        ik_rule_count: le_i32.parse_next(input)?,
        auto_layer_table: parse_table_ref(input)?,
        weight_list_index: le_i32.parse_next(input)?,
        pose_key_index: le_i32.parse_next(input)?,
        ik_lock_table: parse_table_ref(input)?,
        key_value_index: le_i32.parse_next(input)?,
        key_value_size: le_i32.parse_next(input)?,
        cycle_pose_index: le_i32.parse_next(input)?,
        unused: parse_i32_array::<7>(input)?,
        label: String::new(),
        activity_name: String::new(),
        events: Vec::new(),
        blends: Vec::new(),
        auto_layers: Vec::new(),
        weights: Vec::new(),
        pose_keys: Vec::new(),
        ik_locks: Vec::new(),
        key_values: Vec::new(),
    })
}

fn parse_event(input: &mut &[u8]) -> WResult<Event> {
    let cycle = le_f32.parse_next(input)?;
    let event = le_i32.parse_next(input)?;
    let kind = le_i32.parse_next(input)?;
    let raw_options = parse_byte_array::<64>(input)?;
    let name_offset = le_i32.parse_next(input)?;
    Ok(Event {
        cycle,
        event,
        kind,
        options: crate::data::parser_utils::fixed_name(&raw_options),
        raw_options,
        name: String::new(),
        name_offset,
    })
}

fn parse_auto_layer(input: &mut &[u8]) -> WResult<AutoLayer> {
    Ok(AutoLayer {
        sequence: le_i16.parse_next(input)?,
        pose: le_i16.parse_next(input)?,
        flags: le_i32.parse_next(input)?,
        start: le_f32.parse_next(input)?,
        peak: le_f32.parse_next(input)?,
        tail: le_f32.parse_next(input)?,
        end: le_f32.parse_next(input)?,
    })
}

fn parse_f32_table(
    file: &FileView<'_>,
    table: &'static str,
    base: usize,
    index: i32,
    count: i32,
) -> IResult<Vec<f32>> {
    if index == 0 {
        return Ok(Vec::new());
    }
    let view = file.table(table, base, index, count, 4)?;
    file.parse_records(table, &view, le_f32)
}

/// Parse the sequence table. Blend cells must name one of the `anim_count`
/// animation descriptors; a weight list holds `bone_count` entries.
pub fn parse_sequences(
    file: &FileView<'_>,
    table: TableRef,
    anim_count: usize,
    bone_count: usize,
) -> IResult<Vec<Sequence>> {
    let view = file.table_ref("sequences", 0, table, SEQ_DESC_SIZE)?;
    let bone_count = i32::try_from(bone_count).unwrap_or(i32::MAX);
    file.parse_table("sequences", &view, parse_sequence, |base, mut seq| {
        seq.label = file.name_at("sequence label", base, seq.label_offset)?;
        seq.activity_name = file.name_at("activity name", base, seq.activity_name_offset)?;

        let events = file.table_ref("events", base, seq.event_table, EVENT_SIZE)?;
        seq.events = file.parse_table("events", &events, parse_event, |ev_base, mut ev| {
            ev.name = file.name_at("event name", ev_base, ev.name_offset)?;
            Ok(ev)
        })?;

        let blends = file.table("blends", base, seq.anim_index_index, seq.blend_cells(), 2)?;
        seq.blends = file.parse_records("blends", &blends, le_i16)?;
        if let Some(bad) = seq
            .blends
            .iter()
            .find(|&&anim| usize::try_from(anim).map_or(true, |anim| anim >= anim_count))
        {
            return Err(file.topology(
                blends.start(),
                format!(
                    "sequence {:?} blends animation {bad}, but only {anim_count} exist",
                    seq.label
                ),
            ));
        }

        let layers = file.table_ref("auto layers", base, seq.auto_layer_table, AUTO_LAYER_SIZE)?;
        seq.auto_layers = file.parse_records("auto layers", &layers, parse_auto_layer)?;
        seq.weights =
            parse_f32_table(file, "weight list", base, seq.weight_list_index, bone_count)?;
        let pose_keys = seq.group_size[0].saturating_add(seq.group_size[1]);
        seq.pose_keys = parse_f32_table(file, "pose keys", base, seq.pose_key_index, pose_keys)?;
        seq.ik_locks = parse_ik_locks(file, base, seq.ik_lock_table)?;
        if seq.key_value_size > 0 {
            let len = usize::try_from(seq.key_value_size).unwrap_or(0);
            seq.key_values = file
                .bytes_at("sequence key values", base, seq.key_value_index, len)?
                .to_vec();
        }
        Ok(seq)
    })
}

pub(crate) fn write_sequences(
    w: &mut ByteWriter,
    table: TableRef,
    sequences: &[Sequence],
) -> IResult<()> {
    for (i, seq) in sequences.iter().enumerate() {
        let base = w.table_slot("sequences", 0, table, SEQ_DESC_SIZE, i)?;
        w.record(base)
            .i32(seq.base_offset)
            .i32(seq.label_offset)
            .i32(seq.activity_name_offset)
            .i32(seq.flags)
            .i32(seq.activity)
            .i32(seq.activity_weight)
            .table_ref(seq.event_table)
            .f32s(&seq.bbmin)
            .f32s(&seq.bbmax)
            .i32(seq.blend_count)
            .i32(seq.anim_index_index)
            .i32(seq.movement_index)
            .i32s(&seq.group_size)
            .i32s(&seq.param_index)
            .f32s(&seq.param_start)
            .f32s(&seq.param_end)
            .i32(seq.param_parent)
            .f32(seq.fade_in_time)
            .f32(seq.fade_out_time)
            .i32(seq.local_entry_node)
            .i32(seq.local_exit_node)
            .i32(seq.node_flags)
            .f32(seq.entry_phase)
            .f32(seq.exit_phase)
            .f32(seq.last_frame)
            .i32(seq.next_seq)
            .i32(seq.pose)
            .i32(seq.ik_rule_count)
            .table_ref(seq.auto_layer_table)
            .i32(seq.weight_list_index)
            .i32(seq.pose_key_index)
            .table_ref(seq.ik_lock_table)
            .i32(seq.key_value_index)
            .i32(seq.key_value_size)
            .i32(seq.cycle_pose_index)
            .i32s(&seq.unused);
        w.put_name("sequence label", base, seq.label_offset, &seq.label)?;
        w.put_name("activity name", base, seq.activity_name_offset, &seq.activity_name)?;

        for (j, ev) in seq.events.iter().enumerate() {
            let ev_base = w.table_slot("events", base, seq.event_table, EVENT_SIZE, j)?;
            w.record(ev_base)
                .f32(ev.cycle)
                .i32(ev.event)
                .i32(ev.kind)
                .bytes(&ev.raw_options)
                .i32(ev.name_offset);
            w.put_name("event name", ev_base, ev.name_offset, &ev.name)?;
        }

        if !seq.blends.is_empty() {
            let at = w.resolve("blends", base, seq.anim_index_index)?;
            let mut rec = w.record(at);
            for anim in &seq.blends {
                rec.i16(*anim);
            }
        }

        for (j, layer) in seq.auto_layers.iter().enumerate() {
            let at = w.table_slot("auto layers", base, seq.auto_layer_table, AUTO_LAYER_SIZE, j)?;
            w.record(at)
                .i16(layer.sequence)
                .i16(layer.pose)
                .i32(layer.flags)
                .f32(layer.start)
                .f32(layer.peak)
                .f32(layer.tail)
                .f32(layer.end);
        }

        if !seq.weights.is_empty() {
            let at = w.resolve("weight list", base, seq.weight_list_index)?;
            w.record(at).f32s(&seq.weights);
        }
        if !seq.pose_keys.is_empty() {
            let at = w.resolve("pose keys", base, seq.pose_key_index)?;
            w.record(at).f32s(&seq.pose_keys);
        }
        write_ik_locks(w, base, seq.ik_lock_table, &seq.ik_locks)?;
        if !seq.key_values.is_empty() {
            let at = w.resolve("sequence key values", base, seq.key_value_index)?;
            w.put_bytes(at, &seq.key_values);
        }
    }
    Ok(())
}

/// `mstudioanimblock_t`: a byte range inside the external animation block file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AnimBlock {
    pub data_start: i32,
    pub data_end: i32,
}

pub fn parse_anim_blocks(file: &FileView<'_>, table: TableRef) -> IResult<Vec<AnimBlock>> {
    let view = file.table_ref("animation blocks", 0, table, ANIM_BLOCK_SIZE)?;
    file.parse_records("animation blocks", &view, |input: &mut &[u8]| {
        Ok(AnimBlock {
            data_start: le_i32.parse_next(input)?,
            data_end: le_i32.parse_next(input)?,
        })
    })
}

pub(crate) fn write_anim_blocks(
    w: &mut ByteWriter,
    table: TableRef,
    blocks: &[AnimBlock],
) -> IResult<()> {
    for (i, block) in blocks.iter().enumerate() {
        let at = w.table_slot("animation blocks", 0, table, ANIM_BLOCK_SIZE, i)?;
        w.record(at).i32(block.data_start).i32(block.data_end);
    }
    Ok(())
}

/// `mstudiomodelgroup_t`: another model whose animations this one includes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IncludeModel {
    pub label: String,
    pub label_offset: i32,
    pub file_name: String,
    pub file_name_offset: i32,
}

pub fn parse_include_models(file: &FileView<'_>, table: TableRef) -> IResult<Vec<IncludeModel>> {
    let view = file.table_ref("include models", 0, table, INCLUDE_MODEL_SIZE)?;
    file.parse_table(
        "include models",
        &view,
        |input: &mut &[u8]| Ok((le_i32.parse_next(input)?, le_i32.parse_next(input)?)),
        |base, (label_offset, file_name_offset)| {
            Ok(IncludeModel {
                label: file.name_at("include model label", base, label_offset)?,
                label_offset,
                file_name: file.name_at("include model name", base, file_name_offset)?,
                file_name_offset,
            })
        },
    )
}

pub(crate) fn write_include_models(
    w: &mut ByteWriter,
    table: TableRef,
    models: &[IncludeModel],
) -> IResult<()> {
    for (i, model) in models.iter().enumerate() {
        let base = w.table_slot("include models", 0, table, INCLUDE_MODEL_SIZE, i)?;
        w.record(base)
            .i32(model.label_offset)
            .i32(model.file_name_offset);
        w.put_name("include model label", base, model.label_offset, &model.label)?;
        w.put_name("include model name", base, model.file_name_offset, &model.file_name)?;
    }
    Ok(())
}
