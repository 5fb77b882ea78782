//! Builders for small synthetic model triples.
//!
//! Tables are laid out in the order the readers visit them, with each table's
//! strings placed right after it, so truncating a buffer inside a table makes
//! that table the first one to fail.

use crate::data::parser_utils::resolve_relptr;
use crate::data::writer::ByteWriter;
use crate::error::FileKind;
use crate::models::animation::{ANIM_DESC_SIZE, EVENT_SIZE, SEQ_DESC_SIZE};
use crate::models::body::{BODY_PART_SIZE, MESH_SIZE, MODEL_SIZE};
use crate::models::header::{STUDIO_HEADER_SIZE, STUDIO_HEADER2_SIZE, STUDIO_MAGIC};
use crate::models::materials::TEXTURE_SIZE;
use crate::models::skeleton::{BONE_SIZE, SRC_BONE_TRANSFORM_SIZE};
use crate::models::vtx::{
    BONE_STATE_CHANGE_SIZE, HARDWARE_VERTEX_SIZE, MATERIAL_REPLACEMENT_LIST_SIZE,
    MATERIAL_REPLACEMENT_SIZE, STRIP_GROUP_SIZE, STRIP_IS_TRILIST, STRIP_SIZE, StripFile,
    VTX_BODY_PART_SIZE, VTX_HEADER_SIZE, VTX_LOD_SIZE, VTX_MESH_SIZE, VTX_MODEL_SIZE,
    VTX_VERSION,
};
use crate::models::vvd::{
    FIXUP_SIZE, MAX_NUM_LODS, TANGENT_SIZE, VERTEX_SIZE, VVD_HEADER_SIZE, VVD_MAGIC, VVD_VERSION,
};

fn rel(from: usize, to: usize) -> i32 {
    i32::try_from(to).unwrap() - i32::try_from(from).unwrap()
}

fn abs(value: usize) -> i32 {
    i32::try_from(value).unwrap()
}

fn count(len: usize) -> i32 {
    i32::try_from(len).unwrap()
}

/// Write `text` NUL-terminated at `at`, returning the position after it.
fn string(w: &mut ByteWriter, at: usize, text: &str) -> usize {
    w.put_cstr(at, text);
    at + text.len() + 1
}

const IDENTITY: [f32; 12] = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0];

pub struct MdlBuilder {
    checksum: i32,
    bones: Vec<(String, i32)>,
    meshes: Vec<i32>,
    lod_counts: Option<Vec<Vec<i32>>>,
    header2: Option<f32>,
    sequence: Option<(String, String)>,
}

impl MdlBuilder {
    /// One root bone, one texture, and one body part holding one model with a 3-vertex mesh.
    pub fn minimal() -> Self {
        Self {
            checksum: 0x1234,
            bones: vec![("root".to_string(), -1)],
            meshes: vec![3],
            lod_counts: None,
            header2: None,
            sequence: None,
        }
    }

    pub fn checksum(mut self, checksum: i32) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn bones(mut self, bones: &[(&str, i32)]) -> Self {
        self.bones = bones
            .iter()
            .map(|(name, parent)| (name.to_string(), *parent))
            .collect();
        self
    }

    /// Vertex counts of the single model's meshes.
    pub fn meshes(mut self, counts: &[i32]) -> Self {
        self.meshes = counts.to_vec();
        self
    }

    /// Per-mesh vertex counts for each LOD; by default every LOD repeats the LOD 0 count.
    pub fn lod_counts(mut self, counts: &[&[i32]]) -> Self {
        self.lod_counts = Some(counts.iter().map(|c| c.to_vec()).collect());
        self
    }

    /// Attach an extension header carrying one source bone transform.
    pub fn with_header2(mut self, max_eye_deflection: f32) -> Self {
        self.header2 = Some(max_eye_deflection);
        self
    }

    /// One animation and a sequence blending it, with a single named event.
    pub fn with_sequence(mut self, label: &str, event: &str) -> Self {
        self.sequence = Some((label.to_string(), event.to_string()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut w = ByteWriter::with_len(FileKind::Primary, STUDIO_HEADER_SIZE);
        let mut name = [0u8; 64];
        name[..8].copy_from_slice(b"test.mdl");
        w.record(0)
            .u32(STUDIO_MAGIC)
            .i32(48)
            .i32(self.checksum)
            .bytes(&name);
        let mut cursor = STUDIO_HEADER_SIZE;

        if let Some(deflection) = self.header2 {
            let header2 = cursor;
            let transform = header2 + STUDIO_HEADER2_SIZE;
            w.record(400).i32(abs(header2));
            w.record(header2)
                .i32(1)
                .i32(rel(header2, transform))
                .i32(0)
                .f32(deflection)
                .i32(0);
            w.put_bytes(header2 + 20, &[0; 256]);
            w.record(transform)
                .i32(count(SRC_BONE_TRANSFORM_SIZE))
                .f32s(&IDENTITY)
                .f32s(&IDENTITY);
            cursor = string(&mut w, transform + SRC_BONE_TRANSFORM_SIZE, "root");
        }

        w.record(308).i32(abs(cursor));
        cursor = string(&mut w, cursor, "metal");

        // bones
        let bone_table = cursor;
        w.record(156).i32(count(self.bones.len())).i32(abs(bone_table));
        cursor = bone_table + self.bones.len() * BONE_SIZE;
        for (i, (bone_name, parent)) in self.bones.iter().enumerate() {
            let base = bone_table + i * BONE_SIZE;
            w.record(base)
                .i32(rel(base, cursor))
                .i32(*parent)
                .i32s(&[-1; 6])
                .f32s(&[0.0, 0.0, i as f32])
                .f32s(&[0.0, 0.0, 0.0, 1.0]);
            w.record(base + 96).f32s(&IDENTITY);
            w.put_bytes(base + BONE_SIZE - 1, &[0]);
            cursor = string(&mut w, cursor, bone_name);
        }

        if let Some((label, event)) = &self.sequence {
            let anim = cursor;
            w.record(180).i32(1).i32(abs(anim));
            w.record(anim)
                .i32(-abs(anim))
                .i32(count(ANIM_DESC_SIZE))
                .f32(30.0)
                .i32(0)
                .i32(10);
            w.put_bytes(anim + ANIM_DESC_SIZE - 1, &[0]);
            cursor = string(&mut w, anim + ANIM_DESC_SIZE, &format!("@{label}"));

            let seq = cursor;
            w.record(188).i32(1).i32(abs(seq));
            let label_at = seq + SEQ_DESC_SIZE;
            let event_at = label_at + label.len() + 1;
            let event_name = event_at + EVENT_SIZE;
            let blends = event_name + event.len() + 1;
            let weights = blends + 2;
            w.record(seq)
                .i32(-abs(seq))
                .i32(rel(seq, label_at))
                .i32(0)
                .i32(0)
                .i32(-1)
                .i32(0)
                .i32(1)
                .i32(rel(seq, event_at));
            w.record(seq + 56)
                .i32(1)
                .i32(rel(seq, blends))
                .i32(0)
                .i32s(&[1, 1])
                .i32s(&[-1, -1]);
            w.record(seq + 156).i32(rel(seq, weights));
            w.put_bytes(seq + SEQ_DESC_SIZE - 1, &[0]);
            string(&mut w, label_at, label);
            w.record(event_at).f32(0.5).i32(0).i32(5004);
            w.record(event_at + 76).i32(rel(event_at, event_name));
            string(&mut w, event_name, event);
            w.record(blends).i16(0);
            let mut rec = w.record(weights);
            for _ in &self.bones {
                rec.f32(1.0);
            }
            cursor = weights + self.bones.len() * 4;
        }

        // textures
        let texture = cursor;
        w.record(204).i32(1).i32(abs(texture));
        w.record(texture).i32(count(TEXTURE_SIZE));
        w.put_bytes(texture + TEXTURE_SIZE - 1, &[0]);
        cursor = string(&mut w, texture + TEXTURE_SIZE, "skin");

        // one skin family referencing texture 0
        w.record(220).i32(1).i32(1).i32(abs(cursor));
        w.record(cursor).i16(0);
        cursor += 2;

        // body part, its name, model, meshes
        let part = cursor;
        let part_name = part + BODY_PART_SIZE;
        let model = part_name + "body".len() + 1;
        let meshes = model + MODEL_SIZE;
        w.record(232).i32(1).i32(abs(part));
        w.record(part)
            .i32(rel(part, part_name))
            .i32(1)
            .i32(1)
            .i32(rel(part, model));
        string(&mut w, part_name, "body");

        let mut model_name = [0u8; 64];
        model_name[..6].copy_from_slice(b"model0");
        let total: i32 = self.meshes.iter().sum();
        w.record(model)
            .bytes(&model_name)
            .i32(0)
            .f32(16.0)
            .i32(count(self.meshes.len()))
            .i32(rel(model, meshes))
            .i32(total)
            .i32(0);
        w.put_bytes(model + MODEL_SIZE - 1, &[0]);

        let mut offset = 0;
        for (k, vertices) in self.meshes.iter().enumerate() {
            let base = meshes + k * MESH_SIZE;
            let mut lods = [*vertices; MAX_NUM_LODS];
            if let Some(counts) = &self.lod_counts {
                lods = [0; MAX_NUM_LODS];
                lods[..counts[k].len()].copy_from_slice(&counts[k]);
            }
            w.record(base)
                .i32(count(k))
                .i32(rel(base, model))
                .i32(*vertices)
                .i32(offset);
            w.record(base + 32).i32(count(k));
            w.record(base + 52).i32s(&lods);
            w.put_bytes(base + MESH_SIZE - 1, &[0]);
            offset += vertices;
        }
        let len = meshes + self.meshes.len() * MESH_SIZE;
        w.record(76).i32(abs(len));
        w.into_inner()
    }
}

pub struct VvdBuilder {
    checksum: i32,
    lods: Vec<i32>,
    fixups: Vec<(i32, i32, i32)>,
    tangents: bool,
}

impl VvdBuilder {
    /// A single LOD of 3 vertices; vertex `i` sits at `[i, 0, 0]` fully weighted to bone 0.
    pub fn new(checksum: i32) -> Self {
        Self {
            checksum,
            lods: vec![3],
            fixups: Vec::new(),
            tangents: false,
        }
    }

    pub fn lods(mut self, counts: &[i32]) -> Self {
        self.lods = counts.to_vec();
        self
    }

    /// `(lod, source_vertex_id, vertex_count)` entries.
    pub fn fixups(mut self, fixups: &[(i32, i32, i32)]) -> Self {
        self.fixups = fixups.to_vec();
        self
    }

    pub fn tangents(mut self) -> Self {
        self.tangents = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let vertex_count = self
            .fixups
            .iter()
            .map(|(_, start, len)| start + len)
            .chain(self.lods.first().copied())
            .max()
            .map_or(0, |n| usize::try_from(n).unwrap());

        let fixup_table = VVD_HEADER_SIZE;
        let vertex_data = fixup_table + self.fixups.len() * FIXUP_SIZE;
        let tangent_data = vertex_data + vertex_count * VERTEX_SIZE;

        let mut lod_counts = [0; MAX_NUM_LODS];
        lod_counts[..self.lods.len()].copy_from_slice(&self.lods);
        let mut w = ByteWriter::new(FileKind::Vertex);
        w.record(0)
            .u32(VVD_MAGIC)
            .i32(VVD_VERSION)
            .i32(self.checksum)
            .i32(count(self.lods.len()))
            .i32s(&lod_counts)
            .i32(count(self.fixups.len()))
            .i32(abs(fixup_table))
            .i32(abs(vertex_data))
            .i32(if self.tangents { abs(tangent_data) } else { 0 });

        for (i, (lod, start, len)) in self.fixups.iter().enumerate() {
            w.record(fixup_table + i * FIXUP_SIZE)
                .i32(*lod)
                .i32(*start)
                .i32(*len);
        }
        for i in 0..vertex_count {
            w.record(vertex_data + i * VERTEX_SIZE)
                .f32s(&[1.0, 0.0, 0.0])
                .bytes(&[0, 0, 0])
                .u8(1)
                .f32s(&[i as f32, 0.0, 0.0])
                .f32s(&[0.0, 0.0, 1.0])
                .f32s(&[0.0, 0.0]);
        }
        if self.tangents {
            for i in 0..vertex_count {
                w.record(tangent_data + i * TANGENT_SIZE)
                    .f32s(&[0.0, 0.0, 1.0, 1.0]);
            }
        }
        w.into_inner()
    }
}

pub struct VtxBuilder {
    checksum: i32,
    /// Per LOD, per mesh, the `origMeshVertID` of each hardware vertex.
    lods: Vec<Vec<Vec<u16>>>,
    body_parts: usize,
    models: usize,
}

impl VtxBuilder {
    /// One body part with one model and one (initially empty) LOD.
    pub fn new(checksum: i32) -> Self {
        Self {
            checksum,
            lods: vec![Vec::new()],
            body_parts: 1,
            models: 1,
        }
    }

    /// Emit `count` body parts, all sharing one model table.
    pub fn body_parts(mut self, count: usize) -> Self {
        self.body_parts = count;
        self
    }

    /// Emit `count` models per body part, all sharing one LOD table.
    pub fn models(mut self, count: usize) -> Self {
        self.models = count;
        self
    }

    /// Append a mesh to LOD 0 whose single strip group holds one hardware
    /// vertex per id and an identity triangle-list index buffer.
    pub fn mesh(mut self, orig_ids: &[u16]) -> Self {
        self.lods[0].push(orig_ids.to_vec());
        self
    }

    /// Repeat LOD 0's meshes until there are `count` LODs.
    pub fn lods(mut self, count: usize) -> Self {
        let first = self.lods[0].clone();
        self.lods.resize(count, first);
        self
    }

    pub fn replace_mesh(mut self, lod: usize, mesh: usize, orig_ids: &[u16]) -> Self {
        self.lods[lod][mesh] = orig_ids.to_vec();
        self
    }

    /// Absolute offset of the first index of the first strip group.
    pub fn first_index_offset(vtx: &StripFile) -> usize {
        let step = |base: usize, relative: i32| resolve_relptr(base, relative).unwrap();
        let part = &vtx.body_parts[0];
        let model = &part.models[0];
        let lod = &model.lods[0];
        let mesh = &lod.meshes[0];
        let group = &mesh.strip_groups[0];
        let part_base = step(0, vtx.header.body_parts.offset);
        let model_base = step(part_base, part.model_table.offset);
        let lod_base = step(model_base, model.lod_table.offset);
        let mesh_base = step(lod_base, lod.mesh_table.offset);
        let group_base = step(mesh_base, mesh.strip_group_table.offset);
        step(group_base, group.index_table.offset)
    }

    pub fn build(self) -> Vec<u8> {
        let lod_count = self.lods.len();
        let mut w = ByteWriter::new(FileKind::Strip);

        let parts = VTX_HEADER_SIZE;
        let models = parts + self.body_parts * VTX_BODY_PART_SIZE;
        let lods = models + self.models * VTX_MODEL_SIZE;
        let mut cursor = lods + lod_count * VTX_LOD_SIZE;
        for p in 0..self.body_parts {
            let part = parts + p * VTX_BODY_PART_SIZE;
            w.record(part).i32(count(self.models)).i32(rel(part, models));
        }
        for m in 0..self.models {
            let model = models + m * VTX_MODEL_SIZE;
            w.record(model).i32(count(lod_count)).i32(rel(model, lods));
        }

        for (l, meshes) in self.lods.iter().enumerate() {
            let lod_base = lods + l * VTX_LOD_SIZE;
            let mesh_table = cursor;
            cursor += meshes.len() * VTX_MESH_SIZE;
            w.record(lod_base)
                .i32(count(meshes.len()))
                .i32(rel(lod_base, mesh_table))
                .f32(l as f32 * 12.0);

            for (k, ids) in meshes.iter().enumerate() {
                let mesh_base = mesh_table + k * VTX_MESH_SIZE;
                let group = cursor;
                let vertices = group + STRIP_GROUP_SIZE;
                let indices = vertices + ids.len() * HARDWARE_VERTEX_SIZE;
                let strip = indices + ids.len() * 2;
                let change = strip + STRIP_SIZE;
                cursor = change + BONE_STATE_CHANGE_SIZE;

                w.record(mesh_base).i32(1).i32(rel(mesh_base, group)).u8(0);
                w.record(group)
                    .i32(count(ids.len()))
                    .i32(rel(group, vertices))
                    .i32(count(ids.len()))
                    .i32(rel(group, indices))
                    .i32(1)
                    .i32(rel(group, strip))
                    .u8(0);
                for (i, id) in ids.iter().enumerate() {
                    w.record(vertices + i * HARDWARE_VERTEX_SIZE)
                        .bytes(&[0, 1, 2])
                        .u8(1)
                        .u16(*id)
                        .bytes(&[0, 0xFF, 0xFF]);
                }
                let mut rec = w.record(indices);
                for i in 0..ids.len() {
                    rec.u16(u16::try_from(i).unwrap());
                }
                w.record(strip)
                    .i32(count(ids.len()))
                    .i32(0)
                    .i32(count(ids.len()))
                    .i32(0)
                    .i16(1)
                    .u8(STRIP_IS_TRILIST)
                    .i32(1)
                    .i32(rel(strip, change));
                w.record(change).i32(0).i32(0);
            }
        }

        let lists = cursor;
        cursor += lod_count * MATERIAL_REPLACEMENT_LIST_SIZE;
        for l in 0..lod_count {
            let list = lists + l * MATERIAL_REPLACEMENT_LIST_SIZE;
            let replacement = cursor;
            w.record(list).i32(1).i32(rel(list, replacement));
            w.record(replacement)
                .i16(0)
                .i32(count(MATERIAL_REPLACEMENT_SIZE));
            cursor = string(&mut w, replacement + MATERIAL_REPLACEMENT_SIZE, "alt_skin");
        }

        w.record(0)
            .i32(VTX_VERSION)
            .i32(24)
            .u16(53)
            .u16(9)
            .i32(3)
            .i32(self.checksum)
            .i32(count(lod_count))
            .i32(abs(lists))
            .i32(count(self.body_parts))
            .i32(abs(parts));
        w.into_inner()
    }
}
