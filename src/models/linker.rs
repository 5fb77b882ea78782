//! Pairs the three decoded files into one [`Model`].
//!
//! Linking checks every count the files share and every cross-file index
//! before a [`Model`] is returned, so a successful decode never yields a
//! graph with dangling references.

use tracing::debug;

use crate::data::parser_utils::{Vector4, resolve_relptr};
use crate::error::{Error, FileKind, IResult};
use crate::models::body::{BODY_PART_SIZE, MODEL_SIZE, StudioMesh, StudioModel};
use crate::models::mdl::{StudioModelFile, parse_mdl};
use crate::models::options::DecodeOptions;
use crate::models::skeleton::Bone;
use crate::models::vtx::{
    HARDWARE_VERTEX_SIZE, HardwareVertex, STRIP_GROUP_SIZE, StripFile, StripMesh, StripModel,
    VTX_BODY_PART_SIZE, VTX_LOD_SIZE, VTX_MESH_SIZE, VTX_MODEL_SIZE, parse_vtx,
};
use crate::models::vvd::{VertexFile, VertexRecord, parse_vvd};

/// Where one mesh's vertices sit in its LOD's vertex sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LinkedMesh {
    pub vertex_start: usize,
    pub vertex_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LinkedLod {
    pub meshes: Vec<LinkedMesh>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LinkedModel {
    pub lods: Vec<LinkedLod>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LinkedBodyPart {
    pub models: Vec<LinkedModel>,
}

/// The fully linked model graph.
#[derive(Debug)]
pub struct Model<'a> {
    pub mdl: StudioModelFile,
    pub vvd: VertexFile<'a>,
    pub vtx: StripFile,
    links: Vec<LinkedBodyPart>,
}

/// A hardware vertex joined with the source vertex it was built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedVertex<'m> {
    pub hardware: &'m HardwareVertex,
    pub vertex: &'m VertexRecord,
    pub tangent: Option<Vector4>,
}

/// One (body part, model, LOD, mesh) of a [`Model`].
#[derive(Debug, Clone, Copy)]
pub struct MeshView<'m, 'a> {
    owner: &'m Model<'a>,
    pub body_part: usize,
    pub model: usize,
    pub lod: usize,
    pub mesh: usize,
    link: LinkedMesh,
}

/// Decode and link a matched `.mdl` / `.vvd` / `.vtx` triple with default options.
pub fn decode<'a>(mdl: &[u8], vvd: &'a [u8], vtx: &[u8]) -> IResult<Model<'a>> {
    decode_with(mdl, vvd, vtx, &DecodeOptions::default())
}

pub fn decode_with<'a>(
    mdl: &[u8],
    vvd: &'a [u8],
    vtx: &[u8],
    options: &DecodeOptions,
) -> IResult<Model<'a>> {
    let mdl = parse_mdl(mdl, options)?;
    let vvd = parse_vvd(vvd, mdl.checksum(), options)?;
    let vtx = parse_vtx(vtx, mdl.checksum())?;
    Model::link(mdl, vvd, vtx)
}

fn at(base: usize, relative: i32) -> usize {
    resolve_relptr(base, relative).unwrap_or(base)
}

fn mismatch(file: FileKind, offset: usize, what: &str, strip: usize, primary: usize) -> Error {
    Error::topology(
        file,
        offset,
        format!("{what}: strip file has {strip}, primary descriptor has {primary}"),
    )
}

impl<'a> Model<'a> {
    /// Link already-parsed files. The vertex and strip files must have been
    /// checked against `mdl`'s checksum.
    pub fn link(mdl: StudioModelFile, vvd: VertexFile<'a>, vtx: StripFile) -> IResult<Self> {
        let lod_count = vvd.lod_count();
        if vtx.lod_count() != lod_count {
            return Err(Error::topology(
                FileKind::Strip,
                20,
                format!(
                    "strip file has {} LODs, vertex file has {lod_count}",
                    vtx.lod_count()
                ),
            ));
        }
        let declared = usize::try_from(vvd.header.lod_vertex_counts[0]).unwrap_or(0);
        if mdl.total_model_vertices() != declared {
            return Err(Error::topology(
                FileKind::Vertex,
                16,
                format!(
                    "models hold {} vertices, vertex file LOD 0 has {declared}",
                    mdl.total_model_vertices()
                ),
            ));
        }

        let strip_parts = at(0, vtx.header.body_parts.offset);
        if vtx.body_parts.len() != mdl.body_parts.len() {
            return Err(mismatch(
                FileKind::Strip,
                strip_parts,
                "body parts",
                vtx.body_parts.len(),
                mdl.body_parts.len(),
            ));
        }

        // running vertex position per LOD above 0, in body part / model / mesh order
        let mut lod_cursor = vec![0usize; lod_count];
        let mut links = Vec::with_capacity(mdl.body_parts.len());
        for (p, (part, strip_part)) in mdl.body_parts.iter().zip(&vtx.body_parts).enumerate() {
            let part_base = strip_parts + p * VTX_BODY_PART_SIZE;
            let primary_part = at(0, mdl.header.body_parts.offset) + p * BODY_PART_SIZE;
            if strip_part.models.len() != part.models.len() {
                return Err(mismatch(
                    FileKind::Strip,
                    at(part_base, strip_part.model_table.offset),
                    "models",
                    strip_part.models.len(),
                    part.models.len(),
                ));
            }

            let mut models = Vec::with_capacity(part.models.len());
            let strip_models = at(part_base, strip_part.model_table.offset);
            let pairs = part.models.iter().zip(&strip_part.models);
            for (m, (model, strip_model)) in pairs.enumerate() {
                let model_base = strip_models + m * VTX_MODEL_SIZE;
                let primary_model = at(primary_part, part.model_table.offset) + m * MODEL_SIZE;
                let first_vertex = model.first_vertex().ok_or_else(|| {
                    Error::topology(
                        FileKind::Primary,
                        primary_model,
                        format!(
                            "model {:?} vertex index {} is not a vertex boundary",
                            model.name, model.vertex_index
                        ),
                    )
                })?;

                let lods = link_lods(
                    &vvd,
                    model,
                    strip_model,
                    model_base,
                    first_vertex,
                    &mut lod_cursor,
                )?;
                models.push(LinkedModel { lods });
            }
            links.push(LinkedBodyPart { models });
        }

        debug!(
            name = %mdl.header.name,
            lods = lod_count,
            vertices = declared,
            "linked model"
        );
        Ok(Model {
            mdl,
            vvd,
            vtx,
            links,
        })
    }

    pub fn lod_count(&self) -> usize {
        self.vvd.lod_count()
    }

    pub fn links(&self) -> &[LinkedBodyPart] {
        &self.links
    }

    /// Sum of every mesh's LOD 0 vertex count.
    pub fn total_vertex_count(&self) -> usize {
        self.meshes(0).map(|mesh| mesh.vertex_count()).sum()
    }

    pub fn mesh(
        &self,
        body_part: usize,
        model: usize,
        lod: usize,
        mesh: usize,
    ) -> Option<MeshView<'_, 'a>> {
        let link = *self
            .links
            .get(body_part)?
            .models
            .get(model)?
            .lods
            .get(lod)?
            .meshes
            .get(mesh)?;
        Some(MeshView {
            owner: self,
            body_part,
            model,
            lod,
            mesh,
            link,
        })
    }

    /// Every mesh of `lod`, in body part / model / mesh order.
    pub fn meshes(&self, lod: usize) -> impl Iterator<Item = MeshView<'_, 'a>> + '_ {
        self.links.iter().enumerate().flat_map(move |(p, part)| {
            part.models.iter().enumerate().flat_map(move |(m, model)| {
                model.lods.get(lod).into_iter().flat_map(move |linked| {
                    linked.meshes.iter().enumerate().map(move |(k, link)| MeshView {
                        owner: self,
                        body_part: p,
                        model: m,
                        lod,
                        mesh: k,
                        link: *link,
                    })
                })
            })
        })
    }

    pub fn bones(&self) -> &[Bone] {
        &self.mdl.bones
    }

    pub fn bone_by_name(&self, name: &str) -> Option<(usize, &Bone)> {
        self.mdl
            .bones
            .iter()
            .enumerate()
            .find(|(_, bone)| bone.name == name)
    }

    pub fn root_bones(&self) -> impl Iterator<Item = usize> + '_ {
        self.mdl
            .bones
            .iter()
            .enumerate()
            .filter(|(_, bone)| bone.is_root())
            .map(|(i, _)| i)
    }

    pub fn children(&self, bone: usize) -> impl Iterator<Item = usize> + '_ {
        self.mdl
            .bones
            .iter()
            .enumerate()
            .filter(move |(_, b)| b.parent_index() == Some(bone))
            .map(|(i, _)| i)
    }
}

/// Vertex ranges for every LOD of one model. `lod_cursor` carries the running
/// position in each lower LOD's sequence across models.
fn link_lods(
    vvd: &VertexFile<'_>,
    model: &StudioModel,
    strip_model: &StripModel,
    model_base: usize,
    first_vertex: usize,
    lod_cursor: &mut [usize],
) -> IResult<Vec<LinkedLod>> {
    let mut lods = Vec::with_capacity(strip_model.lods.len());
    for (l, strip_lod) in strip_model.lods.iter().enumerate() {
        let lod_base = at(model_base, strip_model.lod_table.offset) + l * VTX_LOD_SIZE;
        let mesh_table = at(lod_base, strip_lod.mesh_table.offset);
        if strip_lod.meshes.len() != model.meshes.len() {
            return Err(mismatch(
                FileKind::Strip,
                mesh_table,
                "meshes",
                strip_lod.meshes.len(),
                model.meshes.len(),
            ));
        }
        let lod_len = vvd.lod_len(l)?;

        let mut meshes = Vec::with_capacity(model.meshes.len());
        for (k, (mesh, strip_mesh)) in model.meshes.iter().zip(&strip_lod.meshes).enumerate() {
            let link = if l == 0 {
                LinkedMesh {
                    vertex_start: usize::try_from(mesh.vertex_offset)
                        .ok()
                        .and_then(|offset| first_vertex.checked_add(offset))
                        .unwrap_or(usize::MAX),
                    vertex_count: usize::try_from(mesh.vertex_count).unwrap_or(0),
                }
            } else {
                let link = LinkedMesh {
                    vertex_start: lod_cursor[l],
                    vertex_count: mesh.lod_vertex_count(l),
                };
                lod_cursor[l] = lod_cursor[l].saturating_add(link.vertex_count);
                link
            };
            let end = link.vertex_start.saturating_add(link.vertex_count);
            if end > lod_len {
                return Err(Error::topology(
                    FileKind::Vertex,
                    16 + l * 4,
                    format!(
                        "mesh {k} of model {:?} needs vertices {}..{end} of LOD {l}, \
                         which has {lod_len}",
                        model.name, link.vertex_start
                    ),
                ));
            }
            check_orig_ids(strip_mesh, mesh_table + k * VTX_MESH_SIZE, link.vertex_count)?;
            meshes.push(link);
        }
        lods.push(LinkedLod { meshes });
    }
    Ok(lods)
}

fn check_orig_ids(strip_mesh: &StripMesh, mesh_base: usize, vertex_count: usize) -> IResult<()> {
    let groups = at(mesh_base, strip_mesh.strip_group_table.offset);
    for (g, group) in strip_mesh.strip_groups.iter().enumerate() {
        let group_base = groups + g * STRIP_GROUP_SIZE;
        if let Some(i) = group
            .vertices
            .iter()
            .position(|v| usize::from(v.orig_mesh_vertex_id) >= vertex_count)
        {
            return Err(Error::topology(
                FileKind::Strip,
                at(group_base, group.vertex_table.offset) + i * HARDWARE_VERTEX_SIZE,
                format!(
                    "hardware vertex references mesh vertex {}, mesh has {vertex_count}",
                    group.vertices[i].orig_mesh_vertex_id
                ),
            ));
        }
    }
    Ok(())
}

impl<'m, 'a> MeshView<'m, 'a> {
    pub fn studio_model(&self) -> &'m StudioModel {
        &self.owner.mdl.body_parts[self.body_part].models[self.model]
    }

    pub fn studio_mesh(&self) -> &'m StudioMesh {
        &self.studio_model().meshes[self.mesh]
    }

    pub fn strip_mesh(&self) -> &'m StripMesh {
        &self.owner.vtx.body_parts[self.body_part].models[self.model].lods[self.lod].meshes
            [self.mesh]
    }

    pub fn vertex_count(&self) -> usize {
        self.link.vertex_count
    }

    pub fn link(&self) -> LinkedMesh {
        self.link
    }

    /// This mesh's source vertices, materializing the LOD on first use.
    pub fn vertices(&self) -> IResult<&'m [VertexRecord]> {
        self.owner
            .vvd
            .vertex_slice(self.lod, self.link.vertex_start, self.link.vertex_count)
    }

    /// Every hardware vertex of every strip group, joined with its source vertex.
    pub fn fused_vertices(&self) -> IResult<Vec<FusedVertex<'m>>> {
        let vertices = self.vertices()?;
        let vvd = &self.owner.vvd;
        let mut fused = Vec::new();
        for group in &self.strip_mesh().strip_groups {
            for hardware in &group.vertices {
                let local = usize::from(hardware.orig_mesh_vertex_id);
                // orig ids were bounds-checked at link time
                let Some(vertex) = vertices.get(local) else {
                    continue;
                };
                let tangent = vvd
                    .source_index(self.lod, self.link.vertex_start + local)?
                    .and_then(|source| vvd.tangent(source));
                fused.push(FusedVertex {
                    hardware,
                    vertex,
                    tangent,
                });
            }
        }
        Ok(fused)
    }

    /// Triangles of every strip group as mesh-local vertex ids.
    pub fn triangles(&self) -> Vec<[u16; 3]> {
        self.strip_mesh()
            .strip_groups
            .iter()
            .flat_map(|group| group.triangles())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::test_support::{MdlBuilder, VtxBuilder, VvdBuilder};
    use crate::models::vtx::VTX_HEADER_SIZE;
    use pretty_assertions::assert_eq;

    #[test]
    fn three_vertex_triple_links() {
        let mdl = MdlBuilder::minimal().build();
        let vvd = VvdBuilder::new(0x1234).lods(&[3]).build();
        let vtx = VtxBuilder::new(0x1234).mesh(&[0, 1, 2]).build();

        let model = decode(&mdl, &vvd, &vtx).unwrap();
        assert_eq!(model.total_vertex_count(), 3);
        let mesh = model.mesh(0, 0, 0, 0).unwrap();
        let fused = mesh.fused_vertices().unwrap();
        assert_eq!(fused.len(), 3);
        let order: Vec<u16> = fused.iter().map(|f| f.hardware.orig_mesh_vertex_id).collect();
        assert_eq!(order, vec![0, 1, 2]);
        let xs: Vec<f32> = fused.iter().map(|f| f.vertex.position[0]).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0]);
        assert_eq!(mesh.triangles(), vec![[0, 1, 2]]);
    }

    #[test]
    fn extra_strip_mesh_is_topology_mismatch() {
        let mdl = MdlBuilder::minimal().build();
        let vvd = VvdBuilder::new(0x1234).lods(&[3]).build();
        let vtx = VtxBuilder::new(0x1234)
            .mesh(&[0, 1, 2])
            .mesh(&[0, 1, 2])
            .build();

        let err = decode(&mdl, &vvd, &vtx).unwrap_err();
        assert!(err.kind.is_topology_mismatch());
        assert_eq!(err.file, FileKind::Strip);
    }

    #[test]
    fn extra_strip_body_part_is_topology_mismatch() {
        let mdl = MdlBuilder::minimal().build();
        let vvd = VvdBuilder::new(0x1234).lods(&[3]).build();
        let vtx = VtxBuilder::new(0x1234)
            .mesh(&[0, 1, 2])
            .body_parts(2)
            .build();

        let err = decode(&mdl, &vvd, &vtx).unwrap_err();
        assert!(err.kind.is_topology_mismatch());
        assert_eq!((err.file, err.offset), (FileKind::Strip, VTX_HEADER_SIZE));
    }

    #[test]
    fn extra_strip_model_is_topology_mismatch() {
        let mdl = MdlBuilder::minimal().build();
        let vvd = VvdBuilder::new(0x1234).lods(&[3]).build();
        let vtx = VtxBuilder::new(0x1234).mesh(&[0, 1, 2]).models(2).build();

        let err = decode(&mdl, &vvd, &vtx).unwrap_err();
        assert!(err.kind.is_topology_mismatch());
        assert_eq!(err.file, FileKind::Strip);
    }

    #[test]
    fn strip_checksum_must_match_primary() {
        let mdl = MdlBuilder::minimal().checksum(0x99).build();
        let vvd = VvdBuilder::new(0x99).lods(&[3]).build();
        let vtx = VtxBuilder::new(0x1234).mesh(&[0, 1, 2]).build();
        let err = decode(&mdl, &vvd, &vtx).unwrap_err();
        assert!(err.kind.is_checksum_mismatch());
        assert_eq!((err.file, err.offset), (FileKind::Strip, 16));
    }

    #[test]
    fn vertex_checksum_flip_is_rejected() {
        let mdl = MdlBuilder::minimal().build();
        let vvd = VvdBuilder::new(0x1234 ^ 0x10).lods(&[3]).build();
        let vtx = VtxBuilder::new(0x1234).mesh(&[0, 1, 2]).build();
        let err = decode(&mdl, &vvd, &vtx).unwrap_err();
        assert!(err.kind.is_checksum_mismatch());
        assert_eq!(err.file, FileKind::Vertex);
    }

    #[test]
    fn orig_id_past_mesh_is_rejected() {
        let mdl = MdlBuilder::minimal().build();
        let vvd = VvdBuilder::new(0x1234).lods(&[3]).build();
        let vtx = VtxBuilder::new(0x1234).mesh(&[0, 1, 3]).build();
        let err = decode(&mdl, &vvd, &vtx).unwrap_err();
        assert!(err.kind.is_topology_mismatch());
        assert_eq!(err.file, FileKind::Strip);
    }

    #[test]
    fn vertex_total_must_match_models() {
        let mdl = MdlBuilder::minimal().build();
        let vvd = VvdBuilder::new(0x1234).lods(&[4]).build();
        let vtx = VtxBuilder::new(0x1234).mesh(&[0, 1, 2]).build();
        let err = decode(&mdl, &vvd, &vtx).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TopologyMismatch { .. }));
        assert_eq!(err.file, FileKind::Vertex);
    }

    #[test]
    fn lod_counts_must_agree() {
        let mdl = MdlBuilder::minimal().build();
        let vvd = VvdBuilder::new(0x1234).lods(&[3, 3]).build();
        let vtx = VtxBuilder::new(0x1234).mesh(&[0, 1, 2]).build();
        let err = decode(&mdl, &vvd, &vtx).unwrap_err();
        assert!(err.kind.is_topology_mismatch());
        assert_eq!(err.file, FileKind::Strip);
    }

    #[test]
    fn lower_lods_follow_fixups() {
        // two meshes: LOD 0 has 3 + 4 vertices, LOD 1 keeps 2 + 2
        let mdl = MdlBuilder::minimal()
            .meshes(&[3, 4])
            .lod_counts(&[&[3, 2], &[4, 2]])
            .build();
        let vvd = VvdBuilder::new(0x1234)
            .lods(&[7, 4])
            .fixups(&[(0, 0, 1), (1, 1, 2), (0, 3, 2), (1, 5, 2)])
            .build();
        let vtx = VtxBuilder::new(0x1234)
            .mesh(&[0, 1, 2])
            .mesh(&[0, 1, 2, 3])
            .lods(2)
            .replace_mesh(1, 0, &[0, 1])
            .replace_mesh(1, 1, &[1, 0])
            .build();

        let model = decode(&mdl, &vvd, &vtx).unwrap();
        assert_eq!(model.total_vertex_count(), 7);
        let second = model.mesh(0, 0, 1, 1).unwrap();
        assert_eq!(second.link().vertex_start, 2);
        let xs: Vec<f32> = second
            .vertices()
            .unwrap()
            .iter()
            .map(|v| v.position[0])
            .collect();
        assert_eq!(xs, vec![5.0, 6.0]);
        assert_eq!(model.meshes(1).count(), 2);
    }

    #[test]
    fn bone_queries() {
        let mdl = MdlBuilder::minimal()
            .bones(&[("root", -1), ("spine", 0), ("head", 1), ("prop", -1), ("arm", 1)])
            .build();
        let vvd = VvdBuilder::new(0x1234).lods(&[3]).build();
        let vtx = VtxBuilder::new(0x1234).mesh(&[0, 1, 2]).build();
        let model = decode(&mdl, &vvd, &vtx).unwrap();

        assert_eq!(model.bone_by_name("head").map(|(i, _)| i), Some(2));
        assert_eq!(model.root_bones().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(model.children(1).collect::<Vec<_>>(), vec![2, 4]);
        assert!(model.bone_by_name("tail").is_none());
    }
}
