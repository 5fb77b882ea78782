/// Sequences, animation descriptors and their sub-tables
pub mod animation;
/// Body parts, models and meshes of the primary descriptor
pub mod body;
/// Flex descriptors, flex controllers, mouths and pose parameters
pub mod flex;
/// `studiohdr_t` and its extension header
pub mod header;
/// Cross-file linking of a decoded `.mdl`/`.vvd`/`.vtx` triple
pub mod linker;
/// Textures, texture directories and skin families
pub mod materials;
/// The whole primary descriptor (`.mdl`)
pub mod mdl;
/// Decoder knobs
pub mod options;
/// Bones, bone controllers, hitboxes, attachments and IK data
pub mod skeleton;
/// Optimized mesh strips (`.vtx`)
pub mod vtx;
/// Vertex data (`.vvd`)
pub mod vvd;

#[cfg(test)]
pub(crate) mod test_support;
