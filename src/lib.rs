/// Low-level buffer access, the re-encoding writer and file loaders
pub mod data;
/// Error definitions
pub mod error;
/// Studio model formats (`.mdl`, `.vvd`, `.vtx`) and the linked model graph
pub mod models;

pub use error::{Error, ErrorKind, FileKind, IResult};
pub use models::linker::{MeshView, Model, decode, decode_with};
pub use models::mdl::{StudioModelFile, encode_mdl, parse_mdl};
pub use models::options::DecodeOptions;
pub use models::vtx::{StripFile, encode_vtx, parse_vtx};
pub use models::vvd::{VertexFile, encode_vvd, parse_vvd};
