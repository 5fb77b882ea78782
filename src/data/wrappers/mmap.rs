//! Memory-mapped model triples.
//!
//! Maps a `.mdl` together with its `.vvd` and `.vtx` companions so vertex
//! records can be borrowed straight out of the mapping while a [`Model`] is alive.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use rootcause::prelude::*;
use tracing::debug;

use crate::models::linker::{Model, decode_with};
use crate::models::options::DecodeOptions;

/// Strip file extensions, most preferred first.
const STRIP_EXTENSIONS: [&str; 4] = ["dx90.vtx", "dx80.vtx", "sw.vtx", "vtx"];

/// Where the three files of one model live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub mdl: PathBuf,
    pub vvd: PathBuf,
    pub vtx: PathBuf,
}

impl ModelPaths {
    /// Locate the companions of `mdl` in the same directory.
    pub fn siblings(mdl: &Path) -> Result<Self, Report> {
        let vvd = mdl.with_extension("vvd");
        if !vvd.is_file() {
            bail!("Vertex file not found: {}", vvd.display());
        }
        let vtx = STRIP_EXTENSIONS
            .iter()
            .map(|ext| mdl.with_extension(ext))
            .find(|path| path.is_file())
            .ok_or_else(|| rootcause::report!("No strip file found next to {}", mdl.display()))?;
        Ok(Self {
            mdl: mdl.to_owned(),
            vvd,
            vtx,
        })
    }
}

fn map(path: &Path) -> Result<Mmap, Report> {
    let file = File::open(path).context_with(|| format!("Failed to open {}", path.display()))?;
    let mmap = unsafe { MmapOptions::new().map(&file) }
        .context_with(|| format!("Failed to map {}", path.display()))?;
    Ok(mmap)
}

/// The three files of one model, memory-mapped. Maps are released on drop.
#[derive(Debug)]
pub struct MappedModel {
    paths: ModelPaths,
    mdl: Mmap,
    vvd: Mmap,
    vtx: Mmap,
}

impl MappedModel {
    /// Map `mdl` and the sibling files next to it.
    pub fn open<P: AsRef<Path>>(mdl: P) -> Result<Self, Report> {
        Self::from_paths(ModelPaths::siblings(mdl.as_ref())?)
    }

    pub fn from_paths(paths: ModelPaths) -> Result<Self, Report> {
        debug!(
            mdl = %paths.mdl.display(),
            vvd = %paths.vvd.display(),
            vtx = %paths.vtx.display(),
            "mapping model files"
        );
        Ok(Self {
            mdl: map(&paths.mdl)?,
            vvd: map(&paths.vvd)?,
            vtx: map(&paths.vtx)?,
            paths,
        })
    }

    pub fn paths(&self) -> &ModelPaths {
        &self.paths
    }

    pub fn mdl_bytes(&self) -> &[u8] {
        &self.mdl
    }

    pub fn vvd_bytes(&self) -> &[u8] {
        &self.vvd
    }

    pub fn vtx_bytes(&self) -> &[u8] {
        &self.vtx
    }

    /// Decode and link the mapped triple. The model borrows vertex data from this mapping.
    pub fn decode(&self, options: &DecodeOptions) -> Result<Model<'_>, Report> {
        let model = decode_with(&self.mdl, &self.vvd, &self.vtx, options)
            .context_with(|| format!("Failed to decode {}", self.paths.mdl.display()))?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{MdlBuilder, VtxBuilder, VvdBuilder};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("studiomodel-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn prefers_dx90_strips() {
        let dir = scratch_dir("siblings");
        let mdl = dir.join("crate.mdl");
        std::fs::write(&mdl, MdlBuilder::minimal().build()).unwrap();
        std::fs::write(dir.join("crate.vvd"), VvdBuilder::new(0x1234).build()).unwrap();
        std::fs::write(
            dir.join("crate.sw.vtx"),
            VtxBuilder::new(0x1234).mesh(&[0, 1, 2]).build(),
        )
        .unwrap();
        std::fs::write(
            dir.join("crate.dx90.vtx"),
            VtxBuilder::new(0x1234).mesh(&[2, 1, 0]).build(),
        )
        .unwrap();

        let mapped = MappedModel::open(&mdl).unwrap();
        assert_eq!(mapped.paths().vtx, dir.join("crate.dx90.vtx"));
        let model = mapped.decode(&DecodeOptions::default()).unwrap();
        let mesh = model.mesh(0, 0, 0, 0).unwrap();
        assert_eq!(mesh.triangles(), vec![[2, 1, 0]]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_vertex_file() {
        let dir = scratch_dir("missing");
        let mdl = dir.join("lonely.mdl");
        std::fs::write(&mdl, MdlBuilder::minimal().build()).unwrap();
        assert!(MappedModel::open(&mdl).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
