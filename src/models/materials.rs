//! Texture names, texture search directories and the skin family table.

use winnow::Parser;
use winnow::binary::{le_i16, le_i32};

use crate::data::parser_utils::{FileView, TableRef, WResult, parse_i32_array};
use crate::data::writer::ByteWriter;
use crate::error::IResult;

pub const TEXTURE_SIZE: usize = 64;

/// `mstudiotexture_t`. Only the name is meaningful on disk; the runtime
/// material pointers are kept as raw integers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Texture {
    pub name: String,
    pub name_offset: i32,
    pub flags: i32,
    pub used: i32,
    pub unused1: i32,
    pub material: i32,
    pub client_material: i32,
    pub unused: [i32; 10],
}

fn parse_texture(input: &mut &[u8]) -> WResult<Texture> {
    Ok(Texture {
        name_offset: le_i32.parse_next(input)?,
        flags: le_i32.parse_next(input)?,
        used: le_i32.parse_next(input)?,
        unused1: le_i32.parse_next(input)?,
        material: le_i32.parse_next(input)?,
        client_material: le_i32.parse_next(input)?,
        unused: parse_i32_array::<10>(input)?,
        name: String::new(),
    })
}

pub fn parse_textures(file: &FileView<'_>, table: TableRef) -> IResult<Vec<Texture>> {
    let view = file.table_ref("textures", 0, table, TEXTURE_SIZE)?;
    file.parse_table("textures", &view, parse_texture, |base, mut texture| {
        texture.name = file.name_at("texture name", base, texture.name_offset)?;
        Ok(texture)
    })
}

pub(crate) fn write_textures(
    w: &mut ByteWriter,
    table: TableRef,
    textures: &[Texture],
) -> IResult<()> {
    for (i, texture) in textures.iter().enumerate() {
        let base = w.table_slot("textures", 0, table, TEXTURE_SIZE, i)?;
        w.record(base)
            .i32(texture.name_offset)
            .i32(texture.flags)
            .i32(texture.used)
            .i32(texture.unused1)
            .i32(texture.material)
            .i32(texture.client_material)
            .i32s(&texture.unused);
        w.put_name("texture name", base, texture.name_offset, &texture.name)?;
    }
    Ok(())
}

/// A texture search directory. Unlike record names these offsets are file-relative.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TextureDir {
    pub path: String,
    pub path_offset: i32,
}

pub fn parse_texture_dirs(file: &FileView<'_>, table: TableRef) -> IResult<Vec<TextureDir>> {
    let view = file.table_ref("texture directories", 0, table, 4)?;
    file.parse_table("texture directories", &view, le_i32, |_, path_offset| {
        Ok(TextureDir {
            path: file.name_at("texture directory", 0, path_offset)?,
            path_offset,
        })
    })
}

pub(crate) fn write_texture_dirs(
    w: &mut ByteWriter,
    table: TableRef,
    dirs: &[TextureDir],
) -> IResult<()> {
    for (i, dir) in dirs.iter().enumerate() {
        let at = w.table_slot("texture directories", 0, table, 4, i)?;
        w.record(at).i32(dir.path_offset);
        w.put_name("texture directory", 0, dir.path_offset, &dir.path)?;
    }
    Ok(())
}

/// Skin families: row `family` maps each skinnable material slot to a texture index.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SkinTable {
    pub family_count: usize,
    pub reference_count: usize,
    pub entries: Vec<i16>,
}

impl SkinTable {
    pub fn family(&self, family: usize) -> Option<&[i16]> {
        if family >= self.family_count {
            return None;
        }
        let start = family * self.reference_count;
        self.entries.get(start..start + self.reference_count)
    }

    /// Texture used for material slot `reference` under skin `family`.
    pub fn texture_index(&self, family: usize, reference: usize) -> Option<usize> {
        let index = *self.family(family)?.get(reference)?;
        usize::try_from(index).ok()
    }
}

pub fn parse_skin_table(
    file: &FileView<'_>,
    family_count: i32,
    reference_count: i32,
    offset: i32,
) -> IResult<SkinTable> {
    let cells = family_count.max(0).saturating_mul(reference_count.max(0));
    let view = file.table("skin families", 0, offset, cells, 2)?;
    Ok(SkinTable {
        family_count: usize::try_from(family_count).unwrap_or(0),
        reference_count: usize::try_from(reference_count).unwrap_or(0),
        entries: file.parse_records("skin families", &view, le_i16)?,
    })
}

pub(crate) fn write_skin_table(w: &mut ByteWriter, offset: i32, skins: &SkinTable) -> IResult<()> {
    if skins.entries.is_empty() {
        return Ok(());
    }
    let at = w.resolve("skin families", 0, offset)?;
    let mut rec = w.record(at);
    for entry in &skins.entries {
        rec.i16(*entry);
    }
    Ok(())
}
