use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use rayon::prelude::*;
use rootcause::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use studiomodel::data::wrappers::mmap::MappedModel;
use studiomodel::{
    DecodeOptions, Model, StudioModelFile, encode_mdl, encode_vtx, encode_vvd, parse_mdl,
    parse_vtx, parse_vvd,
};

/// Inspect and verify Source engine studio models
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Show decoder debug events (overridden by RUST_LOG)
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Reject vertices whose bone weights do not sum to one
    #[clap(long, global = true)]
    strict_weights: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode each model and print a summary
    Info {
        /// Print one JSON document per model
        #[clap(long)]
        json: bool,

        /// `.mdl` files, directories or glob patterns
        paths: Vec<String>,
    },
    /// Re-encode each file and check it matches the original bytes
    Verify {
        /// `.mdl` files, directories or glob patterns
        paths: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
struct LodSummary {
    lod: usize,
    vertices: usize,
    triangles: usize,
}

#[derive(Debug, Serialize)]
struct ModelSummary {
    path: PathBuf,
    name: String,
    version: i32,
    checksum: i32,
    bones: usize,
    root_bones: usize,
    sequences: usize,
    textures: usize,
    body_parts: usize,
    lods: Vec<LodSummary>,
}

#[derive(Serialize)]
struct InfoDocument<'m> {
    #[serde(flatten)]
    summary: ModelSummary,
    descriptor: &'m StudioModelFile,
}

/// Expand directories to the `.mdl` files under them and patterns to their matches.
fn expand_paths(args: &[String]) -> Result<Vec<PathBuf>, Report> {
    let mut paths = Vec::new();
    for arg in args {
        let path = Path::new(arg);
        let pattern = if path.is_dir() {
            format!("{}/**/*.mdl", arg.trim_end_matches('/'))
        } else if path.exists() {
            paths.push(path.to_owned());
            continue;
        } else {
            arg.clone()
        };
        let mut matched = false;
        for entry in glob::glob(&pattern).context_with(|| format!("Bad pattern: {pattern}"))? {
            paths.push(entry?);
            matched = true;
        }
        if !matched {
            warn!(pattern = %pattern, "no files matched");
        }
    }
    Ok(paths)
}

fn summarize(path: &Path, model: &Model<'_>) -> Result<ModelSummary, Report> {
    let mut lods = Vec::with_capacity(model.lod_count());
    for lod in 0..model.lod_count() {
        lods.push(LodSummary {
            lod,
            vertices: model.vvd.lod_len(lod)?,
            triangles: model.meshes(lod).map(|mesh| mesh.triangles().len()).sum(),
        });
    }
    let header = &model.mdl.header;
    Ok(ModelSummary {
        path: path.to_owned(),
        name: header.name.clone(),
        version: header.version,
        checksum: header.checksum,
        bones: model.bones().len(),
        root_bones: model.root_bones().count(),
        sequences: model.mdl.sequences.len(),
        textures: model.mdl.textures.len(),
        body_parts: model.mdl.body_parts.len(),
        lods,
    })
}

fn info(path: &Path, options: &DecodeOptions, json: bool) -> Result<String, Report> {
    let mapped = MappedModel::open(path)?;
    let model = mapped.decode(options)?;
    let summary = summarize(path, &model)?;
    if json {
        let document = InfoDocument {
            summary,
            descriptor: &model.mdl,
        };
        return Ok(serde_json::to_string(&document)?);
    }

    let mut out = String::new();
    writeln!(
        out,
        "{}: {:?} v{} checksum {:#010x}",
        summary.path.display(),
        summary.name,
        summary.version,
        summary.checksum
    )?;
    writeln!(
        out,
        "  bones {} ({} roots), sequences {}, textures {}, body parts {}",
        summary.bones, summary.root_bones, summary.sequences, summary.textures, summary.body_parts
    )?;
    for lod in &summary.lods {
        writeln!(
            out,
            "  lod {}: {} vertices, {} triangles",
            lod.lod, lod.vertices, lod.triangles
        )?;
    }
    Ok(out)
}

fn verify(path: &Path, options: &DecodeOptions) -> Result<String, Report> {
    let mapped = MappedModel::open(path)?;
    let mdl = parse_mdl(mapped.mdl_bytes(), options)?;
    let vvd = parse_vvd(mapped.vvd_bytes(), mdl.checksum(), options)?;
    let vtx = parse_vtx(mapped.vtx_bytes(), mdl.checksum())?;

    let verdict = |same: bool| if same { "ok" } else { "differs" };
    let mdl_ok = encode_mdl(&mdl)? == mapped.mdl_bytes();
    let vvd_ok = encode_vvd(&vvd)? == mapped.vvd_bytes();
    let vtx_ok = encode_vtx(&vtx)? == mapped.vtx_bytes();
    debug!(path = %path.display(), mdl_ok, vvd_ok, vtx_ok, "re-encoded model");
    Ok(format!(
        "{}: mdl {}, vvd {}, vtx {}",
        path.display(),
        verdict(mdl_ok),
        verdict(vvd_ok),
        verdict(vtx_ok)
    ))
}

fn main() -> Result<(), Report> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = DecodeOptions::builder()
        .strict_weights(args.strict_weights)
        .build();

    let (paths, results): (Vec<PathBuf>, Vec<Result<String, Report>>) = match &args.command {
        Command::Info { json, paths } => {
            let paths = expand_paths(paths)?;
            let results = paths
                .par_iter()
                .map(|path| info(path, &options, *json))
                .collect();
            (paths, results)
        }
        Command::Verify { paths } => {
            let paths = expand_paths(paths)?;
            let results = paths.par_iter().map(|path| verify(path, &options)).collect();
            (paths, results)
        }
    };

    let mut failed = 0;
    for (path, result) in paths.iter().zip(results) {
        match result {
            Ok(text) => println!("{}", text.trim_end()),
            Err(err) => {
                failed += 1;
                eprintln!("{}: {err}", path.display());
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} models failed", paths.len());
    }
    Ok(())
}
