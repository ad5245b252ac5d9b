//! groundcut-io — frame readers (ASCII PLY, PCD, LAS) and an ASCII PLY writer.

use anyhow::{bail, Context, Result};
use groundcut_core::Cloud;
use pcd_rs::Field;
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Ply, Property};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extensions `read_auto` understands.
pub const FRAME_EXTENSIONS: [&str; 4] = ["pcd", "ply", "las", "laz"];

pub fn read_las(path: &Path) -> Result<Cloud> {
    let mut r = las::Reader::from_path(path).with_context(|| format!("open {}", path.display()))?;
    let n = r.header().number_of_points() as usize;

    let mut c = Cloud::with_capacity(n);
    for rec in r.points() {
        let p = rec?;
        // x/y/z come back with scale/offset applied
        c.push_with_intensity(p.x as f32, p.y as f32, p.z as f32, p.intensity as f32);
    }
    c.ensure_finite().with_context(|| format!("{}", path.display()))?;
    Ok(c)
}

pub fn read_ply_ascii(path: &Path) -> Result<Cloud> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(f);
    let parser = Parser::<DefaultElement>::new();
    let ply: Ply<DefaultElement> = parser.read_ply(&mut reader)?;

    let vertex = ply.payload.get("vertex")
        .ok_or_else(|| anyhow::anyhow!("PLY missing 'vertex' element"))?;

    let mut c = Cloud::with_capacity(vertex.len());
    let has_intensity = vertex.first().is_some_and(|el| el.contains_key("intensity"));
    for el in vertex {
        let (x, y, z) = (get_f32(el, "x")?, get_f32(el, "y")?, get_f32(el, "z")?);
        if has_intensity {
            c.push_with_intensity(x, y, z, get_f32(el, "intensity")?);
        } else {
            c.push(x, y, z);
        }
    }
    c.ensure_finite().with_context(|| format!("{}", path.display()))?;
    Ok(c)
}

fn get_f32(el: &DefaultElement, key: &str) -> Result<f32> {
    match el.get(key) {
        Some(Property::Float(v)) => Ok(*v),
        Some(Property::Double(v)) => Ok(*v as f32),
        Some(Property::UChar(v)) => Ok(*v as f32),
        Some(Property::UShort(v)) => Ok(*v as f32),
        Some(_) => bail!("property '{}' not float-like", key),
        None => bail!("missing property '{}'", key),
    }
}

/// PCD frame (`DATA ascii`, `binary` or `binary_compressed`) with at least
/// x, y, z fields; `intensity` is kept if present. Fields with `COUNT > 1`
/// contribute their first element.
pub fn read_pcd(path: &Path) -> Result<Cloud> {
    let reader = pcd_rs::DynReader::open(path).with_context(|| format!("open {}", path.display()))?;
    let names: Vec<String> = reader.meta().field_defs.fields.iter().map(|f| f.name.clone()).collect();
    let expected = reader.meta().num_points as usize;
    let col = |name: &str| names.iter().position(|n| n == name);
    let (Some(ix), Some(iy), Some(iz)) = (col("x"), col("y"), col("z")) else {
        bail!("{}: PCD FIELDS lacks x/y/z: {:?}", path.display(), names);
    };
    let ii = col("intensity");

    let mut c = Cloud::with_capacity(expected);
    for (row, rec) in reader.enumerate() {
        let rec = rec.with_context(|| format!("{}: point {row}", path.display()))?;
        let get = |k: usize| {
            rec.0.get(k).and_then(first_f32).with_context(|| {
                format!("{}: point {row}, field '{}' is empty", path.display(), names[k])
            })
        };
        let (x, y, z) = (get(ix)?, get(iy)?, get(iz)?);
        match ii {
            Some(ii) => c.push_with_intensity(x, y, z, get(ii)?),
            None => c.push(x, y, z),
        }
    }
    if c.len() != expected {
        bail!("{}: header says {expected} points, found {}", path.display(), c.len());
    }
    c.ensure_finite().with_context(|| format!("{}", path.display()))?;
    Ok(c)
}

fn first_f32(field: &Field) -> Option<f32> {
    match field {
        Field::F32(v) => v.first().copied(),
        Field::F64(v) => v.first().map(|&x| x as f32),
        Field::U8(v) => v.first().map(|&x| x as f32),
        Field::U16(v) => v.first().map(|&x| x as f32),
        Field::U32(v) => v.first().map(|&x| x as f32),
        Field::I8(v) => v.first().map(|&x| x as f32),
        Field::I16(v) => v.first().map(|&x| x as f32),
        Field::I32(v) => v.first().map(|&x| x as f32),
    }
}

pub fn write_ply_ascii(path: &Path, cloud: &Cloud) -> Result<()> {
    let n = cloud.len();
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut w = BufWriter::new(file);

    writeln!(w, "ply")?;
    writeln!(w, "format ascii 1.0")?;
    writeln!(w, "element vertex {}", n)?;
    writeln!(w, "property float x")?;
    writeln!(w, "property float y")?;
    writeln!(w, "property float z")?;
    if cloud.intensity.is_some() {
        writeln!(w, "property float intensity")?;
    }
    writeln!(w, "end_header")?;

    for i in 0..n {
        write!(w, "{} {} {}", cloud.x[i], cloud.y[i], cloud.z[i])?;
        if let Some(v) = cloud.intensity_at(i) {
            write!(w, " {}", v)?;
        }
        writeln!(w)?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_auto(path: &Path) -> Result<Cloud> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let cloud = match ext.as_str() {
        "pcd" => read_pcd(path)?,
        "ply" => read_ply_ascii(path)?,
        "las" | "laz" => read_las(path)?,
        _ => bail!("unsupported frame file {} (expected one of {:?})", path.display(), FRAME_EXTENSIONS),
    };
    debug!(path = %path.display(), points = cloud.len(), "read frame");
    Ok(cloud)
}

/// Frame files directly under `dir`, sorted by name.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry?.path();
        let known = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if path.is_file() && known {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}
