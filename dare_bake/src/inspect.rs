use std::fmt::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use dare_bundle::{Bundle, BoundingBox, MaterialId, MeshId, TextureId};

fn bounds(bounds: &BoundingBox) -> String {
    if bounds.is_empty() {
        return String::from("empty");
    }
    format!("{} .. {}", bounds.min(), bounds.max())
}

/// Writes a human readable summary of a loaded bundle, one entity per line when `verbose`
pub fn describe(out: &mut impl Write, bundle: &Bundle, verbose: bool) -> fmt::Result {
    let header = bundle.header();
    writeln!(out, "version {}, {} bytes", header.version, header.total_size)?;
    for (label, count) in [
        ("strings", header.num_strings as u64),
        ("textures", header.num_textures as u64),
        ("materials", header.num_materials as u64),
        ("meshes", header.num_meshes as u64),
        ("objects", header.num_objects as u64),
        ("groups", header.num_groups as u64),
        ("environments", header.num_environments as u64),
        ("vertices", header.num_vertices),
        ("indices", header.num_indices),
    ] {
        writeln!(out, "  {:<13}{}", label, count)?;
    }
    if !verbose {
        return Ok(());
    }

    for (id, texture) in bundle.textures() {
        writeln!(
            out,
            "{} {:?}: {}x{} {:?}, {} levels, {} bytes",
            id,
            texture.name.unwrap_or_default(),
            texture.width,
            texture.height,
            texture.format,
            texture.mip_levels,
            texture.data.len()
        )?;
    }
    for (index, material) in bundle.materials().iter().enumerate() {
        let slots: Vec<String> = material
            .slots()
            .iter()
            .map(|slot: &TextureId| if slot.is_valid() { slot.to_string() } else { String::from("-") })
            .collect();
        writeln!(
            out,
            "{} {:?}: factor {:?}, metallic {}, roughness {}, slots [{}]",
            MaterialId::from_index(index),
            bundle.string(material.name).unwrap_or_default(),
            material.base_color_factor,
            material.metallic_factor,
            material.roughness_factor,
            slots.join(", ")
        )?;
    }
    for (index, mesh) in bundle.meshes().iter().enumerate() {
        writeln!(
            out,
            "{}: {} vertices, {} indices, {}, bounds {}",
            MeshId::from_index(index),
            mesh.vertex_count,
            mesh.index_count,
            mesh.material,
            bounds(&mesh.bounds)
        )?;
    }
    for (index, object) in bundle.objects().enumerate() {
        writeln!(
            out,
            "object#{} {:?}: {} meshes, at {}, bounds {}, world {}",
            index + 1,
            object.name.unwrap_or_default(),
            object.meshes.len(),
            object.transform.w_axis.truncate(),
            bounds(&object.bounds),
            bounds(&object.bounds.transform(&object.transform))
        )?;
    }
    for (index, group) in bundle.groups().enumerate() {
        writeln!(
            out,
            "group#{} {:?}: {} objects, bounds {}",
            index + 1,
            group.name.unwrap_or_default(),
            group.objects.len(),
            bounds(&group.bounds)
        )?;
    }
    for (index, environment) in bundle.environments().enumerate() {
        writeln!(
            out,
            "environment#{} {:?}: skybox {}x{} with {} levels, irradiance {}x{}",
            index + 1,
            environment.name.unwrap_or_default(),
            environment.skybox.width,
            environment.skybox.height,
            environment.skybox.mip_levels,
            environment.irradiance.width,
            environment.irradiance.height
        )?;
    }
    Ok(())
}

pub fn inspect(path: &Path, verbose: bool) -> Result<()> {
    let bundle =
        Bundle::load(path).with_context(|| format!("failed to load {}", path.display()))?;
    let mut summary = String::new();
    describe(&mut summary, &bundle, verbose)?;
    print!("{}: {}", path.display(), summary);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dare_bundle::{BundleBuilder, Material, Vertex};

    #[test]
    fn test_describe() {
        let mut builder = BundleBuilder::new();
        let name = builder.add_string("rock");
        let material = builder
            .add_material(Material {
                name,
                ..Default::default()
            })
            .unwrap();
        let vertices = [Vertex::default(); 3];
        let mesh = builder.add_mesh_data(&vertices, &[0, 1, 2], material).unwrap();
        builder
            .add_object(name, &[mesh], glam::Mat4::from_translation(glam::Vec3::X))
            .unwrap();
        let bundle = Bundle::from_bytes(&builder.serialize().unwrap()).unwrap();

        let mut summary = String::new();
        describe(&mut summary, &bundle, false).unwrap();
        assert!(summary.contains("meshes       1"));
        assert!(!summary.contains("rock"));

        let mut verbose = String::new();
        describe(&mut verbose, &bundle, true).unwrap();
        assert!(verbose.contains("material#1 \"rock\""));
        assert!(verbose.contains("mesh#1: 3 vertices, 3 indices, material#1"));
        assert!(verbose.contains("object#1 \"rock\": 1 meshes"));
        assert!(verbose.contains("bounds [0, 0, 0] .. [0, 0, 0], world [1, 0, 0] .. [1, 0, 0]"));
    }
}
