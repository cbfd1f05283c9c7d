use std::mem;

use rand::Rng;

use crate::*;

fn random_vertices(rng: &mut impl Rng, count: usize) -> Vec<Vertex> {
    (0..count)
        .map(|_| Vertex {
            position: [rng.random(), rng.random(), rng.random()],
            normal: [0.0, 1.0, 0.0],
            tangent: [1.0, 0.0, 0.0, 1.0],
            tex_coord: [rng.random(), rng.random()],
        })
        .collect()
}

fn cube_image(face_size: u32, value: f32) -> EnvironmentImage {
    let mip_levels = texture::mip_level_count(face_size, face_size);
    let size = texture::mip_chain_size(face_size, face_size, 16, mip_levels, 6) as usize;
    EnvironmentImage {
        width: face_size,
        height: face_size,
        format: PixelFormat::R32G32B32A32Float,
        mip_levels,
        array_layers: 6,
        data: bytemuck::cast_slice(&vec![value; size / 4]).to_vec(),
    }
}

fn bundle_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("dare_bundle_{}_{}.bundle", name, std::process::id()))
}

#[test]
fn test_round_trip() {
    let mut rng = rand::rng();
    let mut builder = BundleBuilder::new();

    let scene_name = builder.add_string("scene");
    let albedo_name = builder.add_string("albedo");

    let pixels: Vec<u8> = (0..8 * 8 * 4).map(|_| rng.random()).collect();
    let albedo = builder
        .add_texture(Texture::from_pixels(albedo_name, 8, 8, 4, &pixels, None).unwrap())
        .unwrap();
    let normal = builder.reserve_texture_id();
    let normal_pixels: Vec<u8> = (0..4 * 2 * 3).map(|i| i as u8).collect();
    builder
        .set_texture(
            normal,
            Texture::from_pixels(StringId::INVALID, 4, 2, 3, &normal_pixels, None).unwrap(),
        )
        .unwrap();

    let material = builder
        .add_material(Material {
            name: scene_name,
            base_color: Some(albedo),
            normal: Some(normal),
            base_color_factor: [0.5, 0.25, 1.0, 1.0],
            roughness_factor: 0.75,
            ..Default::default()
        })
        .unwrap();

    let vertices = random_vertices(&mut rng, 24);
    let indices: Vec<u32> = (0..36).map(|_| rng.random_range(0..24)).collect();
    let first = builder.add_mesh_data(&vertices, &indices, material).unwrap();
    let second = builder
        .add_mesh_data(&vertices[..3], &[0, 1, 2], MaterialId::INVALID)
        .unwrap();

    let transform = glam::Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
    let object = builder
        .add_object(scene_name, &[first, second], transform)
        .unwrap();
    let group = builder.add_group(scene_name, &[object]).unwrap();

    let environment = builder
        .add_environment(Environment {
            name: scene_name,
            skybox: cube_image(4, 2.0),
            irradiance: cube_image(1, 0.5),
        })
        .unwrap();

    let path = bundle_path("round_trip");
    builder.write(&path).unwrap();
    let bundle = Bundle::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(bundle.string(scene_name), Some("scene"));
    assert_eq!(bundle.string(albedo_name), Some("albedo"));
    assert_eq!(bundle.string(StringId(3)), None);
    assert_eq!(bundle.strings().count(), 2);

    let texture = bundle.texture(albedo).unwrap();
    assert_eq!(texture.name, Some("albedo"));
    assert_eq!((texture.width, texture.height), (8, 8));
    assert_eq!(texture.format, PixelFormat::R8G8B8A8);
    assert_eq!(texture.data, pixels.as_slice());
    let texture = bundle.texture(normal).unwrap();
    assert_eq!(texture.name, None);
    assert_eq!(texture.format, PixelFormat::R8G8B8);
    assert_eq!(texture.data, normal_pixels.as_slice());

    let stored = bundle.material(material).unwrap();
    assert_eq!(stored.base_color, albedo);
    assert_eq!(stored.normal, normal);
    assert_eq!(stored.roughness, TextureId::INVALID);
    assert_eq!(stored.base_color_factor, [0.5, 0.25, 1.0, 1.0]);
    assert_eq!(stored.roughness_factor, 0.75);

    let mesh = bundle.mesh(first).unwrap();
    assert_eq!(mesh.material, material);
    assert_eq!(bundle.mesh_vertices(mesh), vertices.as_slice());
    assert_eq!(bundle.mesh_indices(mesh), indices.as_slice());
    let mesh = bundle.mesh(second).unwrap();
    assert_eq!(bundle.mesh_vertices(mesh), &vertices[..3]);
    assert_eq!(bundle.mesh_indices(mesh), &[0, 1, 2]);
    assert_eq!(bundle.vertices().len(), 27);
    assert_eq!(bundle.indices().len(), 39);

    let view = bundle.object(object).unwrap();
    assert_eq!(view.name, Some("scene"));
    assert_eq!(view.meshes, &[first, second]);
    assert_eq!(view.transform, transform);
    let expected = bundle
        .mesh(first)
        .unwrap()
        .bounds
        .union(&bundle.mesh(second).unwrap().bounds);
    assert_eq!(view.bounds, expected);

    let view = bundle.group(group).unwrap();
    assert_eq!(view.objects, &[object]);
    assert_eq!(view.bounds, expected);

    let view = bundle.environment(environment).unwrap();
    assert_eq!(view.name, Some("scene"));
    assert_eq!(view.skybox.array_layers, 6);
    assert_eq!(view.skybox.mip_levels, 3);
    let level: &[f32] = bytemuck::cast_slice(view.skybox.level(0).unwrap());
    assert_eq!(level.len(), 4 * 4 * 4 * 6);
    assert!(level.iter().all(|&value| value == 2.0));
    assert_eq!(view.skybox.layer(2, 5).unwrap().len(), 16);
    assert!(view.skybox.layer(0, 6).is_none());
    let irradiance: &[f32] = bytemuck::cast_slice(view.irradiance.data);
    assert!(irradiance.iter().all(|&value| value == 0.5));
}

#[test]
fn test_object_bounds_ignore_transform() {
    let mut builder = BundleBuilder::new();
    let corner = |position: [f32; 3]| Vertex {
        position,
        ..Default::default()
    };
    let mesh = builder
        .add_mesh_data(
            &[corner([0.0; 3]), corner([1.0; 3]), corner([1.0, 0.0, 0.0])],
            &[0, 1, 2],
            MaterialId::INVALID,
        )
        .unwrap();
    let transform = glam::Mat4::from_translation(glam::Vec3::splat(10.0));
    let object = builder
        .add_object(StringId::INVALID, &[mesh], transform)
        .unwrap();
    let group = builder.add_group(StringId::INVALID, &[object]).unwrap();

    let bundle = Bundle::from_bytes(&builder.serialize().unwrap()).unwrap();
    let mesh_bounds = bundle.mesh(mesh).unwrap().bounds;
    assert_eq!(mesh_bounds, BoundingBox::new(glam::Vec3::ZERO, glam::Vec3::ONE));
    let object = bundle.object(object).unwrap();
    assert_eq!(object.transform, transform);
    assert_eq!(object.bounds, mesh_bounds);
    assert_eq!(bundle.group(group).unwrap().bounds, mesh_bounds);
}

#[test]
fn test_empty_bundle() {
    let builder = BundleBuilder::new();
    let bytes = builder.serialize().unwrap();
    assert_eq!(bytes.len(), mem::size_of::<Header>());

    let bundle = Bundle::from_compressed(&compression::compress(&bytes).unwrap()).unwrap();
    let header = bundle.header();
    assert_eq!(header.num_strings, 0);
    assert_eq!(header.num_textures, 0);
    assert_eq!(header.num_groups, 0);
    assert_eq!(header.num_environments, 0);
    assert_eq!(bundle.textures().count(), 0);
    assert_eq!(bundle.groups().count(), 0);
    assert!(bundle.vertices().is_empty());
    assert!(bundle.texture(TextureId(1)).is_none());
    assert!(bundle.group(GroupId::INVALID).is_none());
}

#[test]
fn test_offsets_are_consistent() {
    let mut builder = BundleBuilder::new();
    let name = builder.add_string("a");
    builder.add_string("bc");
    builder
        .add_texture(Texture::from_pixels(name, 2, 2, 1, &[1, 2, 3, 4], None).unwrap())
        .unwrap();
    let material = builder.add_material(Material::default()).unwrap();
    let mesh = builder
        .add_mesh_data(&random_vertices(&mut rand::rng(), 3), &[0, 1, 2], material)
        .unwrap();
    let object = builder
        .add_object(name, &[mesh], glam::Mat4::IDENTITY)
        .unwrap();
    builder.add_group(name, &[object]).unwrap();

    let bytes = builder.serialize().unwrap();
    let bundle = Bundle::from_bytes(&bytes).unwrap();
    let header = bundle.header();
    let expected = mem::size_of::<Header>()
        + 2 * mem::size_of::<StringRecord>()
        + mem::size_of::<TextureRecord>()
        + mem::size_of::<MaterialRecord>()
        + mem::size_of::<MeshRecord>()
        + mem::size_of::<ObjectRecord>()
        + mem::size_of::<GroupRecord>();
    assert_eq!(header.data_offset, expected as u64);
    assert_eq!(header.data_offset % format::ALIGNMENT, 0);
    assert_eq!(header.vertices_offset % format::ALIGNMENT, 0);
    assert_eq!(header.indices_offset, header.vertices_offset + 3 * 48);
    assert_eq!(header.total_size, bytes.len() as u64);
}

#[test]
fn test_tampered_header_rejected() {
    let mut builder = BundleBuilder::new();
    builder.add_string("a");
    builder.add_string("b");
    let bytes = builder.serialize().unwrap();

    // One string record too many
    let mut tampered = bytes.clone();
    let mut header: Header = bytemuck::pod_read_unaligned(&tampered[..mem::size_of::<Header>()]);
    header.num_strings += 1;
    tampered[..mem::size_of::<Header>()].copy_from_slice(bytemuck::bytes_of(&header));
    assert!(matches!(
        Bundle::from_bytes(&tampered),
        Err(BundleError::Format(_))
    ));

    let mut tampered = bytes.clone();
    tampered[0] ^= 0xff;
    assert!(matches!(
        Bundle::from_bytes(&tampered),
        Err(BundleError::Format(_))
    ));

    assert!(matches!(
        Bundle::from_bytes(&bytes[..bytes.len() - 1]),
        Err(BundleError::Format(_))
    ));
    assert!(matches!(
        Bundle::from_bytes(&bytes[..10]),
        Err(BundleError::Format(_))
    ));
}

#[test]
fn test_tampered_payload_offset_rejected() {
    let mut builder = BundleBuilder::new();
    builder.add_string("hello");
    let bytes = builder.serialize().unwrap();

    let mut tampered = bytes.clone();
    let at = mem::size_of::<Header>();
    let mut record: StringRecord =
        bytemuck::pod_read_unaligned(&tampered[at..at + mem::size_of::<StringRecord>()]);
    record.length = 1 << 20;
    tampered[at..at + mem::size_of::<StringRecord>()].copy_from_slice(bytemuck::bytes_of(&record));
    assert!(matches!(
        Bundle::from_bytes(&tampered),
        Err(BundleError::Format(_))
    ));
}

#[test]
fn test_truncated_file_rejected() {
    let mut builder = BundleBuilder::new();
    builder.add_string("truncated");
    let path = bundle_path("truncated");
    builder.write(&path).unwrap();
    let compressed = std::fs::read(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert!(Bundle::from_compressed(&compressed).is_ok());
    assert!(matches!(
        Bundle::from_compressed(&compressed[..compressed.len() / 2]),
        Err(BundleError::Format(_))
    ));
}

#[test]
fn test_collapse_survives_round_trip() {
    let mut builder = BundleBuilder::new();
    let id = builder
        .add_texture(
            Texture::from_pixels(
                StringId::INVALID,
                4,
                4,
                4,
                &[10u8, 20, 30, 255].repeat(16),
                None,
            )
            .unwrap(),
        )
        .unwrap();
    let bundle = Bundle::from_bytes(&builder.serialize().unwrap()).unwrap();
    let texture = bundle.texture(id).unwrap();
    assert_eq!((texture.width, texture.height, texture.mip_levels), (1, 1, 1));
    assert_eq!(texture.data, &[10, 20, 30, 255]);
    assert_eq!(texture.level(0), Some(&[10u8, 20, 30, 255][..]));
}

#[test]
fn test_mipmapped_texture_levels() {
    let mip_levels = texture::mip_level_count(4, 4);
    let size = texture::mip_chain_size(4, 4, 1, mip_levels, 1) as usize;
    let data: Vec<u8> = (0..size).map(|i| i as u8).collect();
    let mut builder = BundleBuilder::new();
    let id = builder
        .add_texture(Texture {
            name: StringId::INVALID,
            width: 4,
            height: 4,
            format: PixelFormat::R8,
            mip_levels,
            array_layers: 1,
            data: data.clone(),
        })
        .unwrap();
    let bundle = Bundle::from_bytes(&builder.serialize().unwrap()).unwrap();
    let texture = bundle.texture(id).unwrap();
    assert_eq!(texture.level(0).unwrap(), &data[..16]);
    assert_eq!(texture.level(1).unwrap(), &data[16..20]);
    assert_eq!(texture.level(2).unwrap(), &data[20..21]);
    assert!(texture.level(3).is_none());
}
