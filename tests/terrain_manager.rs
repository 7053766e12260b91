// tests/terrain_manager.rs
// Tile ownership, visibility-scoped execution and resource swaps

use std::sync::Arc;

use geodrape::terrain::{
    GeoLineRecord, HeightRaster, LineRecord, ResourceUpdate, TerrainBounds, TerrainComputeManager,
    TerrainResources, TileKey,
};
use geodrape::{CoordinateTranslator, GpuContext, TerrainConfig, TranslatorConfig};

async fn create_test_context() -> Option<GpuContext> {
    match GpuContext::request().await {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            eprintln!("skipping GPU test: {}", err);
            None
        }
    }
}

fn config() -> TerrainConfig {
    TerrainConfig {
        max_segments: 256,
        max_coarse_vertices: 512,
        ..Default::default()
    }
}

fn bounds() -> TerrainBounds {
    TerrainBounds::new([-1.0, -1.0], [1.0, 1.0]).unwrap()
}

fn road(id: u64, y: f32) -> LineRecord {
    LineRecord::new(id, vec![[-0.5, y, 0.0], [0.0, y, 0.0], [0.5, y, 0.0]])
}

#[tokio::test]
async fn test_disabled_until_terrain_arrives() {
    let Some(ctx) = create_test_context().await else {
        return;
    };
    let mut manager = TerrainComputeManager::new(ctx.clone(), config()).unwrap();
    let tile = TileKey::new(12, 10, 20);
    manager.collect_centerlines(tile, vec![road(1, 0.0)]);
    assert!(!manager.is_enabled());
    assert!(manager.execute(&[tile]).is_none());

    let raster = HeightRaster::uniform(8, 8, 300.0).unwrap();
    manager.update_terrain_resources(raster.upload(&ctx, bounds()));
    assert!(manager.is_enabled());
    let output = manager.execute(&[tile]).unwrap();
    assert_eq!(output.segment_count, 2);
}

#[tokio::test]
async fn test_execute_unions_only_visible_tiles() {
    let Some(ctx) = create_test_context().await else {
        return;
    };
    let mut manager = TerrainComputeManager::new(ctx.clone(), config()).unwrap();
    let raster = HeightRaster::uniform(8, 8, 300.0).unwrap();
    manager.update_terrain_resources(raster.upload(&ctx, bounds()));

    let a = TileKey::new(12, 0, 0);
    let b = TileKey::new(12, 1, 0);
    let c = TileKey::new(12, 2, 0);
    manager.collect_centerlines(a, vec![road(1, 0.1)]);
    manager.collect_centerlines(b, vec![road(2, 0.2), road(3, 0.3)]);
    manager.collect_centerlines(c, vec![road(4, 0.4)]);
    assert_eq!(manager.tile_count(), 3);
    assert_eq!(manager.line_count(), 4);

    assert_eq!(manager.execute(&[a, b]).unwrap().segment_count, 6);
    assert_eq!(manager.execute(&[c]).unwrap().segment_count, 2);

    // replacing a tile's lines drops the old ones
    manager.collect_centerlines(b, vec![road(5, 0.5)]);
    assert_eq!(manager.line_count(), 3);
    assert!(manager.remove_tile_centerlines(a));
    assert!(!manager.remove_tile_centerlines(a));
    assert_eq!(manager.execute(&[a, b]).unwrap().segment_count, 2);
    assert!(manager.execute(&[a]).is_none());

    let out = manager.pipeline().read_output().await.unwrap();
    let expected = 300.0 / 50_000_000.0;
    assert!(out.vertices.iter().all(|v| (v.position[2] - expected).abs() < 1e-9));
}

#[tokio::test]
async fn test_geographic_centerlines_drape_with_their_offset() {
    let Some(ctx) = create_test_context().await else {
        return;
    };
    let mut manager = TerrainComputeManager::new(ctx.clone(), config()).unwrap();
    let raster = HeightRaster::uniform(8, 8, 300.0).unwrap();
    manager.update_terrain_resources(raster.upload(&ctx, bounds()));

    let mut translator = CoordinateTranslator::new(
        TranslatorConfig {
            initial_center: [8.5, 47.4],
            ..Default::default()
        },
        None,
    );
    let tile = TileKey::new(14, 8579, 5737);
    let lines: Vec<GeoLineRecord> = serde_json::from_str(
        r#"[
            { "feature_id": 1, "coordinates": [[8.5, 47.4], [8.6, 47.45]] },
            { "feature_id": 2, "coordinates": [[8.5, 47.3], [8.6, 47.3]], "depthOffset": 5e-5 }
        ]"#,
    )
    .unwrap();
    manager
        .collect_geographic_centerlines(tile, &lines, &mut translator)
        .unwrap();
    assert_eq!(manager.line_count(), 2);

    let invalid = vec![GeoLineRecord {
        coordinates: vec![[8.5, 47.4], [200.0, 47.4]],
        ..lines[0].clone()
    }];
    let other = TileKey::new(14, 8580, 5737);
    assert!(manager
        .collect_geographic_centerlines(other, &invalid, &mut translator)
        .is_err());
    assert_eq!(manager.tile_count(), 1);

    assert_eq!(manager.execute(&[tile]).unwrap().segment_count, 2);
    let out = manager.pipeline().read_output().await.unwrap();
    let ground = 300.0 / 50_000_000.0;
    for v in &out.vertices[..4] {
        assert!((v.position[2] - ground).abs() < 1e-9);
    }
    for v in &out.vertices[4..] {
        assert!((v.position[2] - (ground + 5e-5)).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_resource_identity_controls_rebuilds() {
    let Some(ctx) = create_test_context().await else {
        return;
    };
    let mut manager = TerrainComputeManager::new(ctx.clone(), config()).unwrap();
    let raster = HeightRaster::uniform(8, 8, 300.0).unwrap();
    let resources = raster.upload(&ctx, bounds());

    assert_eq!(manager.update_terrain_resources(resources.clone()), ResourceUpdate::BindingsAndBounds);
    assert_eq!(manager.update_terrain_resources(resources.clone()), ResourceUpdate::Unchanged);

    let moved = TerrainResources::new(
        resources.view.clone(),
        resources.sampler.clone(),
        TerrainBounds::new([-2.0, -2.0], [2.0, 2.0]).unwrap(),
    );
    assert_eq!(manager.update_terrain_resources(moved.clone()), ResourceUpdate::Bounds);

    let swapped = raster.upload(&ctx, moved.bounds);
    assert_eq!(manager.update_terrain_resources(swapped.clone()), ResourceUpdate::Bindings);

    let resampled = TerrainResources::new(
        swapped.view.clone(),
        Arc::new(ctx.device.create_sampler(&wgpu::SamplerDescriptor::default())),
        swapped.bounds,
    );
    assert_eq!(manager.update_terrain_resources(resampled), ResourceUpdate::Bindings);

    let stats = manager.pipeline().stats();
    assert_eq!(stats.bind_group_rebuilds, 3);
}
