// tests/picking.rs
// Hidden-buffer picking against a real device

use geodrape::core::async_readback::{depad_rows, encode_texture_region_copy, ReadbackBuffer};
use geodrape::geo::CoordinateTranslator;
use geodrape::gpu::align_copy_bpr;
use geodrape::picking::{Feature, Geometry, HiddenBufferPicker, IdentityColor, NO_FEATURE};
use geodrape::{GpuContext, PickingConfig, RenderError, TranslatorConfig};
use serde_json::json;

const SIZE: u32 = 64;

async fn create_test_context() -> Option<GpuContext> {
    match GpuContext::request().await {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            eprintln!("skipping GPU test: {}", err);
            None
        }
    }
}

fn picker(ctx: GpuContext) -> HiddenBufferPicker {
    let translator = CoordinateTranslator::new(TranslatorConfig::default(), Some(ctx.clone()));
    let config = PickingConfig {
        point_size: 0.2,
        default_line_width: 0.05,
        ..Default::default()
    };
    HiddenBufferPicker::new(ctx, translator, config, SIZE, SIZE)
}

/// Roughly x in [-0.25, 0.25], y in [-0.21, 0.21] at zoom 0 around (0, 0)
fn park() -> Feature {
    Feature::new(
        7,
        Geometry::Polygon(vec![vec![
            [-90.0, -60.0],
            [90.0, -60.0],
            [90.0, 60.0],
            [-90.0, 60.0],
            [-90.0, -60.0],
        ]]),
    )
    .with_property("name", "park")
}

#[tokio::test]
async fn test_empty_scene_picks_nothing() {
    let Some(ctx) = create_test_context().await else {
        return;
    };
    let mut picker = picker(ctx);
    let stats = picker.render_features().unwrap();
    assert_eq!(stats.feature_count, 0);
    assert!(picker.pick_feature(32.0, 32.0).await.is_none());
}

#[tokio::test]
async fn test_pick_returns_feature_properties() {
    let Some(ctx) = create_test_context().await else {
        return;
    };
    let mut picker = picker(ctx);
    let ids = picker.add_features(vec![park()]).await.unwrap();
    assert_eq!(ids, vec![1]);
    picker.render_features().unwrap();

    let hit = picker.pick_feature(32.0, 32.0).await.expect("center is covered");
    assert_eq!(hit.dense_id, 1);
    assert_eq!(hit.feature.id, json!(7));
    assert_eq!(hit.feature.properties["name"], json!("park"));
    assert_eq!(hit.screen_pos, (32, 32));
    let geo = hit.geo.expect("identity view is invertible");
    assert!(geo.lng.abs() < 90.0 && geo.lat.abs() < 60.0);

    // corner lies outside the polygon
    assert!(picker.pick_feature(1.0, 1.0).await.is_none());
}

#[tokio::test]
async fn test_out_of_bounds_and_non_finite_are_misses() {
    let Some(ctx) = create_test_context().await else {
        return;
    };
    let mut picker = picker(ctx);
    picker.add_features(vec![park()]).await.unwrap();
    picker.render_features().unwrap();

    assert!(picker.pick_feature(-1.0, 10.0).await.is_none());
    assert!(picker.pick_feature(SIZE as f32, 10.0).await.is_none());
    assert!(picker.pick_feature(f32::NAN, 10.0).await.is_none());
}

#[tokio::test]
async fn test_point_draws_over_polygon() {
    let Some(ctx) = create_test_context().await else {
        return;
    };
    let mut picker = picker(ctx);
    let ids = picker
        .add_features(vec![
            park(),
            Feature::new("pin", Geometry::Point([0.0, 0.0])).with_property("kind", "poi"),
        ])
        .await
        .unwrap();
    picker.render_features().unwrap();

    let hit = picker.pick_feature(32.0, 32.0).await.unwrap();
    assert_eq!(hit.dense_id, ids[1]);
    assert_eq!(hit.feature.properties["kind"], json!("poi"));
}

#[tokio::test]
async fn test_clear_and_readd() {
    let Some(ctx) = create_test_context().await else {
        return;
    };
    let mut picker = picker(ctx);
    picker.add_features(vec![park()]).await.unwrap();
    // same external id replaces the earlier record
    picker.add_features(vec![park().with_property("name", "renamed")]).await.unwrap();
    assert_eq!(picker.feature_count(), 1);
    picker.render_features().unwrap();
    let hit = picker.pick_feature(32.0, 32.0).await.unwrap();
    assert_eq!(hit.feature.properties["name"], json!("renamed"));

    picker.clear_features();
    assert_eq!(picker.feature_count(), 0);
    picker.render_features().unwrap();
    assert!(picker.pick_feature(32.0, 32.0).await.is_none());

    let ids = picker.add_features(vec![park()]).await.unwrap();
    assert_eq!(ids, vec![1]);
}

#[tokio::test]
async fn test_invalid_feature_registers_nothing() {
    let Some(ctx) = create_test_context().await else {
        return;
    };
    let mut picker = picker(ctx);
    let err = picker
        .add_features(vec![park(), Feature::new(2, Geometry::Point([200.0, 0.0]))])
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::Conversion(_)));
    assert_eq!(picker.feature_count(), 0);
}

#[tokio::test]
async fn test_feature_coverage_counts_pixels() {
    let Some(ctx) = create_test_context().await else {
        return;
    };
    let mut picker = picker(ctx);
    picker.add_features(vec![park()]).await.unwrap();
    picker.render_features().unwrap();

    let coverage = picker.feature_coverage().await.unwrap();
    let covered = coverage.get(&1).copied().unwrap_or(0);
    // about a quarter of the width and a fifth of the height of a 64x64 target
    assert!(covered > 100 && covered < (SIZE * SIZE) as u64 / 2, "covered {}", covered);
}

/// Whole render target as tightly packed RGBA8 rows
async fn read_target(ctx: &GpuContext, texture: &wgpu::Texture) -> Vec<u8> {
    let padded_bpr = align_copy_bpr(SIZE * 4);
    let len = padded_bpr as u64 * SIZE as u64;
    let readback = ReadbackBuffer::new(&ctx.device, len, "test.TargetReadback");
    let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    encode_texture_region_copy(&mut encoder, texture, readback.buffer(), (0, 0), SIZE, SIZE);
    ctx.queue.submit(Some(encoder.finish()));
    let bytes = readback.read(&ctx.device, len).await.unwrap();
    depad_rows(&bytes, (SIZE * 4) as usize, padded_bpr as usize, SIZE as usize)
}

#[tokio::test]
async fn test_visible_and_hidden_targets_cover_same_pixels() {
    let Some(ctx) = create_test_context().await else {
        return;
    };
    let mut picker = picker(ctx.clone());
    let ids = picker
        .add_features(vec![
            park(),
            Feature::new("road", Geometry::LineString(vec![[-150.0, -70.0], [0.0, 0.0], [150.0, 70.0]])),
            Feature::new("pin", Geometry::Point([0.0, 0.0])),
            Feature::new("hut", Geometry::Point([100.0, 20.0])),
        ])
        .await
        .unwrap();
    picker.render_features().unwrap();

    let visible = read_target(&ctx, picker.visible_texture()).await;
    let hidden = read_target(&ctx, picker.hidden_texture()).await;

    let mut seen = std::collections::HashSet::new();
    let mut covered = 0;
    for (pixel, (v, h)) in visible.chunks_exact(4).zip(hidden.chunks_exact(4)).enumerate() {
        let id = IdentityColor::decode([h[0], h[1], h[2], h[3]]);
        let registered = id != NO_FEATURE && picker.record(id).is_some();
        assert_eq!(
            v[3] > 0,
            registered,
            "pixel ({}, {}): visible {:?}, hidden {:?}",
            pixel as u32 % SIZE,
            pixel as u32 / SIZE,
            v,
            h
        );
        if registered {
            covered += 1;
            seen.insert(id);
        }
    }
    assert!(covered > 0);
    for id in ids {
        assert!(seen.contains(&id), "feature {} never reached the hidden target", id);
    }
}

#[tokio::test]
async fn test_shared_buffers_grow_geometrically() {
    let Some(ctx) = create_test_context().await else {
        return;
    };
    let mut picker = picker(ctx);
    let pins = |range: std::ops::Range<u32>| -> Vec<Feature> {
        range
            .map(|i| {
                let lng = -150.0 + (i % 30) as f64 * 10.0;
                let lat = -60.0 + (i / 30) as f64 * 4.0;
                Feature::new(i, Geometry::Point([lng, lat]))
            })
            .collect()
    };

    // four vertices and six indices per point
    picker.add_features(pins(0..200)).await.unwrap();
    let first = picker.render_features().unwrap();
    assert_eq!(first.vertex_count, 800);
    assert_eq!((first.vertex_capacity, first.index_capacity), (1024, 3072));

    picker.add_features(pins(200..300)).await.unwrap();
    let second = picker.render_features().unwrap();
    assert_eq!(second.vertex_count, 1200);
    assert_eq!((second.vertex_capacity, second.index_capacity), (2048, 3072));

    picker.add_features(pins(300..600)).await.unwrap();
    let third = picker.render_features().unwrap();
    assert_eq!(third.vertex_count, 2400);
    assert_eq!(third.index_count, 3600);
    assert_eq!((third.vertex_capacity, third.index_capacity), (4096, 6144));

    // clearing never shrinks
    picker.clear_features();
    let cleared = picker.render_features().unwrap();
    assert_eq!(cleared.vertex_count, 0);
    assert_eq!(cleared.vertex_capacity, 4096);
    assert_eq!(picker.last_stats(), cleared);
}
