//! WGSL for the five drape passes. One module, one entry point per pass.

pub(super) const DRAPE_SHADER: &str = r#"
struct Params {
    bounds_min: vec2<f32>,
    bounds_max: vec2<f32>,
    segment_count: u32,
    max_subdivision: u32,
    gradient_threshold: f32,
    exaggeration: f32,
    depth_offset: f32,
    z_epsilon: f32,
    bounds_margin: f32,
    _pad: f32,
};

struct Segment {
    start_vertex: u32,
    end_vertex: u32,
    feature_index: u32,
    _pad: u32,
};

struct Style {
    color: vec4<f32>,
    half_width: f32,
    depth_offset: f32,
    _pad0: f32,
    _pad1: f32,
};

struct Work {
    count: u32,
    offset: u32,
};

struct DensePoint {
    position: vec3<f32>,
    segment: u32,
};

struct OutputVertex {
    position: vec4<f32>,
    normal: vec4<f32>,
    color: vec4<f32>,
};

struct Totals {
    index_count: u32,
    instance_count: u32,
    first_index: u32,
    base_vertex: i32,
    first_instance: u32,
    point_count: u32,
    vertex_count: u32,
    subdivision_count: u32,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> coarse: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> segments: array<Segment>;
@group(0) @binding(3) var<storage, read> styles: array<Style>;
@group(0) @binding(4) var<storage, read_write> work: array<Work>;
@group(0) @binding(5) var<storage, read_write> points: array<DensePoint>;
@group(0) @binding(6) var<storage, read_write> vertices: array<OutputVertex>;
@group(0) @binding(7) var<storage, read_write> indices: array<u32>;
@group(0) @binding(8) var<storage, read_write> totals: Totals;

@group(1) @binding(0) var height_tex: texture_2d<f32>;
@group(1) @binding(1) var height_sampler: sampler;

const WORKGROUP: u32 = 64u;
const SCAN_WIDTH: u32 = 256u;
const MAX_HEIGHT: f32 = 9000.0;
const HEIGHT_DIVISOR: f32 = 50000000.0;
const MITER_LIMIT: f32 = 2.0;

var<workgroup> scan: array<u32, 256>;

fn linear_index(gid: vec3<u32>, groups: vec3<u32>) -> u32 {
    return gid.x + gid.y * groups.x * WORKGROUP;
}

fn decode_texel(r: f32, g: f32, b: f32, a: f32) -> f32 {
    if (a < 0.5) {
        return 0.0;
    }
    let rb = round(r * 255.0);
    let gb = round(g * 255.0);
    let bb = round(b * 255.0);
    if (rb + gb + bb == 0.0 || (rb == 255.0 && gb == 255.0 && bb == 255.0)) {
        return 0.0;
    }
    let h = rb * 256.0 + gb + bb / 256.0 - 32768.0;
    if (h < 0.0 || h > MAX_HEIGHT) {
        return 0.0;
    }
    return h;
}

// Bilinear over per-texel decoded heights. The gather footprint is the
// 2x2 block around the texel corner nearest to uv.
fn sample_height(uv: vec2<f32>) -> f32 {
    let dims = vec2<f32>(textureDimensions(height_tex, 0));
    let p = clamp(uv, vec2<f32>(0.0), vec2<f32>(1.0)) * dims - 0.5;
    let base = floor(p);
    let f = p - base;
    let corner = (base + 1.0) / dims;
    let r = textureGather(0, height_tex, height_sampler, corner);
    let g = textureGather(1, height_tex, height_sampler, corner);
    let b = textureGather(2, height_tex, height_sampler, corner);
    let a = textureGather(3, height_tex, height_sampler, corner);
    // gather order: x = (i0, j1), y = (i1, j1), z = (i1, j0), w = (i0, j0)
    let h01 = decode_texel(r.x, g.x, b.x, a.x);
    let h11 = decode_texel(r.y, g.y, b.y, a.y);
    let h10 = decode_texel(r.z, g.z, b.z, a.z);
    let h00 = decode_texel(r.w, g.w, b.w, a.w);
    return mix(mix(h00, h10, f.x), mix(h01, h11, f.x), f.y);
}

fn to_uv(p: vec2<f32>) -> vec2<f32> {
    let size = params.bounds_max - params.bounds_min;
    return vec2<f32>((p.x - params.bounds_min.x) / size.x, (params.bounds_max.y - p.y) / size.y);
}

fn in_bounds(uv: vec2<f32>) -> bool {
    let m = params.bounds_margin;
    return all(uv >= vec2<f32>(-m)) && all(uv <= vec2<f32>(1.0 + m));
}

fn segment_dir(s: u32) -> vec2<f32> {
    let seg = segments[s];
    let d = coarse[seg.end_vertex].xy - coarse[seg.start_vertex].xy;
    let len = length(d);
    if (len < 1e-12) {
        return vec2<f32>(1.0, 0.0);
    }
    return d / len;
}

fn joined(dir: vec2<f32>, other: vec2<f32>) -> vec2<f32> {
    let sum = dir + other;
    if (length(sum) < 1e-6) {
        return dir;
    }
    return normalize(sum);
}

fn perp(v: vec2<f32>) -> vec2<f32> {
    return vec2<f32>(-v.y, v.x);
}

@compute @workgroup_size(64)
fn cs_count(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let s = linear_index(gid, groups);
    if (s >= params.segment_count) {
        return;
    }
    let seg = segments[s];
    let a = coarse[seg.start_vertex].xy;
    let b = coarse[seg.end_vertex].xy;
    var taps = array<vec2<f32>, 3>(a, (a + b) * 0.5, b);

    var lo = 1e30;
    var hi = -1e30;
    var valid = 0u;
    for (var k = 0u; k < 3u; k++) {
        let uv = to_uv(taps[k]);
        if (in_bounds(uv)) {
            let h = sample_height(uv);
            lo = min(lo, h);
            hi = max(hi, h);
            valid++;
        }
    }

    var count = 1u;
    let variation = hi - lo;
    if (valid >= 2u && variation > params.gradient_threshold) {
        let wanted = u32(ceil(variation / params.gradient_threshold));
        count = min(max(wanted, 2u), max(params.max_subdivision, 1u));
    }
    work[s] = Work(count, 0u);
}

// Blocked Hillis-Steele exclusive scan in a single workgroup
@compute @workgroup_size(256)
fn cs_offset(@builtin(local_invocation_index) lid: u32) {
    let n = params.segment_count;
    // per-thread trip count stays uniform so the barriers below are legal
    let per = (n + SCAN_WIDTH - 1u) / SCAN_WIDTH;
    let begin = lid * per;

    var sum = 0u;
    for (var k = 0u; k < per; k++) {
        if (begin + k < n) {
            sum += work[begin + k].count;
        }
    }
    scan[lid] = sum;
    workgroupBarrier();

    for (var stride = 1u; stride < SCAN_WIDTH; stride = stride * 2u) {
        var add = 0u;
        if (lid >= stride) {
            add = scan[lid - stride];
        }
        workgroupBarrier();
        scan[lid] = scan[lid] + add;
        workgroupBarrier();
    }

    var running = scan[lid] - sum;
    for (var k = 0u; k < per; k++) {
        if (begin + k < n) {
            work[begin + k].offset = running;
            running += work[begin + k].count;
        }
    }

    if (n > 0u && lid == (n - 1u) / per) {
        let points = running + n;
        totals.index_count = running * 6u;
        totals.instance_count = 1u;
        totals.first_index = 0u;
        totals.base_vertex = 0;
        totals.first_instance = 0u;
        totals.point_count = points;
        totals.vertex_count = points * 2u;
        totals.subdivision_count = running;
    }
}

@compute @workgroup_size(64)
fn cs_subdivide(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let s = linear_index(gid, groups);
    if (s >= params.segment_count) {
        return;
    }
    let seg = segments[s];
    let w = work[s];
    let a = coarse[seg.start_vertex].xyz;
    let b = coarse[seg.end_vertex].xyz;
    let base = w.offset + s;
    for (var i = 0u; i <= w.count; i++) {
        let t = f32(i) / f32(w.count);
        points[base + i] = DensePoint(a * (1.0 - t) + b * t, s);
    }
}

@compute @workgroup_size(64)
fn cs_mesh(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let i = linear_index(gid, groups);
    if (i >= totals.point_count) {
        return;
    }
    let pt = points[i];
    let s = pt.segment;
    let seg = segments[s];
    let w = work[s];
    let local_index = i - (w.offset + s);

    let dir = segment_dir(s);
    var tangent = dir;
    if (local_index == 0u && s > 0u) {
        let prev = segments[s - 1u];
        if (prev.feature_index == seg.feature_index && prev.end_vertex == seg.start_vertex) {
            tangent = joined(dir, segment_dir(s - 1u));
        }
    }
    if (local_index == w.count && s + 1u < params.segment_count) {
        let next = segments[s + 1u];
        if (next.feature_index == seg.feature_index && next.start_vertex == seg.end_vertex) {
            tangent = joined(dir, segment_dir(s + 1u));
        }
    }

    let miter = perp(tangent);
    let scale = min(1.0 / max(dot(miter, perp(dir)), 1e-6), MITER_LIMIT);
    let style = styles[seg.feature_index];
    let offset = miter * style.half_width * scale;
    let up = vec4<f32>(0.0, 0.0, 1.0, 0.0);

    let center = pt.position.xy;
    let z = pt.position.z;
    vertices[2u * i] = OutputVertex(vec4<f32>(center + offset, z, 1.0), up, style.color);
    vertices[2u * i + 1u] = OutputVertex(vec4<f32>(center - offset, z, 1.0), up, style.color);

    if (local_index < w.count) {
        let base = 6u * (i - s);
        let v = 2u * i;
        indices[base] = v;
        indices[base + 1u] = v + 1u;
        indices[base + 2u] = v + 2u;
        indices[base + 3u] = v + 1u;
        indices[base + 4u] = v + 3u;
        indices[base + 5u] = v + 2u;
    }
}

@compute @workgroup_size(64)
fn cs_drape(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let v = linear_index(gid, groups);
    if (v >= totals.vertex_count) {
        return;
    }
    var vtx = vertices[v];
    if (abs(vtx.position.z) > params.z_epsilon) {
        return;
    }
    let uv = to_uv(vtx.position.xy);
    if (!in_bounds(uv)) {
        return;
    }

    // two vertices per dense point
    let style = styles[segments[points[v / 2u].segment].feature_index];
    let lift = params.depth_offset + style.depth_offset;

    let scale = params.exaggeration / HEIGHT_DIVISOR;
    let h = clamp(sample_height(uv), 0.0, MAX_HEIGHT);
    vtx.position.z = h * scale + lift;

    let dims = vec2<f32>(textureDimensions(height_tex, 0));
    let texel = 1.0 / dims;
    let size = params.bounds_max - params.bounds_min;
    let west = sample_height(uv - vec2<f32>(texel.x, 0.0));
    let east = sample_height(uv + vec2<f32>(texel.x, 0.0));
    let north = sample_height(uv - vec2<f32>(0.0, texel.y));
    let south = sample_height(uv + vec2<f32>(0.0, texel.y));
    let dzdx = (east - west) * scale / (2.0 * texel.x * size.x);
    let dzdy = (north - south) * scale / (2.0 * texel.y * size.y);
    vtx.normal = vec4<f32>(normalize(vec3<f32>(-dzdx, -dzdy, 1.0)), 0.0);

    vertices[v] = vtx;
}
"#;
