// tests/test_gpu.rs — wgpu backend against the CPU reference.
//
// Each check runs in a child `cargo test` process and reports success by
// printing GPU_TEST_OK, so a driver that crashes during process teardown
// does not fail the suite. All tests are `#[ignore]`d; run them with
//
//   cargo test --test test_gpu -- --ignored

use glam::Vec3;

use rays::{CpuDevice, DeviceProfile, GpuDevice, PipelineSettings, Scene, TraceProcessor};

fn run_gpu_test_in_subprocess(test_name: &str) -> String {
    let output = std::process::Command::new("cargo")
        .args(["test", "--test", "test_gpu", "--", test_name, "--exact", "--ignored", "--nocapture"])
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn subprocess for {test_name}: {e}"));
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    print!("{stdout}");
    eprint!("{stderr}");
    stdout + &stderr
}

fn test_scene() -> Scene {
    toml::from_str(
        r#"
        sky_col = [0.3, 0.5, 0.9]
        camera = { pos = [0.0, 1.0, 5.0], dir = [0.0, -0.1, -1.0], fov = 60.0 }
        [[spheres]]
        pos = [0.0, 1.0, 0.0]
        rad = 1.0
        mat = { col = [0.9, 0.3, 0.2], reflectivity = 0.4, shininess = 16.0 }
        [[planes]]
        pos = [0.0, 0.0, 0.0]
        nor = [0.0, 1.0, 0.0]
        [[lights]]
        pos = [3.0, 6.0, 4.0]
        intensity = 800.0
        "#,
    )
    .expect("valid scene")
}

#[test]
#[ignore = "GPU integration: run via outer subprocess wrapper"]
fn inner_empty_scene_is_sky() {
    let sky = Vec3::new(0.25, 0.5, 0.75);
    let gpu = GpuDevice::new_with_profile(DeviceProfile::Constrained).unwrap();
    let settings = PipelineSettings { width: 4, height: 4, aa: 2 };
    let mut p = TraceProcessor::new(gpu, &Scene::empty(sky), settings).unwrap();
    let pixels = p.render().unwrap().to_vec();
    assert!(pixels.iter().all(|&px| px == rays::image::pack_rgb(sky)), "{pixels:x?}");
    println!("GPU_TEST_OK");
}

#[test]
#[ignore = "GPU integration: run via outer subprocess wrapper"]
fn inner_matches_cpu_reference() {
    let scene = test_scene();
    let settings = PipelineSettings { width: 32, height: 24, aa: 2 };
    let mut cpu = TraceProcessor::new(CpuDevice::new(), &scene, settings).unwrap();
    let mut gpu = TraceProcessor::new(GpuDevice::new().unwrap(), &scene, settings).unwrap();

    // Two frames: the second must not accumulate onto the first.
    for _ in 0..2 {
        cpu.render().unwrap();
        gpu.render().unwrap();
    }
    let a = cpu.trace_result().unwrap().to_vec();
    let b = gpu.trace_result().unwrap().to_vec();
    let worst = a.iter().zip(&b).map(|(x, y)| (x - y).abs()).fold(0.0f32, f32::max);
    assert!(worst < 1e-3, "max channel difference {worst}");

    let pa = cpu.image_result().unwrap().to_vec();
    let pb = gpu.image_result().unwrap().to_vec();
    for (x, y) in pa.iter().zip(&pb) {
        let (x, y) = (rays::image::unpack_rgb(*x), rays::image::unpack_rgb(*y));
        for c in 0..3 {
            assert!(x[c].abs_diff(y[c]) <= 1, "{x:?} vs {y:?}");
        }
    }
    println!("GPU_TEST_OK");
}

#[test]
#[ignore = "requires a GPU adapter"]
fn test_empty_scene_is_sky() {
    let out = run_gpu_test_in_subprocess("inner_empty_scene_is_sky");
    assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
}

#[test]
#[ignore = "requires a GPU adapter"]
fn test_matches_cpu_reference() {
    let out = run_gpu_test_in_subprocess("inner_matches_cpu_reference");
    assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
}
