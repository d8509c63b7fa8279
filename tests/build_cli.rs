use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use serde_json::{Value, json};
use tempfile::TempDir;

fn skelc(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_skelc"))
        .args(args)
        .output()
        .expect("failed to run skelc")
}

fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string_pretty(value).expect("json")).expect("write fixture");
    path
}

/// Appends a closed axis-aligned box bound to `bone` to a source document.
fn push_box(vertices: &mut Vec<Value>, faces: &mut Vec<Value>, min: [f32; 3], max: [f32; 3], bone: usize) {
    let base = vertices.len();
    for index in 0..8 {
        let pick = |axis: usize| if index & (1 << axis) == 0 { min[axis] } else { max[axis] };
        vertices.push(json!({
            "position": [pick(0), pick(1), pick(2)],
            "normal": [0.0, 0.0, 1.0],
            "weights": [[bone, 1.0]]
        }));
    }
    for [a, b, c, d] in [
        [0, 2, 3, 1],
        [4, 5, 7, 6],
        [0, 1, 5, 4],
        [2, 6, 7, 3],
        [0, 4, 6, 2],
        [1, 3, 7, 5],
    ] {
        faces.push(json!([base + a, base + b, base + c]));
        faces.push(json!([base + a, base + c, base + d]));
    }
}

/// A single-bone prop made of `count` separate 2x2x2 crates in a row.
fn crate_row(dir: &Path, count: usize) -> PathBuf {
    let mut vertices = Vec::new();
    let mut faces = Vec::new();
    for index in 0..count {
        let x = index as f32 * 4.0;
        push_box(&mut vertices, &mut faces, [x, 0.0, 0.0], [x + 2.0, 2.0, 2.0], 0);
    }
    write_json(
        dir,
        "crates.json",
        &json!({
            "bones": [{ "name": "root" }],
            "vertices": vertices,
            "meshes": [{ "name": "crates", "faces": faces }]
        }),
    );
    write_json(
        dir,
        "crates_asset.json",
        &json!({
            "name": "crates",
            "author": "props team",
            "sources": [{ "path": "crates.json" }],
            "collision": { "mode": "single_body", "max_convex": 40 }
        }),
    )
}

/// Box with a hinged lid that opens a quarter turn over 30 frames.
fn hinged_box(dir: &Path) -> PathBuf {
    let mut vertices = Vec::new();
    let mut faces = Vec::new();
    push_box(&mut vertices, &mut faces, [-4.0, -4.0, 0.0], [4.0, 4.0, 8.0], 0);
    push_box(&mut vertices, &mut faces, [-4.0, -4.0, 8.0], [4.0, 4.0, 10.0], 1);
    let frames: Vec<Value> = (0..30)
        .map(|frame| {
            let angle = frame as f32 / 29.0 * std::f32::consts::FRAC_PI_2;
            json!([
                { "position": [0.0, 0.0, 0.0] },
                { "position": [0.0, -4.0, 8.0], "rotation": [0.0, 0.0, angle] }
            ])
        })
        .collect();
    write_json(
        dir,
        "chest.json",
        &json!({
            "bones": [
                { "name": "base" },
                { "name": "lid", "parent": "base", "position": [0.0, -4.0, 8.0] }
            ],
            "vertices": vertices,
            "meshes": [{ "name": "chest", "faces": faces }],
            "animations": [{ "name": "open", "fps": 30.0, "frames": frames }]
        }),
    );
    write_json(
        dir,
        "chest_asset.json",
        &json!({
            "name": "chest",
            "sources": [{ "path": "chest.json" }],
            "collision": { "total_mass": 20.0 },
            "animations": [{ "name": "open", "source": "chest" }]
        }),
    )
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn given_flat_sign_when_building_then_geometry_error_names_the_source() {
    let dir = TempDir::new().expect("tempdir");
    write_json(
        dir.path(),
        "sign.json",
        &json!({
            "bones": [{ "name": "root" }],
            "vertices": [
                { "position": [0.0, 0.0, 0.0], "weights": [[0, 1.0]] },
                { "position": [24.0, 0.0, 0.0], "weights": [[0, 1.0]] },
                { "position": [24.0, 12.0, 0.2], "weights": [[0, 1.0]] },
                { "position": [0.0, 12.0, 0.0], "weights": [[0, 1.0]] }
            ],
            "meshes": [{ "name": "face", "faces": [[0, 1, 2], [0, 2, 3]] }]
        }),
    );
    let script = write_json(
        dir.path(),
        "sign_asset.json",
        &json!({
            "name": "sign",
            "sources": [{ "path": "sign.json" }],
            "collision": { "mode": "single_body" }
        }),
    );

    let output = skelc(&["build", script.to_str().unwrap()]);

    assert!(!output.status.success());
    let message = stderr(&output);
    assert!(message.contains("asset \"sign\""), "{message}");
    assert!(message.contains("sign has 2-dimensional geometry"), "{message}");
    assert!(!dir.path().join("sign.phy").exists());
    assert!(!dir.path().join("sign.skan").exists());
}

#[test]
fn given_41_pieces_against_40_when_building_then_costly_model_fails() {
    let dir = TempDir::new().expect("tempdir");
    let script = crate_row(dir.path(), 41);

    let output = skelc(&["build", script.to_str().unwrap()]);

    assert!(!output.status.success());
    let message = stderr(&output);
    assert!(message.contains("costly collision model"), "{message}");
    assert!(message.contains("41 parts - 40 allowed"), "{message}");
    assert!(!dir.path().join("crates.phy").exists());
}

#[test]
fn given_41_pieces_with_override_when_building_then_warning_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let script = crate_row(dir.path(), 41);
    let report_path = dir.path().join("report.json");

    let output = skelc(&[
        "build",
        script.to_str().unwrap(),
        "--allow-costly",
        "--report",
        report_path.to_str().unwrap(),
    ]);

    assert!(output.status.success(), "{}", stderr(&output));
    assert!(dir.path().join("crates.phy").exists());
    let report: Value = serde_json::from_str(&fs::read_to_string(&report_path).expect("report")).expect("json");
    assert_eq!(report["convex_pieces"], 41);
    assert_eq!(report["solid_count"], 1);
    let issues = report["issues"].as_array().expect("issues");
    assert!(issues.iter().any(|issue| issue["severity"] == "Warning"
        && issue["code"] == "costly_collision_model"));
    assert!(stdout(&output).contains("[warning]"));
}

#[test]
fn given_40_pieces_when_building_then_collision_file_is_written() {
    let dir = TempDir::new().expect("tempdir");
    let script = crate_row(dir.path(), 40);
    let out_dir = dir.path().join("out");

    let output = skelc(&["build", script.to_str().unwrap(), "--out-dir", out_dir.to_str().unwrap()]);

    assert!(output.status.success(), "{}", stderr(&output));
    let phy = fs::read(out_dir.join("crates.phy")).expect("phy");
    assert_eq!(i32::from_le_bytes(phy[0..4].try_into().unwrap()), 16);
    assert_eq!(i32::from_le_bytes(phy[8..12].try_into().unwrap()), 1);
    assert_eq!(phy.last(), Some(&0));
    let text = String::from_utf8_lossy(&phy);
    assert!(text.contains("\"name\" \"crates\""));
    assert!(text.contains("editparams {"));
}

#[test]
fn given_quarter_turn_clip_when_built_and_inspected_then_curve_is_monotonic() {
    let dir = TempDir::new().expect("tempdir");
    let script = hinged_box(dir.path());

    let build = skelc(&["build", script.to_str().unwrap()]);
    assert!(build.status.success(), "{}", stderr(&build));

    let skan = dir.path().join("chest.skan");
    let phy = fs::read(dir.path().join("chest.phy")).expect("phy");
    let anim = fs::read(&skan).expect("skan");
    assert_eq!(&anim[..4], b"SKAN");
    assert_eq!(phy[12..16], anim[8..12]);

    let inspect = skelc(&["inspect", skan.to_str().unwrap(), "--json"]);
    assert!(inspect.status.success(), "{}", stderr(&inspect));
    let decoded: Value = serde_json::from_slice(&inspect.stdout).expect("json");
    let clip = &decoded["clips"][0];
    assert_eq!(clip["name"], "open");
    assert_eq!(clip["frame_count"], 30);
    let lid = &decoded["bones"][1];
    assert_eq!(lid["name"], "lid");
    let scale = lid["rotation_scale"][2].as_f64().expect("scale");

    let track = &clip["tracks"][0];
    assert_eq!(track["bone"], 1);
    assert_eq!(track["channels"][0][0], 5);
    let values: Vec<i64> = track["channels"][0][1]
        .as_array()
        .expect("values")
        .iter()
        .map(|value| value.as_i64().expect("i16"))
        .collect();
    assert_eq!(values.len(), 30);
    assert!(values.windows(2).all(|pair| pair[1] >= pair[0]));
    for (frame, value) in values.iter().enumerate() {
        let expected = frame as f64 / 29.0 * std::f64::consts::FRAC_PI_2;
        assert!((*value as f64 * scale - expected).abs() <= scale * 1.01);
    }

    let text = skelc(&["inspect", skan.to_str().unwrap()]);
    assert!(stdout(&text).contains("open: 30 frames at 30 fps"));
}

#[test]
fn given_valid_script_when_checked_then_nothing_is_written() {
    let dir = TempDir::new().expect("tempdir");
    let script = hinged_box(dir.path());

    let output = skelc(&["check", script.to_str().unwrap()]);

    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("OK"));
    assert!(!dir.path().join("chest.skan").exists());
    assert!(!dir.path().join("chest.phy").exists());
}

#[test]
fn given_unknown_constraint_bone_when_checked_then_input_error_names_it() {
    let dir = TempDir::new().expect("tempdir");
    let script = hinged_box(dir.path());
    let mut document: Value = serde_json::from_str(&fs::read_to_string(&script).expect("script")).expect("json");
    document["collision"]["constraints"] = json!([
        { "joint": "hinge", "axis": "z", "kind": "limit", "min": 0.0, "max": 90.0 }
    ]);
    write_json(dir.path(), "chest_asset.json", &document);

    let output = skelc(&["check", script.to_str().unwrap()]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("unresolved bone \"hinge\""), "{}", stderr(&output));
}

#[test]
fn given_new_path_when_init_runs_then_default_script_is_written_once() {
    let dir = TempDir::new().expect("tempdir");
    let script = dir.path().join("asset.json");

    let first = skelc(&["init", script.to_str().unwrap()]);
    assert!(first.status.success(), "{}", stderr(&first));
    let document: Value = serde_json::from_str(&fs::read_to_string(&script).expect("script")).expect("json");
    assert_eq!(document["name"], "model");
    assert_eq!(document["collision"]["max_convex"], 40);

    let second = skelc(&["init", script.to_str().unwrap()]);
    assert!(!second.status.success());
    assert!(stderr(&second).contains("already exists"));

    let forced = skelc(&["init", script.to_str().unwrap(), "--force"]);
    assert!(forced.status.success());
}
