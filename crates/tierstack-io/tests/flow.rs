//! End-to-end run of the file-level flow on a two-cell design: build the
//! 3D technology, partition, merge the tiers and split the result again.

use std::path::Path;

use serde_json::json;

use tierstack_core::merge::MergeMode;
use tierstack_io::config::FlowConfig;
use tierstack_io::flow::{self, design_path, BLOCK_LIBRARY};
use tierstack_io::tables::write_partitions;
use tierstack_io::{JsonFormat, LayoutFormat, TierTable};

fn write(path: &Path, value: serde_json::Value) {
    std::fs::write(path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
}

fn routing(name: &str, direction: &str, width: f64) -> serde_json::Value {
    json!({"name": name, "type": "ROUTING", "direction": direction,
           "width": width, "spacing": width, "pitch": [0.2]})
}

fn cut(name: &str) -> serde_json::Value {
    json!({"name": name, "type": "CUT", "width": 0.07, "spacing": 0.07})
}

fn via(name: &str, bottom: &str, cut: &str, top: &str) -> serde_json::Value {
    let block = |layer: &str, h: f64| json!({"layer": layer, "shapes": [{"rect": [-h, -h, h, h]}]});
    json!({"name": name, "default": true,
           "layers": [block(bottom, 0.07), block(cut, 0.035), block(top, 0.07)]})
}

fn cell(name: &str, width: f64) -> serde_json::Value {
    json!({
        "name": name, "class": "CORE", "site": "core", "size": [width, 1.4],
        "pins": [
            {"name": "A", "direction": "INPUT",
             "ports": [{"layer": "M1", "rect": [0.1, 0.6, 0.2, 0.8]}]},
            {"name": "Y", "direction": "OUTPUT",
             "ports": [{"layer": "M1", "rect": [width - 0.2, 0.6, width - 0.1, 0.8]}]}
        ],
        "obs": [{"layer": "M1", "rect": [0.0, 0.0, width, 0.1]}]
    })
}

fn write_inputs(dir: &Path) -> FlowConfig {
    write(
        &dir.join("tech.json"),
        json!({
            "version": "5.8", "bus_bit_chars": "[]", "divider_char": "/",
            "units_database": 1000.0, "manufacturing_grid": 0.005,
            "layers": [
                {"name": "OD", "type": "MASTERSLICE"},
                routing("M1", "HORIZONTAL", 0.1), cut("V1"),
                routing("M2", "VERTICAL", 0.14), cut("V2"),
                routing("M3", "HORIZONTAL", 0.14)
            ],
            "vias": [via("VIA12", "M1", "V1", "M2"), via("VIA23", "M2", "V2", "M3")],
            "sites": [{"name": "core", "class": "CORE", "size": [0.2, 1.4]}]
        }),
    );
    write(&dir.join("cells.json"), json!({"macros": [cell("INV", 0.6), cell("BUF", 0.8)]}));

    let port = |name: &str, direction: &str, x: i64| {
        json!({"name": name, "net": format!("n_{name}"), "direction": direction,
               "shapes": [{"layer": "M2", "rect": [-70.0, 0.0, 70.0, 140.0]}],
               "status": "FIXED", "location": [x, 0], "orient": "N"})
    };
    write(
        &dir.join("top.json"),
        json!({
            "design": "top", "units": 1000.0,
            "die_area": [[0, 0], [5000, 2800]],
            "rows": [
                {"name": "ROW_0", "site": "core", "origin": [0, 0], "num_x": 25, "step": [200.0, 0.0]},
                {"name": "ROW_1", "site": "core", "origin": [0, 1400], "orient": "FS",
                 "num_x": 25, "step": [200.0, 0.0]}
            ],
            "tracks": [{"axis": "Y", "start": 100, "num": 14, "step": 200, "layers": ["M1"]}],
            "components": [
                {"name": "u1", "macro": "INV", "status": "PLACED", "location": [1000, 0], "orient": "N"},
                {"name": "u2", "macro": "BUF", "status": "PLACED", "location": [3000, 0], "orient": "N"}
            ],
            "pins": [port("in", "INPUT", 70), port("out", "OUTPUT", 4930)],
            "nets": [
                {"name": "n_in", "connections": [["PIN", "in"], ["u1", "A"]]},
                {"name": "n_mid", "connections": [["u1", "Y"], ["u2", "A"]]},
                {"name": "n_out", "connections": [["u2", "Y"], ["PIN", "out"]]}
            ]
        }),
    );

    let mut config = FlowConfig::new("demo");
    config.stack.num_layers = vec![3, 3];
    config.artifacts.tech_files = vec![dir.join("tech.json"), dir.join("cells.json")];
    config.artifacts.design_file = Some(dir.join("top.json"));
    config.artifacts.partition_file = Some(dir.join("parts.txt"));
    config.artifacts.tech_3d_file = Some(dir.join("out").join("tech3d.json"));
    config.artifacts.tier_map_file = Some(dir.join("out").join("tiers.json"));
    config.artifacts.output_dir = Some(dir.join("out"));
    config
}

#[test]
fn test_make_3d_writes_technology_and_tier_table() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let config = write_inputs(dir.path());

    let tech3d = flow::run_make_3d(&JsonFormat, &config).unwrap();
    assert_eq!(tech3d.ilv_layers, ["ILV_T01"]);

    let table = TierTable::load(config.artifacts.tier_map_file.as_deref().unwrap()).unwrap();
    assert_eq!(table, TierTable::from_tech(&tech3d));

    let written = JsonFormat
        .parse_technology(&[config.artifacts.tech_3d_file.clone().unwrap()])
        .unwrap();
    let names: Vec<&str> = written.macros.iter().map(|m| m.name.as_str()).collect();
    assert!(names.contains(&"INV_T0") && names.contains(&"BUF_T1"));
    assert!(written.layers.iter().any(|l| l.name == "ILV_T01"));
}

#[test]
fn test_partition_merge_split_round_trip() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_inputs(dir.path());
    let parts = tierstack_core::Partitioning::from_assignments([
        ("in", 0),
        ("u1", 0),
        ("u2", 1),
        ("out", 1),
    ]);
    write_partitions(&dir.path().join("parts.txt"), &parts).unwrap();
    let out = dir.path().join("out");

    flow::run_make_3d(&JsonFormat, &config).unwrap();

    let set = flow::run_partition(&JsonFormat, &config).unwrap();
    assert!(set.designs.contains_key("top"));
    for name in ["part0", "part1", "top"] {
        assert!(design_path(&out, name).exists(), "{name} was not written");
    }
    assert!(out.join(BLOCK_LIBRARY).exists());

    config.top_name = Some("top3d".into());
    let merged = flow::run_merge(&JsonFormat, &config, MergeMode::Route).unwrap();
    assert_eq!(merged.name, "top3d");
    assert_eq!(merged.components["u1"].macro_name.as_deref(), Some("INV_T0"));
    assert_eq!(merged.components["u2"].macro_name.as_deref(), Some("BUF_T1"));
    assert!(merged.pins.keys().all(|p| !p.starts_with("FLOWGEN_PART_")));
    assert_eq!(merged.nets["n_mid"].component_pins.len(), 2);

    config.artifacts.design_file = Some(design_path(&out, "top3d"));
    config.artifacts.output_dir = Some(dir.path().join("split"));
    let split = flow::run_split(&JsonFormat, &config).unwrap();
    let bottom = split.design("part0").unwrap();
    let upper = split.design("part1").unwrap();
    assert_eq!(bottom.components["u1"].macro_name.as_deref(), Some("INV"));
    assert_eq!(upper.components["u2"].macro_name.as_deref(), Some("BUF"));
    assert_eq!(bottom.pins["in"].shapes[0].layer.as_deref(), Some("M2"));
    assert!(design_path(&dir.path().join("split"), "part1").exists());
}

#[test]
fn test_missing_partition_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_inputs(dir.path());
    let err = flow::run_partition(&JsonFormat, &config).unwrap_err();
    assert!(matches!(err, tierstack_io::FormatError::MissingFile(p) if p.ends_with("parts.txt")));
}
