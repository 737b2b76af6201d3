use std::process::Command;

#[test]
fn cli_compiles_without_warnings() {
    let status = Command::new(env!("CARGO"))
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .args(["check", "--quiet", "--bin", "convoy"])
        .status()
        .expect("failed to invoke cargo check for convoy CLI binary");

    assert!(status.success(), "cargo check --bin convoy should succeed");
}
