//! Drives the installed binary end to end against a temp `.pyc`.

use std::io::Write;
use std::process::Command;

fn pyc_image() -> Vec<u8> {
    // Header (3.8) + marshalled module compiling to `x = 5`.
    let mut out = Vec::new();
    out.extend(3413u16.to_le_bytes());
    out.extend([0x0D, 0x0A]);
    out.extend([0u8; 12]);

    out.push(b'c');
    for field in [0u32, 0, 0, 0, 1, 0x40] {
        out.extend(field.to_le_bytes());
    }
    out.push(b's');
    out.extend(8u32.to_le_bytes());
    out.extend([100, 0, 90, 0, 100, 1, 83, 0]);
    out.extend([b')', 2, b'i']);
    out.extend(5u32.to_le_bytes());
    out.push(b'N');
    out.extend([b')', 1, b'z', 1, b'x']);
    for _ in 0..3 {
        out.extend([b')', 0]);
    }
    out.extend([b'z', 4]);
    out.extend(b"m.py");
    out.extend([b'z', 8]);
    out.extend(b"<module>");
    out.extend(1u32.to_le_bytes());
    out.push(b's');
    out.extend(0u32.to_le_bytes());
    out
}

fn write_temp_pyc() -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new()
        .suffix(".pyc")
        .tempfile()
        .expect("temp file");
    f.write_all(&pyc_image()).expect("write");
    f
}

#[test]
fn decompile_subcommand() {
    let f = write_temp_pyc();
    let out = Command::new(env!("CARGO_BIN_EXE_depyc"))
        .arg("decompile")
        .arg(f.path())
        .output()
        .expect("run binary");
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("# Source Generated by depyc"));
    assert!(text.contains("x = 5"));
}

#[test]
fn disasm_subcommand() {
    let f = write_temp_pyc();
    let out = Command::new(env!("CARGO_BIN_EXE_depyc"))
        .arg("disasm")
        .arg(f.path())
        .output()
        .expect("run binary");
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("[Disassembly]"));
    assert!(text.contains("STORE_NAME"));
}

#[test]
fn output_file_option() {
    let f = write_temp_pyc();
    let dir = tempfile::tempdir().expect("temp dir");
    let dest = dir.path().join("out.py");
    let out = Command::new(env!("CARGO_BIN_EXE_depyc"))
        .arg("decompile")
        .arg(f.path())
        .arg("-o")
        .arg(&dest)
        .output()
        .expect("run binary");
    assert!(out.status.success());
    assert!(out.stdout.is_empty());
    let written = std::fs::read_to_string(&dest).expect("output file");
    assert!(written.contains("x = 5"));
}

#[test]
fn bad_magic_exits_nonzero() {
    let mut f = tempfile::NamedTempFile::new().expect("temp file");
    f.write_all(b"not a pyc file").expect("write");
    let out = Command::new(env!("CARGO_BIN_EXE_depyc"))
        .arg("decompile")
        .arg(f.path())
        .output()
        .expect("run binary");
    assert_eq!(out.status.code(), Some(1));
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("error:"));
}

#[test]
fn raw_code_object_requires_version() {
    let f = write_temp_pyc();
    let out = Command::new(env!("CARGO_BIN_EXE_depyc"))
        .arg("decompile")
        .arg(f.path())
        .arg("-c")
        .output()
        .expect("run binary");
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn raw_code_object_with_version() {
    // Strip the 16-byte header to get the bare marshalled object.
    let image = pyc_image();
    let mut f = tempfile::NamedTempFile::new().expect("temp file");
    f.write_all(&image[16..]).expect("write");
    let out = Command::new(env!("CARGO_BIN_EXE_depyc"))
        .arg("decompile")
        .arg(f.path())
        .args(["-c", "-v", "3.8"])
        .output()
        .expect("run binary");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("x = 5"));
}
