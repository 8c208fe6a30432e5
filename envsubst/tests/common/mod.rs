use std::path::PathBuf;

/// Return the cargo directory where binaries built by the application will reside.
pub fn cargo_dir() -> PathBuf {
    if let Some(bin_path) = std::env::var_os("CARGO_BIN_PATH") {
        PathBuf::from(bin_path)
    } else if let Ok(mut path) = std::env::current_exe() {
        path.pop();
        if path.ends_with("deps") {
            path.pop();
        }
        path
    } else {
        panic!("CARGO_BIN_PATH not set and binary not inferred");
    }
}

/// The path to the envsubst binary built for this test run.
pub fn envsubst_bin() -> PathBuf {
    cargo_dir().join("envsubst")
}
