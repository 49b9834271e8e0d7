use std::fs;
use std::path::Path;

fn ensure_bundled_tools_placeholder() {
    let tools_dir = Path::new("resources/tools/7z");
    let placeholder = tools_dir.join(".keep");

    if let Err(error) = fs::create_dir_all(tools_dir) {
        panic!("failed to create bundled tools directory: {error}");
    }

    if !placeholder.exists() {
        if let Err(error) = fs::write(&placeholder, b"bundled 7-Zip placeholder\n") {
            panic!("failed to create bundled tools placeholder file: {error}");
        }
    }
}

fn main() {
    ensure_bundled_tools_placeholder();
    #[cfg(feature = "desktop")]
    tauri_build::build();
}
