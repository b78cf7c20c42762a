fn main() {
    // Native linking only matters when the vosk backend is enabled.
    if std::env::var_os("CARGO_FEATURE_VOSK").is_none() {
        return;
    }

    if let Some(dir) = std::env::var_os("VOSK_LIB_DIR") {
        println!(
            "cargo:rustc-link-search=native={}",
            std::path::PathBuf::from(dir).display()
        );
    }
    println!("cargo:rerun-if-env-changed=VOSK_LIB_DIR");
}
