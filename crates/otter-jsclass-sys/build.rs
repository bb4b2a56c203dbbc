use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=JSC_LIB_DIR");
    println!("cargo:rerun-if-env-changed=JSC_LIB_NAME");

    // Type definitions alone need no native library.
    if env::var_os("CARGO_FEATURE_LINK").is_none() {
        return;
    }

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    match target_os.as_str() {
        "macos" | "ios" => configure_apple(),
        "linux" | "android" => configure_shared("javascriptcoregtk-4.1"),
        "windows" => configure_shared("JavaScriptCore"),
        other => panic!("Unsupported OS for JSC: {}", other),
    }
}

fn configure_apple() {
    // Apple platforms ship JavaScriptCore as a system framework
    println!("cargo:rustc-link-lib=framework=JavaScriptCore");

    if let Ok(sdk_path) = std::process::Command::new("xcrun")
        .args(["--show-sdk-path"])
        .output()
    {
        let sdk_path = String::from_utf8_lossy(&sdk_path.stdout);
        let sdk_path = sdk_path.trim();
        if !sdk_path.is_empty() {
            println!(
                "cargo:rustc-link-search=framework={}/System/Library/Frameworks",
                sdk_path
            );
        }
    }
}

fn configure_shared(default_name: &str) {
    if let Ok(dir) = env::var("JSC_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
    }
    let name = env::var("JSC_LIB_NAME").unwrap_or_else(|_| default_name.to_string());
    println!("cargo:rustc-link-lib=dylib={}", name);
}
