// build.rs

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Libraries needed for the Wayland/EGL drawing path, keyboard handling and
    // glyph rasterization. pkg-config first, plain link flags as a fallback.
    let libraries = [
        "wayland-client",
        "wayland-egl",
        "egl",
        "glesv2",
        "xkbcommon",
        "freetype2",
    ];

    let mut pkg_config_success = true;

    for lib in &libraries {
        if let Err(e) = pkg_config::probe_library(lib) {
            eprintln!(
                "pkg-config failed for library '{}': {}. Falling back to manual linking.",
                lib, e
            );
            pkg_config_success = false;
            break;
        }
    }

    if !pkg_config_success {
        println!("cargo:rustc-link-lib=wayland-client");
        println!("cargo:rustc-link-lib=wayland-egl");
        println!("cargo:rustc-link-lib=EGL");
        println!("cargo:rustc-link-lib=GLESv2");
        println!("cargo:rustc-link-lib=xkbcommon");
        println!("cargo:rustc-link-lib=freetype");

        println!("cargo:rustc-link-search=/usr/lib");
        eprintln!(
            "Manual linking flags applied. Ensure wayland, EGL, GLESv2, xkbcommon and FreeType development libraries are installed."
        );
    } else {
        eprintln!("pkg-config successfully found libraries. Linking configured automatically.");
    }
}
