#![forbid(unsafe_code)]

fn main() {
    // Git derived values are left out so the crate builds outside a checkout.
    build_data::set_RUSTC_VERSION();

    // Tells cargo not to rebuild build.rs during debug builds when other files change.
    // This speeds up development builds.
    //build_data::no_debug_rebuilds();
}
