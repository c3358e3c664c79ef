fn main() {
    if let Err(e) = helix_core::run() {
        eprintln!("helix-core: {e}");
        std::process::exit(1);
    }
}
