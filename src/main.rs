fn main() {
    if let Err(err) = testdeck_lib::run() {
        eprintln!("testdeck: {err}");
        std::process::exit(1);
    }
}
