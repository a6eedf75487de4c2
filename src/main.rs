fn main() {
    if let Err(err) = theloop_lib::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
