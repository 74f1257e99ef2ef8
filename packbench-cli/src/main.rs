//! packbench binary entry point

fn main() -> anyhow::Result<()> {
    let _ = std::fs::write(format!("/tmp/pbtest/worker-{}.touch", std::process::id()), "started");
    packbench_cli::run()
}
