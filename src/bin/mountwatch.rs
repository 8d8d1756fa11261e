use anyhow::Result;

fn main() -> Result<()> {
    mountwatch::cli::run()
}
