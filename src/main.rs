use anyhow::Result;
use mediacheck::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run()
}
