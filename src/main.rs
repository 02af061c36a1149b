use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    s7panel::boot::init_logger();
    let matches = s7panel::cli::parse_args();

    if let Err(err) = s7panel::cli::run(&matches).await {
        log::error!("s7panel exited with error: {err:#}");
        return Err(err);
    }
    Ok(())
}
