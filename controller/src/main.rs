#[tokio::main]
async fn main() -> anyhow::Result<()> {
    heater_controller::host::run().await
}
