#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shift_tracker_lib::run().await
}
