#[tokio::main]
async fn main() {
    edutok::start_server().await;
}
