use log::*;

mod echo_server;

use echo_server::{EchoServer, ServerTarget};

const DEFAULT_TARGET: &str = "tcp:127.0.0.1:8110";

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let target: ServerTarget = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_TARGET.to_string())
        .parse()
        .expect("Invalid target, expected tcp:<addr>, unix:<path> or vsock:<cid>:<port>");

    let server = EchoServer::new(target);
    tokio::select! {
        res = server.run() => {
            if let Err(e) = res {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    server.shutdown();
}
