use log::*;

mod echo_client;

use echo_client::{ClientTarget, EchoClient};

const DEFAULT_TARGET: &str = "tcp:127.0.0.1:8110";
const PACKET_COUNT: usize = 10_000;
const PACKET_SIZE: usize = 1024;

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let target: ClientTarget = args
        .next()
        .unwrap_or_else(|| DEFAULT_TARGET.to_string())
        .parse()
        .expect("Invalid target, expected tcp:<addr>, unix:<path> or vsock:<cid>:<port>");
    let count = args
        .next()
        .map(|s| s.parse().expect("Invalid packet count"))
        .unwrap_or(PACKET_COUNT);
    let size = args
        .next()
        .map(|s| s.parse().expect("Invalid packet size"))
        .unwrap_or(PACKET_SIZE);

    info!("Echoing {} packets of {} bytes...", count, size);
    let report = EchoClient::new(target)
        .run(count, size)
        .expect("Echo run failed");

    let secs = report.elapsed.as_secs_f64();
    info!("=== Echo Complete ===");
    info!("Packets: {}", report.packets);
    info!("Total received: {} KB", report.bytes / 1024);
    info!("Time: {:.2} seconds", secs);
    info!("Speed: {:.2} KB/s", (report.bytes as f64 / 1024.0) / secs);
    info!("Rate: {:.0} packets/s", report.packets as f64 / secs);
}
