use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use termgate::connection::{Connection, ContentMode, Role};
use termgate::frame::OpCode;

// Measures round-trip message latency over this crate's framing stack
// directly (client `Connection` <-> server `Connection` joined by an
// in-process duplex pipe), standing in for the teacher's real-socket load
// generator since this gateway has no listening TCP server of its own to
// dial — the transport it frames is a PTY, not a socket accept loop.
#[tokio::main]
async fn main() {
    let connection_count = 100;
    let message_count = 1000;
    let message_size = 16384;

    let (tx, mut rx) = mpsc::unbounded_channel();

    for _ in 0..connection_count {
        let tx = tx.clone();
        tokio::spawn(async move {
            let (client_half, server_half) = tokio::io::duplex(message_size * 4);
            let (client_r, client_w) = tokio::io::split(client_half);
            let (server_r, server_w) = tokio::io::split(server_half);

            let mut client = Connection::new(client_r, client_w, Role::Client, ContentMode::Binary, None, 0);
            let mut server = Connection::new(server_r, server_w, Role::Server, ContentMode::Binary, None, 0);

            tokio::spawn(async move {
                while let Ok(Some(mut message)) = server.read_message().await {
                    let bytes = message.grab();
                    if server.send_message(OpCode::Binary, &bytes).await.is_err() {
                        break;
                    }
                }
            });

            let payload = vec![b'a'; message_size];
            let start = Instant::now();

            for _ in 0..message_count {
                client.send_message(OpCode::Binary, &payload).await.unwrap();
                let _ = client.read_message().await.unwrap();
            }

            let duration = start.elapsed();
            tx.send(duration).unwrap();
        });
    }

    drop(tx);

    let mut total_duration = Duration::new(0, 0);
    while let Some(duration) = rx.recv().await {
        total_duration += duration;
    }

    let avg_latency = total_duration / (connection_count as u32 * message_count as u32);
    println!("Average Latency: {:?}", avg_latency);
}
