#![no_main]

use libfuzzer_sys::fuzz_target;
use termgate::codec::read_header;
use termgate::connection::Role;
use termgate::transport::InputTransport;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;

// Feeds arbitrary bytes straight at the frame header parser (spec §4.2),
// the way a malicious or broken peer would. `read_header` must never panic
// and must resolve to either a valid header or an `Error`, regardless of
// what's on the wire.
fuzz_target!(|data: &[u8]| {
    let runtime = Runtime::new().unwrap();
    let data = data.to_vec();

    runtime.block_on(async move {
        let (mut client, server) = tokio::io::duplex(data.len().max(1) + 16);
        let write_task = tokio::spawn(async move {
            let _ = client.write_all(&data).await;
            drop(client);
        });

        let (read_half, _write_half) = tokio::io::split(server);
        let mut transport = InputTransport::new(read_half);
        let _ = read_header(&mut transport, Role::Server).await;

        let _ = write_task.await;
    });
});
