use gate_core::backend::{BackendStream, ChannelBackendStream};

/// Stands in for a real backend service: echoes every forwarded message straight back to the
/// tunnel that sent it. Lets the binary run and be driven by a bare TCP client without any
/// separate backend process, since the real gRPC backend transport is out of scope (see
/// SPEC_FULL.md §4.I).
pub fn spawn_echo(stream: ChannelBackendStream) {
    tokio::spawn(async move {
        loop {
            match stream.recv().await {
                Ok(msg) => {
                    if stream.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}
