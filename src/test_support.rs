//! In-process stand-ins for the upstream sites.

use std::net::TcpListener as StdTcpListener;

use axum::Router;

/// Serves `app` on an ephemeral loopback port from a background runtime and
/// returns its base URL (no trailing slash). The server lives until the test
/// process exits.
pub(crate) fn spawn_upstream(app: Router) -> String {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });
    format!("http://{addr}")
}
